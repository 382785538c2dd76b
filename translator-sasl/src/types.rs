#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Plain,
    Login,
    CramMd5,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
        }
    }
}

/// Options of an AUTH command. Postfix sends a lot of them, we only
/// interpret the ones the flow needs and keep the others opaque.
#[derive(Clone, Debug)]
pub enum AuthOption {
    /// Unique session ID. Mainly used for logging.
    Session(u64),
    /// Local IP connected to by the client.
    LocalIp(String),
    /// Remote client IP
    RemoteIp(String),
    /// Remote user has secured transport to auth client (e.g. localhost, SSL, TLS).
    Secured(Option<String>),
    /// Ignore auth penalty tracking for this request
    NoPenalty,
    /// An unknown key
    UnknownPair(String, Vec<u8>),
    UnknownBool(Vec<u8>),
    /// Initial response for the mechanism, saves a CONT round trip
    Resp(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
}

#[derive(Debug)]
pub enum ClientCommand {
    /// Both sides must agree on the major version, minor is informative.
    Version(Version),
    /// CPID finishes the handshake from client.
    Cpid(u64),
    Auth {
        /// Connection-specific request identifier.
        id: u64,
        mech: Mechanism,
        /// Service requesting authentication, eg. smtp.
        service: String,
        options: Vec<AuthOption>,
    },
    Cont {
        /// Must match the <id> of the AUTH command.
        id: u64,
        /// Already decoded from base64
        data: Vec<u8>,
    },
}

#[derive(Debug)]
pub enum MechanismParameters {
    /// Transfers plaintext passwords
    PlainText,
    /// Subject to passive (dictionary) attack
    Dictionary,
    /// Subject to active (non-dictionary) attack
    Active,
}

#[derive(Debug, Clone)]
pub enum FailCode {
    /// Temporary internal failure
    TempFail,
    /// User is disabled (password may or may not have been correct)
    UserDisabled,
}

#[derive(Debug)]
pub enum ServerCommand {
    Version(Version),
    Spid(u64),
    Cuid(u64),
    Mech {
        kind: Mechanism,
        parameters: Vec<MechanismParameters>,
    },
    /// Connection-specific 128 bit cookie, sent in hex.
    Cookie([u8; 16]),
    /// DONE finishes the handshake from server.
    Done,

    Fail {
        id: u64,
        user_id: Option<String>,
        code: Option<FailCode>,
    },
    Cont {
        id: u64,
        data: Option<Vec<u8>>,
    },
    Ok {
        id: u64,
        user_id: Option<String>,
    },
}

/// What a client submitted, handed over to whoever checks credentials.
///
/// For PLAIN and LOGIN `secret` is the password and `challenge` is empty.
/// For CRAM-MD5 `secret` is the hex digest sent by the client and
/// `challenge` the exact bytes we issued.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub mechanism: Mechanism,
    pub username: String,
    pub secret: Vec<u8>,
    pub challenge: Vec<u8>,
}
