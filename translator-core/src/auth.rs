use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use md5::Md5;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

type HmacMd5 = Hmac<Md5>;

/// SASL mechanisms the translator knows how to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Plain,
    Login,
    CramMd5,
}

/// Username to plaintext password, read once at startup.
#[derive(Debug, Default, Clone)]
pub struct CredentialTable(HashMap<String, String>);

impl CredentialTable {
    /// One `username:password` record per line. Lines that do not split
    /// in exactly two fields are skipped.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut users = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let fields = line.split(':').collect::<Vec<_>>();
            if let [user, password] = fields.as_slice() {
                users.insert(user.to_string(), password.to_string());
            }
        }
        Ok(Self(users))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("unable to open credential file {:?}", path))?;
        let table = Self::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("unable to read credential file {:?}", path))?;
        tracing::info!(path=?path, "{} users loaded", table.len());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Users with an empty password can not log in.
    fn secret(&self, username: &str) -> Option<&str> {
        self.0
            .get(username)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl<S: Into<String>> FromIterator<(S, S)> for CredentialTable {
    fn from_iter<I: IntoIterator<Item = (S, S)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(u, p)| (u.into(), p.into()))
                .collect(),
        )
    }
}

pub struct Authenticator {
    table: CredentialTable,
}

impl Authenticator {
    pub fn new(table: CredentialTable) -> Self {
        Self { table }
    }

    /// Without any credential, submitters do not have to authenticate.
    pub fn is_open(&self) -> bool {
        self.table.is_empty()
    }

    /// `secret` is the password for PLAIN and LOGIN, the hex encoded
    /// digest for CRAM-MD5 in which case `challenge` is what was issued.
    ///
    /// Bad credentials are `Ok(false)`, only a digest that is not hex is
    /// an error.
    pub fn authenticate(
        &self,
        mechanism: Mechanism,
        username: &str,
        secret: &[u8],
        challenge: &[u8],
    ) -> Result<bool, AuthError> {
        if self.is_open() {
            return Ok(true);
        }

        match mechanism {
            Mechanism::Plain | Mechanism::Login => Ok(self.plaintext(username, secret)),
            Mechanism::CramMd5 => self.cram_md5(username, secret, challenge),
        }
    }

    fn plaintext(&self, username: &str, password: &[u8]) -> bool {
        match self.table.secret(username) {
            Some(expected) => expected.as_bytes().ct_eq(password).into(),
            None => false,
        }
    }

    fn cram_md5(&self, username: &str, response: &[u8], challenge: &[u8]) -> Result<bool, AuthError> {
        let secret = match self.table.secret(username) {
            Some(s) => s,
            None => return Ok(false),
        };

        let digest = hex::decode(response)?;
        Ok(cram_mac(secret, challenge).verify_slice(&digest).is_ok())
    }
}

fn cram_mac(secret: &str, challenge: &[u8]) -> HmacMd5 {
    let mut mac = match HmacMd5::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(challenge);
    mac
}

/// Response a client computes for a CRAM-MD5 challenge: hex(HMAC-MD5).
pub fn cram_md5_digest(secret: &str, challenge: &[u8]) -> String {
    hex::encode(cram_mac(secret, challenge).finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ryan() -> Authenticator {
        Authenticator::new(CredentialTable::from_iter([("ryan", "hunter2")]))
    }

    #[test]
    fn load_credential_file() {
        let file = "ryan:hunter2\nbroken\nalice:pass:word\n:empty\nbob:\n";
        let table = CredentialTable::from_reader(file.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.secret("ryan"), Some("hunter2"));
        assert_eq!(table.secret("alice"), None);
        assert_eq!(table.secret("bob"), None);
    }

    #[test]
    fn open_mode_accepts_everything() {
        let auth = Authenticator::new(CredentialTable::default());
        assert!(auth.is_open());
        assert!(auth
            .authenticate(Mechanism::Plain, "nobody", b"nothing", b"")
            .unwrap());
        assert!(auth
            .authenticate(Mechanism::CramMd5, "nobody", b"not hex", b"<1@x>")
            .unwrap());
    }

    #[test]
    fn plaintext_mechanisms() {
        let auth = ryan();
        assert!(auth.authenticate(Mechanism::Plain, "ryan", b"hunter2", b"").unwrap());
        assert!(auth.authenticate(Mechanism::Login, "ryan", b"hunter2", b"").unwrap());
        assert!(!auth.authenticate(Mechanism::Plain, "ryan", b"wrong", b"").unwrap());
        assert!(!auth.authenticate(Mechanism::Plain, "ryan", b"hunter", b"").unwrap());
        assert!(!auth.authenticate(Mechanism::Plain, "bob", b"hunter2", b"").unwrap());
    }

    #[test]
    fn bob_is_unknown() {
        let auth = Authenticator::new(CredentialTable::from_iter([("ryan", "hunter2"), ("bob", "")]));
        assert!(!auth.authenticate(Mechanism::Login, "bob", b"", b"").unwrap());
    }

    #[test]
    fn cram_md5() {
        let auth = ryan();
        let challenge = b"<1896.697170952@postoffice.example.net>";
        let digest = cram_md5_digest("hunter2", challenge);
        assert_eq!(digest.len(), 32);

        assert!(auth
            .authenticate(Mechanism::CramMd5, "ryan", digest.as_bytes(), challenge)
            .unwrap());
        let other = cram_md5_digest("hunter3", challenge);
        assert!(!auth
            .authenticate(Mechanism::CramMd5, "ryan", other.as_bytes(), challenge)
            .unwrap());
        assert!(!auth
            .authenticate(Mechanism::CramMd5, "ryan", digest.as_bytes(), b"<other@challenge>")
            .unwrap());
        assert!(!auth
            .authenticate(Mechanism::CramMd5, "bob", digest.as_bytes(), challenge)
            .unwrap());
    }

    #[test]
    fn rfc2195_example() {
        let digest = cram_md5_digest(
            "tanstaaftanstaaf",
            b"<1896.697170952@postoffice.reston.mci.net>",
        );
        assert_eq!(digest, "b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn cram_md5_bad_hex_is_an_error() {
        let auth = ryan();
        assert!(matches!(
            auth.authenticate(Mechanism::CramMd5, "ryan", b"zz", b"<1@x>"),
            Err(AuthError::Decode(_))
        ));
    }
}
