use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use futures::Future;
use rand::prelude::*;

use super::decode::{auth_cram_md5, auth_plain};
use super::types::*;

#[derive(Debug)]
pub enum AuthRes {
    Success(String),
    Failed(Option<String>, Option<FailCode>),
}

#[derive(Debug)]
pub enum State {
    Error,
    Init,
    HandshakePart(Version),
    HandshakeDone,
    AuthPlainProgress { id: u64 },
    AuthLoginUser { id: u64 },
    AuthLoginPass { id: u64, user: String },
    AuthCramProgress { id: u64, challenge: Vec<u8> },
    AuthDone { id: u64, res: AuthRes },
}

const SERVER_MAJOR: u64 = 1;
const SERVER_MINOR: u64 = 2;
const EMPTY_AUTHZ: &[u8] = &[];
const CHALLENGE_REALM: &str = "smtp-translator";

/// RFC 2195 wants something that looks like a msg-id and never repeats.
fn cram_challenge() -> Vec<u8> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let nonce: u64 = thread_rng().gen();
    format!("<{}.{}@{}>", nonce, ts, CHALLENGE_REALM).into_bytes()
}

fn utf8(buf: &[u8]) -> Option<String> {
    std::str::from_utf8(buf).ok().map(|v| v.to_string())
}

async fn check<X, F>(attempt: Attempt, verify: X) -> Result<AuthRes>
where
    X: FnOnce(Attempt) -> F,
    F: Future<Output = Result<bool>>,
{
    let user = attempt.username.clone();
    let mechanism = attempt.mechanism;
    match verify(attempt).await? {
        true => Ok(AuthRes::Success(user)),
        false => {
            tracing::warn!(user=%user, mechanism=mechanism.as_str(), "login failed");
            Ok(AuthRes::Failed(Some(user), None))
        }
    }
}

impl State {
    pub fn new() -> Self {
        Self::Init
    }

    fn plain_attempt(data: &[u8]) -> Option<Attempt> {
        // Check that we can extract user's login+pass
        let (ubin, pbin) = match auth_plain(data) {
            Ok(([], (authz, user, pass))) if authz == user || authz == EMPTY_AUTHZ => (user, pass),
            Ok(_) => {
                tracing::error!("Impersonating user is not supported");
                return None;
            }
            Err(e) => {
                tracing::error!(err=?e, "Could not parse the SASL PLAIN data chunk");
                return None;
            }
        };

        match utf8(ubin) {
            Some(username) => Some(Attempt {
                mechanism: Mechanism::Plain,
                username,
                secret: pbin.to_vec(),
                challenge: vec![],
            }),
            None => {
                tracing::error!("Username contains invalid UTF-8 characters");
                None
            }
        }
    }

    fn cram_attempt(data: &[u8], challenge: Vec<u8>) -> Option<Attempt> {
        let (ubin, digest) = match auth_cram_md5(data) {
            Ok((_, v)) => v,
            Err(e) => {
                tracing::error!(err=?e, "Could not parse the SASL CRAM-MD5 response");
                return None;
            }
        };

        match utf8(ubin) {
            Some(username) => Some(Attempt {
                mechanism: Mechanism::CramMd5,
                username,
                secret: digest.to_vec(),
                challenge,
            }),
            None => {
                tracing::error!("Username contains invalid UTF-8 characters");
                None
            }
        }
    }

    async fn finish<X, F>(id: u64, attempt: Option<Attempt>, verify: X) -> Self
    where
        X: FnOnce(Attempt) -> F,
        F: Future<Output = Result<bool>>,
    {
        let attempt = match attempt {
            Some(a) => a,
            None => {
                return Self::AuthDone {
                    id,
                    res: AuthRes::Failed(None, None),
                }
            }
        };

        match check(attempt, verify).await {
            Ok(res) => Self::AuthDone { id, res },
            Err(e) => {
                tracing::error!(err=?e, "Credentials could not be verified");
                Self::Error
            }
        }
    }

    /// Feed a client command to the state machine.
    /// `verify` is called at most once, when a full attempt is known.
    pub async fn progress<F, X>(&mut self, cmd: ClientCommand, verify: X)
    where
        X: FnOnce(Attempt) -> F,
        F: Future<Output = Result<bool>>,
    {
        let new_state = 'state: {
            match (std::mem::replace(self, State::Error), cmd) {
                (Self::Init, ClientCommand::Version(v)) => Self::HandshakePart(v),
                (Self::HandshakePart(version), ClientCommand::Cpid(_cpid)) => {
                    if version.major != SERVER_MAJOR {
                        tracing::error!(
                            client_major = version.major,
                            server_major = SERVER_MAJOR,
                            "Unsupported client major version"
                        );
                        break 'state Self::Error;
                    }

                    Self::HandshakeDone
                }
                (
                    Self::HandshakeDone { .. },
                    ClientCommand::Auth {
                        id, mech, options, ..
                    },
                )
                | (
                    Self::AuthDone { .. },
                    ClientCommand::Auth {
                        id, mech, options, ..
                    },
                ) => {
                    let initial = match options.last() {
                        Some(AuthOption::Resp(data)) => Some(data.clone()),
                        _ => None,
                    };

                    match (mech, initial) {
                        (Mechanism::Plain, Some(data)) => {
                            Self::finish(id, Self::plain_attempt(&data), verify).await
                        }
                        (Mechanism::Plain, None) => Self::AuthPlainProgress { id },
                        (Mechanism::Login, Some(data)) => match utf8(&data) {
                            Some(user) => Self::AuthLoginPass { id, user },
                            None => Self::AuthDone {
                                id,
                                res: AuthRes::Failed(None, None),
                            },
                        },
                        (Mechanism::Login, None) => Self::AuthLoginUser { id },
                        (Mechanism::CramMd5, Some(_)) => {
                            tracing::error!("CRAM-MD5 is server-first, initial response refused");
                            Self::AuthDone {
                                id,
                                res: AuthRes::Failed(None, None),
                            }
                        }
                        (Mechanism::CramMd5, None) => Self::AuthCramProgress {
                            id,
                            challenge: cram_challenge(),
                        },
                    }
                }
                (Self::AuthPlainProgress { id }, ClientCommand::Cont { id: cid, data })
                    if cid == id =>
                {
                    Self::finish(id, Self::plain_attempt(&data), verify).await
                }
                (Self::AuthLoginUser { id }, ClientCommand::Cont { id: cid, data }) if cid == id => {
                    match utf8(&data) {
                        Some(user) => Self::AuthLoginPass { id, user },
                        None => Self::AuthDone {
                            id,
                            res: AuthRes::Failed(None, None),
                        },
                    }
                }
                (Self::AuthLoginPass { id, user }, ClientCommand::Cont { id: cid, data })
                    if cid == id =>
                {
                    let attempt = Attempt {
                        mechanism: Mechanism::Login,
                        username: user,
                        secret: data,
                        challenge: vec![],
                    };
                    Self::finish(id, Some(attempt), verify).await
                }
                (Self::AuthCramProgress { id, challenge }, ClientCommand::Cont { id: cid, data })
                    if cid == id =>
                {
                    Self::finish(id, Self::cram_attempt(&data, challenge), verify).await
                }
                (
                    Self::AuthPlainProgress { id }
                    | Self::AuthLoginUser { id }
                    | Self::AuthLoginPass { id, .. }
                    | Self::AuthCramProgress { id, .. },
                    ClientCommand::Cont { id: cid, .. },
                ) => {
                    tracing::error!(
                        auth_id = id,
                        cont_id = cid,
                        "CONT id does not match AUTH id"
                    );
                    Self::AuthDone {
                        id,
                        res: AuthRes::Failed(None, None),
                    }
                }
                _ => {
                    tracing::error!("This command is not valid in this context");
                    Self::Error
                }
            }
        };
        tracing::debug!(state=?new_state, "Made progress");
        *self = new_state;
    }

    pub fn response(&self) -> Vec<ServerCommand> {
        let mut srv_cmd: Vec<ServerCommand> = Vec::new();

        match self {
            Self::HandshakeDone { .. } => {
                srv_cmd.push(ServerCommand::Version(Version {
                    major: SERVER_MAJOR,
                    minor: SERVER_MINOR,
                }));

                srv_cmd.push(ServerCommand::Mech {
                    kind: Mechanism::Plain,
                    parameters: vec![MechanismParameters::PlainText],
                });
                srv_cmd.push(ServerCommand::Mech {
                    kind: Mechanism::Login,
                    parameters: vec![MechanismParameters::PlainText],
                });
                srv_cmd.push(ServerCommand::Mech {
                    kind: Mechanism::CramMd5,
                    parameters: vec![
                        MechanismParameters::Dictionary,
                        MechanismParameters::Active,
                    ],
                });

                let mut rng = thread_rng();
                srv_cmd.push(ServerCommand::Spid(std::process::id() as u64));
                srv_cmd.push(ServerCommand::Cuid(rng.gen_range(1..u32::MAX as u64)));

                let mut cookie = [0u8; 16];
                rng.fill(&mut cookie);
                srv_cmd.push(ServerCommand::Cookie(cookie));

                srv_cmd.push(ServerCommand::Done);
            }
            Self::AuthPlainProgress { id } => {
                srv_cmd.push(ServerCommand::Cont {
                    id: *id,
                    data: None,
                });
            }
            Self::AuthLoginUser { id } => {
                srv_cmd.push(ServerCommand::Cont {
                    id: *id,
                    data: Some(b"Username:".to_vec()),
                });
            }
            Self::AuthLoginPass { id, .. } => {
                srv_cmd.push(ServerCommand::Cont {
                    id: *id,
                    data: Some(b"Password:".to_vec()),
                });
            }
            Self::AuthCramProgress { id, challenge } => {
                srv_cmd.push(ServerCommand::Cont {
                    id: *id,
                    data: Some(challenge.clone()),
                });
            }
            Self::AuthDone {
                id,
                res: AuthRes::Success(user),
            } => {
                srv_cmd.push(ServerCommand::Ok {
                    id: *id,
                    user_id: Some(user.to_string()),
                });
            }
            Self::AuthDone {
                id,
                res: AuthRes::Failed(maybe_user, maybe_failcode),
            } => {
                srv_cmd.push(ServerCommand::Fail {
                    id: *id,
                    user_id: maybe_user.clone(),
                    code: maybe_failcode.clone(),
                });
            }
            _ => (),
        };

        srv_cmd
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    async fn handshake() -> State {
        let mut state = State::new();
        let never = |_: Attempt| async { Ok(false) };
        state
            .progress(ClientCommand::Version(Version { major: 1, minor: 2 }), never)
            .await;
        state.progress(ClientCommand::Cpid(1), never).await;
        assert!(matches!(state, State::HandshakeDone));
        state
    }

    fn auth(id: u64, mech: Mechanism, options: Vec<AuthOption>) -> ClientCommand {
        ClientCommand::Auth {
            id,
            mech,
            service: "smtp".into(),
            options,
        }
    }

    #[tokio::test]
    async fn handshake_announces_every_mechanism() {
        let state = handshake().await;
        let mechs = state
            .response()
            .into_iter()
            .filter_map(|c| match c {
                ServerCommand::Mech { kind, .. } => Some(kind),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            mechs,
            vec![Mechanism::Plain, Mechanism::Login, Mechanism::CramMd5]
        );
    }

    #[tokio::test]
    async fn plain_with_initial_response() {
        let mut state = handshake().await;
        let opts = vec![AuthOption::Resp(b"\0ryan\0hunter2".to_vec())];
        state
            .progress(auth(1, Mechanism::Plain, opts), |a: Attempt| async move {
                Ok(a.username == "ryan" && a.secret == b"hunter2")
            })
            .await;
        assert!(matches!(
            state,
            State::AuthDone {
                id: 1,
                res: AuthRes::Success(ref u)
            } if u == "ryan"
        ));
    }

    #[tokio::test]
    async fn login_asks_username_then_password() {
        let mut state = handshake().await;
        let never = |_: Attempt| async { Ok(false) };
        state.progress(auth(3, Mechanism::Login, vec![]), never).await;
        assert!(matches!(state, State::AuthLoginUser { id: 3 }));

        state
            .progress(
                ClientCommand::Cont {
                    id: 3,
                    data: b"ryan".to_vec(),
                },
                never,
            )
            .await;
        assert!(matches!(state, State::AuthLoginPass { id: 3, .. }));

        state
            .progress(
                ClientCommand::Cont {
                    id: 3,
                    data: b"wrong".to_vec(),
                },
                |a: Attempt| async move {
                    assert_eq!(a.mechanism, Mechanism::Login);
                    Ok(a.secret == b"hunter2")
                },
            )
            .await;
        match state.response().as_slice() {
            [ServerCommand::Fail { id: 3, user_id, .. }] => {
                assert_eq!(user_id.as_deref(), Some("ryan"))
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn cram_md5_hands_out_challenge() {
        let mut state = handshake().await;
        let never = |_: Attempt| async { Ok(false) };
        state.progress(auth(9, Mechanism::CramMd5, vec![]), never).await;
        let challenge = match &state {
            State::AuthCramProgress { id: 9, challenge } => challenge.clone(),
            other => panic!("unexpected state {:?}", other),
        };
        assert!(challenge.starts_with(b"<") && challenge.ends_with(b"@smtp-translator>"));

        let expected = challenge.clone();
        state
            .progress(
                ClientCommand::Cont {
                    id: 9,
                    data: b"ryan deadbeef".to_vec(),
                },
                |a: Attempt| async move {
                    assert_eq!(a.challenge, expected);
                    assert_eq!(a.secret, b"deadbeef");
                    Ok(true)
                },
            )
            .await;
        assert!(matches!(
            state,
            State::AuthDone {
                res: AuthRes::Success(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn verifier_error_tears_down_session() {
        let mut state = handshake().await;
        state.progress(auth(2, Mechanism::CramMd5, vec![]), |_: Attempt| async { Ok(false) }).await;
        state
            .progress(
                ClientCommand::Cont {
                    id: 2,
                    data: b"ryan zz".to_vec(),
                },
                |_: Attempt| async { Err(anyhow!("not hex")) },
            )
            .await;
        assert!(matches!(state, State::Error));
    }

    #[tokio::test]
    async fn mismatched_cont_id_fails() {
        let mut state = handshake().await;
        let never = |_: Attempt| async { Ok(false) };
        state.progress(auth(5, Mechanism::Plain, vec![]), never).await;
        state
            .progress(
                ClientCommand::Cont {
                    id: 6,
                    data: b"\0ryan\0hunter2".to_vec(),
                },
                never,
            )
            .await;
        assert!(matches!(
            state,
            State::AuthDone {
                id: 5,
                res: AuthRes::Failed(None, None)
            }
        ));
    }
}
