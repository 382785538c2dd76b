use std::net::SocketAddr;
use std::{pin::Pin, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use duplexify::Duplex;
use futures::{io, AsyncRead, AsyncReadExt, AsyncWrite};
use futures::{stream, stream::FuturesUnordered, StreamExt};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::watch;
use tokio_util::compat::*;

use smtp_message::{Email, EscapedDataReader, Reply, ReplyCode};
use smtp_server::{reply, Config, ConnectionMetadata, Decision, MailMetadata};

use translator_core::gateway::{Disposition, Gateway};

/// Receives the messages an MTA relays after it accepted them from
/// authenticated submitters.
pub struct LmtpServer {
    bind_addr: SocketAddr,
    hostname: String,
    gateway: Arc<Gateway>,
}

impl LmtpServer {
    pub fn new(bind_addr: SocketAddr, hostname: String, gateway: Arc<Gateway>) -> Arc<Self> {
        Arc::new(Self {
            bind_addr,
            hostname,
            gateway,
        })
    }

    pub async fn run(self: &Arc<Self>, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!("LMTP server listening on {:#}", self.bind_addr);

        let mut connections = FuturesUnordered::new();

        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, remote_addr) = select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::debug!(remote=%remote_addr, "LMTP connection accepted");

            let conn = tokio::spawn(smtp_server::interact(
                socket.compat(),
                smtp_server::IsAlreadyTls::No,
                Conn { remote_addr },
                self.clone(),
            ));

            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("LMTP server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }
}

// ----

pub struct Conn {
    remote_addr: SocketAddr,
}

pub struct Message {
    from: String,
    to: Vec<String>,
}

fn address(email: &Email) -> String {
    match email.hostname.as_ref() {
        Some(h) => format!("{}@{}", email.localpart, h),
        None => email.localpart.to_string(),
    }
}

fn policy_reject<T>(text: String) -> Decision<T> {
    Decision::Reject {
        reply: Reply {
            code: ReplyCode::POLICY_REASON,
            ecode: None,
            text: vec![smtp_message::MaybeUtf8::Utf8(text)],
        },
    }
}

#[async_trait]
impl Config for LmtpServer {
    type Protocol = smtp_server::protocol::Lmtp;

    type ConnectionUserMeta = Conn;
    type MailUserMeta = Message;

    fn hostname(&self, _conn_meta: &ConnectionMetadata<Conn>) -> &str {
        &self.hostname
    }

    async fn new_mail(&self, _conn_meta: &mut ConnectionMetadata<Conn>) -> Message {
        Message {
            from: String::new(),
            to: vec![],
        }
    }

    async fn tls_accept<IO>(
        &self,
        _io: IO,
        _conn_meta: &mut ConnectionMetadata<Conn>,
    ) -> io::Result<Duplex<Pin<Box<dyn Send + AsyncRead>>, Pin<Box<dyn Send + AsyncWrite>>>>
    where
        IO: Send + AsyncRead + AsyncWrite,
    {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "TLS not implemented for LMTP server",
        ))
    }

    async fn filter_from(
        &self,
        from: Option<Email>,
        meta: &mut MailMetadata<Message>,
        _conn_meta: &mut ConnectionMetadata<Conn>,
    ) -> Decision<Option<Email>> {
        // the null reverse-path stays an empty sender
        meta.user.from = from.as_ref().map(address).unwrap_or_default();
        Decision::Accept {
            reply: reply::okay_from().convert(),
            res: from,
        }
    }

    async fn filter_to(
        &self,
        to: Email,
        meta: &mut MailMetadata<Message>,
        conn_meta: &mut ConnectionMetadata<Conn>,
    ) -> Decision<Email> {
        let to_str = address(&to);
        if !self.gateway.accept_recipient(&meta.user.from, &to_str) {
            tracing::info!(remote=%conn_meta.user.remote_addr, from=%meta.user.from, to=%to_str, "recipient refused");
            return policy_reject(format!("{} is not a valid notification target", to_str));
        }

        meta.user.to.push(to_str);
        Decision::Accept {
            reply: reply::okay_to().convert(),
            res: to,
        }
    }

    async fn handle_mail<'resp, R>(
        &'resp self,
        reader: &mut EscapedDataReader<'_, R>,
        meta: MailMetadata<Message>,
        _conn_meta: &'resp mut ConnectionMetadata<Conn>,
    ) -> Pin<Box<dyn futures::Stream<Item = Decision<()>> + Send + 'resp>>
    where
        R: Send + Unpin + AsyncRead,
    {
        let err_response_stream = |meta: MailMetadata<Message>, msg: String| {
            Box::pin(
                stream::iter(meta.user.to.into_iter()).map(move |_| policy_reject(msg.clone())),
            )
        };

        let mut text = Vec::new();
        if reader.read_to_end(&mut text).await.is_err() {
            return err_response_stream(meta, "io error".into());
        }
        reader.complete();

        let dispositions = match self
            .gateway
            .handle_message(&meta.user.from, &meta.user.to, &text)
            .await
        {
            Ok(d) => d,
            Err(e) => return err_response_stream(meta, e.to_string()),
        };

        Box::pin(stream::iter(dispositions).map(|disposition| match disposition {
            Disposition::Queued => Decision::Accept {
                reply: reply::okay_mail().convert(),
                res: (),
            },
            Disposition::Skipped(e) => policy_reject(e.to_string()),
        }))
    }
}
