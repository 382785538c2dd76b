use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::BufStream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::bytes::BytesMut;

use translator_core::auth::Mechanism;
use translator_core::gateway::Gateway;
use translator_sasl::{decode::client_command, encode::Encode, flow::State, types};

/// Dovecot authentication service, for an MTA relaying SMTP AUTH.
pub struct AuthServer {
    gateway: Arc<Gateway>,
    bind_addr: SocketAddr,
}

impl AuthServer {
    pub fn new(bind_addr: SocketAddr, gateway: Arc<Gateway>) -> Self {
        Self { bind_addr, gateway }
    }

    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        tracing::info!(
            "SASL Authentication Protocol listening on {:#}",
            self.bind_addr
        );

        let mut connections = FuturesUnordered::new();

        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };

            let (socket, remote_addr) = tokio::select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };

            tracing::info!("AUTH: accepted connection from {}", remote_addr);
            let conn = tokio::spawn(
                NetLoop::new(socket, self.gateway.clone(), must_exit.clone()).run_error(),
            );

            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("AUTH server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }
}

fn mechanism(mech: types::Mechanism) -> Mechanism {
    match mech {
        types::Mechanism::Plain => Mechanism::Plain,
        types::Mechanism::Login => Mechanism::Login,
        types::Mechanism::CramMd5 => Mechanism::CramMd5,
    }
}

struct NetLoop {
    gateway: Arc<Gateway>,
    stream: BufStream<TcpStream>,
    stop: watch::Receiver<bool>,
    state: State,
    read_buf: Vec<u8>,
    write_buf: BytesMut,
}

impl NetLoop {
    fn new(stream: TcpStream, gateway: Arc<Gateway>, stop: watch::Receiver<bool>) -> Self {
        Self {
            gateway,
            stream: BufStream::new(stream),
            state: State::Init,
            stop,
            read_buf: Vec::new(),
            write_buf: BytesMut::new(),
        }
    }

    async fn run_error(self) {
        match self.run().await {
            Ok(()) => tracing::info!("Auth session succeeded"),
            Err(e) => tracing::error!(err=?e, "Auth session failed"),
        }
    }

    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                read_res = self.stream.read_until(b'\n', &mut self.read_buf) => {
                    // Detect EOF / socket close
                    let bread = read_res?;
                    if bread == 0 {
                        tracing::info!("Reading buffer empty, connection has been closed. Exiting AUTH session.");
                        return Ok(())
                    }

                    // Unknown mechanisms do not parse and end the session here
                    let (_, cmd) = client_command(&self.read_buf).map_err(|_| anyhow!("Unable to parse command"))?;
                    tracing::trace!(cmd=?cmd, "Received command");

                    let gateway = self.gateway.clone();
                    let verify = move |attempt: types::Attempt| async move {
                        gateway
                            .authenticate(
                                mechanism(attempt.mechanism),
                                &attempt.username,
                                &attempt.secret,
                                &attempt.challenge,
                            )
                            .map_err(anyhow::Error::from)
                    };
                    self.state.progress(cmd, verify).await;
                    if matches!(self.state, State::Error) {
                        bail!("Internal state is in error, previous logs explain what went wrong");
                    }

                    // Build response
                    let srv_cmds = self.state.response();
                    srv_cmds.iter().try_for_each(|r| {
                        tracing::trace!(cmd=?r, "Sent command");
                        r.encode(&mut self.write_buf)
                    })?;

                    // Send responses if at least one command response has been generated
                    if !srv_cmds.is_empty() {
                        self.stream.write_all(&self.write_buf).await?;
                        self.stream.flush().await?;
                    }

                    // Reset buffers
                    self.read_buf.clear();
                    self.write_buf.clear();
                },
                _ = self.stop.changed() => {
                    tracing::debug!("Server is stopping, quitting this runner");
                    return Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use translator_core::address::SenderMode;
    use translator_core::auth::{cram_md5_digest, Authenticator, CredentialTable};
    use translator_core::pushover::PushoverClient;
    use translator_core::queue;
    use translator_core::submit::Submitter;

    async fn start() -> (SocketAddr, watch::Sender<bool>) {
        let api = Arc::new(PushoverClient::new("http://127.0.0.1:9").unwrap());
        let (handle, _worker) = queue::channel(1, Submitter::new(api), Duration::from_secs(1));
        let auth = Authenticator::new(CredentialTable::from_iter([("ryan", "hunter2")]));
        let gateway = Arc::new(Gateway::new(auth, SenderMode::Multi, handle));

        // grab a free port, then hand it over to the server
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let (tx, rx) = watch::channel(false);
        tokio::spawn(AuthServer::new(addr, gateway).run(rx));
        for _ in 0..50 {
            if TcpStream::connect(addr).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        (addr, tx)
    }

    async fn line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
        let mut buf = String::new();
        reader.read_line(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn dovecot_session() {
        let (addr, _stop) = start().await;
        let (rd, mut wr) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut rd = BufReader::new(rd);

        wr.write_all(b"VERSION\t1\t2\nCPID\t1\n").await.unwrap();
        let mut handshake = vec![];
        loop {
            let l = line(&mut rd).await;
            let done = l == "DONE\n";
            handshake.push(l);
            if done {
                break;
            }
        }
        assert_eq!(handshake[0], "VERSION\t1\t2\n");
        assert!(handshake.contains(&"MECH\tCRAM-MD5\tdictionary\tactive\n".to_string()));

        // \0ryan\0hunter2
        wr.write_all(b"AUTH\t1\tPLAIN\tservice=smtp\tresp=AHJ5YW4AaHVudGVyMg==\n")
            .await
            .unwrap();
        assert_eq!(line(&mut rd).await, "OK\t1\tuser=ryan\n");

        wr.write_all(b"AUTH\t2\tCRAM-MD5\tservice=smtp\n").await.unwrap();
        let cont = line(&mut rd).await;
        let challenge = cont.trim_end().strip_prefix("CONT\t2\t").unwrap();
        let challenge = base64_decode(challenge);
        let response = format!("ryan {}", cram_md5_digest("hunter2", &challenge));
        wr.write_all(format!("CONT\t2\t{}\n", base64_encode(response.as_bytes())).as_bytes())
            .await
            .unwrap();
        assert_eq!(line(&mut rd).await, "OK\t2\tuser=ryan\n");

        wr.write_all(b"AUTH\t3\tLOGIN\tservice=smtp\n").await.unwrap();
        assert_eq!(line(&mut rd).await, "CONT\t3\tVXNlcm5hbWU6\n");
        wr.write_all(b"CONT\t3\tcnlhbg==\n").await.unwrap();
        assert_eq!(line(&mut rd).await, "CONT\t3\tUGFzc3dvcmQ6\n");
        // "hunter3"
        wr.write_all(b"CONT\t3\taHVudGVyMw==\n").await.unwrap();
        assert_eq!(line(&mut rd).await, "FAIL\t3\tuser=ryan\n");
    }

    fn base64_decode(s: &str) -> Vec<u8> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.decode(s).unwrap()
    }

    fn base64_encode(b: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(b)
    }
}
