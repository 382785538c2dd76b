use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::try_join;
use tokio::sync::watch;

use translator_core::address::SenderMode;
use translator_core::auth::{Authenticator, CredentialTable};
use translator_core::gateway::Gateway;
use translator_core::pushover::PushoverClient;
use translator_core::queue::{self, Dispatcher};
use translator_core::submit::Submitter;
use translator_proto::lmtp::LmtpServer;
use translator_proto::sasl::AuthServer;

use crate::config::*;

pub struct Server {
    lmtp_server: Arc<LmtpServer>,
    auth_server: Option<AuthServer>,
    dispatcher: Dispatcher,
}

impl Server {
    pub fn from_config(config: Config) -> Result<Self> {
        let table = match &config.credentials {
            Some(path) => CredentialTable::load(path)?,
            None => CredentialTable::default(),
        };
        if table.is_empty() {
            tracing::warn!("No credentials configured, every submitter is accepted");
        }

        let sender_mode = match config.pushover.app_token {
            Some(token) => {
                tracing::info!("Single token mode, every notification uses the configured application");
                SenderMode::Single(token)
            }
            None => {
                tracing::info!("Multi token mode, the sender local-part is the application token");
                SenderMode::Multi
            }
        };

        let api = PushoverClient::new(config.pushover.api_url.clone())
            .context("unable to build the Pushover client")?;
        let (handle, dispatcher) = queue::channel(
            config.dispatch.queue_capacity,
            Submitter::new(Arc::new(api)),
            Duration::from_secs(config.dispatch.retry_interval_secs),
        );

        let gateway = Arc::new(Gateway::new(
            Authenticator::new(table),
            sender_mode,
            handle,
        ));
        let lmtp_server = LmtpServer::new(
            config.lmtp.bind_addr,
            config.lmtp.hostname,
            gateway.clone(),
        );
        let auth_server = config
            .auth
            .map(|auth| AuthServer::new(auth.bind_addr, gateway.clone()));

        Ok(Self {
            lmtp_server,
            auth_server,
            dispatcher,
        })
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting smtp-translator...");
        let Self {
            lmtp_server,
            auth_server,
            dispatcher,
        } = self;

        // lives as long as a gateway can enqueue
        tokio::spawn(dispatcher.run());

        // the sender must outlive the listeners
        let (exit_signal, _provoke_exit) = watch_ctrl_c();

        try_join!(lmtp_server.run(exit_signal.clone()), async {
            match auth_server {
                None => Ok(()),
                Some(a) => a.run(exit_signal.clone()).await,
            }
        })?;

        Ok(())
    }
}

pub fn watch_ctrl_c() -> (watch::Receiver<bool>, Arc<watch::Sender<bool>>) {
    let (send_cancel, watch_cancel) = watch::channel(false);
    let send_cancel = Arc::new(send_cancel);
    let send_cancel_2 = send_cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(err=%e, "failed to install CTRL+C signal handler");
            return;
        }
        tracing::info!("Received CTRL+C, shutting down.");
        let _ = send_cancel.send(true);
    });
    (watch_cancel, send_cancel_2)
}
