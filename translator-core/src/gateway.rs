use crate::address::{Recipient, Sender, SenderMode};
use crate::auth::{Authenticator, Mechanism};
use crate::content;
use crate::envelope::Envelope;
use crate::error::{AuthError, FormatError, RoutingError};
use crate::queue::DispatchHandle;

/// What happened to one recipient of a delivered message.
#[derive(Debug)]
pub enum Disposition {
    Queued,
    Skipped(RoutingError),
}

impl Disposition {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Everything the protocol adapters call into.
pub struct Gateway {
    authenticator: Authenticator,
    sender_mode: SenderMode,
    queue: DispatchHandle,
}

impl Gateway {
    pub fn new(authenticator: Authenticator, sender_mode: SenderMode, queue: DispatchHandle) -> Self {
        Self {
            authenticator,
            sender_mode,
            queue,
        }
    }

    pub fn authenticate(
        &self,
        mechanism: Mechanism,
        username: &str,
        secret: &[u8],
        challenge: &[u8],
    ) -> Result<bool, AuthError> {
        let res = self
            .authenticator
            .authenticate(mechanism, username, secret, challenge);
        match &res {
            Ok(true) => tracing::info!(user=%username, ?mechanism, "authentication succeeded"),
            Ok(false) => tracing::warn!(user=%username, ?mechanism, "authentication failed"),
            Err(e) => tracing::warn!(user=%username, ?mechanism, err=%e, "malformed authentication"),
        }
        res
    }

    /// Called for every RCPT before the message body is transferred.
    pub fn accept_recipient(&self, from: &str, to: &str) -> bool {
        if Sender::parse(from, &self.sender_mode).is_none() {
            tracing::debug!(from, "sender carries no application token");
            return false;
        }
        Recipient::parse(to).is_some()
    }

    /// Extracts the message once and queues one envelope per recipient.
    pub async fn handle_message(
        &self,
        from: &str,
        to: &[String],
        data: &[u8],
    ) -> Result<Vec<Disposition>, FormatError> {
        let content = content::extract(data).map_err(|e| {
            tracing::error!(from, err=%e, "rejecting unreadable message");
            e
        })?;

        let sender = Sender::parse(from, &self.sender_mode);
        let mut dispositions = Vec::with_capacity(to.len());
        for rcpt in to {
            let routing = match (&sender, Recipient::parse(rcpt)) {
                (None, _) => Err(RoutingError::Sender(from.to_string())),
                (_, None) => Err(RoutingError::Recipient(rcpt.to_string())),
                (Some(sender), Some(recipient)) => Ok((sender.clone(), recipient)),
            };

            let (sender, recipient) = match routing {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(err=%e, "recipient skipped");
                    dispositions.push(Disposition::Skipped(e));
                    continue;
                }
            };

            let env = Envelope {
                from: sender,
                to: recipient,
                subject: content.subject.clone(),
                body: content.body.clone(),
                attachment: content.attachment.clone(),
            };
            match self.queue.enqueue(env).await {
                Ok(()) => dispositions.push(Disposition::Queued),
                Err(e) => {
                    // no worker means nothing can ever be delivered again
                    tracing::error!(err=%e, rcpt=%rcpt, "unable to queue notification");
                    dispositions.push(Disposition::Skipped(RoutingError::Unavailable(rcpt.to_string())));
                }
            }
        }
        Ok(dispositions)
    }
}
