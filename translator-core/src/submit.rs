use std::sync::Arc;

use crate::envelope::Envelope;
use crate::error::{ApiError, SubmitError};
use crate::pushover::{Notification, NotificationApi};

pub const MAX_TITLE: usize = 250;
pub const MAX_BODY: usize = 1024;
pub const MAX_ATTACHMENT: usize = 2_621_440;

const NO_SUBJECT: &str = "(no subject)";
const ATTACHMENT_DROPPED: &str = " [attachment dropped]";

/// Strings of `ceiling` characters or more are cut to exactly `ceiling`
/// characters, the last three being `...`.
pub fn truncate(s: &str, ceiling: usize) -> String {
    if s.chars().count() < ceiling {
        return s.to_string();
    }
    let mut cut = s
        .chars()
        .take(ceiling.saturating_sub(3))
        .collect::<String>();
    cut.push_str("...");
    cut
}

#[derive(Clone)]
pub struct Submitter {
    api: Arc<dyn NotificationApi>,
}

impl Submitter {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        Self { api }
    }

    pub async fn submit(&self, env: &Envelope) -> Result<(), SubmitError> {
        let app_token = match env.from.app_token.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return Err(SubmitError::MissingToken),
        };
        if env.to.user_token.is_empty() {
            return Err(SubmitError::MissingToken);
        }

        match self
            .api
            .validate_recipient(app_token, &env.to.user_token, env.to.device.as_deref())
            .await
        {
            Ok(_) => (),
            Err(e @ ApiError::Refused(_)) => return Err(SubmitError::InvalidRecipient(e)),
            Err(e @ ApiError::Transport(_)) => return Err(SubmitError::Validation(e)),
        }

        let notification = notification(env);
        let resp = self
            .api
            .send(app_token, &notification)
            .await
            .map_err(SubmitError::Send)?;
        tracing::info!(user=%env.to.user_token, request=%resp.request, "notification accepted");
        Ok(())
    }
}

fn notification(env: &Envelope) -> Notification {
    let oversized = env
        .attachment
        .as_ref()
        .map_or(false, |a| a.len() > MAX_ATTACHMENT);

    let mut title = match env.subject.is_empty() {
        true => NO_SUBJECT.to_string(),
        false => env.subject.clone(),
    };
    if env.from.show_address {
        title.push_str(&format!(" ({})", env.from.address));
    }
    if oversized {
        tracing::warn!(size=?env.attachment.as_ref().map(Vec::len), "attachment too large, dropped");
        title.push_str(ATTACHMENT_DROPPED);
    }

    Notification {
        user: env.to.user_token.clone(),
        title: truncate(&title, MAX_TITLE),
        message: truncate(&env.body, MAX_BODY),
        device: env.to.device.clone(),
        priority: env.to.priority,
        retry: env.to.retry_sec,
        expire: env.to.expire_sec,
        sound: env.to.sound.clone(),
        attachment: env.attachment.clone().filter(|_| !oversized),
    }
}
