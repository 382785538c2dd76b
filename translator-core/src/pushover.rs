//! Boundary with the Pushover messaging API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::error::ApiError;

pub const DEFAULT_API_URL: &str = "https://api.pushover.net/1";

/// What the API answers to every call. `status` is `1` on success.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: i32,
    #[serde(default)]
    pub request: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status == 1 && self.errors.is_empty()
    }
}

/// A message ready to be pushed, limits already applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub user: String,
    pub title: String,
    pub message: String,
    pub device: Option<String>,
    pub priority: Option<i8>,
    pub retry: Option<u32>,
    pub expire: Option<u32>,
    pub sound: Option<String>,
    pub attachment: Option<Vec<u8>>,
}

#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Checks that `user` designates an existing user or group key.
    async fn validate_recipient(
        &self,
        app_token: &str,
        user: &str,
        device: Option<&str>,
    ) -> Result<ApiResponse, ApiError>;

    async fn send(
        &self,
        app_token: &str,
        notification: &Notification,
    ) -> Result<ApiResponse, ApiError>;
}

pub struct PushoverClient {
    http: reqwest::Client,
    base_url: String,
}

impl PushoverClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, endpoint: &str, form: Form) -> Result<ApiResponse, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let http_status = resp.status();
        // 4xx answers still carry a JSON body describing the problem
        let body = resp
            .json::<ApiResponse>()
            .await
            .map_err(|e| ApiError::Transport(format!("{} ({})", e, http_status)))?;

        tracing::debug!(endpoint, http=%http_status, status=body.status, request=%body.request, "pushover answered");
        if !http_status.is_success() || !body.is_success() {
            return Err(ApiError::Refused(body));
        }
        Ok(body)
    }
}

#[async_trait]
impl NotificationApi for PushoverClient {
    async fn validate_recipient(
        &self,
        app_token: &str,
        user: &str,
        device: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut form = Form::new()
            .text("token", app_token.to_string())
            .text("user", user.to_string());
        if let Some(device) = device {
            form = form.text("device", device.to_string());
        }
        self.post("users/validate.json", form).await
    }

    async fn send(
        &self,
        app_token: &str,
        notification: &Notification,
    ) -> Result<ApiResponse, ApiError> {
        let mut form = Form::new()
            .text("token", app_token.to_string())
            .text("user", notification.user.clone())
            .text("title", notification.title.clone())
            .text("message", notification.message.clone());

        if let Some(device) = &notification.device {
            form = form.text("device", device.clone());
        }
        if let Some(priority) = notification.priority {
            form = form.text("priority", priority.to_string());
        }
        if let Some(retry) = notification.retry {
            form = form.text("retry", retry.to_string());
        }
        if let Some(expire) = notification.expire {
            form = form.text("expire", expire.to_string());
        }
        if let Some(sound) = &notification.sound {
            form = form.text("sound", sound.clone());
        }
        if let Some(attachment) = &notification.attachment {
            form = form.part(
                "attachment",
                Part::bytes(attachment.clone()).file_name("attachment"),
            );
        }

        self.post("messages.json", form).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_api_answers() {
        let ok: ApiResponse =
            serde_json::from_str(r#"{"status":1,"request":"647d2300-702c-4b38-8b2f-d56326ae460b"}"#)
                .unwrap();
        assert!(ok.is_success());

        let refused: ApiResponse = serde_json::from_str(
            r#"{"user":"invalid","errors":["user identifier is invalid"],"status":0,"request":"5042853c"}"#,
        )
        .unwrap();
        assert!(!refused.is_success());
        assert_eq!(refused.errors, vec!["user identifier is invalid".to_string()]);
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let client = PushoverClient::new("http://127.0.0.1:8080/1/").unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:8080/1");
    }
}
