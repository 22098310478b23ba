use serde::Serialize;

use crate::{NotificationKind, Notifier};

#[derive(Serialize)]
struct SendRequest<'a> {
    to_email: &'a str,
    subject: &'a str,
    content: &'a str,
    content_type: &'a str,
}

/// Delivers notifications through an external mail gateway, grounded on the
/// source's `send_email_notification`: a plain JSON POST, success/failure
/// logged, never surfaced to the caller.
pub struct EmailNotifier {
    client: reqwest::Client,
    email_api_url: String,
    default_to: String,
}

impl EmailNotifier {
    pub fn new(email_api_url: impl Into<String>, default_to: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            email_api_url: email_api_url.into(),
            default_to: default_to.into(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, kind: NotificationKind) {
        let (subject, content) = kind.render();
        let body = SendRequest {
            to_email: &self.default_to,
            subject: &subject,
            content: &content,
            content_type: "text",
        };

        match self
            .client
            .post(&self.email_api_url)
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(subject, "notification email sent");
            }
            Ok(resp) => {
                tracing::error!(subject, status = %resp.status(), "notification email rejected by gateway");
            }
            Err(e) => {
                tracing::error!(subject, error = %e, "notification email send failed");
            }
        }
    }
}
