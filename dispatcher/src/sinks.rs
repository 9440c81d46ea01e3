use std::time::Duration;

use async_trait::async_trait;
use reddalert_core::{CoreError, WebhookError};
use reqwest::Client;

/// Abstract chat-webhook transport: POST a JSON body, 2xx is success.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError>;
}

pub struct HttpWebhookSink {
    client: Client,
}

impl HttpWebhookSink {
    pub fn new(timeout: Duration) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CoreError::Network)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WebhookError::Network {
                details: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(WebhookError::RateLimited { retry_after });
        }
        Err(WebhookError::DeliveryFailed {
            status_code: status.as_u16(),
        })
    }
}

/// Abstract email transport, used only for the delivery-failure fallback.
#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), CoreError>;
}

/// SendGrid-backed email delivery.
pub struct SendgridEmailSink {
    client: Client,
    api_key: String,
    from_name: String,
    from_email: String,
}

impl SendgridEmailSink {
    pub fn new(
        api_key: String,
        from_name: String,
        from_email: String,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CoreError::Network)?;
        Ok(Self {
            client,
            api_key,
            from_name,
            from_email,
        })
    }
}

#[async_trait]
impl EmailSink for SendgridEmailSink {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), CoreError> {
        let payload = serde_json::json!({
            "personalizations": [{
                "to": [{"email": to}],
                "subject": subject,
            }],
            "from": {"email": self.from_email, "name": self.from_name},
            "content": [
                {"type": "text/plain", "value": body},
            ],
        });

        let response = self
            .client
            .post("https://api.sendgrid.com/v3/mail/send")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(CoreError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::Internal {
                message: format!("sendgrid error: status={status} body={detail:.512}"),
            });
        }
        Ok(())
    }
}
