//! Best-effort callback delivery
//!
//! POSTs an event payload to the caller's callback URL once, in its own task.
//! Failures are logged and never retried.

use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::errors::{GatewayError, Result};

#[derive(Debug, Clone)]
pub struct CallbackNotifier {
    client: reqwest::Client,
}

impl CallbackNotifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GatewayError::callback)?;
        Ok(Self { client })
    }

    /// Deliver `payload` in the background; the handle yields the HTTP status
    pub fn notify<T>(&self, url: impl Into<String>, payload: &T) -> JoinHandle<Result<u16>>
    where
        T: Serialize + ?Sized,
    {
        let url = url.into();
        let body = serde_json::to_value(payload);
        let notifier = self.clone();
        tokio::spawn(async move {
            let body = body.map_err(|e| {
                let err = GatewayError::callback(format!("encoding payload: {}", e));
                error!("Error sending callback to {}: {}", url, err);
                err
            })?;
            notifier.deliver(&url, &body).await
        })
    }

    /// POST `payload` as JSON and wait for the response status
    pub async fn deliver<T>(&self, url: &str, payload: &T) -> Result<u16>
    where
        T: Serialize + ?Sized,
    {
        match self.client.post(url).json(payload).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                info!("Callback sent to {}, status: {}", url, status);
                Ok(status)
            }
            Err(e) => {
                let err = GatewayError::callback(e);
                error!("Error sending callback to {}: {}", url, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unreachable_callback_reports_error() {
        let notifier = CallbackNotifier::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on localhost is not expected to accept connections
        let result = notifier
            .notify("http://127.0.0.1:9/callback", &json!({"event": "connect"}))
            .await
            .unwrap();
        assert!(matches!(result, Err(GatewayError::CallbackDelivery { .. })));
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refusing to encode"))
        }
    }

    #[tokio::test]
    async fn test_encoding_failure_reported_without_sending() {
        let notifier = CallbackNotifier::new(Duration::from_secs(1)).unwrap();
        let result = notifier
            .notify("http://127.0.0.1:9/callback", &Unencodable)
            .await
            .unwrap();
        let err = result.unwrap_err();
        assert!(matches!(err, GatewayError::CallbackDelivery { .. }));
        assert!(err.to_string().contains("encoding payload"));
    }

    #[tokio::test]
    async fn test_invalid_url_reports_error() {
        let notifier = CallbackNotifier::new(Duration::from_secs(1)).unwrap();
        let result = notifier.deliver("not a url", &json!({})).await;
        assert!(result.is_err());
    }
}
