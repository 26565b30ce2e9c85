use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info};

/// Posts business events to a Zapier catch hook. Does nothing when no hook
/// URL is configured.
#[derive(Clone)]
pub struct ZapierNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl ZapierNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Fires the notification from a background task. Delivery failures are
    /// only logged.
    pub fn notify(&self, event: &'static str, data: Value) {
        let Some(url) = self.webhook_url.clone() else {
            debug!(event, "Zapier disabled, skipping notification");
            return;
        };
        let client = self.client.clone();
        let body = envelope(event, data);

        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(event, "Sent Zapier notification");
                }
                Ok(response) => {
                    error!(event, status = %response.status(), "Zapier rejected notification");
                }
                Err(e) => error!(event, "Failed to send Zapier notification: {e}"),
            }
        });
    }
}

fn envelope(event: &str, data: Value) -> Value {
    json!({
        "event": event,
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let body = envelope("trial.started", json!({ "email": "a@b.co" }));
        assert_eq!(body["event"], "trial.started");
        assert_eq!(body["data"]["email"], "a@b.co");
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn test_disabled_notifier_is_a_noop() {
        let notifier = ZapierNotifier::disabled();
        assert!(!notifier.is_enabled());
        // No runtime is running here; a spawn would panic.
        notifier.notify("customer.registered", json!({}));
    }
}
