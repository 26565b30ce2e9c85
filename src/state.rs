use std::sync::Arc;

use crate::config::Config;
use crate::database::Storage;
use crate::status_feed::StatusFeed;
use crate::stripe_client::BillingGateway;
use crate::zapier::ZapierNotifier;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,
    pub billing: Arc<dyn BillingGateway>,
    pub status_feed: StatusFeed,
    pub notifier: ZapierNotifier,
}

impl AppState {
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        billing: Arc<dyn BillingGateway>,
        notifier: ZapierNotifier,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            billing,
            status_feed: StatusFeed::new(),
            notifier,
        }
    }

    /// Absolute URL under the public app origin.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.app_base_url, path)
    }
}
