use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_CDN_HOST: &str = "assets.decisioningedge.net";
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Hard floor for the artifact polling interval. Configuring anything lower
/// is clamped up to this.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client code; selects the artifact path and feeds allocation hashing.
    pub client: String,
    /// Artifact environment path segment (production/staging/development).
    pub environment: String,
    /// Hostname the compiled rule artifacts are served from.
    pub cdn_host: String,
    /// Seconds between artifact refresh fetches. Clamped to
    /// [`MIN_POLLING_INTERVAL`].
    pub polling_interval_secs: u64,
    /// Property token applied to requests that do not carry their own.
    pub default_property_token: Option<String>,
    /// Mboxes for which every matching rule contributes a consequence
    /// instead of stopping at the first match.
    pub all_matching_rules_mboxes: HashSet<String>,
    /// When true, each locally executed request ships a telemetry entry with
    /// its notification call.
    pub telemetry_enabled: bool,
}

impl ClientConfig {
    pub fn new(client: impl Into<String>) -> Self {
        ClientConfig {
            client: client.into(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            cdn_host: DEFAULT_CDN_HOST.to_string(),
            polling_interval_secs: MIN_POLLING_INTERVAL.as_secs(),
            default_property_token: None,
            all_matching_rules_mboxes: HashSet::new(),
            telemetry_enabled: true,
        }
    }

    pub fn polling_interval(&self) -> Duration {
        let configured = Duration::from_secs(self.polling_interval_secs);
        configured.max(MIN_POLLING_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polling_interval_floor() {
        let mut config = ClientConfig::new("client123");
        config.polling_interval_secs = 10;
        assert_eq!(config.polling_interval(), MIN_POLLING_INTERVAL);

        config.polling_interval_secs = 900;
        assert_eq!(config.polling_interval(), Duration::from_secs(900));
    }
}
