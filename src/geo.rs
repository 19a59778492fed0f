//! Geo resolution seam. When geo targeting is enabled and a request carries
//! only an IP address, the orchestrator resolves it here before collating
//! geo facts. Resolution is best-effort: a failed lookup leaves the request
//! geo as-is.

use crate::delivery::Geo;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<Geo>;
}

pub type SharedGeoResolver = Arc<dyn GeoResolver>;

/// Default resolver: one GET against a JSON geo endpoint.
pub struct HttpGeoResolver {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpGeoResolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        HttpGeoResolver {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl GeoResolver for HttpGeoResolver {
    async fn lookup(&self, ip: &str) -> Option<Geo> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("ip", ip)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            log::debug!("geo lookup for {ip} returned {}", response.status());
            return None;
        }
        let mut geo: Geo = response.json().await.ok()?;
        // The response describes the queried IP even when the endpoint omits
        // echoing it back.
        if geo.ip_address.is_none() {
            geo.ip_address = Some(ip.to_string());
        }
        Some(geo)
    }
}
