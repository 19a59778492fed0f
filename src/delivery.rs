//! Plain data records for the delivery request/response shapes the engine
//! consumes and produces. These mirror the remote service's wire format; the
//! engine only fills in what on-device evaluation can know.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impression_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<VisitorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<Property>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<ExecuteRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Telemetry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<i64>,
    /// Opaque trace token; presence turns on per-detail trace output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

impl DeliveryRequest {
    pub fn property_token(&self) -> Option<&str> {
        self.property.as_ref().and_then(|p| p.token.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisitorId {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tnt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third_party_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketing_cloud_visitor_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub customer_ids: Vec<CustomerId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerId {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated_state: Option<AuthenticatedState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatedState {
    Unknown,
    Authenticated,
    LoggedOut,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Context {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_hints: Option<ClientHints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<Geo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(rename = "browserUAWithMajorVersion")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_ua_with_major_version: Option<String>,
    #[serde(rename = "browserUAWithFullVersion")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_ua_with_full_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referring_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Geo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

impl Geo {
    /// True when only the IP is known, i.e. a lookup is still needed.
    pub fn needs_resolution(&self) -> bool {
        self.ip_address.as_deref().is_some_and(|ip| !ip.is_empty())
            && self.city.as_deref().unwrap_or("").is_empty()
            && self.state_code.as_deref().unwrap_or("").is_empty()
            && self.country_code.as_deref().unwrap_or("").is_empty()
            && self.latitude.is_none()
            && self.longitude.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Property {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrefetchRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<ViewRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MboxRequest {
    pub name: String,
    pub index: u32,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewRequest {
    /// Absent name means "all views known to the artifact".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageLoadRequest {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// The unit the orchestrator iterates over: one named mbox, one view, or the
/// page load. Borrowed views into the request; dispatch is on the tag.
#[derive(Debug, Clone, Copy)]
pub enum RequestDetails<'a> {
    Mbox(&'a MboxRequest),
    View(&'a ViewRequest),
    PageLoad(&'a PageLoadRequest),
}

impl<'a> RequestDetails<'a> {
    pub fn parameters(&self) -> &'a HashMap<String, String> {
        match self {
            RequestDetails::Mbox(m) => &m.parameters,
            RequestDetails::View(v) => &v.parameters,
            RequestDetails::PageLoad(p) => &p.parameters,
        }
    }

    pub fn address(&self) -> Option<&'a Address> {
        match self {
            RequestDetails::Mbox(m) => m.address.as_ref(),
            RequestDetails::View(v) => v.address.as_ref(),
            RequestDetails::PageLoad(p) => p.address.as_ref(),
        }
    }
}

// ---- response side ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<VisitorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<ExecuteResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrefetchResponse {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxResponse>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<ViewResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteResponse {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mboxes: Vec<MboxResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<PageLoadResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MboxResponse {
    pub name: String,
    pub index: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<crate::artifact::DecisionOption>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<crate::artifact::Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<crate::artifact::DecisionOption>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<crate::artifact::Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageLoadResponse {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<crate::artifact::DecisionOption>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<crate::artifact::Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

// ---- notifications / telemetry ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Notification {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impression_id: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mbox: Option<NotificationMbox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<NotificationView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_load: Option<NotificationPageLoad>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationMbox {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPageLoad {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Telemetry {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<TelemetryEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: u64,
    /// Local execution time in milliseconds.
    pub execution: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<TelemetryFeatures>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decisioning_method: Option<String>,
}
