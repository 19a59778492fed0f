//! Fact collators: each one assembles one namespace of the evaluation
//! context from the request. Request-level collators (time, user, geo) run
//! once per request; detail-level collators (page, referring, custom) run
//! once per request detail.

use crate::delivery::{DeliveryRequest, RequestDetails};
use serde_json::{Map, Value};

pub mod custom;
pub mod geo;
pub mod page;
pub mod time;
pub mod user;

pub use custom::CustomParamsCollator;
pub use geo::GeoParamsCollator;
pub use page::PageParamsCollator;
pub use time::TimeParamsCollator;
pub use user::UserParamsCollator;

pub const CONTEXT_KEY_USER: &str = "user";
pub const CONTEXT_KEY_GEO: &str = "geo";
pub const CONTEXT_KEY_PAGE: &str = "page";
pub const CONTEXT_KEY_REFERRING: &str = "referring";
/// Custom request parameters live under the `mbox` namespace.
pub const CONTEXT_KEY_CUSTOM: &str = "mbox";

pub trait ParamsCollator: Send + Sync {
    fn collate(
        &self,
        request: &DeliveryRequest,
        details: Option<&RequestDetails<'_>>,
    ) -> Map<String, Value>;
}
