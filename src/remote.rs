//! Seam to the remote delivery service. The engine itself never talks to
//! the delivery edge; the host application supplies a caller, and the engine
//! uses it only for the notification/telemetry side channel and for
//! cluster-hint discovery.

use crate::delivery::{DeliveryRequest, DeliveryResponse};
use crate::errors::DecisioningError;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait RemoteDeliveryCaller: Send + Sync {
    async fn call(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DecisioningError>;
}

pub type SharedCaller = Arc<dyn RemoteDeliveryCaller>;

/// Caller that drops every request. Used for offline evaluation where no
/// delivery edge exists.
pub struct NoopDeliveryCaller;

#[async_trait]
impl RemoteDeliveryCaller for NoopDeliveryCaller {
    async fn call(&self, _request: DeliveryRequest) -> Result<DeliveryResponse, DecisioningError> {
        Ok(DeliveryResponse::default())
    }
}
