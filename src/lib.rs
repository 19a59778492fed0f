pub mod allocation;
pub mod artifact;
pub mod cluster;
pub mod collators;
pub mod condition;
pub mod config;
pub mod decisioning;
pub mod delivery;
pub mod errors;
pub mod evaluability;
pub mod executor;
pub mod geo;
pub mod loader;
pub mod macros;
pub mod notifications;
pub mod registry;
pub mod remote;

pub use artifact::RuleArtifact;
pub use config::ClientConfig;
pub use decisioning::{DecisioningResponse, DecisioningService};
pub use delivery::{DeliveryRequest, DeliveryResponse};
pub use errors::DecisioningError;
pub use registry::ClientRegistry;
pub use remote::{NoopDeliveryCaller, RemoteDeliveryCaller};
