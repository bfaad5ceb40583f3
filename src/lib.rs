pub mod bridge;
pub mod broker;
pub mod config;
pub mod error;
pub mod host;
pub mod ids;
pub mod master;
pub mod services;
pub mod shaper;
pub mod staging;

pub use bridge::{BackendFailure, BridgeCall, CallTicket, FailureOrigin, RosbridgeClient};
pub use broker::{CallContext, CallKind, CallSpec, Outcome, RequestBroker, Resolution};
pub use config::{BridgeConfig, ServiceConfig, ServiceTable};
pub use error::{BrokerError, PLATFORM_FAILURE};
pub use ids::{IdentifierCache, RequestId};
pub use master::{MasterChannel, MasterLink, WorkerLog};
pub use services::{BrokerDeps, ServiceHandler, ServiceRegistry};
pub use staging::UploadStaging;
