//! Service Runtime
//!
//! Connection supervision and the registry that owns it.

pub mod registry;
pub mod supervisor;

pub use registry::LinkRegistry;
pub use supervisor::{ConnectionSupervisor, Connector, ReconnectPolicy, TransportConnector};
