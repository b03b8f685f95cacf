//! Service supervision: the per-service object, the registry the supervisor
//! owns, the child-side setup path, and published descriptors.

pub mod descriptor;
pub mod fork_child;
pub mod registry;
pub mod service;

pub use registry::{ControlAction, RegistryState, ServiceRegistry};
pub use service::{Service, ServiceError, ServiceFlags};
