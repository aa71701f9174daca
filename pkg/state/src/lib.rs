//! Persistent object store, watch stream and typed registry.

pub mod client;
pub mod error;
pub mod registry;
pub mod watch;

pub use error::StoreError;
pub use registry::Registry;
