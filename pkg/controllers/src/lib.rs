pub mod assignment;
pub mod children;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod namespace;
pub mod precedence;
pub mod profile;
pub mod queue;
pub mod runner;
pub mod selector;

#[cfg(test)]
mod test_support;

pub use error::ReconcileError;
pub use namespace::NamespaceController;
pub use profile::QuotaProfileController;
pub use runner::ControllerSettings;
