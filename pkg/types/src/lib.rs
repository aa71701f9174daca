//! Object model shared by the state store and the controllers.

pub mod config;
pub mod limit;
pub mod namespace;
pub mod quota;
pub mod resource;
pub mod validate;
