//! Centralized constants for the quota controller.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod controller;
pub mod labels;
pub mod paths;
pub mod state;
