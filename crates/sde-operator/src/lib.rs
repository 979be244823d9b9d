//! SDE operator - configuration and controller wiring for the binary

pub mod config;
pub mod controller_runner;
