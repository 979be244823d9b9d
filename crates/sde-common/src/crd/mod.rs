//! Custom Resource Definitions for the SDE operator

mod sde;

pub use sde::{connection_config_map_name, connection_secret_name, Sde, SdeSpec, SdeStatus};
