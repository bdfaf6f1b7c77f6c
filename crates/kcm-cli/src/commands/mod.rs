//! CLI commands

pub mod destroy;
pub mod dump_config;
pub mod manifests;
pub mod provision;
pub mod version;
