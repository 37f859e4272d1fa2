//! Hosting automation: detect where sites run, render their Kubernetes,
//! Compose or virtual-host configuration, and apply it over pooled SSH
//! connections while tracking each site's lifecycle.

pub mod config;
pub mod deploy;
pub mod detect;
pub mod error;
pub mod model;
pub mod render;
pub mod ssh;
pub mod store;
pub mod strategy;

pub use error::{Error, Result};
