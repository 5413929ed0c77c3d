//! Unattended container updates: find containers whose image has a newer
//! version, replace them from their preserved configuration and clean up
//! after them.

pub mod config;
pub mod container;
pub mod dependency;
pub mod error;
pub mod filters;
pub mod instances;
pub mod labels;
pub mod lifecycle;
pub mod registry;
pub mod runtime;
pub mod self_id;
pub mod staleness;
pub mod types;
pub mod update;

pub use error::{Error, Result};
