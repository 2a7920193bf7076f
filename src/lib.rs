#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod models;
pub mod registry;
pub mod report;
pub mod transport;

pub use error::{Result, SyncError};
