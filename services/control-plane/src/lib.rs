//! appz control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but exposes its
//! orchestrators as a library for integration testing and reuse.

pub mod api;
pub mod backup;
pub mod capacity;
pub mod config;
pub mod deploy;
pub mod error;
pub mod locks;
pub mod model;
pub mod monitoring;
pub mod providers;
pub mod secrets;
pub mod state;
pub mod storage;
pub mod store;
pub mod workers;
