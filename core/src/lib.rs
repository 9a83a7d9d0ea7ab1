//! Trust Desk core: per-subject trust scoring, flag review and blacklist enforcement.

pub mod aggregation;
pub mod blacklist;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod flag;
pub mod locks;
pub mod model;
pub mod notify;
pub mod providers;
pub mod store;
pub mod types;
