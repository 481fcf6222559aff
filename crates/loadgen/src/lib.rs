//! Load generator for the ordering engine.
//!
//! Seeds a demo catalogue, places many orders concurrently through
//! [`ordering::OrderService`] and checks that the final stock matches what
//! the committed orders consumed.

pub mod config;
pub mod run;
pub mod seed;

pub use config::LoadgenConfig;
pub use run::{LoadError, RunSummary, StockLevel, run};
pub use seed::DemoCatalogue;
