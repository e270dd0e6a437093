//! DerivateX Backend Library
//!
//! Learned-behaviour anomaly detection for derivative trade records: turns the
//! correction history of records into labelled examples, grows a forest of
//! decision trees over them and flags new or recent records that resemble
//! past mistakes.

pub mod config;
pub mod error;
pub mod learned;
pub mod models;
pub mod service;
pub mod storage;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use service::LearnedBehaviour;
pub use storage::Database;
