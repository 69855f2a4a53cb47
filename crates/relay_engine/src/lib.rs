//! Job lifecycle engine for the relay daemon.
//!
//! Files appearing in the local buffer are registered as jobs, driven
//! through an externally supplied transfer command by a worker pool,
//! published atomically on the endpoint via a two-phase stage/publish
//! protocol, and archived locally once delivery is confirmed.

pub mod archiver;
pub mod config;
pub mod error;
pub mod executor;
pub mod janitor;
pub mod scanner;
pub mod supervisor;
pub mod template;
pub mod transfer;
pub mod worker;

pub use config::{Config, EndpointConfig, GeneralConfig, HandoffConfig};
pub use error::{ConfigError, EngineError, TemplateError, TransferError};
pub use executor::Outcome;
pub use supervisor::{initialize_store, start_engine, EngineHandle};
pub use template::CommandTemplate;
