pub mod action;
pub mod alert;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod paths;
pub mod policy;
pub mod queue;
pub mod rbac;
pub mod router;
pub mod services;
pub mod types;

pub use error::{GuardError, Result};
