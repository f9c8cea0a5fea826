//! Benchmark matrix orchestration for interchangeable FTLE providers.
//!
//! `matrix` crosses cases with packages, `dispatch` runs each cell through its
//! package's execution strategy, `runner` is the contract the built-in providers
//! satisfy, and `aggregate`/`report` turn persisted result documents into
//! markdown tables spliced into a host document.

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod external;
pub mod field;
pub mod harness;
pub mod matrix;
pub mod providers;
pub mod report;
pub mod runner;
pub mod schema;

pub use error::{BenchError, Result};
