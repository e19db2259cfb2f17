//! Core infrastructure for the binned feature store.
//!
//! - [`types`]: fundamental index and value types
//! - [`constants`]: storage-selection and format constants
//! - [`error`]: error handling and the crate-wide `Result`
//! - [`utils`]: binary writers/readers and lock-free load buffers

pub mod constants;
pub mod error;
pub mod types;
pub mod utils;
