//! Refolio integration tests and workspace root
//!
//! This crate serves as the root of the refolio workspace and contains
//! integration tests that test interactions between multiple crates.

// Re-export major components for integration testing
pub use refolio_model as model;
pub use refolio_sync as sync;
