//! Shared test utilities for atelier integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs over a temp content root and an
//!   in-memory catalog
//! - `ItemBuilder` for seeding catalog items and their files
//! - Instrumented `ContentStore`, `CatalogStore` and `ProgressSink` doubles

pub mod builders;
pub mod harness;
pub mod stores;

pub use builders::*;
pub use harness::TestHarness;
pub use stores::*;
