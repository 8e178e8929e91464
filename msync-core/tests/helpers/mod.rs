//! Test helper modules for msync-core integration tests
//!
//! Provides reusable test infrastructure components:
//! - Harness: engine over two in-memory backends plus a local push channel
//! - MockBackend: in-process HTTP server with scripted responses

#![allow(dead_code, unused_imports)]

pub mod harness;
pub mod mock_backend;

// Re-export commonly used types
pub use harness::{record, wait_for_event, Harness};
pub use mock_backend::{MockBackend, RecordedRequest};
