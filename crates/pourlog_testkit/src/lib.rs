//! # pourlog Testkit
//!
//! Test utilities for pourlog.
//!
//! This crate provides:
//! - Venue, time and notification fixtures
//! - Property-based test generators using proptest
//! - A fully wired detection pipeline for end-to-end tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pourlog_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn detects_a_visit() {
//!     let h = Harness::in_memory();
//!     h.start_tracking(&[anchor_brewing()]).await.unwrap();
//!     h.sample(NEAR_ANCHOR, base_time());
//!     // ... assert on h.visit_events()
//!     h.shutdown().await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
