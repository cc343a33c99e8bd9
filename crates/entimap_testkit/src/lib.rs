//! # entimap testkit
//!
//! Test utilities for entimap.
//!
//! This crate provides:
//! - Fixture models and ready-made test environments
//! - Property-based test generators using proptest
//! - Fault-injection doubles for the cache and adapter seams
//! - A lifecycle harness for an external datastore emulator
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```
//! use entimap_testkit::prelude::*;
//!
//! init_tracing();
//! let env = TestEnv::memory();
//! let mut session = env.session();
//! let mut ada = env.person(&session, "Ada", 36);
//! session.put(&mut ada).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;

pub mod emulator;
pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::emulator::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
}

pub use emulator::*;
pub use faults::*;
pub use fixtures::*;
pub use generators::*;

static TRACING: Once = Once::new();

/// Installs a test subscriber honoring `RUST_LOG`, defaulting to `debug`.
/// Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        // another harness may already have installed a global subscriber
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
