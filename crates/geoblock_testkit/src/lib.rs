//! # geoblock testkit
//!
//! Test utilities for geoblock.
//!
//! This crate provides:
//! - Store fixtures, in memory and in temporary directories
//! - Property-based test generators using proptest
//! - A checker for the structural invariants of a finished store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geoblock_testkit::prelude::*;
//!
//! #[test]
//! fn merged_store_is_well_formed() {
//!     let store = memory_store(small_config(), vec![nodes_at(&[1, 2, 3])]);
//!     check_store(&store).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod invariants;

#[cfg(test)]
mod properties;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::invariants::*;
}

pub use fixtures::*;
pub use generators::*;
pub use invariants::*;
