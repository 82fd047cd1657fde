//! # ergo-tests
//!
//! Cross-crate tests for the Ergo P2P layer.
//!
//! - Codec tests over framed streams
//! - Synchronizer scenarios driven with a paused clock
//! - Snapshot discovery and download
//! - Property-based tests for codecs and delivery accounting

pub mod generators;
pub mod harness;




#[cfg(test)]
mod property_tests;

pub use generators::*;
pub use harness::*;
