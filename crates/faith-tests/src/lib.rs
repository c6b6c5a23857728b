//! End-to-end and adversarial test suite for the Faith settlement pipeline.
//!
//! Integration tests live under `tests/`. They drive a real [`Sequencer`]
//! over scripted transports and in-memory or RocksDB stores, and check the
//! ordering, rollback and persistence guarantees from the outside.
//!
//! [`Sequencer`]: faith_sequencer::Sequencer

pub mod helpers;
