//! # faith-sequencer
//!
//! The stateful half of the Faith settlement pipeline:
//! - [`sequencer::Sequencer`] drains the activation queue one at a time
//! - [`storage::RocksStore`] persists state and queue in RocksDB
//! - [`config::SequencerConfig`] holds backoff, fee, curve and feed settings
//! - [`transport::SimulatedBridge`], [`feed::FixedRateFeed`] and
//!   [`source::JsonLinesSource`] are in-process collaborators for the node
//!   binary and tests

pub mod config;
pub mod feed;
pub mod sequencer;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transport;

pub use config::{BackoffPolicy, SequencerConfig};
pub use sequencer::{Sequencer, SequencerOptions};
pub use storage::RocksStore;
