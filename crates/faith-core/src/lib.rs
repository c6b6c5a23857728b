//! # faith-core
//! Foundation types, the price ladder and collaborator traits for the Faith
//! settlement pipeline.
//!
//! - [`pricing`]: the price ladder and phased coin release, as pure
//!   transitions over [`types::TokenomicsState`]
//! - [`store`]: persistence interface and an in-memory store
//! - [`traits`]: bridge transport, monitoring sink, deposit source, price feed

pub mod constants;
pub mod error;
pub mod events;
pub mod pricing;
pub mod store;
pub mod traits;
pub mod types;
