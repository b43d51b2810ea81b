//! Core types and the defensive data-access layer for the registration store.
//!
//! Stored rows are schema-less and have drifted across several schema
//! revisions. Everything in this crate exists to turn those rows into one
//! canonical model on read, write them back in one convention, and keep the
//! cross-entity subscription invariants intact. The crate has no database
//! dependency; backends implement [`store::ItemStore`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod coerce;
pub mod error;
pub mod lifecycle;
pub mod normalize;
pub mod notify;
pub mod person;
pub mod project;
pub mod repository;
pub mod sink;
pub mod store;
pub mod subscription;
pub mod update;

pub use error::{EntityKind, Error, Result};
