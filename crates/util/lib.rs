//! Utility crate for the ringd cluster coordination core: error taxonomy,
//! node identity primitives, time helpers, on-disk persistence and
//! configuration loading shared by `ringd_rpc` and the `ringd` daemon.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod data;
pub mod error;
pub mod persister;
pub mod time;
