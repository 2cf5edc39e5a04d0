//! Telemeter is a small metrics pipeline. An agent samples its own process
//! and the host it runs on, signs every reading and ships batches of them to
//! a collector. The collector checks signatures, keeps the latest value of
//! every metric in memory, serves lookups and persists snapshots to a file,
//! a Postgres table or both.
//!
//! Batches travel either as JSON over HTTP or as length-prefixed protobuf
//! frames over TCP. Either way the payload is gzipped and, when the operator
//! hands out an RSA key pair, encrypted.
#![allow(unknown_lints)]
#![deny(trivial_numeric_casts, missing_docs, unstable_features, unused_import_braces)]

#[macro_use]
extern crate log;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate serde_derive;

pub mod agent;
pub mod backend;
pub mod collector;
pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod http;
pub mod logging;
pub mod metric;
pub mod protocols;
pub mod store;
pub mod thread;
pub mod transport;
pub mod util;
