// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Client for the `RouterOS` API protocol.
//!
//! The API is a plain TCP protocol (port 8728 by default). Requests and replies are *sentences*:
//! sequences of length-prefixed *words* terminated by an empty word. This crate provides the wire
//! codec, a connection which runs one command at a time, and a [`Client`] which owns the
//! connection, logs in and re-establishes it when it breaks.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

mod client;
pub mod codec;
mod connection;
mod error;
pub mod sentence;

// re-exports
pub use client::{Client, RouterAddress, RouterConfig};
pub use connection::Connection;
pub use error::RouterError;
pub use sentence::{Attributes, Command, Reply, Sentence};

/// Default port of the (plain-text) `RouterOS` API service
pub const DEFAULT_API_PORT: u16 = 8728;

use tracectl::trace_target;
trace_target!("routeros", LevelFilter::INFO, &["router"]);
