//! # lib_stations
//!
//! The engine behind `server_stations`, a real-time push server for charging station
//! status. Clients connect over a WebSocket, receive a welcome message, then receive
//! periodic `station_update` messages for every list of the record dataset, each list
//! replayed circularly on its own per-connection timer.
//!
//! Modules are gated by folder-level features (`engine`, `configs`, `loggers`), all on
//! by default.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "engine")]
pub mod core;
#[cfg(feature = "engine")]
pub mod dataset;
#[cfg(feature = "engine")]
pub mod server;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "loggers")]
pub mod loggers;
