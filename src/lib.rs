#![cfg_attr(not(test), no_std)]

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod at;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub(crate) mod module_timing;
pub mod runner;
pub mod services;
pub mod socket;
pub mod state;
pub mod timer;
pub mod urc_handler;

#[cfg(test)]
mod test_helpers;

pub use at::{AtEngine, Dispatch, Flow, Response};
pub use client::{Device, Event};
pub use config::{Config, DebugFlags, NoPin};
pub use error::{Error, Stage};
pub use socket::{SocketHandle, SocketState, MAX_PAYLOAD, MAX_SOCKETS, SERVER_SOCKET};
