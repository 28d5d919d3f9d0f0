//! # grease-at - An AT command engine for multiplexed cellular modems
//!
//! Drives a Quectel MC60 style modem over a serial link, and runs up to
//! five TCP sockets over that one link. There's one `Modem` per link and
//! it owns everything: the transport, the clock and the socket table.
//!
//! The engine is synchronous. Every wait has a timeout and yields to the
//! `Scheduler` on each pass round its loop, so it can sit on a plain
//! thread or under a cooperative scheduler.
//!
//! Copyright (c) Cambridge Consultants 2018.
//!
//! Dual MIT/Apache 2.0 licensed. See the top-level COPYRIGHT file for further
//! information and licensing.

#[macro_use]
extern crate log;

// ****************************************************************************
//
// Modules
//
// ****************************************************************************

mod command;
pub mod config;
pub mod error;
pub mod fifo;
pub mod matcher;
mod modem;
pub mod network;
mod pipeline;
mod reader;
pub mod registry;
pub mod socket;
pub mod testing;
pub mod transport;

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::modem::Modem;
pub use crate::network::{RegStatus, SimStatus};
pub use crate::registry::{Mux, MUX_COUNT};
pub use crate::socket::Client;
pub use crate::transport::{IoTransport, Scheduler, SystemScheduler, Transport};

/// Line ending for commands and replies
pub const NL: &str = "\r\n";

/// Generic success
pub const OK: &str = "OK\r\n";

/// Generic failure
pub const ERROR: &str = "CME ERROR\r\n";

/// What most commands are answered with, in rank order
pub const DEFAULT_REPLIES: [&str; 2] = [OK, ERROR];

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
