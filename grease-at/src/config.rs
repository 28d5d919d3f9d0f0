//! # config - Timeouts and sizes for the AT engine
//!
//! There are no config files. Build a `Config`, tweak whichever fields you
//! care about and hand it to `Modem::with_config`.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::time::Duration;

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// How long we wait for things, and how much we buffer.
#[derive(Debug, Clone)]
pub struct Config {
	/// Default wait for a command's reply
	pub response_timeout: Duration,
	/// Wait for each blocking sub-field read inside a response
	pub field_timeout: Duration,
	/// Wait for the `>` prompt before writing a payload
	pub prompt_timeout: Duration,
	/// Wait for `CONNECT OK` and friends
	pub connect_timeout: Duration,
	/// Each drain read inside `maintain()`
	pub drain_timeout: Duration,
	/// Total budget for the modem-alive probe
	pub probe_timeout: Duration,
	/// Pause between probes
	pub probe_interval: Duration,
	/// Wait for the `OK` to a single probe
	pub probe_reply_timeout: Duration,
	/// An idle connected socket asks the modem for data at most this often,
	/// in case a data-arrival notice got lost.
	pub availability_poll: Duration,
	/// Network attach and PDP context activation
	pub attach_timeout: Duration,
	/// Wait for the modem to report its IP address
	pub address_timeout: Duration,
	/// Size of each socket's receive FIFO
	pub rx_capacity: usize,
	/// Fetch payload hex encoded (`CIPRXGET=3`) instead of raw
	/// (`CIPRXGET=2`)
	pub hex_mode: bool,
}

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl Default for Config {
	fn default() -> Config {
		Config {
			response_timeout: Duration::from_millis(1_000),
			field_timeout: Duration::from_millis(1_000),
			prompt_timeout: Duration::from_millis(1_000),
			connect_timeout: Duration::from_millis(75_000),
			drain_timeout: Duration::from_millis(10),
			probe_timeout: Duration::from_millis(10_000),
			probe_interval: Duration::from_millis(100),
			probe_reply_timeout: Duration::from_millis(200),
			availability_poll: Duration::from_millis(500),
			attach_timeout: Duration::from_millis(60_000),
			address_timeout: Duration::from_millis(10_000),
			rx_capacity: 64,
			hex_mode: false,
		}
	}
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
