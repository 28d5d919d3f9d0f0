//! # modem - The engine object
//!
//! A `Modem` owns the transport, the scheduler, the configuration and the
//! socket registry. There is exactly one of it per serial link and every
//! operation takes `&mut self`, so only one command is ever in flight and
//! every reply belongs to the command we last sent (apart from unsolicited
//! notices, which the reader absorbs wherever they turn up).
//!
//! The operations themselves are spread across the other modules:
//!
//! * `command` - writing AT lines
//! * `reader` - waiting for replies and absorbing notices
//! * `pipeline` - moving socket payload in and out
//! * `socket` - the per-socket surface
//! * `network` - one-shot modem, SIM and network commands

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::time::Duration;

use crate::config::Config;
use crate::registry::{Mux, Registry};
use crate::transport::{Scheduler, SystemScheduler, Transport};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// An AT engine driving one modem over one transport.
#[derive(Debug)]
pub struct Modem<T, S = SystemScheduler> {
	pub(crate) transport: T,
	pub(crate) scheduler: S,
	pub(crate) config: Config,
	pub(crate) sockets: Registry,
}

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl<T> Modem<T, SystemScheduler>
where
	T: Transport,
{
	/// An engine on an ordinary thread, with the default configuration.
	pub fn new(transport: T) -> Modem<T, SystemScheduler> {
		Modem::with_config(transport, SystemScheduler::new(), Config::default())
	}
}

impl<T, S> Modem<T, S>
where
	T: Transport,
	S: Scheduler,
{
	pub fn with_config(transport: T, scheduler: S, config: Config) -> Modem<T, S> {
		let sockets = Registry::new(config.rx_capacity);
		Modem {
			transport,
			scheduler,
			config,
			sockets,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn transport(&self) -> &T {
		&self.transport
	}

	pub fn scheduler(&self) -> &S {
		&self.scheduler
	}

	pub fn sockets(&self) -> &Registry {
		&self.sockets
	}

	/// Claim a mux for a socket. Any previous state on it is discarded.
	pub fn register(&mut self, mux: Mux) {
		self.sockets.register(mux)
	}

	/// Release a mux. Returns true if it had been registered.
	pub fn unregister(&mut self, mux: Mux) -> bool {
		self.sockets.unregister(mux)
	}

	/// Bring the registry up to date.
	///
	/// Every socket the modem has flagged with a data-arrival notice gets an
	/// availability query, then anything sitting in the transport is read
	/// purely so that notices in it are processed. Safe to call as often as
	/// you like; with nothing new on the wire it changes nothing.
	pub fn maintain(&mut self) {
		let flagged: Vec<Mux> = self
			.sockets
			.registered()
			.filter(|&mux| self.sockets.lookup(mux).map_or(false, |s| s.got_data))
			.collect();
		for mux in flagged {
			if let Some(slot) = self.sockets.lookup_mut(mux) {
				slot.got_data = false;
			}
			match self.query_available(mux) {
				Ok(len) => trace!("{} has {} bytes waiting", mux, len),
				Err(err) => warn!("Availability query on {} failed: {}", mux, err),
			}
		}
		let drain = self.config.drain_timeout;
		while self.transport.available() > 0 {
			self.wait_response(drain, &[], None);
		}
	}

	/// Time since `start`, by the scheduler's clock.
	pub(crate) fn elapsed_since(&self, start: Duration) -> Duration {
		self.scheduler.now().checked_sub(start).unwrap_or_default()
	}
}

// ****************************************************************************
//
// Tests
//
// ****************************************************************************


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
