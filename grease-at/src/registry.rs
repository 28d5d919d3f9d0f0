//! # registry - Per-mux socket state
//!
//! The modem multiplexes up to `MUX_COUNT` TCP connections over one serial
//! link. Each multiplex index gets a `Slot`, which remembers whether the
//! connection is up, how many bytes the modem says it is holding for us,
//! and the bytes we've already pulled across.
//!
//! Slots are only reachable through a `Mux`, and a `Mux` can only be made
//! from an in-range index, so a noisy index from the wire can never be used
//! to reach outside the table.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fifo::RxFifo;

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// How many simultaneous connections the modem supports.
pub const MUX_COUNT: usize = 5;

/// A multiplex index, known to be in range.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Mux(u8);

/// The state we keep for one multiplex index.
#[derive(Debug)]
pub struct Slot {
	mux: Mux,
	/// Set by a successful connect, cleared by close or a closed notice
	pub connected: bool,
	/// Bytes the modem has reported as retrievable but we haven't fetched
	pub available: usize,
	/// The modem told us new data arrived; resolve with an availability
	/// query at the next maintenance sweep
	pub got_data: bool,
	/// When we last forced a data check on an idle socket
	pub last_check: Option<Duration>,
	/// Bytes fetched but not yet read
	pub rx: RxFifo,
}

/// The fixed table of slots, one per mux.
#[derive(Debug)]
pub struct Registry {
	slots: [Option<Slot>; MUX_COUNT],
	rx_capacity: usize,
}

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl Mux {
	/// Check an index against `MUX_COUNT`.
	pub fn new(index: u8) -> Result<Mux> {
		if (index as usize) < MUX_COUNT {
			Ok(Mux(index))
		} else {
			Err(Error::BadMux(index))
		}
	}

	/// Every mux, in order.
	pub fn all() -> impl Iterator<Item = Mux> {
		(0..MUX_COUNT as u8).map(Mux)
	}

	pub fn index(self) -> usize {
		self.0 as usize
	}

	pub fn as_u8(self) -> u8 {
		self.0
	}
}

impl fmt::Display for Mux {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Mux({})", self.0)
	}
}

impl Slot {
	fn new(mux: Mux, rx_capacity: usize) -> Slot {
		Slot {
			mux,
			connected: false,
			available: 0,
			got_data: false,
			last_check: None,
			rx: RxFifo::new(rx_capacity),
		}
	}

	pub fn mux(&self) -> Mux {
		self.mux
	}
}

impl Registry {
	/// An empty table. Every slot registered later gets a receive FIFO of
	/// `rx_capacity` bytes.
	pub fn new(rx_capacity: usize) -> Registry {
		Registry {
			slots: [None, None, None, None, None],
			rx_capacity,
		}
	}

	/// Claim `mux` with fresh state. The latest registration wins; if that
	/// throws away a live connection we say so.
	pub fn register(&mut self, mux: Mux) {
		let fresh = Slot::new(mux, self.rx_capacity);
		if let Some(old) = self.slots[mux.index()].replace(fresh) {
			if old.connected {
				warn!(
					"Replacing connected socket on {} ({} bytes unread)",
					mux,
					old.rx.len() + old.available
				);
			} else {
				debug!("Re-registered {}", mux);
			}
		}
	}

	/// Release `mux`. Returns true if something was registered.
	pub fn unregister(&mut self, mux: Mux) -> bool {
		self.slots[mux.index()].take().is_some()
	}

	pub fn lookup(&self, mux: Mux) -> Option<&Slot> {
		self.slots[mux.index()].as_ref()
	}

	pub fn lookup_mut(&mut self, mux: Mux) -> Option<&mut Slot> {
		self.slots[mux.index()].as_mut()
	}

	/// Like `lookup_mut`, but not being registered is an error.
	pub fn slot_mut(&mut self, mux: Mux) -> Result<&mut Slot> {
		self.lookup_mut(mux).ok_or(Error::NotRegistered(mux))
	}

	/// Like `lookup`, but not being registered is an error.
	pub fn slot(&self, mux: Mux) -> Result<&Slot> {
		self.lookup(mux).ok_or(Error::NotRegistered(mux))
	}

	/// The muxes that currently have a slot.
	pub fn registered<'a>(&'a self) -> impl Iterator<Item = Mux> + 'a {
		self.slots.iter().flatten().map(|s| s.mux)
	}

	/// Record a data-arrival notice. Returns false (and does nothing) if
	/// nobody is registered on that mux.
	pub fn note_data(&mut self, mux: Mux) -> bool {
		match self.lookup_mut(mux) {
			Some(slot) => {
				slot.got_data = true;
				true
			}
			None => false,
		}
	}

	/// Record a connection-closed notice. Returns false (and does nothing)
	/// if nobody is registered on that mux.
	pub fn note_closed(&mut self, mux: Mux) -> bool {
		match self.lookup_mut(mux) {
			Some(slot) => {
				slot.connected = false;
				true
			}
			None => false,
		}
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
