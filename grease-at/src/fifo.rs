//! # fifo - A bounded receive buffer for one socket
//!
//! Producer is the receive pipeline, consumer is the socket's read. The
//! capacity never changes after construction; filling it is all-or-nothing.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::collections::VecDeque;
use std::fmt;

use crate::error::{Error, Result};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// A fixed-capacity FIFO of received bytes.
pub struct RxFifo {
	buf: VecDeque<u8>,
	capacity: usize,
}

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl RxFifo {
	/// An empty FIFO that will never hold more than `capacity` bytes.
	pub fn new(capacity: usize) -> RxFifo {
		RxFifo {
			buf: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	/// Room left.
	pub fn free(&self) -> usize {
		self.capacity - self.buf.len()
	}

	pub fn clear(&mut self) {
		self.buf.clear()
	}

	/// Append all of `data`, or none of it if it doesn't fit.
	pub fn put_all(&mut self, data: &[u8]) -> Result<()> {
		if data.len() > self.free() {
			return Err(Error::Overflow {
				needed: data.len(),
				free: self.free(),
			});
		}
		self.buf.extend(data);
		Ok(())
	}

	/// Move as many bytes as fit into `out`, oldest first. Returns how many
	/// were moved.
	pub fn get(&mut self, out: &mut [u8]) -> usize {
		let count = out.len().min(self.buf.len());
		for (slot, byte) in out.iter_mut().zip(self.buf.drain(..count)) {
			*slot = byte;
		}
		count
	}
}

/// Don't log the contents of the buffer
impl fmt::Debug for RxFifo {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "RxFifo {{ len: {}, capacity: {} }}", self.len(), self.capacity)
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
