//! # transport - The two seams between the engine and the outside world
//!
//! The engine never touches a serial port or a clock directly. It talks to
//! a `Transport`, which moves bytes, and a `Scheduler`, which tells the time
//! and gets a chance to run other work every time the engine is waiting.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::collections::VecDeque;
use std::io;
use std::io::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// A full-duplex byte stream to the modem.
///
/// Reads never block: `available` says how many bytes `read_byte` can hand
/// out right now.
pub trait Transport {
	/// How many received bytes are waiting to be read.
	fn available(&mut self) -> usize;
	/// Take one received byte, if there is one.
	fn read_byte(&mut self) -> Option<u8>;
	/// Queue some bytes for the modem.
	fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
	/// Push anything queued out to the modem.
	fn flush(&mut self) -> io::Result<()>;
}

/// Time and cooperative yielding.
///
/// Every wait loop in the engine calls `yield_now` once per iteration, so a
/// cooperative scheduler can run other tasks while we wait for the modem.
pub trait Scheduler {
	/// A monotonic timestamp. The epoch doesn't matter.
	fn now(&self) -> Duration;
	/// Give other work a chance to run.
	fn yield_now(&mut self);
	/// Wait for the given period.
	fn delay(&mut self, period: Duration);
}

/// Adapts any std stream into a `Transport`.
///
/// The stream must not block on read: put it in non-blocking mode, or give
/// it a short read timeout. `WouldBlock` and `TimedOut` just mean "nothing
/// yet".
#[derive(Debug)]
pub struct IoTransport<T> {
	stream: T,
	pending: VecDeque<u8>,
}

/// A `Scheduler` for an ordinary OS thread.
#[derive(Debug, Clone, Copy)]
pub struct SystemScheduler {
	epoch: Instant,
}

// ****************************************************************************
//
// Private Data
//
// ****************************************************************************

const READ_CHUNK: usize = 256;

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl<T> IoTransport<T>
where
	T: Read + Write,
{
	/// Wrap a stream.
	pub fn new(stream: T) -> IoTransport<T> {
		IoTransport {
			stream,
			pending: VecDeque::new(),
		}
	}

	/// Get the stream back. Anything received but not yet read is lost.
	pub fn into_inner(self) -> T {
		self.stream
	}

	/// Pull whatever the stream has for us into `pending`.
	fn fill(&mut self) {
		let mut chunk = [0u8; READ_CHUNK];
		match self.stream.read(&mut chunk) {
			Ok(len) => self.pending.extend(&chunk[..len]),
			Err(ref err)
				if err.kind() == io::ErrorKind::WouldBlock
					|| err.kind() == io::ErrorKind::TimedOut
					|| err.kind() == io::ErrorKind::Interrupted => {}
			Err(err) => warn!("Transport read error: {}", err),
		}
	}
}

impl<T> Transport for IoTransport<T>
where
	T: Read + Write,
{
	fn available(&mut self) -> usize {
		if self.pending.is_empty() {
			self.fill();
		}
		self.pending.len()
	}

	fn read_byte(&mut self) -> Option<u8> {
		if self.pending.is_empty() {
			self.fill();
		}
		self.pending.pop_front()
	}

	fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
		self.stream.write_all(data)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.stream.flush()
	}
}

impl SystemScheduler {
	pub fn new() -> SystemScheduler {
		SystemScheduler {
			epoch: Instant::now(),
		}
	}
}

impl Default for SystemScheduler {
	fn default() -> SystemScheduler {
		SystemScheduler::new()
	}
}

impl Scheduler for SystemScheduler {
	fn now(&self) -> Duration {
		self.epoch.elapsed()
	}

	fn yield_now(&mut self) {
		thread::yield_now();
	}

	fn delay(&mut self, period: Duration) {
		thread::sleep(period);
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
