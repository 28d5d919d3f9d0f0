//! # testing - Stand-ins for a real modem and a real clock
//!
//! `ScriptedTransport` plays the modem's side of a conversation: each
//! expectation is a byte string we should write, and the reply the modem
//! gives once we have. Bytes can also be injected up front to simulate
//! unsolicited notices. `ManualScheduler` is a clock that only moves when
//! the engine yields or delays, so timeouts in tests are instant and exact.
//!
//! Both are public so the layers built on this crate can test against them
//! too.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::transport::{Scheduler, Transport};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// A fake serial link driven by a script.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
	/// Waiting to be read by the engine
	rx: VecDeque<u8>,
	/// Everything the engine ever wrote
	written: Vec<u8>,
	/// Written since the last expectation was met
	pending: Vec<u8>,
	/// (what we expect to see written, what the modem says back)
	script: VecDeque<(Vec<u8>, Vec<u8>)>,
}

/// A clock that advances a millisecond per yield.
#[derive(Debug, Clone)]
pub struct ManualScheduler {
	now: Duration,
	step: Duration,
	yields: usize,
}

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl ScriptedTransport {
	pub fn new() -> ScriptedTransport {
		ScriptedTransport::default()
	}

	/// When the engine has written `written`, make `reply` readable.
	/// Expectations are met strictly in order.
	pub fn expect<W, R>(&mut self, written: W, reply: R) -> &mut ScriptedTransport
	where
		W: AsRef<[u8]>,
		R: AsRef<[u8]>,
	{
		self.script
			.push_back((written.as_ref().to_vec(), reply.as_ref().to_vec()));
		self
	}

	/// Make bytes readable straight away, as if the modem sent them
	/// unprompted.
	pub fn inject<D>(&mut self, data: D) -> &mut ScriptedTransport
	where
		D: AsRef<[u8]>,
	{
		self.rx.extend(data.as_ref());
		self
	}

	pub fn written(&self) -> &[u8] {
		&self.written
	}

	pub fn written_text(&self) -> String {
		String::from_utf8_lossy(&self.written).into_owned()
	}

	/// Bytes the engine hasn't read yet.
	pub fn unread(&self) -> usize {
		self.rx.len()
	}

	/// True once every expectation has been met.
	pub fn script_done(&self) -> bool {
		self.script.is_empty()
	}

	fn check_script(&mut self) {
		let met = match self.script.front() {
			Some((expected, _)) => self.pending.ends_with(expected),
			None => false,
		};
		if met {
			if let Some((_, reply)) = self.script.pop_front() {
				self.rx.extend(reply);
			}
			self.pending.clear();
		}
	}
}

impl Transport for ScriptedTransport {
	fn available(&mut self) -> usize {
		self.rx.len()
	}

	fn read_byte(&mut self) -> Option<u8> {
		self.rx.pop_front()
	}

	fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
		self.written.extend_from_slice(data);
		self.pending.extend_from_slice(data);
		self.check_script();
		Ok(())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl ManualScheduler {
	pub fn new() -> ManualScheduler {
		ManualScheduler {
			now: Duration::from_secs(0),
			step: Duration::from_millis(1),
			yields: 0,
		}
	}

	/// Move the clock on without yielding.
	pub fn advance(&mut self, period: Duration) {
		self.now += period;
	}

	/// How many times the engine has yielded.
	pub fn yields(&self) -> usize {
		self.yields
	}
}

impl Default for ManualScheduler {
	fn default() -> ManualScheduler {
		ManualScheduler::new()
	}
}

impl Scheduler for ManualScheduler {
	fn now(&self) -> Duration {
		self.now
	}

	fn yield_now(&mut self) {
		self.yields += 1;
		self.now += self.step;
	}

	fn delay(&mut self, period: Duration) {
		self.now += period;
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
