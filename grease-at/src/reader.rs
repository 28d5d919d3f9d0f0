//! # reader - Waiting for replies
//!
//! `wait_response` is the heart of the engine. It reads the transport a byte
//! at a time into a `Matcher` until one of the caller's terminators turns up
//! or the time runs out. Unsolicited notices are picked out of the same byte
//! stream on the way past: they update the registry, are thrown away, and
//! the wait carries on as if they'd never been there.
//!
//! Notices carry fields (mode, mux) after their fixed prefix. Those are read
//! straight off the transport with the field readers below, outside the
//! matcher, so the outer match state is left alone.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::matcher::{closed_mux, Hit, Matcher, Notice};
use crate::modem::Modem;
use crate::registry::Mux;
use crate::transport::{Scheduler, Transport};
use crate::DEFAULT_REPLIES;

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl<T, S> Modem<T, S>
where
	T: Transport,
	S: Scheduler,
{
	/// Read until the received text ends with one of `terminators` (at most
	/// six) and return its 1-based rank, or 0 if `timeout` expires first.
	///
	/// If `capture` is given it receives the trimmed text that came before
	/// the terminator - or all of it, on a timeout.
	pub fn wait_response(
		&mut self,
		timeout: Duration,
		terminators: &[&str],
		capture: Option<&mut String>,
	) -> u8 {
		let mut matcher = Matcher::new(terminators);
		let start = self.scheduler.now();
		let mut rank = 0;
		'wait: loop {
			self.scheduler.yield_now();
			while self.transport.available() > 0 {
				let byte = match self.transport.read_byte() {
					Some(byte) => byte,
					None => break,
				};
				match matcher.push(byte) {
					Some(Hit::Terminator(r)) => {
						rank = r;
						break 'wait;
					}
					Some(Hit::Notice(Notice::DataArrival)) => {
						if let Some(r) = self.on_data_notice(&mut matcher) {
							rank = r;
							break 'wait;
						}
					}
					Some(Hit::Notice(Notice::Closed)) => self.on_closed_notice(&mut matcher),
					None => {}
				}
			}
			if self.elapsed_since(start) >= timeout {
				break;
			}
		}
		let text = matcher.captured();
		if rank == 0 && !text.is_empty() {
			warn!("Unhandled: {:?}", text);
		}
		if let Some(capture) = capture {
			*capture = text;
		}
		debug!("<{}>", rank);
		rank
	}

	/// Wait for the usual `OK` / `CME ERROR` pair with the default timeout.
	pub fn wait_default(&mut self) -> u8 {
		let timeout = self.config.response_timeout;
		self.wait_response(timeout, &DEFAULT_REPLIES, None)
	}

	/// Like `wait_response`, but anything other than the first terminator is
	/// an error.
	pub fn expect(&mut self, timeout: Duration, terminators: &[&str]) -> Result<()> {
		rank_to_result(self.wait_response(timeout, terminators, None))
	}

	/// Expect `OK` within the default timeout.
	pub fn expect_ok(&mut self) -> Result<()> {
		rank_to_result(self.wait_default())
	}

	/// Read text up to (and swallowing) `delim`.
	pub fn read_until(&mut self, delim: u8) -> Result<String> {
		let mut field = Vec::new();
		let start = self.scheduler.now();
		loop {
			while let Some(byte) = self.next_byte() {
				if byte == delim {
					return Ok(String::from_utf8_lossy(&field).into_owned());
				}
				field.push(byte);
			}
			if self.elapsed_since(start) >= self.config.field_timeout {
				debug!("Gave up waiting for {:?} after {:?}", delim as char, field);
				return Err(Error::Timeout);
			}
			self.scheduler.yield_now();
		}
	}

	/// Throw away everything up to (and including) `delim`.
	pub fn skip_until(&mut self, delim: u8) -> Result<()> {
		self.read_until(delim).map(|_| ())
	}

	/// Read a field up to `delim` and parse it (surrounding whitespace
	/// ignored).
	pub fn read_number<N>(&mut self, delim: u8) -> Result<N>
	where
		N: FromStr,
	{
		let field = self.read_until(delim)?;
		field
			.trim()
			.parse()
			.map_err(|_| Error::Protocol(format!("expected a number, got {:?}", field.trim())))
	}

	/// One byte of opaque payload, no matching.
	pub fn read_raw(&mut self) -> Result<u8> {
		let start = self.scheduler.now();
		loop {
			if self.transport.available() > 0 {
				if let Some(byte) = self.transport.read_byte() {
					return Ok(byte);
				}
			}
			if self.elapsed_since(start) >= self.config.field_timeout {
				return Err(Error::Timeout);
			}
			self.scheduler.yield_now();
		}
	}

	// ------------------------------------------------------------------------

	fn next_byte(&mut self) -> Option<u8> {
		if self.transport.available() > 0 {
			self.transport.read_byte()
		} else {
			None
		}
	}

	/// `<NL>+CIPRXGET:` has just gone past. Mode 1 means one of our sockets
	/// has new data; any other mode is a command reply, so the text goes
	/// back through the matcher and may complete a terminator, whose rank
	/// is returned.
	fn on_data_notice(&mut self, matcher: &mut Matcher) -> Option<u8> {
		let mode = match self.read_until(b',') {
			Ok(mode) => mode,
			Err(_) => {
				warn!("Data notice with no mode");
				return None;
			}
		};
		if mode.trim() != "1" {
			for byte in mode.bytes().chain(Some(b',')) {
				if let Some(Hit::Terminator(rank)) = matcher.push(byte) {
					return Some(rank);
				}
			}
			return None;
		}
		match self.read_number::<u8>(b'\n').and_then(Mux::new) {
			Ok(mux) => {
				if self.sockets.note_data(mux) {
					debug!("Data waiting on {}", mux);
				} else {
					warn!("Data notice for unregistered {}", mux);
				}
			}
			Err(err) => warn!("Ignoring data notice: {}", err),
		}
		matcher.clear();
		None
	}

	/// `CLOSED<NL>` has just gone past; the mux is earlier in the line.
	fn on_closed_notice(&mut self, matcher: &mut Matcher) {
		match closed_mux(matcher.data()).map(Mux::new) {
			Some(Ok(mux)) => {
				if self.sockets.note_closed(mux) {
					info!("Closed: {}", mux);
				} else {
					warn!("Close notice for unregistered {}", mux);
				}
			}
			Some(Err(err)) => warn!("Ignoring close notice: {}", err),
			None => warn!("Close notice with no mux: {:?}", String::from_utf8_lossy(matcher.data())),
		}
		matcher.clear();
	}
}

// ****************************************************************************
//
// Private Functions
//
// ****************************************************************************

fn rank_to_result(rank: u8) -> Result<()> {
	match rank {
		1 => Ok(()),
		0 => Err(Error::Timeout),
		other => Err(Error::Rejected(other)),
	}
}

// ****************************************************************************
//
// Tests
//
// ****************************************************************************

#[cfg(test)]
mod test {
	use std::time::Duration;

	use crate::config::Config;
	use crate::error::Error;
	use crate::modem::Modem;
	use crate::registry::Mux;
	use crate::testing::{ManualScheduler, ScriptedTransport};
	use crate::transport::Scheduler;
	use crate::{DEFAULT_REPLIES, OK};

	fn modem_with(input: &str) -> Modem<ScriptedTransport, ManualScheduler> {
		let mut script = ScriptedTransport::new();
		script.inject(input);
		Modem::with_config(script, ManualScheduler::new(), Config::default())
	}

	fn ms(n: u64) -> Duration {
		Duration::from_millis(n)
	}

	#[test]
	fn ok_reply() {
		let mut m = modem_with("\r\nOK\r\n");
		let mut text = String::from("stale");
		assert_eq!(m.wait_response(ms(1000), &[OK, "ERROR\r\n"], Some(&mut text)), 1);
		assert_eq!(text, "");
	}

	#[test]
	fn error_reply_ranked_second() {
		let mut m = modem_with("\r\n+CME ERROR: 3\r\nCME ERROR\r\n");
		assert_eq!(m.wait_default(), 2);
		let mut m = modem_with("\r\nCME ERROR\r\n");
		assert_eq!(m.expect_ok(), Err(Error::Rejected(2)));
	}

	#[test]
	fn timeout_captures_leftovers() {
		let mut m = modem_with("\r\nsomething else\r\n");
		let mut text = String::new();
		let start = m.scheduler().now();
		assert_eq!(m.wait_response(ms(50), &[OK], Some(&mut text)), 0);
		assert_eq!(text, "something else");
		assert!(m.scheduler().now() - start >= ms(50));
		assert_eq!(m.expect(ms(10), &[OK]), Err(Error::Timeout));
	}

	#[test]
	fn every_rank_over_the_wire() {
		let terms = ["A\r\n", "B\r\n", "C\r\n", "D\r\n", "E\r\n", "F\r\n"];
		for size in 1..=6 {
			for rank in 0..size {
				let mut m = modem_with(&format!("\r\nxyz{}", terms[rank]));
				assert_eq!(
					m.wait_response(ms(100), &terms[..size], None),
					rank as u8 + 1
				);
			}
			let mut m = modem_with("\r\nnothing useful\r\n");
			assert_eq!(m.wait_response(ms(20), &terms[..size], None), 0);
		}
	}

	#[test]
	fn data_notice_mid_wait() {
		let mut m = modem_with("\r\n+CIPRXGET:1,2\r\n\r\nOK\r\n");
		let m2 = Mux::new(2).unwrap();
		m.register(m2);
		let mut text = String::new();
		assert_eq!(m.wait_response(ms(1000), &DEFAULT_REPLIES, Some(&mut text)), 1);
		assert!(m.sockets().slot(m2).unwrap().got_data);
		// The notice is gone from the capture
		assert_eq!(text, "");
	}

	#[test]
	fn data_notice_alone_is_not_a_reply() {
		let mut m = modem_with("\r\n+CIPRXGET:1,0\r\n");
		let m0 = Mux::new(0).unwrap();
		m.register(m0);
		assert_eq!(m.wait_response(ms(30), &[OK], None), 0);
		assert!(m.sockets().slot(m0).unwrap().got_data);
	}

	#[test]
	fn data_notice_inside_a_reply_body() {
		// The notice lands between a reply line and its OK
		let mut m = modem_with("\r\n+CSQ: 20,0\r\n+CIPRXGET:1,4\r\n\r\nOK\r\n");
		let m4 = Mux::new(4).unwrap();
		m.register(m4);
		let mut text = String::new();
		assert_eq!(m.wait_response(ms(1000), &[OK], Some(&mut text)), 1);
		assert!(m.sockets().slot(m4).unwrap().got_data);
		assert_eq!(text, "");
	}

	#[test]
	fn other_ciprxget_modes_stay_in_the_text() {
		let mut m = modem_with("\r\n+CIPRXGET:4,1,7\r\n\r\nOK\r\n");
		let m1 = Mux::new(1).unwrap();
		m.register(m1);
		let mut text = String::new();
		assert_eq!(m.wait_response(ms(1000), &[OK], Some(&mut text)), 1);
		assert!(!m.sockets().slot(m1).unwrap().got_data);
		assert_eq!(text, "+CIPRXGET:4,1,7");
	}

	#[test]
	fn reply_header_after_data_notice() {
		// A notice for one socket, then the header we're waiting for
		let mut m = modem_with("\r\n+CIPRXGET:1,3\r\n\r\n+CIPRXGET:4,1,17\r\n");
		let m3 = Mux::new(3).unwrap();
		m.register(m3);
		assert_eq!(m.wait_response(ms(1000), &["+CIPRXGET:4,"], None), 1);
		assert!(m.sockets().slot(m3).unwrap().got_data);
		assert_eq!(m.read_until(b'\n').unwrap(), "1,17\r");
	}

	#[test]
	fn closed_notice_mid_wait() {
		let mut m = modem_with("\r\n1, CLOSED\r\n\r\nOK\r\n");
		let m1 = Mux::new(1).unwrap();
		m.register(m1);
		m.sockets.slot_mut(m1).unwrap().connected = true;
		assert_eq!(m.wait_default(), 1);
		assert!(!m.sockets().slot(m1).unwrap().connected);
	}

	#[test]
	fn out_of_range_notices_ignored() {
		let mut m = modem_with("\r\n+CIPRXGET:1,17\r\n\r\n5, CLOSED\r\n\r\nOK\r\n");
		for mux in Mux::all() {
			m.register(mux);
			m.sockets.slot_mut(mux).unwrap().connected = true;
		}
		assert_eq!(m.wait_default(), 1);
		for mux in Mux::all() {
			let slot = m.sockets().slot(mux).unwrap();
			assert!(slot.connected);
			assert!(!slot.got_data);
		}
	}

	#[test]
	fn field_readers() {
		let mut m = modem_with("2,1,10,x\n");
		assert_eq!(m.read_number::<u8>(b','), Ok(2));
		m.skip_until(b',').unwrap();
		assert_eq!(m.read_number::<usize>(b','), Ok(10));
		match m.read_number::<usize>(b'\n') {
			Err(Error::Protocol(_)) => {}
			other => panic!("Bad match {:?}", other),
		}
		assert_eq!(m.read_until(b','), Err(Error::Timeout));
		assert_eq!(m.read_raw(), Err(Error::Timeout));
	}
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
