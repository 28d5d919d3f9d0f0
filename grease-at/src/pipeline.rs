//! # pipeline - Moving socket payload across the AT link
//!
//! Sending is `AT+CIPSEND`, wait for the `>` prompt, write the payload,
//! wait for `DATA ACCEPT`. Receiving is `AT+CIPRXGET=2` (or `=3` for hex),
//! which answers with a header giving the length, then exactly that many
//! payload bytes, then `OK`. The payload is binary, so it's read straight
//! off the transport and never goes near the matcher.
//!
//! No retries here. A send that the modem only partly accepts returns the
//! accepted count and it's up to the caller to send the rest.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use crate::error::{Error, Result};
use crate::modem::Modem;
use crate::registry::Mux;
use crate::transport::{Scheduler, Transport};
use crate::DEFAULT_REPLIES;

// ****************************************************************************
//
// Private Data
//
// ****************************************************************************

const PROMPT: &str = ">";
const DATA_ACCEPT: &str = "\r\nDATA ACCEPT:";
const FETCH_HEADER: &str = "+CIPRXGET:2,";
const FETCH_HEADER_HEX: &str = "+CIPRXGET:3,";
const QUERY_HEADER: &str = "+CIPRXGET:4,";
const STATUS_REPLIES: [&str; 4] = [",\"CONNECTED\"", ",\"CLOSED\"", ",\"CLOSING\"", ",\"INITIAL\""];

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
	/// Hand `data` to the modem for transmission on `mux`. Returns how many
	/// bytes the modem accepted.
	pub fn send(&mut self, mux: Mux, data: &[u8]) -> Result<usize> {
		self.send_at(&[&"+CIPSEND=", &mux.as_u8(), &',', &data.len()])?;
		let prompt = self.config.prompt_timeout;
		self.expect(prompt, &[PROMPT])?;
		self.transport.write_all(data)?;
		self.transport.flush()?;
		let timeout = self.config.response_timeout;
		self.expect(timeout, &[DATA_ACCEPT])?;
		// DATA ACCEPT:<mux>,<len>
		self.skip_until(b',')?;
		let accepted = self.read_number(b'\n')?;
		debug!("{} accepted {} of {} bytes", mux, accepted, data.len());
		Ok(accepted)
	}

	/// Pull up to `max` bytes the modem is holding for `mux` into its
	/// receive FIFO. Returns how many bytes were moved.
	///
	/// If the modem sends more than the FIFO has room for, the payload is
	/// still read off the wire (so the stream stays in step) but none of it
	/// is kept, and the result is `Error::Overflow`.
	pub fn fetch(&mut self, mux: Mux, max: usize) -> Result<usize> {
		self.sockets.slot(mux)?;
		let hex = self.config.hex_mode;
		let (mode, header) = if hex { (3, FETCH_HEADER_HEX) } else { (2, FETCH_HEADER) };
		self.send_at(&[&"+CIPRXGET=", &mode, &',', &mux.as_u8(), &',', &max])?;
		let timeout = self.config.response_timeout;
		self.expect(timeout, &[header])?;
		// +CIPRXGET:<mode>,<mux>,<len>,<remaining>
		self.skip_until(b',')?;
		let len: usize = self.read_number(b',')?;
		let remaining: usize = self.read_number(b'\n')?;
		trace!("{} retrieving {}, {} left after", mux, len, remaining);

		let free = self.sockets.slot(mux)?.rx.free();
		if len > free {
			warn!("Dropping {} bytes on {}: only room for {}", len, mux, free);
			let digits = if hex { len.saturating_mul(2) } else { len };
			self.discard_raw(digits);
			self.wait_default();
			self.sockets.slot_mut(mux)?.available = remaining;
			return Err(Error::Overflow { needed: len, free });
		}

		let mut staged = Vec::with_capacity(len);
		let mut bad_hex = false;
		for _ in 0..len {
			let byte = if hex {
				let hi = self.read_raw()?;
				let lo = self.read_raw()?;
				hex_pair(hi, lo).unwrap_or_else(|| {
					bad_hex = true;
					0
				})
			} else {
				self.read_raw()?
			};
			staged.push(byte);
		}
		if self.wait_default() != 1 {
			debug!("No OK after retrieval on {}", mux);
		}

		let slot = self.sockets.slot_mut(mux)?;
		slot.available = remaining;
		if bad_hex {
			return Err(Error::Protocol(format!("bad hex in payload on {}", mux)));
		}
		slot.rx.put_all(&staged)?;
		Ok(len)
	}

	/// Ask how many bytes the modem is holding for `mux`, without moving
	/// any. The answer is stored as the slot's available count.
	///
	/// When the answer is zero we also check the connection is still up,
	/// in case we missed a closed notice. That check can only ever mark the
	/// socket disconnected - reconnecting takes an explicit connect.
	pub fn query_available(&mut self, mux: Mux) -> Result<usize> {
		self.sockets.slot(mux)?;
		self.send_at(&[&"+CIPRXGET=4,", &mux.as_u8()])?;
		let mut result = 0;
		let timeout = self.config.response_timeout;
		if self.wait_response(timeout, &[QUERY_HEADER], None) == 1 {
			// +CIPRXGET:4,<mux>,<len>
			self.skip_until(b',')?;
			result = self.read_number(b'\n')?;
			self.wait_default();
		}
		if result == 0 {
			let live = self.query_connected(mux)?;
			let slot = self.sockets.slot_mut(mux)?;
			if slot.connected && !live {
				info!("{} is no longer connected", mux);
			}
			slot.connected = slot.connected && live;
		}
		self.sockets.slot_mut(mux)?.available = result;
		Ok(result)
	}

	/// Ask the modem whether `mux` is connected.
	pub fn query_connected(&mut self, mux: Mux) -> Result<bool> {
		self.send_at(&[&"+CIPSTATUS=", &mux.as_u8()])?;
		let timeout = self.config.response_timeout;
		let rank = self.wait_response(timeout, &STATUS_REPLIES, None);
		self.wait_response(timeout, &DEFAULT_REPLIES, None);
		Ok(rank == 1)
	}

	/// Read and throw away up to `count` payload bytes, stopping early if
	/// the modem goes quiet.
	fn discard_raw(&mut self, count: usize) {
		for done in 0..count {
			if self.read_raw().is_err() {
				debug!("Modem went quiet {} bytes into a discard", done);
				return;
			}
		}
	}
}

// ****************************************************************************
//
// Private Functions
//
// ****************************************************************************

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
	let hi = (hi as char).to_digit(16)?;
	let lo = (lo as char).to_digit(16)?;
	Some((hi * 16 + lo) as u8)
}

// ****************************************************************************
//
// Tests
//
// ****************************************************************************

#[cfg(test)]
mod test {
	use rand::{self, Rng};

	use crate::config::Config;
	use crate::error::Error;
	use crate::modem::Modem;
	use crate::registry::Mux;
	use crate::testing::{ManualScheduler, ScriptedTransport};

	fn modem(script: ScriptedTransport, config: Config) -> Modem<ScriptedTransport, ManualScheduler> {
		Modem::with_config(script, ManualScheduler::new(), config)
	}

	fn mux(n: u8) -> Mux {
		Mux::new(n).unwrap()
	}

	#[test]
	fn send_accepted() {
		let mut script = ScriptedTransport::new();
		script.expect("AT+CIPSEND=1,5\r\n", "> ");
		script.expect("hello", "\r\nDATA ACCEPT:1,5\r\n");
		let mut m = modem(script, Config::default());
		assert_eq!(m.send(mux(1), b"hello"), Ok(5));
		assert_eq!(m.transport().written_text(), "AT+CIPSEND=1,5\r\nhello");
	}

	#[test]
	fn send_partly_accepted() {
		let mut script = ScriptedTransport::new();
		script.expect("AT+CIPSEND=0,8\r\n", ">");
		script.expect("12345678", "\r\nDATA ACCEPT:0,3\r\n");
		let mut m = modem(script, Config::default());
		assert_eq!(m.send(mux(0), b"12345678"), Ok(3));
	}

	#[test]
	fn send_without_prompt() {
		let mut script = ScriptedTransport::new();
		script.expect("AT+CIPSEND=2,3\r\n", "\r\nCME ERROR\r\n");
		let mut m = modem(script, Config::default());
		assert_eq!(m.send(mux(2), b"abc"), Err(Error::Timeout));
		// The payload was never written
		assert_eq!(m.transport().written_text(), "AT+CIPSEND=2,3\r\n");
	}

	#[test]
	fn send_garbled_count() {
		let mut script = ScriptedTransport::new();
		script.expect("AT+CIPSEND=2,3\r\n", ">");
		script.expect("abc", "\r\nDATA ACCEPT:2,lots\r\n");
		let mut m = modem(script, Config::default());
		match m.send(mux(2), b"abc") {
			Err(Error::Protocol(_)) => {}
			other => panic!("Bad match {:?}", other),
		}
	}

	#[test]
	fn fetch_ten_bytes() {
		let mut script = ScriptedTransport::new();
		script.expect(
			"AT+CIPRXGET=2,1,10\r\n",
			"\r\n+CIPRXGET:2,1,10,5\r\n0123456789\r\nOK\r\n",
		);
		let mut m = modem(script, Config::default());
		m.register(mux(1));
		assert_eq!(m.fetch(mux(1), 10), Ok(10));
		let slot = m.sockets.slot_mut(mux(1)).unwrap();
		assert_eq!(slot.available, 5);
		let mut out = [0u8; 16];
		assert_eq!(slot.rx.get(&mut out), 10);
		assert_eq!(&out[..10], b"0123456789");
	}

	#[test]
	fn fetch_binary_payload() {
		// Payload containing things that look like terminators and notices
		let payload = b"\r\nOK\r\n\0\r\n+CIPRXGET:1,0\r\n3, CLOSED\r\n".to_vec();
		let mut reply = format!("\r\n+CIPRXGET:2,3,{},0\r\n", payload.len()).into_bytes();
		reply.extend_from_slice(&payload);
		reply.extend_from_slice(b"\r\nOK\r\n");
		let mut script = ScriptedTransport::new();
		script.expect(format!("AT+CIPRXGET=2,3,{}\r\n", 64), reply);
		let mut m = modem(script, Config::default());
		m.register(mux(3));
		m.sockets.slot_mut(mux(3)).unwrap().connected = true;
		assert_eq!(m.fetch(mux(3), 64), Ok(payload.len()));
		let slot = m.sockets.slot_mut(mux(3)).unwrap();
		assert!(slot.connected);
		assert!(!slot.got_data);
		let mut out = vec![0u8; 64];
		let len = slot.rx.get(&mut out);
		assert_eq!(&out[..len], &payload[..]);
	}

	#[test]
	fn fetch_random_payload_hex() {
		let payload = rand::thread_rng().gen_iter::<u8>().take(32).collect::<Vec<u8>>();
		let hex: String = payload.iter().map(|b| format!("{:02X}", b)).collect();
		let mut script = ScriptedTransport::new();
		script.expect(
			"AT+CIPRXGET=3,0,64\r\n",
			format!("\r\n+CIPRXGET:3,0,32,100\r\n{}\r\nOK\r\n", hex),
		);
		let mut config = Config::default();
		config.hex_mode = true;
		let mut m = modem(script, config);
		m.register(mux(0));
		assert_eq!(m.fetch(mux(0), 64), Ok(32));
		let slot = m.sockets.slot_mut(mux(0)).unwrap();
		assert_eq!(slot.available, 100);
		let mut out = [0u8; 32];
		assert_eq!(slot.rx.get(&mut out), 32);
		assert_eq!(&out[..], &payload[..]);
	}

	#[test]
	fn fetch_bad_hex() {
		let mut script = ScriptedTransport::new();
		script.expect("AT+CIPRXGET=3,0,64\r\n", "\r\n+CIPRXGET:3,0,2,0\r\nzz41\r\nOK\r\n");
		let mut config = Config::default();
		config.hex_mode = true;
		let mut m = modem(script, config);
		m.register(mux(0));
		match m.fetch(mux(0), 64) {
			Err(Error::Protocol(_)) => {}
			other => panic!("Bad match {:?}", other),
		}
		assert!(m.sockets().slot(mux(0)).unwrap().rx.is_empty());
		// The stream is still in step
		assert_eq!(m.transport().unread(), 0);
	}

	#[test]
	fn fetch_overflow() {
		let mut config = Config::default();
		config.rx_capacity = 8;
		let mut script = ScriptedTransport::new();
		script.expect("AT+CIPRXGET=2,4,8\r\n", "\r\n+CIPRXGET:2,4,12,0\r\nabcdefghijkl\r\nOK\r\n");
		script.expect("AT+CIPRXGET=2,4,8\r\n", "\r\n+CIPRXGET:2,4,3,0\r\nxyz\r\nOK\r\n");
		let mut m = modem(script, config);
		m.register(mux(4));
		m.sockets.slot_mut(mux(4)).unwrap().rx.put_all(b"ab").unwrap();
		assert_eq!(
			m.fetch(mux(4), 8),
			Err(Error::Overflow { needed: 12, free: 6 })
		);
		// Nothing committed, and the next retrieval lines up
		assert_eq!(m.sockets().slot(mux(4)).unwrap().rx.len(), 2);
		assert_eq!(m.fetch(mux(4), 8), Ok(3));
		let slot = m.sockets.slot_mut(mux(4)).unwrap();
		let mut out = [0u8; 8];
		assert_eq!(slot.rx.get(&mut out), 5);
		assert_eq!(&out[..5], b"abxyz");
	}

	#[test]
	fn fetch_absurd_length() {
		let mut script = ScriptedTransport::new();
		script.expect(
			"AT+CIPRXGET=2,1,64\r\n",
			"\r\n+CIPRXGET:2,1,999999999999999,0\r\nabc\r\nOK\r\n",
		);
		let mut m = modem(script, Config::default());
		m.register(mux(1));
		assert_eq!(
			m.fetch(mux(1), 64),
			Err(Error::Overflow {
				needed: 999_999_999_999_999,
				free: 64
			})
		);
		assert!(m.sockets().slot(mux(1)).unwrap().rx.is_empty());
		assert_eq!(m.transport().unread(), 0);
	}

	#[test]
	fn fetch_after_data_notice() {
		let mut script = ScriptedTransport::new();
		// Another socket's notice lands ahead of the header
		script.expect(
			"AT+CIPRXGET=2,1,64\r\n",
			"\r\n+CIPRXGET:1,2\r\n\r\n+CIPRXGET:2,1,10,5\r\n0123456789\r\nOK\r\n",
		);
		let mut m = modem(script, Config::default());
		m.register(mux(1));
		m.register(mux(2));
		assert_eq!(m.fetch(mux(1), 64), Ok(10));
		assert!(m.sockets().slot(mux(2)).unwrap().got_data);
		let slot = m.sockets.slot_mut(mux(1)).unwrap();
		assert_eq!(slot.available, 5);
		let mut out = [0u8; 16];
		assert_eq!(slot.rx.get(&mut out), 10);
		assert_eq!(&out[..10], b"0123456789");
		assert_eq!(m.transport().unread(), 0);
	}

	#[test]
	fn fetch_unregistered() {
		let mut m = modem(ScriptedTransport::new(), Config::default());
		assert_eq!(m.fetch(mux(2), 10), Err(Error::NotRegistered(mux(2))));
		assert!(m.transport().written().is_empty());
	}

	#[test]
	fn query_available_count() {
		let mut script = ScriptedTransport::new();
		script.expect("AT+CIPRXGET=4,2\r\n", "\r\n+CIPRXGET:4,2,17\r\n\r\nOK\r\n");
		let mut m = modem(script, Config::default());
		m.register(mux(2));
		m.sockets.slot_mut(mux(2)).unwrap().connected = true;
		assert_eq!(m.query_available(mux(2)), Ok(17));
		let slot = m.sockets().slot(mux(2)).unwrap();
		assert_eq!(slot.available, 17);
		assert!(slot.connected);
	}

	#[test]
	fn query_available_after_data_notice() {
		let mut script = ScriptedTransport::new();
		script.expect(
			"AT+CIPRXGET=4,1\r\n",
			"\r\n+CIPRXGET:1,3\r\n\r\n+CIPRXGET:4,1,17\r\n\r\nOK\r\n",
		);
		let mut m = modem(script, Config::default());
		m.register(mux(1));
		m.register(mux(3));
		m.sockets.slot_mut(mux(1)).unwrap().connected = true;
		assert_eq!(m.query_available(mux(1)), Ok(17));
		assert!(m.sockets().slot(mux(3)).unwrap().got_data);
		assert_eq!(m.transport().unread(), 0);
	}

	#[test]
	fn query_available_zero_checks_status() {
		let mut script = ScriptedTransport::new();
		script.expect("AT+CIPRXGET=4,1\r\n", "\r\n+CIPRXGET:4,1,0\r\n\r\nOK\r\n");
		script.expect(
			"AT+CIPSTATUS=1\r\n",
			"\r\n+CIPSTATUS: 1,0,\"TCP\",\"10.0.0.1\",\"80\",\"CLOSED\"\r\n\r\nOK\r\n",
		);
		let mut m = modem(script, Config::default());
		m.register(mux(1));
		m.sockets.slot_mut(mux(1)).unwrap().connected = true;
		assert_eq!(m.query_available(mux(1)), Ok(0));
		assert!(!m.sockets().slot(mux(1)).unwrap().connected);
		assert!(m.transport().script_done());
	}

	#[test]
	fn closed_stays_closed() {
		let mut script = ScriptedTransport::new();
		script.inject("\r\n1, CLOSED\r\n");
		script.expect("AT+CIPRXGET=4,1\r\n", "\r\n+CIPRXGET:4,1,0\r\n\r\nOK\r\n");
		// The modem (wrongly) still claims the link is up
		script.expect(
			"AT+CIPSTATUS=1\r\n",
			"\r\n+CIPSTATUS: 1,0,\"TCP\",\"10.0.0.1\",\"80\",\"CONNECTED\"\r\n\r\nOK\r\n",
		);
		let mut m = modem(script, Config::default());
		m.register(mux(1));
		m.sockets.slot_mut(mux(1)).unwrap().connected = true;
		m.maintain();
		assert!(!m.sockets().slot(mux(1)).unwrap().connected);
		assert_eq!(m.query_available(mux(1)), Ok(0));
		assert!(!m.sockets().slot(mux(1)).unwrap().connected);
	}

	#[test]
	fn status_query_ranks() {
		let mut script = ScriptedTransport::new();
		script.expect(
			"AT+CIPSTATUS=0\r\n",
			"\r\n+CIPSTATUS: 0,0,\"TCP\",\"10.0.0.1\",\"80\",\"CONNECTED\"\r\n\r\nOK\r\n",
		);
		script.expect(
			"AT+CIPSTATUS=0\r\n",
			"\r\n+CIPSTATUS: 0,,\"\",\"\",\"\",\"INITIAL\"\r\n\r\nOK\r\n",
		);
		let mut m = modem(script, Config::default());
		assert_eq!(m.query_connected(mux(0)), Ok(true));
		assert_eq!(m.query_connected(mux(0)), Ok(false));
		assert_eq!(m.transport().unread(), 0);
	}
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
