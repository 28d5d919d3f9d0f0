//! # socket - Per-socket operations
//!
//! Everything here takes the mux of a registered socket. A socket is
//! registered with `Modem::register` before it's connected and stays
//! registered across connect/close cycles until it's unregistered.
//!
//! `Client` wraps one mux in `std::io::Read` and `std::io::Write` so that
//! ordinary stream code can run over the modem.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::io;

use crate::error::{Error, Result};
use crate::modem::Modem;
use crate::registry::Mux;
use crate::transport::{Scheduler, Transport};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// A borrowed socket, usable wherever a `Read + Write` stream is.
#[derive(Debug)]
pub struct Client<'a, T, S> {
	modem: &'a mut Modem<T, S>,
	mux: Mux,
}

// ****************************************************************************
//
// Private Data
//
// ****************************************************************************

const CONNECT_REPLIES: [&str; 3] = ["CONNECT OK\r\n", "CONNECT FAIL\r\n", "ALREADY CONNECT\r\n"];

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
	/// Open a TCP connection on `mux`. Anything already open there is
	/// closed first and any unread data is thrown away.
	///
	/// `secure` asks the modem to run TLS on the connection.
	pub fn connect(&mut self, mux: Mux, host: &str, port: u16, secure: bool) -> Result<()> {
		self.close(mux)?;
		self.scheduler.yield_now();
		self.sockets.slot_mut(mux)?.rx.clear();
		let result = self.start_connection(mux, host, port, secure);
		match result {
			Ok(()) => info!("Connected {} to {}:{}", mux, host, port),
			Err(ref err) => info!("Connecting {} to {}:{} failed: {}", mux, host, port, err),
		}
		let now = self.scheduler.now();
		let slot = self.sockets.slot_mut(mux)?;
		slot.connected = result.is_ok();
		// Idle polling starts from here
		slot.last_check = Some(now);
		result
	}

	/// Close the connection on `mux`. The socket stays registered.
	pub fn close(&mut self, mux: Mux) -> Result<()> {
		self.sockets.slot(mux)?;
		self.scheduler.yield_now();
		self.send_at(&[&"+QICLOSE=", &mux.as_u8()])?;
		self.sockets.slot_mut(mux)?.connected = false;
		// The modem says CLOSE OK, or ERROR if there was nothing to close.
		// Either way the socket is closed now.
		let rank = self.wait_default();
		debug!("Closed {} <{}>", mux, rank);
		Ok(())
	}

	/// Send `data` on `mux`, returning how many bytes the modem took.
	pub fn write(&mut self, mux: Mux, data: &[u8]) -> Result<usize> {
		self.sockets.slot(mux)?;
		self.scheduler.yield_now();
		self.maintain();
		self.send(mux, data)
	}

	/// Bytes that can be read from `mux` right now without waiting, both
	/// those already fetched and those still on the modem.
	///
	/// The modem doesn't always announce new data, so an idle connected
	/// socket checks for itself every `availability_poll`.
	pub fn available_bytes(&mut self, mux: Mux) -> Result<usize> {
		self.scheduler.yield_now();
		let now = self.scheduler.now();
		let poll = self.config.availability_poll;
		let slot = self.sockets.slot_mut(mux)?;
		if slot.rx.is_empty() && slot.connected {
			let due = slot
				.last_check
				.map_or(true, |last| now.checked_sub(last).unwrap_or_default() > poll);
			if due {
				slot.got_data = true;
				slot.last_check = Some(now);
			}
			self.maintain();
		}
		let slot = self.sockets.slot(mux)?;
		Ok(slot.rx.len() + slot.available)
	}

	/// Read into `buf` from `mux`, fetching more from the modem whenever
	/// the FIFO runs dry and the modem still has some. Returns 0 if there's
	/// nothing to read.
	pub fn read(&mut self, mux: Mux, buf: &mut [u8]) -> Result<usize> {
		self.sockets.slot(mux)?;
		self.scheduler.yield_now();
		self.maintain();
		let mut count = 0;
		while count < buf.len() {
			let chunk = self.sockets.slot_mut(mux)?.rx.get(&mut buf[count..]);
			if chunk > 0 {
				count += chunk;
				continue;
			}
			self.maintain();
			let slot = self.sockets.slot(mux)?;
			if slot.available == 0 {
				break;
			}
			let free = slot.rx.free();
			match self.fetch(mux, free) {
				Ok(0) => break,
				Ok(_) => {}
				Err(ref err) if count > 0 => {
					debug!("Returning {} bytes from {} after: {}", count, mux, err);
					break;
				}
				Err(err) => return Err(err),
			}
		}
		Ok(count)
	}

	/// True while the connection is up, or while there's still something
	/// to read from it.
	pub fn is_connected(&mut self, mux: Mux) -> bool {
		match self.available_bytes(mux) {
			Ok(0) => self.sockets.lookup(mux).map_or(false, |s| s.connected),
			Ok(_) => true,
			Err(_) => false,
		}
	}

	/// Borrow `mux` as a `Read + Write` stream.
	pub fn client(&mut self, mux: Mux) -> Result<Client<T, S>> {
		self.sockets.slot(mux)?;
		Ok(Client { modem: self, mux })
	}

	// ------------------------------------------------------------------------

	fn start_connection(&mut self, mux: Mux, host: &str, port: u16, secure: bool) -> Result<()> {
		self.send_at(&[&"+CIPSSL=", &(secure as u8)])?;
		let rank = self.wait_default();
		if secure && rank != 1 {
			warn!("Modem refused TLS on {}", mux);
			return Err(if rank == 0 { Error::Timeout } else { Error::Rejected(rank) });
		}
		self.send_at(&[
			&"+CIPSTART=",
			&mux.as_u8(),
			&",\"TCP\",\"",
			&host,
			&"\",",
			&port,
		])?;
		let timeout = self.config.connect_timeout;
		self.expect(timeout, &CONNECT_REPLIES)
	}
}

impl<'a, T, S> Client<'a, T, S>
where
	T: Transport,
	S: Scheduler,
{
	pub fn mux(&self) -> Mux {
		self.mux
	}

	pub fn is_connected(&mut self) -> bool {
		self.modem.is_connected(self.mux)
	}

	pub fn available(&mut self) -> Result<usize> {
		self.modem.available_bytes(self.mux)
	}

	pub fn close(&mut self) -> Result<()> {
		self.modem.close(self.mux)
	}
}

impl<'a, T, S> io::Read for Client<'a, T, S>
where
	T: Transport,
	S: Scheduler,
{
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		Ok(self.modem.read(self.mux, buf)?)
	}
}

impl<'a, T, S> io::Write for Client<'a, T, S>
where
	T: Transport,
	S: Scheduler,
{
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		Ok(self.modem.write(self.mux, buf)?)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.modem.transport.flush()
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
