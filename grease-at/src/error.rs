//! # error - Everything that can go wrong talking to the modem
//!
//! None of these are fatal to the engine. A failed command leaves the
//! transport usable and the caller decides whether to try again.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::error;
use std::fmt;
use std::io;

use crate::registry::Mux;

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// All possible errors the AT engine might want to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// The expected terminator did not arrive within the time budget
	Timeout,
	/// The modem answered, but with a terminator other than the one we
	/// wanted. Carries the 1-based rank that matched.
	Rejected(u8),
	/// A structured field in a response did not parse
	Protocol(String),
	/// A retrieval declared more bytes than the receive FIFO can hold
	Overflow {
		/// Bytes the modem sent
		needed: usize,
		/// Bytes the FIFO had room for
		free: usize,
	},
	/// A multiplex index outside `0..MUX_COUNT`
	BadMux(u8),
	/// Nothing has been registered against this mux
	NotRegistered(Mux),
	/// An underlying transport error
	Io(io::ErrorKind),
}

/// Shorthand used throughout the crate.
pub type Result<T> = ::std::result::Result<T, Error>;

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Error::Timeout => write!(f, "timed out waiting for the modem"),
			Error::Rejected(rank) => write!(f, "modem replied with terminator #{}", rank),
			Error::Protocol(ref what) => write!(f, "malformed response: {}", what),
			Error::Overflow { needed, free } => write!(
				f,
				"receive buffer overflow ({} bytes arrived, {} free)",
				needed, free
			),
			Error::BadMux(n) => write!(f, "mux {} out of range", n),
			Error::NotRegistered(mux) => write!(f, "no socket registered on {}", mux),
			Error::Io(kind) => write!(f, "transport error: {:?}", kind),
		}
	}
}

impl error::Error for Error {}

/// Wrap io::Errors into Errors easily
impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Io(e.kind())
	}
}

/// For the `std::io` adapters, which can only report io::Errors
impl From<Error> for io::Error {
	fn from(e: Error) -> io::Error {
		let kind = match e {
			Error::Timeout => io::ErrorKind::TimedOut,
			Error::Io(kind) => kind,
			Error::NotRegistered(_) => io::ErrorKind::NotConnected,
			_ => io::ErrorKind::Other,
		};
		io::Error::new(kind, e)
	}
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
