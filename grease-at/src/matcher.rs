//! # matcher - Byte-at-a-time terminator and notice recognition
//!
//! The modem interleaves unsolicited notices with command replies on the
//! same line, so whatever is watching for a reply also has to spot notices.
//! A `Matcher` is that watcher with no I/O attached: push bytes in, and it
//! tells you when the tail of what it has seen matches one of its patterns.
//!
//! Patterns live in one ordered table. The caller's terminators come first
//! (up to `MAX_TERMINATORS`, unused positions disabled) and the two built-in
//! notices come last, so a caller terminator always wins a tie. Matching is
//! literal suffix equality - no regexes - so terminators must include any
//! leading newline they care about.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::fmt;

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// The most terminators a single wait can look for.
pub const MAX_TERMINATORS: usize = 6;

/// Prefix of a data-arrival notice. The mode digit and mux follow, and are
/// read separately.
pub const DATA_NOTICE: &str = "\r\n+CIPRXGET:";

/// Tail of a connection-closed notice. The mux precedes it.
pub const CLOSED_NOTICE: &str = "CLOSED\r\n";

/// The unsolicited notices we understand.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Notice {
	/// `<NL>+CIPRXGET:` - the modem has data for one of our sockets
	DataArrival,
	/// `<mux>, CLOSED<NL>` - the far end closed one of our sockets
	Closed,
}

/// What the latest byte completed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Hit {
	/// Caller terminator, by 1-based rank
	Terminator(u8),
	/// A built-in notice
	Notice(Notice),
}

/// Accumulates bytes and checks them against the pattern table.
pub struct Matcher<'a> {
	table: Vec<Entry<'a>>,
	data: Vec<u8>,
	/// Length of the terminator that ended the match, if one did
	matched: usize,
}

// ****************************************************************************
//
// Private Types
//
// ****************************************************************************

#[derive(Debug, Copy, Clone)]
enum Action {
	Finish(u8),
	Report(Notice),
}

struct Entry<'a> {
	/// Empty means disabled
	pattern: &'a [u8],
	action: Action,
}

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl<'a> Matcher<'a> {
	/// Build a table for these terminators. Anything past
	/// `MAX_TERMINATORS` is ignored (with a warning).
	pub fn new(terminators: &[&'a str]) -> Matcher<'a> {
		if terminators.len() > MAX_TERMINATORS {
			warn!(
				"Ignoring {} terminators past the first {}",
				terminators.len() - MAX_TERMINATORS,
				MAX_TERMINATORS
			);
		}
		let mut table = Vec::with_capacity(MAX_TERMINATORS + 2);
		for rank in 0..MAX_TERMINATORS {
			let pattern = terminators.get(rank).map_or(&b""[..], |&t| t.as_bytes());
			table.push(Entry {
				pattern,
				action: Action::Finish(rank as u8 + 1),
			});
		}
		table.push(Entry {
			pattern: DATA_NOTICE.as_bytes(),
			action: Action::Report(Notice::DataArrival),
		});
		table.push(Entry {
			pattern: CLOSED_NOTICE.as_bytes(),
			action: Action::Report(Notice::Closed),
		});
		Matcher {
			table,
			data: Vec::with_capacity(64),
			matched: 0,
		}
	}

	/// Feed one byte. Zero bytes are line noise and are dropped.
	pub fn push(&mut self, byte: u8) -> Option<Hit> {
		if byte == 0 {
			return None;
		}
		self.data.push(byte);
		let data = &self.data;
		let entry = self
			.table
			.iter()
			.find(|e| !e.pattern.is_empty() && data.ends_with(e.pattern))?;
		match entry.action {
			Action::Finish(rank) => {
				self.matched = entry.pattern.len();
				Some(Hit::Terminator(rank))
			}
			Action::Report(notice) => Some(Hit::Notice(notice)),
		}
	}

	/// Everything accumulated so far.
	pub fn data(&self) -> &[u8] {
		&self.data
	}

	/// What came before the terminator that ended the match, whitespace
	/// trimmed. With no match yet, everything accumulated.
	pub fn captured(&self) -> String {
		let end = self.data.len() - self.matched;
		String::from_utf8_lossy(&self.data[..end]).trim().to_owned()
	}

	pub fn clear(&mut self) {
		self.data.clear();
		self.matched = 0;
	}
}

impl<'a> fmt::Debug for Matcher<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let patterns: Vec<_> = self
			.table
			.iter()
			.filter(|e| !e.pattern.is_empty())
			.map(|e| String::from_utf8_lossy(e.pattern).trim().to_owned())
			.collect();
		write!(f, "Matcher {{ patterns: {:?}, data.len: {} }}", patterns, self.data.len())
	}
}

/// Pull the mux out of a buffer that ends in `CLOSED_NOTICE`.
///
/// The notice looks like `<NL><mux>, CLOSED<NL>`; the mux is the first
/// comma-separated field after the last newline. Returns None if that field
/// isn't a number.
pub fn closed_mux(data: &[u8]) -> Option<u8> {
	let head = data.get(..data.len().checked_sub(CLOSED_NOTICE.len())?)?;
	let start = head
		.windows(2)
		.rposition(|w| w == b"\r\n")
		.map_or(0, |pos| pos + 2);
	let line = &head[start..];
	let field = line.split(|&b| b == b',').next()?;
	std::str::from_utf8(field).ok()?.trim().parse().ok()
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
