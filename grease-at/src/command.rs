//! # command - Writing AT command lines
//!
//! A command line is `AT`, then any number of parts run together, then a
//! CRLF. Parts can be anything `Display` - text, numbers, single chars - so
//! `+CIPSEND=1,12` is written as `&[&"+CIPSEND=", &1, &',', &12]`.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::fmt::{self, Write};

use crate::error::Result;
use crate::modem::Modem;
use crate::transport::{Scheduler, Transport};
use crate::NL;

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
	/// Send `AT<parts...><CRLF>` and flush it out.
	pub fn send_at(&mut self, parts: &[&dyn fmt::Display]) -> Result<()> {
		let mut line = String::from("AT");
		append_parts(&mut line, parts);
		debug!("AT> {}", line);
		line.push_str(NL);
		self.transport.write_all(line.as_bytes())?;
		self.transport.flush()?;
		self.scheduler.yield_now();
		Ok(())
	}

	/// Write the parts with no `AT` prefix, no line ending and no flush.
	/// For the few commands that are built up in pieces.
	pub fn stream_write(&mut self, parts: &[&dyn fmt::Display]) -> Result<()> {
		let mut text = String::new();
		append_parts(&mut text, parts);
		trace!("Raw> {:?}", text);
		self.transport.write_all(text.as_bytes())?;
		Ok(())
	}
}

// ****************************************************************************
//
// Private Functions
//
// ****************************************************************************

fn append_parts(out: &mut String, parts: &[&dyn fmt::Display]) {
	for part in parts {
		// Writing to a String can't fail
		let _ = write!(out, "{}", part);
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
