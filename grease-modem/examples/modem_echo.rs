//! # modem_echo - a grease-modem example
//!
//! Talks to a modem whose serial port is exposed on a TCP port (for example
//! with ser2net), attaches to GPRS, connects to an echo server and prints
//! whatever comes back.
//!
//! Usage: modem_echo <modem addr> <apn> <echo host> <echo port>

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

#[macro_use]
extern crate log;

use std::env;
use std::net;
use std::sync::mpsc;
use std::time::Duration;

use grease_at::{IoTransport, Modem, Mux};
use grease_modem as modem;
use grease_modem::Context;

// ****************************************************************************
//
// Private Types
//
// ****************************************************************************

#[derive(Debug)]
enum Incoming {
	Cfm(modem::Confirm),
	Ind(modem::Indication),
}

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

/// Start of our example program
fn main() {
	env_logger::init();
	let args: Vec<String> = env::args().collect();
	if args.len() != 5 {
		eprintln!("Usage: {} <modem addr> <apn> <echo host> <echo port>", args[0]);
		return;
	}
	let port: u16 = args[4].parse().expect("bad port");

	info!("Hello, this is the grease modem example.");

	let stream = net::TcpStream::connect(&args[1]).expect("can't reach modem");
	stream
		.set_read_timeout(Some(Duration::from_millis(1)))
		.expect("can't set timeout");
	let mut m = Modem::new(IoTransport::new(stream));
	m.init().expect("modem didn't initialise");
	m.wait_for_network(Duration::from_secs(60))
		.expect("no network");
	m.gprs_connect(&args[2], "", "").expect("no GPRS");
	info!("Local address is {}", m.local_ip().expect("no address"));

	let modem_task = modem::make_task(m, modem::TaskConfig::default()).expect("no task");
	let (tx, rx) = mpsc::channel();
	let mux = Mux::new(0).expect("bad mux");
	let mut ctx = Context::default();

	modem_task.send_request(
		modem::ReqConnect {
			mux,
			host: args[3].clone(),
			port,
			secure: false,
			context: ctx.take(),
		}.into(),
		&tx,
	);

	for msg in rx.iter() {
		match msg {
			Incoming::Cfm(modem::Confirm::Connect(ref cfm)) => match cfm.result {
				Ok(()) => {
					info!("Connected on {}", cfm.mux);
					modem_task.send_request(
						modem::ReqSend {
							mux,
							context: ctx.take(),
							data: b"Hello, echo!\r\n".to_vec(),
						}.into(),
						&tx,
					);
				}
				Err(ref err) => {
					warn!("Connect failed: {}", err);
					break;
				}
			},
			Incoming::Cfm(modem::Confirm::Send(ref cfm)) => {
				info!("Sent: {:?}", cfm.result);
			}
			Incoming::Cfm(modem::Confirm::Close(_)) => break,
			Incoming::Ind(modem::Indication::Received(ref ind)) => {
				info!("Got: {:?}", String::from_utf8_lossy(&ind.data));
				modem_task.send_response(modem::RspReceived { mux: ind.mux }.into());
				modem_task.send_request(
					modem::ReqClose {
						mux,
						context: ctx.take(),
					}.into(),
					&tx,
				);
			}
			Incoming::Ind(modem::Indication::Dropped(_)) => {
				info!("Far end went away");
				break;
			}
		}
	}
}

// ****************************************************************************
//
// Private Functions
//
// ****************************************************************************

impl From<modem::Confirm> for Incoming {
	fn from(cfm: modem::Confirm) -> Incoming {
		Incoming::Cfm(cfm)
	}
}

impl From<modem::Indication> for Incoming {
	fn from(ind: modem::Indication) -> Incoming {
		Incoming::Ind(ind)
	}
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
