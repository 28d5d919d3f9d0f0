//! # network - Modem, SIM and network commands
//!
//! The one-shot commands needed to get from a freshly powered modem to a
//! data connection that sockets can be opened on. Almost all of them have
//! the same shape: send the command, wait for `<NL>+XXX:`, read a field or
//! two, then wait for the `OK`.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::modem::Modem;
use crate::transport::{Scheduler, Transport};
use crate::{DEFAULT_REPLIES, NL};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// What `AT+CPIN?` said about the SIM.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SimStatus {
	/// No SIM, or the modem never gave a sensible answer
	Error,
	Ready,
	/// Needs a PIN or PUK
	Locked,
	/// Needs the phone-to-SIM PIN or PUK
	AntitheftLocked,
}

/// Network registration, as reported by `AT+CREG?`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegStatus {
	Unregistered,
	OkHome,
	Searching,
	Denied,
	Unknown,
	OkRoaming,
}

// ****************************************************************************
//
// Private Data
//
// ****************************************************************************

const SIM_REPLIES: [&str; 6] = [
	"READY",
	"PH_SIM PIN",
	"PH_SIM PUK",
	"SIM PIN",
	"SIM PUK",
	"NOT INSERTED",
];

/// Some PDP context commands answer quickly or not at all
const CONTEXT_WAIT: Duration = Duration::from_millis(300);

const SIM_RETRY: Duration = Duration::from_millis(1_000);

const NETWORK_POLL: Duration = Duration::from_millis(250);

const DNS_SERVERS: (&str, &str) = ("8.8.8.8", "8.8.4.4");

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

impl RegStatus {
	/// Map the `<stat>` field of `+CREG:`.
	pub fn from_code(code: u8) -> RegStatus {
		match code {
			0 => RegStatus::Unregistered,
			1 => RegStatus::OkHome,
			2 => RegStatus::Searching,
			3 => RegStatus::Denied,
			5 => RegStatus::OkRoaming,
			_ => RegStatus::Unknown,
		}
	}

	pub fn is_registered(self) -> bool {
		self == RegStatus::OkHome || self == RegStatus::OkRoaming
	}
}

impl<T, S> Modem<T, S>
where
	T: Transport,
	S: Scheduler,
{
	/// Poke the modem with `AT` until it answers `OK`. The only command
	/// that retries by itself.
	pub fn test_at(&mut self) -> Result<()> {
		let start = self.scheduler.now();
		let reply_timeout = self.config.probe_reply_timeout;
		let interval = self.config.probe_interval;
		while self.elapsed_since(start) < self.config.probe_timeout {
			self.send_at(&[])?;
			let rank = self.wait_response(reply_timeout, &DEFAULT_REPLIES, None);
			self.scheduler.delay(interval);
			if rank == 1 {
				return Ok(());
			}
		}
		warn!("Modem not answering");
		Err(Error::Timeout)
	}

	/// Get the modem to a known state: alive, factory settings, echo off.
	/// Also reports what the SIM is doing, but doesn't insist it's ready.
	pub fn init(&mut self) -> Result<()> {
		self.test_at()?;
		self.send_at(&[&"&FZ"])?;
		self.wait_default();
		self.send_at(&[&"E0"])?;
		self.expect_ok()?;
		let timeout = self.config.probe_timeout;
		let sim = self.sim_status(timeout)?;
		info!("Modem ready, SIM {:?}", sim);
		Ok(())
	}

	/// Restore factory settings with echo off, auto-baud, no flow control,
	/// 8N1 and no slow clock, and save them.
	pub fn factory_default(&mut self) -> Result<()> {
		for cmd in &["&FZE0&W", "+IPR=0", "+IFC=0,0", "+ICF=3,3", "+QSCLK=0"] {
			self.send_at(&[cmd])?;
			self.wait_default();
		}
		self.send_at(&[&"&W"])?;
		self.expect_ok()
	}

	/// The manufacturer, model and revision, on one line.
	pub fn modem_info(&mut self) -> Result<String> {
		self.send_at(&[&"I"])?;
		let mut text = String::new();
		let timeout = self.config.response_timeout;
		match self.wait_response(timeout, &DEFAULT_REPLIES, Some(&mut text)) {
			1 => Ok(join_lines(&text)),
			0 => Err(Error::Timeout),
			rank => Err(Error::Rejected(rank)),
		}
	}

	pub fn sim_unlock(&mut self, pin: &str) -> Result<()> {
		self.send_at(&[&"+CPIN=\"", &pin, &"\""])?;
		self.expect_ok()
	}

	/// Ask about the SIM until it gives an answer or `timeout` runs out.
	pub fn sim_status(&mut self, timeout: Duration) -> Result<SimStatus> {
		let start = self.scheduler.now();
		let response = self.config.response_timeout;
		while self.elapsed_since(start) < timeout {
			self.send_at(&[&"+CPIN?"])?;
			if self.wait_response(response, &["\r\n+CPIN:"], None) != 1 {
				self.scheduler.delay(SIM_RETRY);
				continue;
			}
			let rank = self.wait_response(response, &SIM_REPLIES, None);
			self.wait_default();
			return Ok(match rank {
				1 => SimStatus::Ready,
				2 | 3 => SimStatus::AntitheftLocked,
				4 | 5 => SimStatus::Locked,
				_ => SimStatus::Error,
			});
		}
		Ok(SimStatus::Error)
	}

	pub fn sim_ccid(&mut self) -> Result<String> {
		self.query_line("+ICCID", "\r\n+ICCID:")
	}

	pub fn imei(&mut self) -> Result<String> {
		self.query_line("+GSN", NL)
	}

	pub fn registration_status(&mut self) -> Result<RegStatus> {
		self.send_at(&[&"+CREG?"])?;
		let timeout = self.config.response_timeout;
		self.expect(timeout, &["\r\n+CREG:"])?;
		// +CREG: <n>,<stat>
		self.skip_until(b',')?;
		let code = self.read_number(b'\n')?;
		self.wait_default();
		Ok(RegStatus::from_code(code))
	}

	/// The name of the network operator we're registered with.
	pub fn operator(&mut self) -> Result<String> {
		self.send_at(&[&"+COPS?"])?;
		let timeout = self.config.response_timeout;
		self.expect(timeout, &["\r\n+COPS:"])?;
		// +COPS: <mode>,<format>,"<oper>"
		self.skip_until(b'"')?;
		let name = self.read_until(b'"')?;
		self.wait_default();
		Ok(name)
	}

	/// Received signal strength, 0 to 31, or 99 if the modem doesn't know.
	pub fn signal_quality(&mut self) -> Result<u8> {
		self.send_at(&[&"+CSQ"])?;
		let timeout = self.config.response_timeout;
		self.expect(timeout, &["\r\n+CSQ:"])?;
		let rssi = self.read_number(b',')?;
		self.wait_default();
		Ok(rssi)
	}

	pub fn is_network_connected(&mut self) -> bool {
		match self.registration_status() {
			Ok(status) => status.is_registered(),
			Err(err) => {
				debug!("No registration status: {}", err);
				false
			}
		}
	}

	/// Wait for the modem to register on a network.
	pub fn wait_for_network(&mut self, timeout: Duration) -> Result<()> {
		let start = self.scheduler.now();
		while self.elapsed_since(start) < timeout {
			if self.is_network_connected() {
				return Ok(());
			}
			self.scheduler.delay(NETWORK_POLL);
		}
		Err(Error::Timeout)
	}

	/// Bring up a GPRS data connection on `apn`. Empty `user` and `pwd`
	/// mean the APN doesn't need them.
	pub fn gprs_connect(&mut self, apn: &str, user: &str, pwd: &str) -> Result<()> {
		if let Err(err) = self.gprs_disconnect() {
			debug!("Nothing to deactivate: {}", err);
		}

		self.stream_write(&[&"AT+QICSGP=1", &",\"", &apn, &"\""])?;
		if !user.is_empty() {
			self.stream_write(&[&",\"", &user, &"\""])?;
		}
		if !pwd.is_empty() {
			self.stream_write(&[&",\"", &pwd, &"\""])?;
		}
		self.stream_write(&[&NL])?;
		self.transport.flush()?;
		self.wait_response(CONTEXT_WAIT, &DEFAULT_REPLIES, None);

		let attach = self.config.attach_timeout;
		self.send_at(&[&"+CGDCONT=1,\"IP\",\"", &apn, &"\""])?;
		self.wait_default();
		self.send_at(&[&"+CGACT=1,1"])?;
		self.wait_response(attach, &DEFAULT_REPLIES, None);
		self.send_at(&[&"+QIREGAPP=\"", &apn, &"\",\"", &user, &"\",\"", &pwd, &"\""])?;
		self.wait_response(CONTEXT_WAIT, &DEFAULT_REPLIES, None);
		self.send_at(&[&"+QIACT=1,1"])?;
		self.wait_response(attach, &DEFAULT_REPLIES, None);

		self.send_at(&[&"+CGATT=1"])?;
		self.expect(attach, &DEFAULT_REPLIES)?;

		self.send_at(&[&"+QILOCIP"])?;
		let mut address = String::new();
		let response = self.config.response_timeout;
		if self.wait_response(response, &DEFAULT_REPLIES, Some(&mut address)) != 1 {
			return Err(Error::Timeout);
		}
		debug!("Local address {}", join_lines(&address));

		// Multiplexed sockets, quick send acknowledgement, manual receive
		for cmd in &["+QIMUX=1", "+CIPQSEND=1", "+CIPRXGET=1"] {
			self.send_at(&[cmd])?;
			self.expect_ok()?;
		}

		self.send_at(&[&"+CSTT=\"", &apn, &"\",\"", &user, &"\",\"", &pwd, &"\""])?;
		self.expect(attach, &DEFAULT_REPLIES)?;
		self.send_at(&[&"+CIICR"])?;
		self.expect(attach, &DEFAULT_REPLIES)?;
		self.send_at(&[&"+CIFSR;E0"])?;
		let timeout = self.config.address_timeout;
		self.expect(timeout, &DEFAULT_REPLIES)?;

		let (primary, secondary) = DNS_SERVERS;
		self.send_at(&[&"+CDNSCFG=\"", &primary, &"\",\"", &secondary, &"\""])?;
		self.expect_ok()?;
		info!("GPRS up on {}", apn);
		Ok(())
	}

	pub fn gprs_disconnect(&mut self) -> Result<()> {
		self.send_at(&[&"+QIDEACT"])?;
		let timeout = self.config.attach_timeout;
		self.expect(timeout, &DEFAULT_REPLIES)
	}

	/// The address the network gave us.
	pub fn local_ip(&mut self) -> Result<Ipv4Addr> {
		self.send_at(&[&"+CIFSR;E0"])?;
		let mut text = String::new();
		let timeout = self.config.address_timeout;
		match self.wait_response(timeout, &DEFAULT_REPLIES, Some(&mut text)) {
			1 => text
				.parse()
				.map_err(|_| Error::Protocol(format!("not an address: {:?}", text))),
			0 => Err(Error::Timeout),
			rank => Err(Error::Rejected(rank)),
		}
	}

	// ------------------------------------------------------------------------

	/// Send `cmd`, wait for `prefix`, return the rest of that line.
	fn query_line(&mut self, cmd: &str, prefix: &str) -> Result<String> {
		self.send_at(&[&cmd])?;
		let timeout = self.config.response_timeout;
		self.expect(timeout, &[prefix])?;
		let line = self.read_until(b'\n')?;
		self.wait_default();
		Ok(line.trim().to_owned())
	}
}

// ****************************************************************************
//
// Private Functions
//
// ****************************************************************************

fn join_lines(text: &str) -> String {
	text.lines()
		.map(str::trim)
		.filter(|l| !l.is_empty())
		.collect::<Vec<_>>()
		.join(" ")
}

// ****************************************************************************
//
// Tests
//
// ****************************************************************************

#[cfg(test)]
mod test {
	use std::net::Ipv4Addr;
	use std::time::Duration;

	use super::{RegStatus, SimStatus};
	use crate::config::Config;
	use crate::error::Error;
	use crate::modem::Modem;
	use crate::testing::{ManualScheduler, ScriptedTransport};
	use crate::transport::Scheduler;

	fn modem(script: ScriptedTransport) -> Modem<ScriptedTransport, ManualScheduler> {
		Modem::with_config(script, ManualScheduler::new(), Config::default())
	}

	const OK: &str = "\r\nOK\r\n";

	#[test]
	fn probe_retries() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT\r\n", "")
			.expect("AT\r\n", "")
			.expect("AT\r\n", OK);
		let mut m = modem(script);
		assert_eq!(m.test_at(), Ok(()));
		assert!(m.transport().script_done());
	}

	#[test]
	fn probe_gives_up() {
		let mut m = modem(ScriptedTransport::new());
		assert_eq!(m.test_at(), Err(Error::Timeout));
		assert!(m.scheduler().now() >= Duration::from_secs(10));
		let probes = m.transport().written_text().matches("AT\r\n").count();
		assert!(probes > 10, "only {} probes", probes);
	}

	#[test]
	fn init_sequence() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT\r\n", OK)
			.expect("AT&FZ\r\n", "\r\nAT&FZ\r\r\nOK\r\n")
			.expect("ATE0\r\n", "\r\nATE0\r\r\nOK\r\n")
			.expect("AT+CPIN?\r\n", "\r\n+CPIN: READY\r\n\r\nOK\r\n");
		let mut m = modem(script);
		assert_eq!(m.init(), Ok(()));
		assert!(m.transport().script_done());
	}

	#[test]
	fn factory_settings() {
		let mut script = ScriptedTransport::new();
		for cmd in &["AT&FZE0&W", "AT+IPR=0", "AT+IFC=0,0", "AT+ICF=3,3", "AT+QSCLK=0", "AT&W"] {
			script.expect(format!("{}\r\n", cmd), OK);
		}
		let mut m = modem(script);
		assert_eq!(m.factory_default(), Ok(()));
		assert!(m.transport().script_done());
	}

	#[test]
	fn info_on_one_line() {
		let mut script = ScriptedTransport::new();
		script.expect(
			"ATI\r\n",
			"\r\nQuectel_Ltd\r\nQuectel_MC60\r\nRevision: MC60CAR01A12\r\n\r\nOK\r\n",
		);
		let mut m = modem(script);
		assert_eq!(
			m.modem_info().unwrap(),
			"Quectel_Ltd Quectel_MC60 Revision: MC60CAR01A12"
		);
	}

	#[test]
	fn sim_answers() {
		let cases = [
			("READY", SimStatus::Ready),
			("SIM PIN", SimStatus::Locked),
			("SIM PUK", SimStatus::Locked),
			("PH_SIM PIN", SimStatus::AntitheftLocked),
			("PH_SIM PUK", SimStatus::AntitheftLocked),
			("NOT INSERTED", SimStatus::Error),
		];
		for &(answer, status) in &cases {
			let mut script = ScriptedTransport::new();
			script.expect("AT+CPIN?\r\n", format!("\r\n+CPIN: {}\r\n\r\nOK\r\n", answer));
			let mut m = modem(script);
			assert_eq!(m.sim_status(Duration::from_secs(10)), Ok(status), "{}", answer);
			assert_eq!(m.transport().unread(), 0);
		}
	}

	#[test]
	fn sim_polled_until_it_answers() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT+CPIN?\r\n", "\r\nCME ERROR\r\n")
			.expect("AT+CPIN?\r\n", "\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n")
			.expect("AT+CPIN=\"1234\"\r\n", OK);
		let mut m = modem(script);
		assert_eq!(m.sim_status(Duration::from_secs(10)), Ok(SimStatus::Locked));
		assert_eq!(m.sim_unlock("1234"), Ok(()));
		assert!(m.transport().script_done());
	}

	#[test]
	fn sim_identity() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT+ICCID\r\n", "\r\n+ICCID: 8944110068265960371F\r\n\r\nOK\r\n")
			.expect("AT+GSN\r\n", "\r\n861359032054216\r\n\r\nOK\r\n");
		let mut m = modem(script);
		assert_eq!(m.sim_ccid().unwrap(), "8944110068265960371F");
		assert_eq!(m.imei().unwrap(), "861359032054216");
	}

	#[test]
	fn network_queries() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT+CREG?\r\n", "\r\n+CREG: 0,5\r\n\r\nOK\r\n")
			.expect("AT+COPS?\r\n", "\r\n+COPS: 0,0,\"vodafone UK\"\r\n\r\nOK\r\n")
			.expect("AT+CSQ\r\n", "\r\n+CSQ: 21,0\r\n\r\nOK\r\n")
			.expect("AT+CSQ\r\n", "\r\n+CSQ: 99,99\r\n\r\nOK\r\n");
		let mut m = modem(script);
		assert_eq!(m.registration_status(), Ok(RegStatus::OkRoaming));
		assert_eq!(m.operator().unwrap(), "vodafone UK");
		assert_eq!(m.signal_quality(), Ok(21));
		assert_eq!(m.signal_quality(), Ok(99));
		assert_eq!(m.transport().unread(), 0);
	}

	#[test]
	fn waits_for_registration() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT+CREG?\r\n", "\r\n+CREG: 0,2\r\n\r\nOK\r\n")
			.expect("AT+CREG?\r\n", "\r\n+CREG: 0,0\r\n\r\nOK\r\n")
			.expect("AT+CREG?\r\n", "\r\n+CREG: 0,1\r\n\r\nOK\r\n");
		let mut m = modem(script);
		assert_eq!(m.wait_for_network(Duration::from_secs(60)), Ok(()));
		assert!(m.scheduler().now() >= Duration::from_millis(500));
		assert!(m.transport().script_done());
	}

	#[test]
	fn registration_codes() {
		assert_eq!(RegStatus::from_code(1), RegStatus::OkHome);
		assert_eq!(RegStatus::from_code(4), RegStatus::Unknown);
		assert_eq!(RegStatus::from_code(9), RegStatus::Unknown);
		assert!(RegStatus::OkRoaming.is_registered());
		assert!(!RegStatus::Denied.is_registered());
	}

	#[test]
	fn gprs_bring_up() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT+QIDEACT\r\n", "\r\nDEACT OK\r\n")
			.expect("AT+QICSGP=1,\"internet\",\"web\",\"secret\"\r\n", OK)
			.expect("AT+CGDCONT=1,\"IP\",\"internet\"\r\n", OK)
			.expect("AT+CGACT=1,1\r\n", OK)
			.expect("AT+QIREGAPP=\"internet\",\"web\",\"secret\"\r\n", OK)
			.expect("AT+QIACT=1,1\r\n", OK)
			.expect("AT+CGATT=1\r\n", OK)
			.expect("AT+QILOCIP\r\n", "\r\n10.64.12.7\r\n\r\nOK\r\n")
			.expect("AT+QIMUX=1\r\n", OK)
			.expect("AT+CIPQSEND=1\r\n", OK)
			.expect("AT+CIPRXGET=1\r\n", OK)
			.expect("AT+CSTT=\"internet\",\"web\",\"secret\"\r\n", OK)
			.expect("AT+CIICR\r\n", OK)
			.expect("AT+CIFSR;E0\r\n", "\r\n10.64.12.7\r\n\r\nOK\r\n")
			.expect("AT+CDNSCFG=\"8.8.8.8\",\"8.8.4.4\"\r\n", OK);
		let mut m = modem(script);
		assert_eq!(m.gprs_connect("internet", "web", "secret"), Ok(()));
		assert!(m.transport().script_done());
	}

	#[test]
	fn gprs_stops_at_first_failure() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT+QIDEACT\r\n", OK)
			.expect("AT+QICSGP=1,\"internet\"\r\n", OK)
			.expect("AT+CGDCONT=1,\"IP\",\"internet\"\r\n", OK)
			.expect("AT+CGACT=1,1\r\n", OK)
			.expect("AT+QIREGAPP=\"internet\",\"\",\"\"\r\n", OK)
			.expect("AT+QIACT=1,1\r\n", OK)
			.expect("AT+CGATT=1\r\n", "\r\nCME ERROR\r\n");
		let mut m = modem(script);
		assert_eq!(m.gprs_connect("internet", "", ""), Err(Error::Rejected(2)));
		assert!(m.transport().script_done());
		assert!(!m.transport().written_text().contains("QILOCIP"));
	}

	#[test]
	fn address() {
		let mut script = ScriptedTransport::new();
		script
			.expect("AT+CIFSR;E0\r\n", "\r\n10.64.12.7\r\n\r\nOK\r\n")
			.expect("AT+CIFSR;E0\r\n", "\r\nnonsense\r\n\r\nOK\r\n");
		let mut m = modem(script);
		assert_eq!(m.local_ip(), Ok(Ipv4Addr::new(10, 64, 12, 7)));
		match m.local_ip() {
			Err(Error::Protocol(_)) => {}
			other => panic!("Bad match {:?}", other),
		}
	}
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
