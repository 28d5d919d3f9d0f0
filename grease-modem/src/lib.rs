//! # modem - A task that runs sockets over an AT modem
//!
//! The modem task owns a `grease_at::Modem` outright, so only one thread
//! ever touches the serial link. Users ask it to connect, send and close
//! and it answers with confirms. Data arriving on a connected socket is
//! passed up in indications, one at a time per socket: no further data is
//! sent on a socket until the user answers the last `IndReceived` with a
//! `RspReceived`.
//!
//! The task wakes whenever a message arrives and at least every
//! `maintain_interval` otherwise, to look for data and dropped connections.
//!
//! Copyright (c) Cambridge Consultants 2018.
//!
//! Dual MIT/Apache 2.0 licensed. See the top-level COPYRIGHT file for further
//! information and licensing.

#[macro_use]
extern crate log;

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use grease_at::{Modem, Mux, Scheduler, Transport};

// ****************************************************************************
//
// Public Messages
//
// ****************************************************************************

/// Requests that can be sent to the Modem task
#[derive(Debug)]
pub enum Request {
	/// A Connect request - Open a TCP connection
	Connect(ReqConnect),
	/// A Close request - Close an open connection
	Close(ReqClose),
	/// A Send request - Send something on a connection
	Send(ReqSend),
}

/// Confirms sent from the Modem task in answer to a Request
#[derive(Debug)]
pub enum Confirm {
	/// A Connect Confirm - Opened (or failed to open) a connection
	Connect(CfmConnect),
	/// A Close Confirm - Closed an open connection
	Close(CfmClose),
	/// A Send Confirm - Sent something on a connection
	Send(CfmSend),
}

/// Asynchronous indications sent by the Modem task.
#[derive(Debug)]
pub enum Indication {
	/// A Received Indication - Indicates that data has arrived on an open
	/// connection
	Received(IndReceived),
	/// A Dropped Indication - Indicates that the far end closed a
	/// connection, or the network lost it
	Dropped(IndDropped),
}

/// Responses to Indications required
#[derive(Debug)]
pub enum Response {
	/// a Received Response - unblocks the connection so more IndReceived can
	/// be sent
	Received(RspReceived),
}

/// Open a TCP connection on one of the modem's multiplexed sockets
#[derive(Debug)]
pub struct ReqConnect {
	/// Which socket to use. Anything already open on it is closed.
	pub mux: Mux,
	/// Host name or dotted IP address
	pub host: String,
	pub port: u16,
	/// Ask the modem to run TLS
	pub secure: bool,
	/// Reflected in the cfm
	pub context: Context,
}

/// Close an open connection
#[derive(Debug)]
pub struct ReqClose {
	/// The socket from a CfmConnect
	pub mux: Mux,
	/// Reflected in the cfm
	pub context: Context,
}

/// Send something on a connection
pub struct ReqSend {
	/// The socket from a CfmConnect
	pub mux: Mux,
	/// Reflected in the cfm
	pub context: Context,
	/// The data to be sent
	pub data: Vec<u8>,
}

/// Reply to a ReqConnect.
#[derive(Debug)]
pub struct CfmConnect {
	/// The socket requested
	pub mux: Mux,
	/// Whether it's now open
	pub result: Result<(), ModemError>,
	/// Reflected from the req
	pub context: Context,
}

/// Reply to a ReqClose.
#[derive(Debug)]
pub struct CfmClose {
	/// The socket requested for closing
	pub mux: Mux,
	/// Success or failed
	pub result: Result<(), ModemError>,
	/// Reflected from the req
	pub context: Context,
}

/// Reply to a ReqSend. The modem has taken the data, but that doesn't
/// mean the far end has it yet.
#[derive(Debug)]
pub struct CfmSend {
	/// The socket requested for sending
	pub mux: Mux,
	/// Amount sent or error
	pub result: Result<usize, ModemError>,
	/// Reflected from the req
	pub context: Context,
}

/// Indicates that data has arrived on a connection.
/// No further data will be sent on this socket until
/// RspReceived is sent back. Note that this type
/// has a custom std::fmt::Debug implementation so it
/// doesn't print the (lengthy) contents of `data`.
pub struct IndReceived {
	/// The socket data came in on
	pub mux: Mux,
	/// The data that came in (at most `TaskConfig::max_read_len`)
	pub data: Vec<u8>,
}

/// Indicates that a connection has gone. The socket is free for a new
/// ReqConnect.
#[derive(Debug)]
pub struct IndDropped {
	/// The socket that is no longer connected
	pub mux: Mux,
}

/// Tell the task that more data can now be sent.
#[derive(Debug)]
pub struct RspReceived {
	/// Which socket is now free to send up more data
	pub mux: Mux,
}

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// Something that can send the Modem task messages.
///
/// The `clone` function returns the boxed trait, as the trait must be object
/// safe.
pub trait ServiceProvider {
	/// Call this to send a request to the task.
	fn send_request(&self, req: Request, reply_to: &dyn ServiceUser);
	/// Call this to send a response to the task.
	fn send_response(&self, rsp: Response);
	/// Call this to clone this object so another thread can use it.
	fn clone(&self) -> ServiceProviderHandle;
}

/// Users can use this to send us messages.
pub type ServiceProviderHandle = Box<dyn ServiceProvider + Send>;

/// Something the Modem task can send confirms and indications to.
pub trait ServiceUser {
	/// Call this to send a confirmation back to the service user.
	fn send_confirm(&self, cfm: Confirm);
	/// Call this to send an indication to the service user.
	fn send_indication(&self, ind: Indication);
	/// Call this so we can store this user reference in two places.
	fn clone(&self) -> ServiceUserHandle;
}

/// We use this to talk to our users.
pub type ServiceUserHandle = Box<dyn ServiceUser + Send>;

/// Represents something a modem service user can hold on to to send us
/// messages.
pub struct Handle {
	chan: mio_more::channel::Sender<Incoming>,
}

/// A type used to pass context between layers. Each confirm carries the
/// context from its request, so users can tell their requests apart.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Context(usize);

/// All possible errors the Modem task might want to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemError {
	/// The modem didn't do what we asked
	At(grease_at::Error),
	/// The given socket isn't connected
	BadHandle,
	/// The connection dropped before the request could be carried out
	Dropped,
}

/// Tuning for the task's event loop.
#[derive(Debug, Clone)]
pub struct TaskConfig {
	/// Longest time between looks at the modem when no messages arrive
	pub maintain_interval: Duration,
	/// Most data in any one IndReceived
	pub max_read_len: usize,
}

// ****************************************************************************
//
// Private Types
//
// ****************************************************************************

/// The set of all messages that this task can receive.
enum Incoming {
	/// One of our own requests that has come in
	Request(Request, ServiceUserHandle),
	/// One of our own responses that has come in
	Response(Response),
}

/// Created for every connection we open
struct OpenSocket {
	ind_to: ServiceUserHandle,
	/// There's a read the user hasn't processed yet
	outstanding: bool,
}

/// One instance per task. Stores all the task data.
struct TaskContext<T, S> {
	modem: Modem<T, S>,
	config: TaskConfig,
	/// Set of all connected sockets
	sockets: HashMap<Mux, OpenSocket>,
	/// The special channel our messages arrive on
	mio_rx: mio_more::channel::Receiver<Incoming>,
	/// The object we poll on
	poll: mio::Poll,
}

// ****************************************************************************
//
// Private Data
//
// ****************************************************************************

const MAX_READ_LEN: usize = 2048;
const MAINTAIN_INTERVAL_MS: u64 = 100;
const MESSAGE_TOKEN: mio::Token = mio::Token(0);

// ****************************************************************************
//
// Public Functions
//
// ****************************************************************************

/// Creates a new modem task, which takes ownership of `modem`. Returns an
/// object that can be used to send this task messages.
///
/// The modem should already be initialised and attached to the network
/// (see `Modem::init` and `Modem::gprs_connect`).
pub fn make_task<T, S>(modem: Modem<T, S>, config: TaskConfig) -> io::Result<ServiceProviderHandle>
where
	T: Transport + Send + 'static,
	S: Scheduler + Send + 'static,
{
	let (mio_tx, mio_rx) = mio_more::channel::channel();
	let mut task_context = TaskContext::new(modem, config, mio_rx)?;
	thread::spawn(move || {
		while task_context.poll() {}
		info!("Modem task exiting");
	});
	Ok(Box::new(Handle { chan: mio_tx }))
}

impl Context {
	pub fn new(value: usize) -> Context {
		Context(value)
	}

	pub fn as_usize(&self) -> usize {
		self.0
	}

	/// You can use take to grab a copy of the current value,
	/// while incrementing it ready for the next use.
	pub fn take(&mut self) -> Context {
		let result = Context(self.0);
		self.0 = self.0.wrapping_add(1);
		result
	}
}

impl Default for Context {
	fn default() -> Context {
		Context(0)
	}
}

impl fmt::Display for Context {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Context({})", self.0)
	}
}

impl Default for TaskConfig {
	fn default() -> TaskConfig {
		TaskConfig {
			maintain_interval: Duration::from_millis(MAINTAIN_INTERVAL_MS),
			max_read_len: MAX_READ_LEN,
		}
	}
}

impl fmt::Display for ModemError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			ModemError::At(ref err) => write!(f, "{}", err),
			ModemError::BadHandle => write!(f, "socket not connected"),
			ModemError::Dropped => write!(f, "connection dropped"),
		}
	}
}

impl std::error::Error for ModemError {}

/// Wrap AT errors into ModemErrors easily
impl From<grease_at::Error> for ModemError {
	fn from(e: grease_at::Error) -> ModemError {
		ModemError::At(e)
	}
}

impl ServiceProvider for Handle {
	fn send_request(&self, req: Request, reply_to: &dyn ServiceUser) {
		if self.chan.send(Incoming::Request(req, reply_to.clone())).is_err() {
			warn!("Modem task has gone away");
		}
	}

	fn send_response(&self, rsp: Response) {
		if self.chan.send(Incoming::Response(rsp)).is_err() {
			warn!("Modem task has gone away");
		}
	}

	fn clone(&self) -> ServiceProviderHandle {
		Box::new(Handle {
			chan: self.chan.clone(),
		})
	}
}

/// Any channel whose message type can carry our confirms and indications
/// can be a user of this task.
impl<M> ServiceUser for mpsc::Sender<M>
where
	M: From<Confirm> + From<Indication> + Send + 'static,
{
	fn send_confirm(&self, cfm: Confirm) {
		if self.send(cfm.into()).is_err() {
			debug!("User has gone away");
		}
	}

	fn send_indication(&self, ind: Indication) {
		if self.send(ind.into()).is_err() {
			debug!("User has gone away");
		}
	}

	fn clone(&self) -> ServiceUserHandle {
		Box::new(Clone::clone(self))
	}
}

// ****************************************************************************
//
// Private Functions
//
// ****************************************************************************

impl<T, S> TaskContext<T, S>
where
	T: Transport,
	S: Scheduler,
{
	/// Init the context
	fn new(
		modem: Modem<T, S>,
		config: TaskConfig,
		mio_rx: mio_more::channel::Receiver<Incoming>,
	) -> io::Result<TaskContext<T, S>> {
		let t = TaskContext {
			modem,
			config,
			sockets: HashMap::new(),
			mio_rx,
			poll: mio::Poll::new()?,
		};
		t.poll.register(
			&t.mio_rx,
			MESSAGE_TOKEN,
			mio::Ready::readable(),
			mio::PollOpt::level(),
		)?;
		Ok(t)
	}

	/// Wait for a message or the maintenance timer. Returns false once
	/// every handle to the task has been dropped.
	fn poll(&mut self) -> bool {
		let mut events = mio::Events::with_capacity(16);
		let timeout = Some(self.config.maintain_interval);
		match self.poll.poll(&mut events, timeout) {
			Ok(num_events) => trace!("Woke up! Handling num_events={}", num_events),
			Err(err) => warn!("Poll failed: {}", err),
		}
		let mut running = true;
		for event in events.iter() {
			if event.token() == MESSAGE_TOKEN && event.readiness().is_readable() {
				running = self.empty_queue();
			}
		}
		self.service_sockets();
		running
	}

	/// Empty the whole message queue
	fn empty_queue(&mut self) -> bool {
		loop {
			match self.mio_rx.try_recv() {
				Ok(msg) => self.handle_message(msg),
				Err(mpsc::TryRecvError::Empty) => return true,
				Err(mpsc::TryRecvError::Disconnected) => return false,
			}
		}
	}

	/// Called when our task has received a Message
	fn handle_message(&mut self, msg: Incoming) {
		match msg {
			// We only handle our own requests and responses
			Incoming::Request(msg, reply_to) => {
				debug!("Rx: {:?}", msg);
				self.handle_modem_req(msg, reply_to)
			}
			Incoming::Response(msg) => {
				debug!("Rx: {:?}", msg);
				self.handle_modem_rsp(msg)
			}
		}
	}

	/// Handle requests
	fn handle_modem_req(&mut self, req: Request, reply_to: ServiceUserHandle) {
		match req {
			Request::Connect(x) => self.handle_connect(x, reply_to),
			Request::Close(x) => self.handle_close(x, reply_to),
			Request::Send(x) => self.handle_send(x, reply_to),
		}
	}

	/// Handle responses
	fn handle_modem_rsp(&mut self, rsp: Response) {
		match rsp {
			Response::Received(x) => self.handle_received(x),
		}
	}

	/// Open a connection. Whoever asks for it gets its indications.
	fn handle_connect(&mut self, req_connect: ReqConnect, reply_to: ServiceUserHandle) {
		let mux = req_connect.mux;
		info!(
			"Connecting {} to {}:{}...",
			mux, req_connect.host, req_connect.port
		);
		if let Some(old) = self.sockets.remove(&mux) {
			warn!("{} was already open; dropping it", mux);
			old.ind_to
				.send_indication(Indication::Dropped(IndDropped { mux }));
		}
		self.modem.register(mux);
		let result = self
			.modem
			.connect(mux, &req_connect.host, req_connect.port, req_connect.secure)
			.map_err(ModemError::from);
		if result.is_ok() {
			let socket = OpenSocket {
				// We assume any future indications should be sent
				// to the same place we send the CfmConnect.
				ind_to: reply_to.clone(),
				outstanding: false,
			};
			self.sockets.insert(mux, socket);
		} else {
			self.modem.unregister(mux);
		}
		let cfm = CfmConnect {
			mux,
			result,
			context: req_connect.context,
		};
		reply_to.send_confirm(Confirm::Connect(cfm));
	}

	/// Handle a ReqClose
	fn handle_close(&mut self, req_close: ReqClose, reply_to: ServiceUserHandle) {
		let mux = req_close.mux;
		let result = if self.sockets.remove(&mux).is_some() {
			let result = self.modem.close(mux).map_err(ModemError::from);
			self.modem.unregister(mux);
			result
		} else {
			Err(ModemError::BadHandle)
		};
		let cfm = CfmClose {
			mux,
			result,
			context: req_close.context,
		};
		reply_to.send_confirm(Confirm::Close(cfm));
	}

	/// Handle a ReqSend. The modem may not take it all in one go, so keep
	/// offering it the rest until it does or stops taking any.
	fn handle_send(&mut self, req_send: ReqSend, reply_to: ServiceUserHandle) {
		let mux = req_send.mux;
		let result = if !self.sockets.contains_key(&mux) {
			Err(ModemError::BadHandle)
		} else if !self.modem.is_connected(mux) {
			self.dropped(mux);
			Err(ModemError::Dropped)
		} else {
			let to_send = req_send.data.len();
			let mut sent = 0;
			let mut result = Ok(0);
			while sent < to_send {
				match self.modem.write(mux, &req_send.data[sent..]) {
					Ok(0) => {
						debug!("Modem took nothing on {}", mux);
						break;
					}
					Ok(len) => {
						debug!("Sent {} of {} on {}", len, to_send - sent, mux);
						sent += len;
					}
					Err(err) => {
						warn!("Send error on {}, err: {}", mux, err);
						result = Err(err.into());
						break;
					}
				}
			}
			if sent > 0 {
				Ok(sent)
			} else {
				result
			}
		};
		let cfm = CfmSend {
			mux,
			result,
			context: req_send.context,
		};
		reply_to.send_confirm(Confirm::Send(cfm));
	}

	/// Someone wants more data
	fn handle_received(&mut self, rsp_received: RspReceived) {
		// Read response might not be valid - it might
		// have crossed over with a disconnect.
		if let Some(socket) = self.sockets.get_mut(&rsp_received.mux) {
			socket.outstanding = false;
			self.service_socket(rsp_received.mux);
		}
	}

	/// Look for data and dropped connections on everything we have open.
	fn service_sockets(&mut self) {
		self.modem.maintain();
		let open: Vec<Mux> = self.sockets.keys().cloned().collect();
		for mux in open {
			self.service_socket(mux);
		}
	}

	fn service_socket(&mut self, mux: Mux) {
		let outstanding = match self.sockets.get(&mux) {
			Some(socket) => socket.outstanding,
			None => return,
		};
		if outstanding {
			trace!("Not reading - outstanding ind on {}", mux);
		} else {
			self.read_from_socket(mux);
		}
		// Still "connected" while there's data left to pass up
		if !self.modem.is_connected(mux) {
			self.dropped(mux);
		}
	}

	/// Pass up whatever the modem has for us, capped at `max_read_len`.
	fn read_from_socket(&mut self, mux: Mux) {
		match self.modem.available_bytes(mux) {
			Ok(0) => return,
			Ok(len) => trace!("{} bytes waiting on {}", len, mux),
			Err(err) => {
				warn!("Can't check {} for data, err: {}", mux, err);
				return;
			}
		}
		let mut buffer = vec![0u8; self.config.max_read_len];
		match self.modem.read(mux, &mut buffer) {
			Ok(0) => debug!("Read nothing on {}", mux),
			Ok(len) => {
				debug!("Read {} octets on {}", len, mux);
				buffer.truncate(len);
				if let Some(socket) = self.sockets.get_mut(&mux) {
					socket.outstanding = true;
					let ind = IndReceived { mux, data: buffer };
					socket.ind_to.send_indication(Indication::Received(ind));
				}
			}
			Err(err) => warn!("Read error on {}, err: {}", mux, err),
		}
	}

	/// Connection has gone away. Clean up.
	fn dropped(&mut self, mux: Mux) {
		if let Some(socket) = self.sockets.remove(&mux) {
			info!("{} dropped", mux);
			self.modem.unregister(mux);
			socket
				.ind_to
				.send_indication(Indication::Dropped(IndDropped { mux }));
		}
	}
}

/// Don't log the contents of the vector
impl fmt::Debug for IndReceived {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"IndReceived {{ mux: {}, data.len: {} }}",
			self.mux,
			self.data.len()
		)
	}
}

/// Don't log the contents of the vector
impl fmt::Debug for ReqSend {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"ReqSend {{ mux: {}, context: {}, data.len: {} }}",
			self.mux,
			self.context,
			self.data.len()
		)
	}
}

impl From<ReqConnect> for Request {
	fn from(req: ReqConnect) -> Request {
		Request::Connect(req)
	}
}

impl From<ReqClose> for Request {
	fn from(req: ReqClose) -> Request {
		Request::Close(req)
	}
}

impl From<ReqSend> for Request {
	fn from(req: ReqSend) -> Request {
		Request::Send(req)
	}
}

impl From<RspReceived> for Response {
	fn from(rsp: RspReceived) -> Response {
		Response::Received(rsp)
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
