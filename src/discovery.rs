//! The discovery coordinator: one shared multicast socket, many search sessions.

use crate::{
	errors::DiscoveryError,
	message::{self, MSearchRequest, Message},
	net::TargetInterface,
	search_target::SearchTarget,
	socket::{AsyncSsdpSocket, SsdpSocket},
};
use std::{
	collections::HashMap,
	fmt,
	net::SocketAddr,
	sync::{Arc, Mutex, Weak},
	time::Duration,
};

mod builder;
pub use builder::DiscoveryBuilder;

mod observer;
pub use observer::SearchObserver;

mod session;
pub use session::{SearchSession, SessionPhase};
use session::SessionShared;

/// Opaque identifier for a registered search session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(u64);
impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Owns the one shared SSDP socket and routes inbound datagrams to every
/// matching active session.
///
/// The socket is derived state: it is opened lazily by the first
/// [`start_search`](Discovery::start_search) and torn down when the last
/// session closes. Sessions are externally owned; the coordinator only keeps
/// weak references and relies on [`SearchSession::close`] to unregister.
/// A session whose owner forgets to close it keeps its timers and its table
/// entry alive until [`stop_all`](Discovery::stop_all).
pub struct Discovery {
	shared: Arc<DiscoveryShared>,
}

impl Discovery {
	pub fn builder() -> DiscoveryBuilder {
		DiscoveryBuilder::new()
	}

	/// Registers and starts a search session for `request`, lazily opening
	/// the shared socket and its receive loop first.
	///
	/// Socket setup is the only thing that can fail here, and it fails
	/// synchronously; everything after this call is scheduled. With a
	/// `timeout`, the session force-closes itself (notifying the observer)
	/// once the deadline passes; without one, it searches until
	/// [`SearchSession::close`].
	pub fn start_search(&self, request: MSearchRequest, timeout: Option<Duration>) -> Result<SearchSession, DiscoveryError> {
		let session = {
			let mut inner = self.shared.inner.lock().unwrap();
			let rt = self.shared.ensure_transport(&mut inner)?;
			let id = SessionId(inner.next_session_id);
			inner.next_session_id += 1;
			let session = SessionShared::new(id, request, timeout, Arc::downgrade(&self.shared), rt);
			inner.sessions.insert(id, Arc::downgrade(&session));
			session
		};
		session.start();
		Ok(SearchSession::new(session))
	}

	/// Force-closes every active session, notifying their observers, and
	/// tears the socket down. For environment-level events such as losing
	/// the network interface.
	pub fn stop_all(&self) {
		let sessions = self.shared.snapshot_sessions();
		for session in sessions {
			session.force_close();
		}

		// Closing unregisters; anything abandoned by its owner is swept here
		// so the socket always comes down.
		let mut inner = self.shared.inner.lock().unwrap();
		inner.sessions.clear();
		DiscoveryShared::teardown(&mut inner);
	}

	pub fn active_sessions(&self) -> usize {
		self.shared.inner.lock().unwrap().sessions.len()
	}

	pub fn is_socket_open(&self) -> bool {
		matches!(self.shared.inner.lock().unwrap().transport, Transport::Open(_))
	}
}

impl Drop for Discovery {
	fn drop(&mut self) {
		// The receive loop only holds a weak reference back here, but its
		// thread must still be told to stop.
		self.stop_all();
	}
}

pub(crate) struct DiscoveryShared {
	loopback: bool,
	interface: TargetInterface,
	inner: Mutex<DiscoveryInner>,
}

struct DiscoveryInner {
	transport: Transport,
	sessions: HashMap<SessionId, Weak<SessionShared>>,
	next_session_id: u64,
}

/// The shared socket's lifecycle: it exists if and only if at least one
/// session is registered.
enum Transport {
	Closed,
	Open(OpenTransport),
}

struct OpenTransport {
	socket: Arc<AsyncSsdpSocket>,
	rt: tokio::runtime::Handle,
	shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
	// The receive thread is deliberately detached: teardown can run on that
	// very thread (timeout-driven closure of the last session), so joining
	// here would deadlock.
}

impl DiscoveryShared {
	pub(crate) fn new(loopback: bool, interface: TargetInterface) -> Arc<Self> {
		Arc::new(Self {
			loopback,
			interface,
			inner: Mutex::new(DiscoveryInner {
				transport: Transport::Closed,
				sessions: HashMap::new(),
				next_session_id: 0,
			}),
		})
	}

	/// Opens the socket and spawns the receive loop, or reuses the already
	/// open transport. Idempotent.
	fn ensure_transport(self: &Arc<Self>, inner: &mut DiscoveryInner) -> Result<tokio::runtime::Handle, std::io::Error> {
		if let Transport::Open(open) = &inner.transport {
			return Ok(open.rt.clone());
		}

		let socket = SsdpSocket::new(self.loopback, &self.interface)?;

		let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
		let rt = runtime.handle().clone();
		let socket = {
			let _enter = runtime.enter();
			Arc::new(socket.into_async()?)
		};

		let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
		let loop_socket = socket.clone();
		let loop_shared = Arc::downgrade(self);
		std::thread::Builder::new()
			.name("Floodlight SSDP Discovery (Tokio)".into())
			.spawn(move || runtime.block_on(Self::recv_loop(loop_socket, loop_shared, shutdown_rx)))?;

		log::debug!(target: "floodlight", "SSDP socket opened");

		inner.transport = Transport::Open(OpenTransport {
			socket,
			rt: rt.clone(),
			shutdown_tx: Some(shutdown_tx),
		});
		Ok(rt)
	}

	/// Closes the transport, releasing the receive loop. Idempotent; a no-op
	/// while the transport is already closed.
	fn teardown(inner: &mut DiscoveryInner) {
		if let Transport::Open(mut open) = std::mem::replace(&mut inner.transport, Transport::Closed) {
			if let Some(shutdown_tx) = open.shutdown_tx.take() {
				shutdown_tx.send(()).ok();
			}
			log::debug!(target: "floodlight", "last session closed, SSDP socket torn down");
		}
	}

	/// Broadcasts one M-SEARCH. Dropped with a log line if the transport has
	/// already closed; send failures are not fatal to anything.
	pub(crate) fn transmit(&self, message: String) {
		let inner = self.inner.lock().unwrap();
		let Transport::Open(open) = &inner.transport else {
			log::debug!(target: "floodlight", "transport closed, dropping outbound M-SEARCH");
			return;
		};
		let socket = open.socket.clone();
		open.rt.spawn(async move {
			if let Err(err) = socket.send_multicast(message.as_bytes()).await {
				log::warn!(target: "floodlight", "failed to send M-SEARCH: {err}");
			}
		});
	}

	/// Removes a session from the table; tears the socket down when that
	/// leaves the table empty.
	pub(crate) fn unregister_session(&self, id: SessionId) {
		let mut inner = self.inner.lock().unwrap();
		inner.sessions.remove(&id);
		if inner.sessions.is_empty() {
			Self::teardown(&mut inner);
		}
	}

	/// Snapshots the live sessions so dispatch never iterates the table while
	/// it can be mutated. Stale weak entries are simply skipped; explicit
	/// unregistration is what actually removes them.
	fn snapshot_sessions(&self) -> Vec<Arc<SessionShared>> {
		let inner = self.inner.lock().unwrap();
		inner.sessions.values().filter_map(Weak::upgrade).collect()
	}

	async fn recv_loop(
		socket: Arc<AsyncSsdpSocket>,
		shared: Weak<DiscoveryShared>,
		mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
	) {
		let mut buf = vec![0; 4096];
		loop {
			tokio::select! {
				biased;
				_ = &mut shutdown_rx => break,

				recv = socket.recv_from(&mut buf) => match recv {
					Ok((count, addr)) => {
						let shared = match shared.upgrade() {
							Some(shared) => shared,
							None => break,
						};
						let datagram = String::from_utf8_lossy(&buf[..count]);
						shared.handle_datagram(&datagram, addr);
					}
					Err(err) => {
						log::error!(target: "floodlight", "SSDP receive failed: {err}");
						break;
					}
				},
			}
		}
	}

	/// One inbound datagram: parse, validate, fan out. Never fails; bad
	/// input is logged and dropped.
	pub(crate) fn handle_datagram(&self, datagram: &str, from: SocketAddr) {
		let response = match message::parse_datagram(datagram) {
			Some(Message::SearchResponse(response)) => response,
			None => {
				log::debug!(target: "floodlight", "dropping unrecognized datagram from {from}");
				return;
			}
		};

		if *response.search_target() == SearchTarget::All {
			log::warn!(
				target: "floodlight",
				"{from} answered with ST ssdp:all (USN {}), dropping",
				response.usn()
			);
			return;
		}

		let as_device = !response.search_target().is_service();
		for session in self.snapshot_sessions() {
			let target = session.target();
			if target == response.search_target() || *target == SearchTarget::All {
				session.receive_response(&response, as_device);
			}
		}
	}
}
