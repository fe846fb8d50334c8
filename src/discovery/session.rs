use super::{DiscoveryShared, SessionId};
use crate::{
	message::{MSearchRequest, MSearchResponse},
	search_target::SearchTarget,
};
use std::{
	collections::HashSet,
	fmt,
	sync::{Arc, Mutex, Weak},
	time::{Duration, Instant},
};

/// Lifecycle of a search session. Monotonic: a closed session is never
/// reopened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
	/// Registered, not yet started.
	Unknown,
	/// Actively broadcasting M-SEARCH and accepting responses.
	Searching,
	/// Done. Terminal.
	Closed,
}

/// One outstanding discovery operation, handed out by
/// [`Discovery::start_search`](super::Discovery::start_search).
///
/// The caller owns the session and must [`close`](SearchSession::close) it on
/// every exit path; the coordinator only ever holds a weak reference.
/// Dropping an unclosed session leaks its retransmission timer and its
/// registration until [`stop_all`](super::Discovery::stop_all).
#[derive(Clone)]
pub struct SearchSession {
	shared: Arc<SessionShared>,
}

impl SearchSession {
	pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
		Self { shared }
	}

	#[inline(always)]
	pub fn id(&self) -> SessionId {
		self.shared.id
	}

	#[inline(always)]
	pub fn target(&self) -> &SearchTarget {
		self.shared.target()
	}

	pub fn phase(&self) -> SessionPhase {
		self.shared.state.lock().unwrap().phase
	}

	pub fn is_closed(&self) -> bool {
		self.phase() == SessionPhase::Closed
	}

	/// Stops searching: cancels the retransmission and timeout timers and
	/// unregisters from the coordinator. Idempotent. The observer is not
	/// notified, since you called this.
	pub fn close(&self) {
		self.shared.close();
	}
}

impl fmt::Debug for SearchSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SearchSession")
			.field("id", &self.shared.id)
			.field("target", self.target())
			.field("phase", &self.phase())
			.finish()
	}
}

pub(crate) struct SessionShared {
	id: SessionId,
	request: MSearchRequest,
	timeout: Option<Duration>,
	coordinator: Weak<DiscoveryShared>,
	rt: tokio::runtime::Handle,
	state: Mutex<SessionState>,
}

/// Everything timers and datagram delivery race over, guarded together:
/// those run on different execution contexts than the owning caller.
struct SessionState {
	phase: SessionPhase,
	started_at: Option<Instant>,
	seen: HashSet<MSearchResponse>,
	retransmit_task: Option<tokio::task::JoinHandle<()>>,
	timeout_task: Option<tokio::task::JoinHandle<()>>,
}

impl SessionShared {
	pub(crate) fn new(
		id: SessionId,
		request: MSearchRequest,
		timeout: Option<Duration>,
		coordinator: Weak<DiscoveryShared>,
		rt: tokio::runtime::Handle,
	) -> Arc<Self> {
		Arc::new(Self {
			id,
			request,
			timeout,
			coordinator,
			rt,
			state: Mutex::new(SessionState {
				phase: SessionPhase::Unknown,
				started_at: None,
				seen: HashSet::new(),
				retransmit_task: None,
				timeout_task: None,
			}),
		})
	}

	#[inline(always)]
	pub(crate) fn target(&self) -> &SearchTarget {
		self.request.target()
	}

	/// Begins searching: first M-SEARCH out immediately, retransmissions on
	/// the backoff cadence, timeout armed if one was configured. A no-op
	/// unless the session is still [`SessionPhase::Unknown`].
	pub(crate) fn start(self: &Arc<Self>) {
		let mut state = self.state.lock().unwrap();
		if state.phase != SessionPhase::Unknown {
			return;
		}
		state.phase = SessionPhase::Searching;
		state.started_at = Some(Instant::now());

		if let Some(timeout) = self.timeout {
			let shared = self.clone();
			state.timeout_task = Some(self.rt.spawn(async move {
				tokio::time::sleep(timeout).await;
				log::debug!(target: "floodlight", "session {} timed out after {timeout:?}", shared.id);
				shared.force_close();
			}));
		}

		self.transmit();
		state.retransmit_task = Some(self.rt.spawn(Self::run_retransmit(self.clone())));
	}

	/// Re-broadcasts the request on the backoff cadence until the session
	/// closes. The interval is recomputed from the live elapsed time at every
	/// firing, so it steps up as the session ages.
	async fn run_retransmit(shared: Arc<Self>) {
		loop {
			let delay = {
				let state = shared.state.lock().unwrap();
				if state.phase != SessionPhase::Searching {
					break;
				}
				retransmit_interval(state.started_at.map(|at| at.elapsed()).unwrap_or_default())
			};
			tokio::time::sleep(delay).await;

			// The session may have closed while we slept.
			if shared.state.lock().unwrap().phase != SessionPhase::Searching {
				break;
			}
			shared.transmit();
		}
	}

	fn transmit(&self) {
		match self.coordinator.upgrade() {
			Some(coordinator) => coordinator.transmit(self.request.build_message()),
			None => log::debug!(target: "floodlight", "session {}: coordinator is gone, dropping M-SEARCH", self.id),
		}
	}

	/// One inbound response routed to this session. Deduplicates on
	/// `(USN, LOCATION)` and forwards fresh discoveries to the observer.
	pub(crate) fn receive_response(self: &Arc<Self>, response: &MSearchResponse, as_device: bool) {
		if *response.search_target() == SearchTarget::All {
			// Sessions search for one concrete target; the coordinator already
			// filters these out, so seeing one here is a protocol anomaly.
			log::warn!(
				target: "floodlight",
				"session {}: dropping response classified as ssdp:all (USN {})",
				self.id,
				response.usn()
			);
			return;
		}

		{
			let mut state = self.state.lock().unwrap();
			if state.phase != SessionPhase::Searching {
				return;
			}
			if !state.seen.insert(response.clone()) {
				// Duplicate delivery of a known responder.
				return;
			}
		}

		log::debug!(
			target: "floodlight",
			"session {}: discovered {} at {}",
			self.id,
			response.usn(),
			response.location()
		);

		let session = SearchSession::new(self.clone());
		if as_device {
			self.request.observer_handle().device_discovered(response, &session);
		} else {
			self.request.observer_handle().service_discovered(response, &session);
		}
	}

	/// Cancels both timers, unregisters from the coordinator and transitions
	/// to [`SessionPhase::Closed`]. Returns whether this call performed the
	/// close; repeated calls are no-ops.
	pub(crate) fn close(&self) -> bool {
		let (retransmit_task, timeout_task) = {
			let mut state = self.state.lock().unwrap();
			if state.phase == SessionPhase::Closed {
				return false;
			}
			state.phase = SessionPhase::Closed;
			(state.retransmit_task.take(), state.timeout_task.take())
		};

		if let Some(task) = retransmit_task {
			task.abort();
		}
		if let Some(task) = timeout_task {
			task.abort();
		}

		if let Some(coordinator) = self.coordinator.upgrade() {
			coordinator.unregister_session(self.id);
		}

		log::debug!(target: "floodlight", "session {} closed", self.id);
		true
	}

	/// [`close`](SessionShared::close), then tell the observer. For closures
	/// the caller did not ask for: the timeout deadline and
	/// [`stop_all`](super::Discovery::stop_all).
	pub(crate) fn force_close(self: &Arc<Self>) {
		if self.close() {
			let session = SearchSession::new(self.clone());
			self.request.observer_handle().session_closed(&session);
		}
	}
}

/// Time until the next M-SEARCH retransmission, as a pure function of how
/// long the session has been searching.
fn retransmit_interval(elapsed: Duration) -> Duration {
	if elapsed < Duration::from_secs(5) {
		Duration::from_secs(1)
	} else if elapsed < Duration::from_secs(10) {
		Duration::from_secs(3)
	} else if elapsed < Duration::from_secs(60) {
		Duration::from_secs(10)
	} else {
		Duration::from_secs(60)
	}
}
