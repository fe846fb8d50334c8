use super::SearchSession;
use crate::message::MSearchResponse;
use std::sync::Arc;

/// Callbacks a search session invokes as it hears back from the network.
///
/// Every method defaults to a no-op; implement the ones you care about.
/// Callbacks run on the discovery runtime's thread, except
/// [`session_closed`](SearchObserver::session_closed) during a
/// [`stop_all`](super::Discovery::stop_all), which runs on the calling thread.
pub trait SearchObserver: Send + Sync + 'static {
	/// A device answered the session's search with a response it has not
	/// seen before.
	fn device_discovered(&self, _response: &MSearchResponse, _session: &SearchSession) {}

	/// A service answered the session's search with a response it has not
	/// seen before.
	fn service_discovered(&self, _response: &MSearchResponse, _session: &SearchSession) {}

	/// The session closed itself: its timeout fired, or the coordinator shut
	/// everything down. Not invoked for a caller-initiated
	/// [`close`](SearchSession::close); the caller already knows.
	fn session_closed(&self, _session: &SearchSession) {}
}

/// The default observer: discards everything.
impl SearchObserver for () {}

impl<T: SearchObserver + ?Sized> SearchObserver for Arc<T> {
	fn device_discovered(&self, response: &MSearchResponse, session: &SearchSession) {
		(**self).device_discovered(response, session);
	}

	fn service_discovered(&self, response: &MSearchResponse, session: &SearchSession) {
		(**self).service_discovered(response, session);
	}

	fn session_closed(&self, session: &SearchSession) {
		(**self).session_closed(session);
	}
}
