use super::{Discovery, DiscoveryShared};
use crate::net::TargetInterface;

pub struct DiscoveryBuilder {
	loopback: bool,
	interface: TargetInterface,
}
impl DiscoveryBuilder {
	pub fn new() -> Self {
		Self {
			loopback: false,
			interface: TargetInterface::All,
		}
	}

	/// Receive our own multicast traffic. Useful for talking to devices (or
	/// tests) running on this machine.
	pub fn loopback(mut self) -> Self {
		self.loopback = true;
		self
	}

	pub fn interface(mut self, interface: TargetInterface) -> Self {
		self.interface = interface;
		self
	}

	/// Building never touches the network; the socket is opened lazily by the
	/// first [`Discovery::start_search`], which is where setup errors surface.
	pub fn build(self) -> Discovery {
		let DiscoveryBuilder { loopback, interface } = self;

		Discovery {
			shared: DiscoveryShared::new(loopback, interface),
		}
	}
}
impl Default for DiscoveryBuilder {
	fn default() -> Self {
		Self::new()
	}
}
