//! Networking utilities and abstractions

use std::{collections::BTreeSet, net::Ipv4Addr};

/// The [`if_addrs`](https://crates.io/crates/if_addrs) crate is used to discover network interfaces on the system.
///
/// Here is a re-export for your convenience.
pub use if_addrs;

#[derive(Clone, Debug, PartialEq, Eq)]
/// The interface(s) to join the SSDP multicast group on.
pub enum TargetInterface {
	/// Let the OS decide which interface to use.
	Default,

	/// Use as many interfaces as possible, falling back to `Default` if none are available.
	All,

	/// Use the given interface.
	Specific(Ipv4Addr),

	/// Use the given interfaces.
	Multi(BTreeSet<Ipv4Addr>),
}
