use std::net::{Ipv4Addr, SocketAddrV4};

#[macro_use]
extern crate thiserror;

mod socket;

pub mod discovery;
pub mod errors;
pub mod message;
pub mod net;
pub mod search_target;

pub const SSDP_PORT: u16 = 1900;
pub const SSDP_V4_IP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// The well-known SSDP multicast group, `239.255.255.250:1900`.
///
/// M-SEARCH requests are broadcast here; responses come back unicast.
pub const SSDP_V4_ADDR: SocketAddrV4 = SocketAddrV4::new(SSDP_V4_IP, SSDP_PORT);

pub use chrono;
pub use url;
