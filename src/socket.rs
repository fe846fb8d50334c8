use crate::{net::TargetInterface, SSDP_V4_ADDR, SSDP_V4_IP};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket as AsyncUdpSocket;

/// The one shared SSDP socket, pre-async.
///
/// A discovery client must not bind the SSDP port itself: with several
/// sockets on 1900 (even with `SO_REUSEPORT`) the kernel load-balances
/// inbound datagrams between them and unicast responses get lost at random.
/// We bind an ephemeral port instead; search responses are addressed to it
/// directly. The multicast group is still joined so that the same socket can
/// observe group traffic where the platform delivers it.
pub(crate) struct SsdpSocket(std::net::UdpSocket);

impl SsdpSocket {
	pub fn new(loopback: bool, interface: &TargetInterface) -> Result<Self, std::io::Error> {
		let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
		socket.set_reuse_address(true)?;
		socket.set_multicast_loop_v4(loopback)?;

		#[cfg(unix)]
		{
			socket.set_reuse_port(true)?;
		}

		// Join failures are warnings, not errors: responses arrive unicast, so a
		// client on an interface that refuses the join still works.
		match interface {
			TargetInterface::Default => {
				Self::join(&socket, &Ipv4Addr::UNSPECIFIED);
			}

			TargetInterface::Specific(iface) => {
				Self::join(&socket, iface);
			}

			TargetInterface::Multi(ifaces) => {
				for iface in ifaces {
					Self::join(&socket, iface);
				}
			}

			TargetInterface::All => {
				let mut did_join = false;
				for iface in if_addrs::get_if_addrs()
					.map(|ifaces| {
						ifaces
							.into_iter()
							.filter(|iface| !iface.is_loopback())
							.filter_map(|iface| if let IpAddr::V4(iface) = iface.addr.ip() { Some(iface) } else { None })
							.collect::<std::collections::BTreeSet<Ipv4Addr>>()
					})
					.unwrap_or_default()
				{
					if socket.join_multicast_v4(&SSDP_V4_IP, &iface).is_ok() {
						did_join = true;
					}
				}
				if !did_join {
					// Fallback to default
					Self::join(&socket, &Ipv4Addr::UNSPECIFIED);
				}
			}
		}

		socket.bind(&socket2::SockAddr::from(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)))?;
		socket.set_nonblocking(true)?;

		Ok(Self(socket.into()))
	}

	fn join(socket: &socket2::Socket, iface: &Ipv4Addr) {
		if let Err(err) = socket.join_multicast_v4(&SSDP_V4_IP, iface) {
			log::warn!(target: "floodlight", "failed to join {SSDP_V4_IP} on {iface}: {err}");
		}
	}

	/// Must be called from within a tokio runtime context.
	pub fn into_async(self) -> Result<AsyncSsdpSocket, std::io::Error> {
		Ok(AsyncSsdpSocket(AsyncUdpSocket::from_std(self.0)?))
	}
}

pub(crate) struct AsyncSsdpSocket(AsyncUdpSocket);

impl AsyncSsdpSocket {
	pub async fn send_multicast(&self, packet: &[u8]) -> Result<(), std::io::Error> {
		self.0.send_to(packet, SocketAddr::V4(SSDP_V4_ADDR)).await.map(|_| ())
	}

	pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), std::io::Error> {
		self.0.recv_from(buf).await
	}
}
