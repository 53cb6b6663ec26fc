use log::{info, trace, warn};

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};

/// Rover clients listen for corrections on this port.
pub const RTCM_PORT: u16 = 10_777;

/// Fans RTCM3 frames out to every local broadcast domain, one frame per
/// datagram. Sends are fire-and-forget: a dead interface must never hold
/// up the correction stream.
pub struct Broadcaster {
    socket: UdpSocket,
    destinations: Vec<SocketAddr>,
}

impl Broadcaster {
    /// Opens the broadcast socket targeting the given destinations.
    pub fn new(destinations: Vec<SocketAddr>) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            destinations,
        })
    }

    /// Enumerates the IPv4 broadcast address of every interface that has
    /// one and targets those.
    pub fn discover() -> io::Result<Self> {
        let interfaces = NetworkInterface::show()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let mut destinations = Vec::new();

        for interface in interfaces {
            for addr in &interface.addr {
                if let Addr::V4(v4) = addr {
                    if let Some(broadcast) = v4.broadcast {
                        info!(
                            "broadcasting corrections to {}:{} ({})",
                            broadcast, RTCM_PORT, interface.name
                        );
                        destinations.push(SocketAddr::new(IpAddr::V4(broadcast), RTCM_PORT));
                    }
                }
            }
        }

        if destinations.is_empty() {
            warn!("no broadcast capable interface found, corrections will go nowhere");
        }

        Self::new(destinations)
    }

    pub fn destinations(&self) -> &[SocketAddr] {
        &self.destinations
    }

    /// Sends one whole frame to every destination, swallowing
    /// per-destination errors.
    pub fn send(&self, frame: &[u8]) {
        for destination in &self.destinations {
            if let Err(e) = self.socket.send_to(frame, destination) {
                trace!("dropped datagram for {}: {}", destination, e);
            }
        }
    }
}
