//! Wall-clock and host helpers shared by services and clients.

use chrono::Utc;
use std::{
    net::{IpAddr, Ipv4Addr, UdpSocket},
    sync::OnceLock,
};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// The address this host uses for outbound traffic, falling back to loopback.
///
/// Resolved once per process. Connecting a UDP socket sends no packets; it
/// only asks the OS which local interface would be used.
pub fn local_ip() -> IpAddr {
    static LOCAL_IP: OnceLock<IpAddr> = OnceLock::new();

    *LOCAL_IP.get_or_init(|| {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .and_then(|socket| {
                socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
                socket.local_addr()
            })
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    })
}
