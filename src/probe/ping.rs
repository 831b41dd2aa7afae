//! ICMP ping probe.
//!
//! Sends one echo request over a raw ICMP socket (falling back to an
//! unprivileged datagram socket) and treats any reply before the timeout as
//! success. Runs in spawn_blocking since the socket is blocking.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use super::{os_error_text, ProbeError};

/// Receive timeout never drops below this, whatever the target says.
pub const PING_TIMEOUT_FLOOR: Duration = Duration::from_secs(5);

/// Echo request with a precomputed checksum and an 8 byte payload.
const ECHO_REQUEST_V4: [u8; 16] = [
    0x08, 0x00, 0x7d, 0x4b, 0x00, 0x00, 0x00, 0x00, b'P', b'i', b'n', b'g', b'H', b'o', b's', b't',
];

/// ICMPv6 echo request; the kernel fills in the checksum.
const ECHO_REQUEST_V6: [u8; 16] = [
    0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, b'P', b'i', b'n', b'g', b'H', b'o', b's', b't',
];

/// Run a ping probe against the given host.
pub async fn run_ping_probe(host: &str, timeout: Duration) -> Result<(), ProbeError> {
    let timeout = effective_timeout(timeout);
    let ip = resolve_address(host).await?;

    tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout))
        .await
        .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?
}

fn effective_timeout(timeout: Duration) -> Duration {
    timeout.max(PING_TIMEOUT_FLOOR)
}

/// Resolve hostname to IP address, accepting bracketed IPv6 literals.
async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    let address = address.trim_matches(|c| c == '[' || c == ']');
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .collect();

    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

fn open_socket(ip: IpAddr) -> std::io::Result<Socket> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where ping_group_range allows it
    Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
}

fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<(), ProbeError> {
    let net_err = |e: std::io::Error| ProbeError::Network(os_error_text(&e));

    let socket = open_socket(ip).map_err(net_err)?;
    socket.set_read_timeout(Some(timeout)).map_err(net_err)?;
    socket.set_write_timeout(Some(timeout)).map_err(net_err)?;
    socket.connect(&SocketAddr::new(ip, 0).into()).map_err(net_err)?;

    let packet: &[u8] = match ip {
        IpAddr::V4(_) => &ECHO_REQUEST_V4,
        IpAddr::V6(_) => &ECHO_REQUEST_V6,
    };
    socket.send(packet).map_err(net_err)?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 255];
    match socket.recv(&mut buf) {
        Ok(len) if len > 0 => Ok(()),
        Ok(_) => Err(ProbeError::Network("empty reply".to_string())),
        Err(e) => Err(net_err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 1071 checksum.
    fn icmp_checksum(data: &[u8]) -> u16 {
        let mut sum: u32 = 0;
        for chunk in data.chunks(2) {
            let word = match chunk {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                [hi] => u16::from_be_bytes([*hi, 0]),
                _ => 0,
            };
            sum += word as u32;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !sum as u16
    }

    #[test]
    fn test_precomputed_checksum() {
        let mut packet = ECHO_REQUEST_V4;
        packet[2] = 0;
        packet[3] = 0;
        assert_eq!(icmp_checksum(&packet), 0x7d4b);
        // a packet carrying a valid checksum sums to zero
        assert_eq!(icmp_checksum(&ECHO_REQUEST_V4), 0);
    }

    #[test]
    fn test_echo_request_layout() {
        assert_eq!(ECHO_REQUEST_V4[0], 8);
        assert_eq!(ECHO_REQUEST_V4[1], 0);
        assert_eq!(ECHO_REQUEST_V6[0], 128);
        assert_eq!(&ECHO_REQUEST_V4[8..], b"PingHost");
    }

    #[test]
    fn test_timeout_floor() {
        assert_eq!(effective_timeout(Duration::from_secs(1)), PING_TIMEOUT_FLOOR);
        assert_eq!(effective_timeout(Duration::from_secs(0)), PING_TIMEOUT_FLOOR);
        assert_eq!(effective_timeout(Duration::from_secs(30)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_resolve_bracketed_ipv6() {
        let ip = resolve_address("[2001:db8::1]").await.unwrap();
        assert_eq!(ip, "2001:db8::1".parse::<IpAddr>().unwrap());
        let ip = resolve_address("10.0.0.1").await.unwrap();
        assert!(ip.is_ipv4());
    }
}
