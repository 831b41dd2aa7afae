//! One SNMP session: a UDP socket connected to an agent, used for GETs and
//! released on drop.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

use super::ber::{error_status_name, BerError, Message, SnmpValue, PDU_GET_RESPONSE};
use super::SnmpVersion;

const MAX_PACKET: usize = 65_535;

#[derive(Error, Debug)]
pub enum SnmpError {
    #[error("Unknown host ({0})")]
    UnknownHost(String),
    #[error("{0}")]
    Io(String),
    #[error("No response from host")]
    NoResponse,
    #[error("Error in packet at '{oid}': ({status})")]
    Packet { oid: String, status: &'static str },
    #[error("{0}")]
    Exception(&'static str),
    #[error("empty response")]
    EmptyResponse,
    #[error(transparent)]
    Encoding(#[from] BerError),
}

pub struct SnmpSession {
    socket: UdpSocket,
    peer: SocketAddr,
    version: SnmpVersion,
    community: String,
    timeout: Duration,
    retries: u32,
}

impl SnmpSession {
    pub async fn open(
        host: &str,
        port: u16,
        version: SnmpVersion,
        community: &str,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, SnmpError> {
        let host = host.trim_matches(|c| c == '[' || c == ']');
        let peer = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| SnmpError::UnknownHost(host.to_string()))?
            .next()
            .ok_or_else(|| SnmpError::UnknownHost(host.to_string()))?;

        let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| SnmpError::Io(crate::probe::os_error_text(&e)))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| SnmpError::Io(crate::probe::os_error_text(&e)))?;

        debug!("opened SNMP session to {} ({})", peer, version);
        Ok(Self {
            socket,
            peer,
            version,
            community: community.to_string(),
            timeout,
            retries,
        })
    }

    /// Fetch a single numeric OID. The request is sent `retries + 1` times at
    /// most, each send waiting up to the session timeout for a matching reply.
    pub async fn get(&self, oid: &str) -> Result<SnmpValue, SnmpError> {
        let request_id = rand::random::<i32>() & 0x7FFF_FFFF;
        let request =
            Message::get_request(self.version.wire_value(), &self.community, request_id, oid)
                .encode()?;

        let mut buf = vec![0u8; MAX_PACKET];
        for attempt in 0..=self.retries {
            if let Err(e) = self.socket.send(&request).await {
                debug!("SNMP send to {} failed: {}", self.peer, e);
                continue;
            }

            let deadline = Instant::now() + self.timeout;
            loop {
                let len = match tokio::time::timeout_at(deadline, self.socket.recv(&mut buf)).await {
                    Err(_) => break,
                    Ok(Err(e)) => {
                        // ICMP port unreachable surfaces here on a connected socket
                        debug!("SNMP recv from {} failed: {}", self.peer, e);
                        break;
                    }
                    Ok(Ok(len)) => len,
                };

                let response = match Message::decode(&buf[..len]) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("discarding undecodable SNMP packet from {}: {}", self.peer, e);
                        continue;
                    }
                };
                if response.pdu.kind != PDU_GET_RESPONSE || response.pdu.request_id != request_id {
                    continue;
                }
                return interpret(response, oid);
            }
            debug!("SNMP attempt {} to {} got no reply", attempt + 1, self.peer);
        }

        Err(SnmpError::NoResponse)
    }
}

impl Drop for SnmpSession {
    fn drop(&mut self) {
        debug!("closing SNMP session to {}", self.peer);
    }
}

fn interpret(response: Message, requested: &str) -> Result<SnmpValue, SnmpError> {
    let pdu = response.pdu;
    if pdu.error_status != 0 {
        let oid = pdu
            .error_index
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| pdu.varbinds.get(i))
            .map(|(oid, _)| oid.clone())
            .unwrap_or_else(|| requested.to_string());
        return Err(SnmpError::Packet {
            oid,
            status: error_status_name(pdu.error_status),
        });
    }

    let (_, value) = pdu.varbinds.into_iter().next().ok_or(SnmpError::EmptyResponse)?;
    match value.exception() {
        Some(text) => Err(SnmpError::Exception(text)),
        None => Ok(value),
    }
}
