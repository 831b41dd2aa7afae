//! Minimal BER codec for SNMP v1/v2c messages.
//!
//! Covers what a single GET needs: the message envelope, Get/GetResponse
//! PDUs, and the value types an agent may return.

use std::fmt;
use thiserror::Error;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

pub const PDU_GET_REQUEST: u8 = 0xA0;
pub const PDU_GET_RESPONSE: u8 = 0xA2;

#[derive(Error, Debug, PartialEq)]
pub enum BerError {
    #[error("truncated packet")]
    Truncated,
    #[error("unexpected tag 0x{found:02x}, expected 0x{expected:02x}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("unsupported length encoding")]
    BadLength,
    #[error("integer too large")]
    IntegerOverflow,
    #[error("invalid OID '{0}'")]
    InvalidOid(String),
    #[error("unsupported value type 0x{0:02x}")]
    UnsupportedType(u8),
}

/// A value carried in a variable binding.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(String),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// The v2c exception a value stands for, if any.
    pub fn exception(&self) -> Option<&'static str> {
        match self {
            SnmpValue::NoSuchObject => Some("No Such Object available on this agent at this OID"),
            SnmpValue::NoSuchInstance => Some("No Such Instance currently exists at this OID"),
            SnmpValue::EndOfMibView => {
                Some("No more variables left in this MIB View (It is past the end of the MIB tree)")
            }
            _ => None,
        }
    }

    /// Bare rendering with no type annotation.
    pub fn plain(&self) -> String {
        match self {
            SnmpValue::Integer(v) => v.to_string(),
            SnmpValue::OctetString(bytes) => render_octets(bytes),
            SnmpValue::Null => String::new(),
            SnmpValue::ObjectId(oid) => oid.clone(),
            SnmpValue::IpAddress(ip) => format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => v.to_string(),
            SnmpValue::Opaque(bytes) => hex(bytes),
            SnmpValue::Counter64(v) => v.to_string(),
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView => {
                self.exception().unwrap_or_default().to_string()
            }
        }
    }

    /// Rendering with the type prefix net-snmp tools print.
    pub fn library(&self) -> String {
        match self {
            SnmpValue::Integer(v) => format!("INTEGER: {}", v),
            SnmpValue::OctetString(bytes) if is_printable(bytes) => {
                format!("STRING: \"{}\"", String::from_utf8_lossy(bytes))
            }
            SnmpValue::OctetString(bytes) => format!("Hex-STRING: {}", hex(bytes)),
            SnmpValue::Null => "NULL".to_string(),
            SnmpValue::ObjectId(oid) => format!("OID: {}", oid),
            SnmpValue::IpAddress(_) => format!("IpAddress: {}", self.plain()),
            SnmpValue::Counter32(v) => format!("Counter32: {}", v),
            SnmpValue::Gauge32(v) => format!("Gauge32: {}", v),
            SnmpValue::TimeTicks(v) => format!("Timeticks: ({}) {}", v, ticks_clock(*v)),
            SnmpValue::Opaque(bytes) => format!("OPAQUE: {}", hex(bytes)),
            SnmpValue::Counter64(v) => format!("Counter64: {}", v),
            _ => self.plain(),
        }
    }
}

impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.plain())
    }
}

fn is_printable(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes)
        .map(|s| s.chars().all(|c| !c.is_control() || c == '\n' || c == '\r' || c == '\t'))
        .unwrap_or(false)
}

fn render_octets(bytes: &[u8]) -> String {
    if is_printable(bytes) {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        hex(bytes)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `d:h:mm:ss.cc` as printed next to raw TimeTicks.
fn ticks_clock(ticks: u32) -> String {
    let centis = ticks % 100;
    let secs = ticks / 100;
    format!(
        "{}:{}:{:02}:{:02}.{:02}",
        secs / 86_400,
        (secs / 3_600) % 24,
        (secs / 60) % 60,
        secs % 60,
        centis
    )
}

/// One GET/GetResponse message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// 0 for v1, 1 for v2c.
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub kind: u8,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(String, SnmpValue)>,
}

impl Message {
    /// A GetRequest for a single OID.
    pub fn get_request(version: i64, community: &str, request_id: i32, oid: &str) -> Self {
        Self {
            version,
            community: community.as_bytes().to_vec(),
            pdu: Pdu {
                kind: PDU_GET_REQUEST,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds: vec![(oid.to_string(), SnmpValue::Null)],
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BerError> {
        let mut varbinds = Vec::new();
        for (oid, value) in &self.pdu.varbinds {
            let mut vb = Vec::new();
            write_tlv(&mut vb, TAG_OID, &encode_oid(oid)?);
            encode_value(&mut vb, value)?;
            write_tlv(&mut varbinds, TAG_SEQUENCE, &vb);
        }

        let mut pdu = Vec::new();
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(self.pdu.request_id as i64));
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(self.pdu.error_status));
        write_tlv(&mut pdu, TAG_INTEGER, &encode_integer(self.pdu.error_index));
        write_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

        let mut body = Vec::new();
        write_tlv(&mut body, TAG_INTEGER, &encode_integer(self.version));
        write_tlv(&mut body, TAG_OCTET_STRING, &self.community);
        write_tlv(&mut body, self.pdu.kind, &pdu);

        let mut out = Vec::with_capacity(body.len() + 4);
        write_tlv(&mut out, TAG_SEQUENCE, &body);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self, BerError> {
        let mut outer = Reader::new(data);
        let mut msg = Reader::new(outer.expect_tag(TAG_SEQUENCE)?);

        let version = decode_integer(msg.expect_tag(TAG_INTEGER)?)?;
        let community = msg.expect_tag(TAG_OCTET_STRING)?.to_vec();
        let (kind, pdu_bytes) = msg.read_tlv()?;

        let mut pdu = Reader::new(pdu_bytes);
        let request_id = decode_integer(pdu.expect_tag(TAG_INTEGER)?)?;
        let error_status = decode_integer(pdu.expect_tag(TAG_INTEGER)?)?;
        let error_index = decode_integer(pdu.expect_tag(TAG_INTEGER)?)?;

        let mut list = Reader::new(pdu.expect_tag(TAG_SEQUENCE)?);
        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut vb = Reader::new(list.expect_tag(TAG_SEQUENCE)?);
            let oid = decode_oid(vb.expect_tag(TAG_OID)?)?;
            let (tag, content) = vb.read_tlv()?;
            varbinds.push((oid, decode_value(tag, content)?));
        }

        Ok(Self {
            version,
            community,
            pdu: Pdu {
                kind,
                request_id: i32::try_from(request_id).map_err(|_| BerError::IntegerOverflow)?,
                error_status,
                error_index,
                varbinds,
            },
        })
    }
}

/// Name of a PDU error-status value.
pub fn error_status_name(status: i64) -> &'static str {
    match status {
        0 => "noError",
        1 => "tooBig",
        2 => "noSuchName",
        3 => "badValue",
        4 => "readOnly",
        5 => "genErr",
        6 => "noAccess",
        7 => "wrongType",
        8 => "wrongLength",
        9 => "wrongEncoding",
        10 => "wrongValue",
        11 => "noCreation",
        12 => "inconsistentValue",
        13 => "resourceUnavailable",
        14 => "commitFailed",
        15 => "undoFailed",
        16 => "authorizationError",
        17 => "notWritable",
        18 => "inconsistentName",
        _ => "unknownError",
    }
}

// --- encoding ---

fn write_tlv(buf: &mut Vec<u8>, tag: u8, content: &[u8]) {
    buf.push(tag);
    let len = content.len();
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        let bytes = (len as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        buf.push(0x80 | (4 - skip) as u8);
        buf.extend_from_slice(&bytes[skip..]);
    }
    buf.extend_from_slice(content);
}

/// Minimal two's complement big-endian encoding.
fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn encode_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    let mut out = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[skip..]);
    out
}

pub fn encode_oid(oid: &str) -> Result<Vec<u8>, BerError> {
    let invalid = || BerError::InvalidOid(oid.to_string());
    let arcs = oid
        .trim_start_matches('.')
        .split('.')
        .map(|part| part.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;

    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(invalid());
    }

    let mut out = Vec::new();
    push_base128(&mut out, arcs[0] * 40 + arcs[1]);
    for arc in &arcs[2..] {
        push_base128(&mut out, *arc);
    }
    Ok(out)
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut chunk = [0u8; 10];
    let mut i = chunk.len();
    loop {
        i -= 1;
        chunk[i] = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = chunk.len() - 1;
    for (idx, byte) in chunk.iter().enumerate().skip(i) {
        out.push(if idx == last { *byte } else { byte | 0x80 });
    }
}

fn encode_value(buf: &mut Vec<u8>, value: &SnmpValue) -> Result<(), BerError> {
    match value {
        SnmpValue::Integer(v) => write_tlv(buf, TAG_INTEGER, &encode_integer(*v)),
        SnmpValue::OctetString(bytes) => write_tlv(buf, TAG_OCTET_STRING, bytes),
        SnmpValue::Null => write_tlv(buf, TAG_NULL, &[]),
        SnmpValue::ObjectId(oid) => write_tlv(buf, TAG_OID, &encode_oid(oid)?),
        SnmpValue::IpAddress(ip) => write_tlv(buf, TAG_IP_ADDRESS, ip),
        SnmpValue::Counter32(v) => write_tlv(buf, TAG_COUNTER32, &encode_unsigned(*v as u64)),
        SnmpValue::Gauge32(v) => write_tlv(buf, TAG_GAUGE32, &encode_unsigned(*v as u64)),
        SnmpValue::TimeTicks(v) => write_tlv(buf, TAG_TIMETICKS, &encode_unsigned(*v as u64)),
        SnmpValue::Opaque(bytes) => write_tlv(buf, TAG_OPAQUE, bytes),
        SnmpValue::Counter64(v) => write_tlv(buf, TAG_COUNTER64, &encode_unsigned(*v)),
        SnmpValue::NoSuchObject => write_tlv(buf, TAG_NO_SUCH_OBJECT, &[]),
        SnmpValue::NoSuchInstance => write_tlv(buf, TAG_NO_SUCH_INSTANCE, &[]),
        SnmpValue::EndOfMibView => write_tlv(buf, TAG_END_OF_MIB_VIEW, &[]),
    }
    Ok(())
}

// --- decoding ---

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn byte(&mut self) -> Result<u8, BerError> {
        let b = *self.data.get(self.pos).ok_or(BerError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let tag = self.byte()?;
        let first = self.byte()?;
        let len = if first & 0x80 == 0 {
            first as usize
        } else {
            let count = (first & 0x7F) as usize;
            if count == 0 || count > 4 {
                return Err(BerError::BadLength);
            }
            let mut len = 0usize;
            for _ in 0..count {
                len = (len << 8) | self.byte()? as usize;
            }
            len
        };
        let end = self.pos.checked_add(len).ok_or(BerError::Truncated)?;
        let content = self.data.get(self.pos..end).ok_or(BerError::Truncated)?;
        self.pos = end;
        Ok((tag, content))
    }

    fn expect_tag(&mut self, expected: u8) -> Result<&'a [u8], BerError> {
        let (found, content) = self.read_tlv()?;
        if found != expected {
            return Err(BerError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }
}

fn decode_integer(content: &[u8]) -> Result<i64, BerError> {
    if content.is_empty() {
        return Ok(0);
    }
    if content.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | *b as i64;
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> Result<u64, BerError> {
    let content = match content {
        [0, rest @ ..] => rest,
        other => other,
    };
    if content.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }
    Ok(content.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn decode_u32(content: &[u8]) -> Result<u32, BerError> {
    u32::try_from(decode_unsigned(content)?).map_err(|_| BerError::IntegerOverflow)
}

fn decode_oid(content: &[u8]) -> Result<String, BerError> {
    let mut arcs: Vec<u64> = Vec::new();
    let mut value: u64 = 0;
    for (i, b) in content.iter().enumerate() {
        value = value.checked_mul(128).ok_or(BerError::IntegerOverflow)? | (b & 0x7F) as u64;
        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        } else if i == content.len() - 1 {
            return Err(BerError::Truncated);
        }
    }
    if arcs.is_empty() {
        return Err(BerError::InvalidOid(String::new()));
    }
    Ok(arcs.iter().map(|a| format!(".{}", a)).collect())
}

fn decode_value(tag: u8, content: &[u8]) -> Result<SnmpValue, BerError> {
    Ok(match tag {
        TAG_INTEGER => SnmpValue::Integer(decode_integer(content)?),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OID => SnmpValue::ObjectId(decode_oid(content)?),
        TAG_IP_ADDRESS => {
            let ip: [u8; 4] = content.try_into().map_err(|_| BerError::Truncated)?;
            SnmpValue::IpAddress(ip)
        }
        TAG_COUNTER32 => SnmpValue::Counter32(decode_u32(content)?),
        TAG_GAUGE32 => SnmpValue::Gauge32(decode_u32(content)?),
        TAG_TIMETICKS => SnmpValue::TimeTicks(decode_u32(content)?),
        TAG_OPAQUE => SnmpValue::Opaque(content.to_vec()),
        TAG_COUNTER64 => SnmpValue::Counter64(decode_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => return Err(BerError::UnsupportedType(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_bytes() {
        // sysDescr.0 with community "public", v2c, request id 1
        let msg = Message::get_request(1, "public", 1, ".1.3.6.1.2.1.1.1.0");
        let bytes = msg.encode().unwrap();
        let expected: Vec<u8> = vec![
            0x30, 0x26, 0x02, 0x01, 0x01, 0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', 0xA0,
            0x19, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0E, 0x30, 0x0C,
            0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_decode_timeticks_response() {
        let mut msg = Message::get_request(0, "public", -42, ".1.3.6.1.2.1.1.3.0");
        msg.pdu.kind = PDU_GET_RESPONSE;
        msg.pdu.varbinds[0].1 = SnmpValue::TimeTicks(360_000);

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.pdu.request_id, -42);
        assert_eq!(decoded.pdu.varbinds[0].0, ".1.3.6.1.2.1.1.3.0");
        assert_eq!(decoded.pdu.varbinds[0].1, SnmpValue::TimeTicks(360_000));
    }

    #[test]
    fn test_integer_encoding_is_minimal() {
        assert_eq!(encode_integer(0), vec![0x00]);
        assert_eq!(encode_integer(127), vec![0x7F]);
        assert_eq!(encode_integer(128), vec![0x00, 0x80]);
        assert_eq!(encode_integer(-1), vec![0xFF]);
        assert_eq!(encode_integer(-129), vec![0xFF, 0x7F]);
        assert_eq!(decode_integer(&[0xFF, 0x7F]).unwrap(), -129);
        assert_eq!(encode_unsigned(0xFFFF_FFFF), vec![0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_oid_large_arcs() {
        let encoded = encode_oid(".1.3.6.1.4.1.2021.10.1.3.1").unwrap();
        assert_eq!(decode_oid(&encoded).unwrap(), ".1.3.6.1.4.1.2021.10.1.3.1");
        assert!(encode_oid("sysDescr").is_err());
        assert!(encode_oid(".1").is_err());
    }

    #[test]
    fn test_long_form_length() {
        let mut msg = Message::get_request(1, "public", 7, ".1.3.6.1.2.1.1.1.0");
        msg.pdu.kind = PDU_GET_RESPONSE;
        msg.pdu.varbinds[0].1 = SnmpValue::OctetString(vec![b'x'; 300]);
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes[1], 0x82);
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.pdu.varbinds[0].1, SnmpValue::OctetString(vec![b'x'; 300]));
    }

    #[test]
    fn test_truncated_packet() {
        let bytes = Message::get_request(1, "public", 1, ".1.3.6.1.2.1.1.5.0").encode().unwrap();
        assert_eq!(Message::decode(&bytes[..bytes.len() - 3]), Err(BerError::Truncated));
    }

    #[test]
    fn test_renderings() {
        assert_eq!(SnmpValue::TimeTicks(360_000).plain(), "360000");
        assert_eq!(SnmpValue::TimeTicks(360_000).library(), "Timeticks: (360000) 0:1:00:00.00");
        assert_eq!(
            SnmpValue::TimeTicks(9_000_001).library(),
            "Timeticks: (9000001) 1:1:00:00.01"
        );
        assert_eq!(SnmpValue::OctetString(b"core-sw1".to_vec()).library(), "STRING: \"core-sw1\"");
        assert_eq!(SnmpValue::OctetString(vec![0x00, 0x1B]).plain(), "00 1B");
        assert_eq!(SnmpValue::IpAddress([10, 0, 0, 1]).plain(), "10.0.0.1");
        assert!(SnmpValue::NoSuchInstance.exception().is_some());
        assert!(SnmpValue::Integer(72).exception().is_none());
    }
}
