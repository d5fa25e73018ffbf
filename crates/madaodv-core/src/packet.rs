//! Control message codec
//!
//! Every control message starts with a one-byte [`MessageType`] followed by
//! a fixed-layout header. All multi-byte fields are big-endian.
//!
//! ## Layouts
//!
//! - RREQ (47 bytes): `flags | reserved | hops | id:u32 | dst:16 | dst_seq:u32 | origin:16 | origin_seq:u32`
//! - RREP (43 bytes): `flags | reserved | hops | dst:16 | dst_seq:u32 | origin:16 | lifetime_ms:u32`
//! - RREP-ACK (1 byte): `reserved`
//! - RERR (3 + 20n bytes): `flags | reserved | count | (addr:16 | seq:u32) * n`

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::{PacketError, PacketResult};

const RREQ_GRATUITOUS: u8 = 1 << 5;
const RREQ_DESTINATION_ONLY: u8 = 1 << 4;
const RREQ_UNKNOWN_SEQNO: u8 = 1 << 3;
const RREQ_GATEWAY_QUERY: u8 = 1 << 2;

const RREP_ACK_REQUIRED: u8 = 1 << 6;
const RREP_GATEWAY: u8 = 1 << 7;

const RERR_NO_DELETE: u8 = 1 << 0;

const RREQ_KNOWN_FLAGS: u8 =
    RREQ_GRATUITOUS | RREQ_DESTINATION_ONLY | RREQ_UNKNOWN_SEQNO | RREQ_GATEWAY_QUERY;
const RREP_KNOWN_FLAGS: u8 = RREP_ACK_REQUIRED | RREP_GATEWAY;

/// Largest number of unreachable destinations a single RERR can carry
pub const RERR_MAX_DESTINATIONS: usize = 255;

/// Control message kinds
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    #[display("RREQ")]
    RouteRequest = 1,
    #[display("RREP")]
    RouteReply = 2,
    #[display("RERR")]
    RouteError = 3,
    #[display("RREP_ACK")]
    RouteReplyAck = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::RouteRequest),
            2 => Ok(Self::RouteReply),
            3 => Ok(Self::RouteError),
            4 => Ok(Self::RouteReplyAck),
            other => Err(PacketError::UnknownMessageType(other)),
        }
    }
}

/// The leading type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeHeader {
    raw: u8,
}

impl TypeHeader {
    pub const SIZE: usize = 1;

    pub fn new(message_type: MessageType) -> Self {
        Self {
            raw: message_type as u8,
        }
    }

    /// Read the type byte. Unknown values still decode but report invalid.
    pub fn read(buf: &mut impl Buf) -> PacketResult<Self> {
        ensure(buf, "type", Self::SIZE)?;
        Ok(Self { raw: buf.get_u8() })
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.raw);
    }

    pub fn is_valid(&self) -> bool {
        MessageType::try_from(self.raw).is_ok()
    }

    pub fn message_type(&self) -> PacketResult<MessageType> {
        MessageType::try_from(self.raw)
    }
}

fn ensure(buf: &impl Buf, kind: &'static str, needed: usize) -> PacketResult<()> {
    if buf.remaining() < needed {
        return Err(PacketError::Truncated {
            kind,
            needed,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn get_addr(buf: &mut impl Buf) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    buf.copy_to_slice(&mut octets);
    Ipv6Addr::from(octets)
}

fn put_addr(buf: &mut impl BufMut, addr: Ipv6Addr) {
    buf.put_slice(&addr.octets());
}

/// Route request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RreqHeader {
    /// Ask the intermediate node to also notify the destination
    pub gratuitous_reply: bool,
    /// Only the destination itself may answer
    pub destination_only: bool,
    /// The originator has no sequence number for the destination
    pub unknown_seqno: bool,
    /// The originator is looking for a gateway
    pub gateway_query: bool,
    /// Undefined flag bits, carried through unchanged
    pub other_flags: u8,
    pub reserved: u8,
    pub hop_count: u8,
    pub request_id: u32,
    pub destination: Ipv6Addr,
    pub destination_seqno: u32,
    pub origin: Ipv6Addr,
    pub origin_seqno: u32,
}

impl Default for RreqHeader {
    fn default() -> Self {
        Self {
            gratuitous_reply: false,
            destination_only: false,
            unknown_seqno: false,
            gateway_query: false,
            other_flags: 0,
            reserved: 0,
            hop_count: 0,
            request_id: 0,
            destination: Ipv6Addr::UNSPECIFIED,
            destination_seqno: 0,
            origin: Ipv6Addr::UNSPECIFIED,
            origin_seqno: 0,
        }
    }
}

impl RreqHeader {
    pub const SIZE: usize = 47;

    fn flags(&self) -> u8 {
        let mut flags = self.other_flags & !RREQ_KNOWN_FLAGS;
        if self.gratuitous_reply {
            flags |= RREQ_GRATUITOUS;
        }
        if self.destination_only {
            flags |= RREQ_DESTINATION_ONLY;
        }
        if self.unknown_seqno {
            flags |= RREQ_UNKNOWN_SEQNO;
        }
        if self.gateway_query {
            flags |= RREQ_GATEWAY_QUERY;
        }
        flags
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.reserved);
        buf.put_u8(self.hop_count);
        buf.put_u32(self.request_id);
        put_addr(buf, self.destination);
        buf.put_u32(self.destination_seqno);
        put_addr(buf, self.origin);
        buf.put_u32(self.origin_seqno);
    }

    pub fn read(buf: &mut impl Buf) -> PacketResult<Self> {
        ensure(buf, "RREQ", Self::SIZE)?;
        let flags = buf.get_u8();
        Ok(Self {
            gratuitous_reply: flags & RREQ_GRATUITOUS != 0,
            destination_only: flags & RREQ_DESTINATION_ONLY != 0,
            unknown_seqno: flags & RREQ_UNKNOWN_SEQNO != 0,
            gateway_query: flags & RREQ_GATEWAY_QUERY != 0,
            other_flags: flags & !RREQ_KNOWN_FLAGS,
            reserved: buf.get_u8(),
            hop_count: buf.get_u8(),
            request_id: buf.get_u32(),
            destination: get_addr(buf),
            destination_seqno: buf.get_u32(),
            origin: get_addr(buf),
            origin_seqno: buf.get_u32(),
        })
    }
}

/// Route reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrepHeader {
    /// The receiver must answer with an RREP-ACK
    pub ack_required: bool,
    /// The destination is, or routes to, a gateway
    pub gateway: bool,
    /// Undefined flag bits, carried through unchanged
    pub other_flags: u8,
    pub reserved: u8,
    pub hop_count: u8,
    pub destination: Ipv6Addr,
    pub destination_seqno: u32,
    pub origin: Ipv6Addr,
    /// Carried with millisecond granularity
    pub lifetime: Duration,
}

impl Default for RrepHeader {
    fn default() -> Self {
        Self {
            ack_required: false,
            gateway: false,
            other_flags: 0,
            reserved: 0,
            hop_count: 0,
            destination: Ipv6Addr::UNSPECIFIED,
            destination_seqno: 0,
            origin: Ipv6Addr::UNSPECIFIED,
            lifetime: Duration::ZERO,
        }
    }
}

impl RrepHeader {
    pub const SIZE: usize = 43;

    /// A hello: a self-addressed reply advertising liveness
    pub fn hello(source: Ipv6Addr, seqno: u32, lifetime: Duration) -> Self {
        Self {
            destination: source,
            destination_seqno: seqno,
            origin: source,
            lifetime,
            ..Default::default()
        }
    }

    pub fn is_hello(&self) -> bool {
        self.destination == self.origin
    }

    fn flags(&self) -> u8 {
        let mut flags = self.other_flags & !RREP_KNOWN_FLAGS;
        if self.ack_required {
            flags |= RREP_ACK_REQUIRED;
        }
        if self.gateway {
            flags |= RREP_GATEWAY;
        }
        flags
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.reserved);
        buf.put_u8(self.hop_count);
        put_addr(buf, self.destination);
        buf.put_u32(self.destination_seqno);
        put_addr(buf, self.origin);
        let millis = u32::try_from(self.lifetime.as_millis()).unwrap_or(u32::MAX);
        buf.put_u32(millis);
    }

    pub fn read(buf: &mut impl Buf) -> PacketResult<Self> {
        ensure(buf, "RREP", Self::SIZE)?;
        let flags = buf.get_u8();
        Ok(Self {
            ack_required: flags & RREP_ACK_REQUIRED != 0,
            gateway: flags & RREP_GATEWAY != 0,
            other_flags: flags & !RREP_KNOWN_FLAGS,
            reserved: buf.get_u8(),
            hop_count: buf.get_u8(),
            destination: get_addr(buf),
            destination_seqno: buf.get_u32(),
            origin: get_addr(buf),
            lifetime: Duration::from_millis(u64::from(buf.get_u32())),
        })
    }
}

/// Route reply acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RrepAckHeader {
    pub reserved: u8,
}

impl RrepAckHeader {
    pub const SIZE: usize = 1;

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.reserved);
    }

    pub fn read(buf: &mut impl Buf) -> PacketResult<Self> {
        ensure(buf, "RREP_ACK", Self::SIZE)?;
        Ok(Self {
            reserved: buf.get_u8(),
        })
    }
}

/// Route error
///
/// Unreachable destinations are kept ordered by address and never repeat.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RerrHeader {
    pub no_delete: bool,
    /// Undefined flag bits, carried through unchanged
    pub other_flags: u8,
    pub reserved: u8,
    unreachable: BTreeMap<Ipv6Addr, u32>,
}

impl RerrHeader {
    pub const BASE_SIZE: usize = 3;
    pub const ENTRY_SIZE: usize = 20;

    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unreachable destination
    ///
    /// Fails when the message is full or already names `dst`.
    pub fn add_unreachable(&mut self, dst: Ipv6Addr, seqno: u32) -> PacketResult<()> {
        if self.unreachable.contains_key(&dst) {
            return Err(PacketError::DuplicateRerrDestination(dst));
        }
        if self.unreachable.len() >= RERR_MAX_DESTINATIONS {
            return Err(PacketError::RerrFull);
        }
        self.unreachable.insert(dst, seqno);
        Ok(())
    }

    /// Remove and return the lowest-addressed destination
    pub fn remove_unreachable(&mut self) -> Option<(Ipv6Addr, u32)> {
        self.unreachable.pop_first()
    }

    pub fn unreachable(&self) -> impl Iterator<Item = (Ipv6Addr, u32)> + '_ {
        self.unreachable.iter().map(|(addr, seq)| (*addr, *seq))
    }

    pub fn dest_count(&self) -> usize {
        self.unreachable.len()
    }

    pub fn is_full(&self) -> bool {
        self.unreachable.len() >= RERR_MAX_DESTINATIONS
    }

    pub fn clear(&mut self) {
        self.unreachable.clear();
        self.no_delete = false;
        self.other_flags = 0;
        self.reserved = 0;
    }

    pub fn serialized_size(&self) -> usize {
        Self::BASE_SIZE + Self::ENTRY_SIZE * self.unreachable.len()
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        let mut flags = self.other_flags & !RERR_NO_DELETE;
        if self.no_delete {
            flags |= RERR_NO_DELETE;
        }
        buf.put_u8(flags);
        buf.put_u8(self.reserved);
        // bounded by RERR_MAX_DESTINATIONS
        buf.put_u8(self.unreachable.len() as u8);
        for (addr, seqno) in &self.unreachable {
            put_addr(buf, *addr);
            buf.put_u32(*seqno);
        }
    }

    pub fn read(buf: &mut impl Buf) -> PacketResult<Self> {
        ensure(buf, "RERR", Self::BASE_SIZE)?;
        let flags = buf.get_u8();
        let reserved = buf.get_u8();
        let count = buf.get_u8() as usize;
        ensure(buf, "RERR", count * Self::ENTRY_SIZE)?;

        let mut header = Self {
            no_delete: flags & RERR_NO_DELETE != 0,
            other_flags: flags & !RERR_NO_DELETE,
            reserved,
            unreachable: BTreeMap::new(),
        };
        for _ in 0..count {
            let addr = get_addr(buf);
            let seqno = buf.get_u32();
            if header.unreachable.insert(addr, seqno).is_some() {
                return Err(PacketError::DuplicateRerrDestination(addr));
            }
        }
        Ok(header)
    }
}

/// A complete control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Request(RreqHeader),
    Reply(RrepHeader),
    Error(RerrHeader),
    ReplyAck(RrepAckHeader),
}

impl ControlMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Request(_) => MessageType::RouteRequest,
            Self::Reply(_) => MessageType::RouteReply,
            Self::Error(_) => MessageType::RouteError,
            Self::ReplyAck(_) => MessageType::RouteReplyAck,
        }
    }

    pub fn serialized_size(&self) -> usize {
        TypeHeader::SIZE
            + match self {
                Self::Request(_) => RreqHeader::SIZE,
                Self::Reply(_) => RrepHeader::SIZE,
                Self::Error(rerr) => rerr.serialized_size(),
                Self::ReplyAck(_) => RrepAckHeader::SIZE,
            }
    }

    /// Serialize with the leading type byte
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_size());
        TypeHeader::new(self.message_type()).write(&mut buf);
        match self {
            Self::Request(rreq) => rreq.write(&mut buf),
            Self::Reply(rrep) => rrep.write(&mut buf),
            Self::Error(rerr) => rerr.write(&mut buf),
            Self::ReplyAck(ack) => ack.write(&mut buf),
        }
        buf.freeze()
    }

    /// Parse a message, rejecting unknown types and truncated headers
    pub fn decode(mut buf: impl Buf) -> PacketResult<Self> {
        let type_header = TypeHeader::read(&mut buf)?;
        match type_header.message_type()? {
            MessageType::RouteRequest => RreqHeader::read(&mut buf).map(Self::Request),
            MessageType::RouteReply => RrepHeader::read(&mut buf).map(Self::Reply),
            MessageType::RouteError => RerrHeader::read(&mut buf).map(Self::Error),
            MessageType::RouteReplyAck => RrepAckHeader::read(&mut buf).map(Self::ReplyAck),
        }
    }
}

impl From<RreqHeader> for ControlMessage {
    fn from(h: RreqHeader) -> Self {
        Self::Request(h)
    }
}

impl From<RrepHeader> for ControlMessage {
    fn from(h: RrepHeader) -> Self {
        Self::Reply(h)
    }
}

impl From<RerrHeader> for ControlMessage {
    fn from(h: RerrHeader) -> Self {
        Self::Error(h)
    }
}

impl From<RrepAckHeader> for ControlMessage {
    fn from(h: RrepAckHeader) -> Self {
        Self::ReplyAck(h)
    }
}
