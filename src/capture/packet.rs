use crate::rules::rule::Protocol;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;

/// Packet state flags set by the decoder and reassembly stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PacketFlags(u32);

impl PacketFlags {
    /// Reassembled from IP fragments
    pub const REBUILT_FRAG: u32 = 0x0000_0001;
    /// Reassembled TCP stream segment
    pub const REBUILT_STREAM: u32 = 0x0000_0002;
    /// Reassembled DCE/RPC PDU
    pub const DCE_RPKT: u32 = 0x0000_0004;
    /// A normalized copy of the payload is available
    pub const ALT_DECODE: u32 = 0x0000_0008;
    /// Second evaluation pass for IP-protocol rules
    pub const IP_RULE_2ND: u32 = 0x0000_0010;

    /// Flags that distinguish a reconstructed view of the same capture
    pub const REBUILD_MASK: u32 = Self::REBUILT_FRAG | Self::REBUILT_STREAM | Self::DCE_RPKT;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn remove(&mut self, flag: u32) {
        self.0 &= !flag;
    }

    pub fn rebuild_bits(&self) -> u32 {
        self.0 & Self::REBUILD_MASK
    }
}

/// Identity of one logical packet view.
///
/// Two evaluations see the same packet iff every element matches; this is
/// what node memoization is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub ts_secs: i64,
    pub ts_micros: u32,
    pub packet_number: u64,
    pub pipeline_number: u32,
    pub rebuild_flags: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpFlags {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            fin: (byte & 0x01) != 0,
            syn: (byte & 0x02) != 0,
            rst: (byte & 0x04) != 0,
            psh: (byte & 0x08) != 0,
            ack: (byte & 0x10) != 0,
            urg: (byte & 0x20) != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut byte = 0u8;
        if self.fin { byte |= 0x01; }
        if self.syn { byte |= 0x02; }
        if self.rst { byte |= 0x04; }
        if self.psh { byte |= 0x08; }
        if self.ack { byte |= 0x10; }
        if self.urg { byte |= 0x20; }
        byte
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IpFields {
    pub ttl: u8,
    pub tos: u8,
    pub id: u16,
    pub proto: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFields {
    pub flags: TcpFlags,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpFields {
    pub icmp_type: u8,
    pub code: u8,
    pub id: u16,
    pub seq: u16,
}

/// Session state attached by the stream tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowState {
    pub established: bool,
    /// Packet travels from the session initiator
    pub from_client: bool,
}

/// Decoded packet as handed to detection.
///
/// Capture and decoding happen upstream; detection only reads these fields.
#[derive(Debug, Clone)]
pub struct Packet {
    pub timestamp: DateTime<Utc>,
    /// Global capture sequence number
    pub packet_number: u64,
    /// Logical message index within one captured packet (e.g. HTTP pipelining)
    pub pipeline_number: u32,
    pub flags: PacketFlags,
    pub payload: Arc<[u8]>,
    /// Normalized payload, used when `ALT_DECODE` is set
    pub alt_payload: Option<Arc<[u8]>>,
    /// Normalized request URI, when an HTTP inspector extracted one
    pub uri: Option<Arc<[u8]>>,
    pub protocol: Protocol,
    pub src_addr: Option<IpAddr>,
    pub dst_addr: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub ip: Option<IpFields>,
    pub tcp: Option<TcpFields>,
    pub icmp: Option<IcmpFields>,
    pub flow: Option<FlowState>,
    /// Identified application protocol ordinal, 0 when unknown
    pub app_protocol: u16,
}

impl Packet {
    pub fn new(timestamp: DateTime<Utc>, packet_number: u64, payload: Vec<u8>) -> Self {
        Self {
            timestamp,
            packet_number,
            pipeline_number: 0,
            flags: PacketFlags::empty(),
            payload: payload.into(),
            alt_payload: None,
            uri: None,
            protocol: Protocol::Ip,
            src_addr: None,
            dst_addr: None,
            src_port: None,
            dst_port: None,
            ip: None,
            tcp: None,
            icmp: None,
            flow: None,
            app_protocol: 0,
        }
    }

    /// TCP packet with the given ports and an established client-to-server flow
    pub fn tcp(
        timestamp: DateTime<Utc>,
        packet_number: u64,
        src_port: u16,
        dst_port: u16,
        payload: Vec<u8>,
    ) -> Self {
        let mut packet = Self::new(timestamp, packet_number, payload);
        packet.protocol = Protocol::Tcp;
        packet.src_port = Some(src_port);
        packet.dst_port = Some(dst_port);
        packet.ip = Some(IpFields {
            ttl: 64,
            proto: 6,
            ..Default::default()
        });
        packet.tcp = Some(TcpFields {
            flags: TcpFlags::from_byte(0x18),
            ..Default::default()
        });
        packet.flow = Some(FlowState {
            established: true,
            from_client: true,
        });
        packet
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            ts_secs: self.timestamp.timestamp(),
            ts_micros: self.timestamp.timestamp_subsec_micros(),
            packet_number: self.packet_number,
            pipeline_number: self.pipeline_number,
            rebuild_flags: self.flags.rebuild_bits(),
        }
    }

    /// Buffer searched by content-style options.
    ///
    /// The normalized copy wins unless the option asks for raw bytes.
    pub fn detection_payload(&self, rawbytes: bool) -> &[u8] {
        if !rawbytes && self.flags.contains(PacketFlags::ALT_DECODE) {
            if let Some(ref alt) = self.alt_payload {
                return alt;
            }
        }
        &self.payload
    }

    pub fn uri_buffer(&self) -> &[u8] {
        self.uri.as_deref().unwrap_or(&[])
    }

    pub fn dsize(&self) -> usize {
        self.payload.len()
    }
}
