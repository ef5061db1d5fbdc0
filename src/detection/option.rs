/// Closed set of rule option kinds and their behavior table
use super::hash::WordHasher;
use super::options::fields::{ftp_bounce, same_ip};
use super::options::{
    ByteJumpOption, ByteTestOption, ContentBuffer, ContentOption, ContentSearch, FieldCheck,
    FlowBitStore, FlowBitsOption, FlowOption, IsDataAtOption, PacketField, PcreOption, PcreSearch,
    TcpFlagsOption,
};
use crate::capture::Packet;
use std::fmt;

/// Tag selecting the hash, compare and evaluate behavior of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionKind {
    /// Top of a rule group; matches unconditionally
    Root,
    /// End of a rule chain
    Leaf,
    Content,
    UriContent,
    Pcre,
    ByteTest,
    ByteJump,
    IsDataAt,
    Dsize,
    Flow,
    FlowBits,
    TcpFlags,
    TcpSeq,
    TcpAck,
    TcpWindow,
    Ttl,
    Tos,
    IpId,
    IpProto,
    SameIp,
    IcmpType,
    IcmpCode,
    IcmpId,
    IcmpSeq,
    FtpBounce,
}

impl OptionKind {
    pub fn name(self) -> &'static str {
        match self {
            OptionKind::Root => "root",
            OptionKind::Leaf => "leaf",
            OptionKind::Content => "content",
            OptionKind::UriContent => "uricontent",
            OptionKind::Pcre => "pcre",
            OptionKind::ByteTest => "byte_test",
            OptionKind::ByteJump => "byte_jump",
            OptionKind::IsDataAt => "isdataat",
            OptionKind::Dsize => "dsize",
            OptionKind::Flow => "flow",
            OptionKind::FlowBits => "flowbits",
            OptionKind::TcpFlags => "flags",
            OptionKind::TcpSeq => "seq",
            OptionKind::TcpAck => "ack",
            OptionKind::TcpWindow => "window",
            OptionKind::Ttl => "ttl",
            OptionKind::Tos => "tos",
            OptionKind::IpId => "id",
            OptionKind::IpProto => "ip_proto",
            OptionKind::SameIp => "sameip",
            OptionKind::IcmpType => "itype",
            OptionKind::IcmpCode => "icode",
            OptionKind::IcmpId => "icmp_id",
            OptionKind::IcmpSeq => "icmp_seq",
            OptionKind::FtpBounce => "ftpbounce",
        }
    }

    /// Kinds with no comparable configuration never share an instance
    pub fn dedups(self) -> bool {
        !matches!(self, OptionKind::Root | OptionKind::Leaf | OptionKind::FtpBounce)
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of evaluating one option against a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStatus {
    NoMatch,
    Match,
    /// Match, but nothing below may raise an alert
    NoAlert,
    /// A flowbit precondition failed; the result must not be reused
    FailedFlowbit,
}

/// Configuration of one rule option
#[derive(Debug, Clone)]
pub enum OptionData {
    Content(ContentOption),
    Pcre(PcreOption),
    ByteTest(ByteTestOption),
    ByteJump(ByteJumpOption),
    IsDataAt(IsDataAtOption),
    Field(FieldCheck),
    TcpFlags(TcpFlagsOption),
    Flow(FlowOption),
    FlowBits(FlowBitsOption),
    SameIp,
    FtpBounce,
}

impl OptionData {
    pub fn kind(&self) -> OptionKind {
        match self {
            OptionData::Content(c) if c.modifiers().buffer == ContentBuffer::Uri => OptionKind::UriContent,
            OptionData::Content(_) => OptionKind::Content,
            OptionData::Pcre(_) => OptionKind::Pcre,
            OptionData::ByteTest(_) => OptionKind::ByteTest,
            OptionData::ByteJump(_) => OptionKind::ByteJump,
            OptionData::IsDataAt(_) => OptionKind::IsDataAt,
            OptionData::Field(check) => match check.field {
                PacketField::Dsize => OptionKind::Dsize,
                PacketField::Ttl => OptionKind::Ttl,
                PacketField::Tos => OptionKind::Tos,
                PacketField::IpId => OptionKind::IpId,
                PacketField::IpProto => OptionKind::IpProto,
                PacketField::TcpSeq => OptionKind::TcpSeq,
                PacketField::TcpAck => OptionKind::TcpAck,
                PacketField::TcpWindow => OptionKind::TcpWindow,
                PacketField::IcmpType => OptionKind::IcmpType,
                PacketField::IcmpCode => OptionKind::IcmpCode,
                PacketField::IcmpId => OptionKind::IcmpId,
                PacketField::IcmpSeq => OptionKind::IcmpSeq,
            },
            OptionData::TcpFlags(_) => OptionKind::TcpFlags,
            OptionData::Flow(_) => OptionKind::Flow,
            OptionData::FlowBits(_) => OptionKind::FlowBits,
            OptionData::SameIp => OptionKind::SameIp,
            OptionData::FtpBounce => OptionKind::FtpBounce,
        }
    }

    /// Whether evaluation starts from the cursor left by the parent
    pub fn is_relative(&self) -> bool {
        match self {
            OptionData::Content(c) => c.is_relative(),
            OptionData::Pcre(p) => p.is_relative(),
            OptionData::ByteTest(b) => b.extract.relative,
            OptionData::ByteJump(b) => b.extract.relative,
            OptionData::IsDataAt(i) => i.relative,
            OptionData::FtpBounce => true,
            _ => false,
        }
    }

    /// Kind-specific hash over the option's configuration
    pub fn option_hash(&self) -> u32 {
        let seed = self.kind() as u32;
        match self {
            OptionData::Content(c) => c.hash(seed),
            OptionData::Pcre(p) => p.hash(seed),
            OptionData::ByteTest(b) => b.hash(seed),
            OptionData::ByteJump(b) => b.hash(seed),
            OptionData::IsDataAt(i) => i.hash(seed),
            OptionData::Field(f) => f.hash(seed),
            OptionData::TcpFlags(t) => t.hash(seed),
            OptionData::Flow(f) => f.hash(seed),
            OptionData::FlowBits(f) => f.hash(seed),
            OptionData::SameIp => WordHasher::new(seed).finish(),
            OptionData::FtpBounce => 0,
        }
    }

    /// Kind-specific deep equality
    pub fn option_eq(&self, other: &OptionData) -> bool {
        if self.kind() != other.kind() || !self.kind().dedups() {
            return false;
        }
        match (self, other) {
            (OptionData::Content(a), OptionData::Content(b)) => a == b,
            (OptionData::Pcre(a), OptionData::Pcre(b)) => a == b,
            (OptionData::ByteTest(a), OptionData::ByteTest(b)) => a == b,
            (OptionData::ByteJump(a), OptionData::ByteJump(b)) => a == b,
            (OptionData::IsDataAt(a), OptionData::IsDataAt(b)) => a == b,
            (OptionData::Field(a), OptionData::Field(b)) => a == b,
            (OptionData::TcpFlags(a), OptionData::TcpFlags(b)) => a == b,
            (OptionData::Flow(a), OptionData::Flow(b)) => a == b,
            (OptionData::FlowBits(a), OptionData::FlowBits(b)) => a == b,
            (OptionData::SameIp, OptionData::SameIp) => true,
            _ => false,
        }
    }

    /// Working copy for one evaluation pass over this option
    pub fn scratch(&self) -> OptionScratch<'_> {
        match self {
            OptionData::Content(c) => OptionScratch::Content(ContentSearch::new(c)),
            OptionData::Pcre(p) => OptionScratch::Pcre(PcreSearch::new(p)),
            other => OptionScratch::Plain(other),
        }
    }
}

/// Per-evaluation state of an option.
///
/// Content and pcre keep their search position here so the shared
/// canonical instance is never written to.
#[derive(Debug)]
pub enum OptionScratch<'a> {
    Content(ContentSearch<'a>),
    Pcre(PcreSearch<'a>),
    Plain(&'a OptionData),
}

impl OptionScratch<'_> {
    pub fn evaluate(
        &mut self,
        packet: &Packet,
        cursor: &mut usize,
        flowbits: &mut FlowBitStore,
    ) -> EvalStatus {
        match self {
            OptionScratch::Content(search) => {
                let buf = match search.buffer() {
                    ContentBuffer::Uri => packet.uri_buffer(),
                    ContentBuffer::Payload => packet.detection_payload(search.rawbytes()),
                };
                search.evaluate(buf, cursor)
            }
            OptionScratch::Pcre(search) => {
                let buf = if search.uses_uri() {
                    packet.uri_buffer()
                } else {
                    packet.detection_payload(false)
                };
                search.evaluate(buf, cursor)
            }
            OptionScratch::Plain(data) => evaluate_plain(data, packet, cursor, flowbits),
        }
    }

    /// Prepare a retry at the next match position, if the kind supports it
    pub fn advance(&mut self) -> bool {
        match self {
            OptionScratch::Content(search) => search.advance(),
            OptionScratch::Pcre(search) => search.advance(),
            OptionScratch::Plain(_) => false,
        }
    }
}

fn evaluate_plain(
    data: &OptionData,
    packet: &Packet,
    cursor: &mut usize,
    flowbits: &mut FlowBitStore,
) -> EvalStatus {
    let buf = packet.detection_payload(false);
    match data {
        OptionData::ByteTest(b) => b.evaluate(buf, *cursor),
        OptionData::ByteJump(b) => b.evaluate(buf, cursor),
        OptionData::IsDataAt(i) => i.evaluate(buf, *cursor),
        OptionData::Field(f) => f.evaluate(packet),
        OptionData::TcpFlags(t) => t.evaluate(packet),
        OptionData::Flow(f) => f.evaluate(packet),
        OptionData::FlowBits(f) => f.evaluate(flowbits),
        OptionData::SameIp => same_ip(packet),
        OptionData::FtpBounce => ftp_bounce(packet, *cursor),
        // Handled by their own working copies
        OptionData::Content(_) | OptionData::Pcre(_) => EvalStatus::NoMatch,
    }
}
