/// Header field checks: dsize, ttl, tos, ip id/proto, tcp seq/ack/window/flags, icmp, same_ip
use super::super::hash::WordHasher;
use super::super::option::EvalStatus;
use crate::capture::Packet;
use crate::error::{KsError, Result};
use std::net::{IpAddr, Ipv4Addr};

/// Numeric packet field a [`FieldCheck`] reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketField {
    Dsize,
    Ttl,
    Tos,
    IpId,
    IpProto,
    TcpSeq,
    TcpAck,
    TcpWindow,
    IcmpType,
    IcmpCode,
    IcmpId,
    IcmpSeq,
}

impl PacketField {
    fn read(self, packet: &Packet) -> Option<u64> {
        match self {
            PacketField::Dsize => Some(packet.dsize() as u64),
            PacketField::Ttl => packet.ip.map(|ip| u64::from(ip.ttl)),
            PacketField::Tos => packet.ip.map(|ip| u64::from(ip.tos)),
            PacketField::IpId => packet.ip.map(|ip| u64::from(ip.id)),
            PacketField::IpProto => packet.ip.map(|ip| u64::from(ip.proto)),
            PacketField::TcpSeq => packet.tcp.map(|tcp| u64::from(tcp.seq)),
            PacketField::TcpAck => packet.tcp.map(|tcp| u64::from(tcp.ack)),
            PacketField::TcpWindow => packet.tcp.map(|tcp| u64::from(tcp.window)),
            PacketField::IcmpType => packet.icmp.map(|icmp| u64::from(icmp.icmp_type)),
            PacketField::IcmpCode => packet.icmp.map(|icmp| u64::from(icmp.code)),
            PacketField::IcmpId => packet.icmp.map(|icmp| u64::from(icmp.id)),
            PacketField::IcmpSeq => packet.icmp.map(|icmp| u64::from(icmp.seq)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOp {
    Eq,
    Ne,
    Lt,
    Gt,
    /// Inclusive range `lo<>hi`
    Between,
}

/// Compare one packet field against a constant (or range)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCheck {
    pub field: PacketField,
    pub op: FieldOp,
    pub value: u64,
    pub upper: u64,
}

impl FieldCheck {
    pub fn new(field: PacketField, op: FieldOp, value: u64) -> Self {
        Self {
            field,
            op,
            value,
            upper: value,
        }
    }

    pub fn between(field: PacketField, lo: u64, hi: u64) -> Result<Self> {
        if lo > hi {
            return Err(KsError::InvalidRuleOption(format!(
                "invalid range {}<>{}",
                lo, hi
            )));
        }
        Ok(Self {
            field,
            op: FieldOp::Between,
            value: lo,
            upper: hi,
        })
    }

    /// Parse `N`, `!N`, `<N`, `>N` or `lo<>hi`
    pub fn parse(field: PacketField, expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let number = |s: &str| {
            s.trim().parse::<u64>().map_err(|_| {
                KsError::InvalidRuleOption(format!("invalid numeric value '{}'", s))
            })
        };

        if let Some((lo, hi)) = expr.split_once("<>") {
            return Self::between(field, number(lo)?, number(hi)?);
        }
        let check = match expr.chars().next() {
            Some('!') => Self::new(field, FieldOp::Ne, number(&expr[1..])?),
            Some('<') => Self::new(field, FieldOp::Lt, number(&expr[1..])?),
            Some('>') => Self::new(field, FieldOp::Gt, number(&expr[1..])?),
            Some('=') => Self::new(field, FieldOp::Eq, number(&expr[1..])?),
            _ => Self::new(field, FieldOp::Eq, number(expr)?),
        };
        Ok(check)
    }

    pub fn evaluate(&self, packet: &Packet) -> EvalStatus {
        let Some(actual) = self.field.read(packet) else {
            return EvalStatus::NoMatch;
        };
        let hit = match self.op {
            FieldOp::Eq => actual == self.value,
            FieldOp::Ne => actual != self.value,
            FieldOp::Lt => actual < self.value,
            FieldOp::Gt => actual > self.value,
            FieldOp::Between => (self.value..=self.upper).contains(&actual),
        };
        if hit {
            EvalStatus::Match
        } else {
            EvalStatus::NoMatch
        }
    }

    pub fn hash(&self, seed: u32) -> u32 {
        WordHasher::new(seed)
            .word(self.field as u32)
            .word(self.op as u32)
            .wide(self.value)
            .wide(self.upper)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagMode {
    /// Exactly these flags (after masking)
    Exact,
    /// Any of these flags (`*`)
    Any,
    /// All of these flags, others allowed (`+`)
    All,
    /// None of these flags (`!`)
    Not,
}

/// `flags:` option on the TCP header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFlagsOption {
    pub flags: u8,
    pub mode: FlagMode,
    /// Flags ignored when comparing
    pub ignore: u8,
}

impl TcpFlagsOption {
    /// Parse `SA`, `S+`, `*SA`, `!R` with an optional `,mask`
    pub fn parse(expr: &str) -> Result<Self> {
        let (spec, mask) = match expr.split_once(',') {
            Some((spec, mask)) => (spec.trim(), mask.trim()),
            None => (expr.trim(), ""),
        };

        let mut mode = FlagMode::Exact;
        let mut flags = 0u8;
        for c in spec.chars() {
            match c {
                '+' => mode = FlagMode::All,
                '*' => mode = FlagMode::Any,
                '!' => mode = FlagMode::Not,
                '0' => {}
                c => flags |= flag_bit(c)?,
            }
        }

        let mut ignore = 0u8;
        for c in mask.chars() {
            ignore |= flag_bit(c)?;
        }

        Ok(Self { flags, mode, ignore })
    }

    pub fn evaluate(&self, packet: &Packet) -> EvalStatus {
        let Some(tcp) = packet.tcp else {
            return EvalStatus::NoMatch;
        };
        let actual = tcp.flags.to_byte() & !self.ignore;
        let hit = match self.mode {
            FlagMode::Exact => actual == self.flags,
            FlagMode::All => actual & self.flags == self.flags,
            FlagMode::Any => actual & self.flags != 0,
            FlagMode::Not => actual & self.flags == 0,
        };
        if hit {
            EvalStatus::Match
        } else {
            EvalStatus::NoMatch
        }
    }

    pub fn hash(&self, seed: u32) -> u32 {
        WordHasher::new(seed)
            .word(u32::from(self.flags))
            .word(self.mode as u32)
            .word(u32::from(self.ignore))
            .finish()
    }
}

fn flag_bit(c: char) -> Result<u8> {
    let bit = match c.to_ascii_uppercase() {
        'F' => 0x01,
        'S' => 0x02,
        'R' => 0x04,
        'P' => 0x08,
        'A' => 0x10,
        'U' => 0x20,
        other => {
            return Err(KsError::InvalidRuleOption(format!(
                "unknown TCP flag '{}'",
                other
            )))
        }
    };
    Ok(bit)
}

/// `sameip`: source and destination address are equal
pub fn same_ip(packet: &Packet) -> EvalStatus {
    match (packet.src_addr, packet.dst_addr) {
        (Some(src), Some(dst)) if src == dst => EvalStatus::Match,
        _ => EvalStatus::NoMatch,
    }
}

/// `ftpbounce`: FTP PORT argument names a host other than the client.
///
/// Expects the cursor to sit just past the `PORT` keyword.
pub fn ftp_bounce(packet: &Packet, cursor: usize) -> EvalStatus {
    let payload = packet.detection_payload(false);
    let Some(args) = payload.get(cursor..) else {
        return EvalStatus::NoMatch;
    };
    let line = args.split(|b| *b == b'\r' || *b == b'\n').next().unwrap_or(&[]);
    let Ok(line) = std::str::from_utf8(line) else {
        return EvalStatus::NoMatch;
    };

    let octets: Vec<u8> = line
        .trim()
        .split(',')
        .take(4)
        .filter_map(|part| part.trim().parse::<u8>().ok())
        .collect();
    if octets.len() != 4 {
        return EvalStatus::NoMatch;
    }

    let target = IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]));
    match packet.src_addr {
        Some(src) if src != target => EvalStatus::Match,
        _ => EvalStatus::NoMatch,
    }
}
