/// Rule records referenced by leaf nodes of the detection option tree
use crate::capture::Packet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Rule action to take when a match occurs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Generate an alert
    #[default]
    Alert,
    /// Log the packet
    Log,
    /// Pass the packet (allow)
    Pass,
    /// Drop the packet (inline mode)
    Drop,
    /// Reject the packet and send TCP RST or ICMP unreachable
    Reject,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Alert => write!(f, "alert"),
            RuleAction::Log => write!(f, "log"),
            RuleAction::Pass => write!(f, "pass"),
            RuleAction::Drop => write!(f, "drop"),
            RuleAction::Reject => write!(f, "reject"),
        }
    }
}

/// Protocol to match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    #[default]
    Ip, // Any IP protocol
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Ip => write!(f, "ip"),
        }
    }
}

/// IP address specification (single IP, CIDR, negated, list or any)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpSpec {
    Any,
    Addr(IpAddr),
    Cidr { addr: IpAddr, prefix_len: u8 },
    List(Vec<IpSpec>),
    Not(Box<IpSpec>),
}

impl IpSpec {
    pub fn matches(&self, addr: Option<IpAddr>) -> bool {
        match self {
            IpSpec::Any => true,
            IpSpec::Addr(expected) => addr == Some(*expected),
            IpSpec::Cidr { addr: net, prefix_len } => match addr {
                Some(addr) => cidr_contains(*net, *prefix_len, addr),
                None => false,
            },
            IpSpec::List(list) => list.iter().any(|spec| spec.matches(addr)),
            IpSpec::Not(inner) => !inner.matches(addr),
        }
    }
}

fn cidr_contains(net: IpAddr, prefix_len: u8, addr: IpAddr) -> bool {
    match (net, addr) {
        (IpAddr::V4(net), IpAddr::V4(addr)) => {
            let bits = u32::from(prefix_len.min(32));
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            u32::from(net) & mask == u32::from(addr) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(addr)) => {
            let bits = u32::from(prefix_len.min(128));
            let mask = if bits == 0 { 0 } else { u128::MAX << (128 - bits) };
            u128::from(net) & mask == u128::from(addr) & mask
        }
        _ => false,
    }
}

impl fmt::Display for IpSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpSpec::Any => write!(f, "any"),
            IpSpec::Addr(addr) => write!(f, "{}", addr),
            IpSpec::Cidr { addr, prefix_len } => write!(f, "{}/{}", addr, prefix_len),
            IpSpec::List(list) => {
                write!(f, "[")?;
                for (i, spec) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", spec)?;
                }
                write!(f, "]")
            }
            IpSpec::Not(spec) => write!(f, "!{}", spec),
        }
    }
}

/// Port specification (single port, range, list, negated or any)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    Any,
    Port(u16),
    /// Inclusive range
    Range(u16, u16),
    List(Vec<PortSpec>),
    Not(Box<PortSpec>),
}

impl PortSpec {
    pub fn matches(&self, port: Option<u16>) -> bool {
        match self {
            PortSpec::Any => true,
            PortSpec::Port(p) => port == Some(*p),
            PortSpec::Range(start, end) => port.is_some_and(|p| (*start..=*end).contains(&p)),
            PortSpec::List(list) => list.iter().any(|spec| spec.matches(port)),
            PortSpec::Not(inner) => !inner.matches(port),
        }
    }

    /// Concrete ports worth indexing; empty means "match during evaluation"
    pub fn index_ports(&self) -> Vec<u16> {
        match self {
            PortSpec::Any | PortSpec::Not(_) => Vec::new(),
            PortSpec::Port(p) => vec![*p],
            PortSpec::Range(start, end) => {
                // Small ranges are expanded, larger ones stay in the any-port group
                if end.saturating_sub(*start) < 10 {
                    (*start..=*end).collect()
                } else {
                    Vec::new()
                }
            }
            PortSpec::List(list) => {
                let mut ports = Vec::new();
                for spec in list {
                    let expanded = spec.index_ports();
                    if expanded.is_empty() {
                        return Vec::new();
                    }
                    ports.extend(expanded);
                }
                ports
            }
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Any => write!(f, "any"),
            PortSpec::Port(port) => write!(f, "{}", port),
            PortSpec::Range(start, end) => write!(f, "{}:{}", start, end),
            PortSpec::List(list) => {
                write!(f, "[")?;
                for (i, spec) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", spec)?;
                }
                write!(f, "]")
            }
            PortSpec::Not(spec) => write!(f, "!{}", spec),
        }
    }
}

/// Direction of traffic flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum Direction {
    /// Unidirectional: source -> destination
    #[default]
    #[serde(rename = "->")]
    To,
    /// Bidirectional: source <> destination
    #[serde(rename = "<>")]
    Either,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::To => write!(f, "->"),
            Direction::Either => write!(f, "<>"),
        }
    }
}

/// Rule header: the address/port part checked once a chain fully matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHeader {
    pub protocol: Protocol,
    pub src_ip: IpSpec,
    pub src_port: PortSpec,
    pub direction: Direction,
    pub dst_ip: IpSpec,
    pub dst_port: PortSpec,
}

impl Default for RuleHeader {
    fn default() -> Self {
        Self {
            protocol: Protocol::Ip,
            src_ip: IpSpec::Any,
            src_port: PortSpec::Any,
            direction: Direction::To,
            dst_ip: IpSpec::Any,
            dst_port: PortSpec::Any,
        }
    }
}

impl RuleHeader {
    /// Check if this rule matches the given protocol
    pub fn matches_protocol(&self, protocol: Protocol) -> bool {
        self.protocol == Protocol::Ip || self.protocol == protocol
    }

    pub fn matches(&self, packet: &Packet) -> bool {
        if !self.matches_protocol(packet.protocol) {
            return false;
        }

        let forward = self.src_ip.matches(packet.src_addr)
            && self.src_port.matches(packet.src_port)
            && self.dst_ip.matches(packet.dst_addr)
            && self.dst_port.matches(packet.dst_port);
        if forward || self.direction == Direction::To {
            return forward;
        }

        self.src_ip.matches(packet.dst_addr)
            && self.src_port.matches(packet.dst_port)
            && self.dst_ip.matches(packet.src_addr)
            && self.dst_port.matches(packet.src_port)
    }
}

/// Arena handle of a rule record inside a loaded rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl RuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A compiled rule: everything except its option chain
#[derive(Debug, Clone, PartialEq)]
pub struct RuleRecord {
    pub action: RuleAction,
    pub header: RuleHeader,
    pub gid: u32,
    pub sid: u32,
    pub rev: u32,
    pub msg: Option<String>,
    pub classtype: Option<String>,
    /// Priority (1=high, 2=medium, 3=low)
    pub priority: u8,
    /// Target service ordinal, 0 when the rule is service-agnostic
    pub service: u16,
}

impl fmt::Display for RuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} (sid:{}",
            self.action,
            self.header.protocol,
            self.header.src_ip,
            self.header.src_port,
            self.header.direction,
            self.header.dst_ip,
            self.header.dst_port,
            self.sid
        )?;

        if let Some(ref msg) = self.msg {
            write!(f, "; msg:\"{}\"", msg)?;
        }

        write!(f, "; rev:{};)", self.rev)
    }
}

impl RuleRecord {
    pub fn new(sid: u32, header: RuleHeader) -> Self {
        Self {
            action: RuleAction::Alert,
            header,
            gid: 1,
            sid,
            rev: 1,
            msg: None,
            classtype: None,
            priority: 3,
            service: 0,
        }
    }

    /// Get the rule's message
    pub fn message(&self) -> Option<&str> {
        self.msg.as_deref()
    }

    /// Service check: only decisive when both sides know the service
    pub fn service_matches(&self, app_protocol: u16) -> bool {
        self.service == 0 || app_protocol == 0 || self.service == app_protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn http_header() -> RuleHeader {
        RuleHeader {
            protocol: Protocol::Tcp,
            dst_port: PortSpec::Port(80),
            ..Default::default()
        }
    }

    #[test]
    fn test_rule_creation() {
        let rule = RuleRecord::new(1000001, http_header());
        assert_eq!(rule.action, RuleAction::Alert);
        assert_eq!(rule.header.protocol, Protocol::Tcp);
        assert_eq!(rule.sid, 1000001);
        assert_eq!(rule.priority, 3);
        assert_eq!(
            rule.to_string(),
            "alert tcp any any -> any 80 (sid:1000001; rev:1;)"
        );
    }

    #[test]
    fn test_ip_spec_cidr() {
        let net = IpSpec::Cidr {
            addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 0)),
            prefix_len: 24,
        };
        assert!(net.matches(Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 77)))));
        assert!(!net.matches(Some(IpAddr::V4(Ipv4Addr::new(192, 168, 2, 1)))));
        assert!(!net.matches(None));
        assert!(IpSpec::Not(Box::new(net)).matches(Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))));
    }

    #[test]
    fn test_port_spec_matching() {
        assert!(PortSpec::Any.matches(None));
        assert!(PortSpec::Range(1024, 2048).matches(Some(1500)));
        assert!(!PortSpec::Range(1024, 2048).matches(Some(80)));
        assert!(PortSpec::List(vec![PortSpec::Port(80), PortSpec::Port(8080)]).matches(Some(8080)));
        assert!(PortSpec::Not(Box::new(PortSpec::Port(22))).matches(Some(23)));
        assert_eq!(PortSpec::Range(80, 82).index_ports(), vec![80, 81, 82]);
        assert!(PortSpec::Range(1, 1000).index_ports().is_empty());
    }

    #[test]
    fn test_header_matching_with_direction() {
        let packet = Packet::tcp(Utc::now(), 1, 80, 40000, b"HTTP/1.1 200 OK".to_vec());

        let header = http_header();
        assert!(!header.matches(&packet));

        let either = RuleHeader {
            direction: Direction::Either,
            ..http_header()
        };
        assert!(either.matches(&packet));
    }

    #[test]
    fn test_service_match() {
        let mut rule = RuleRecord::new(1, http_header());
        assert!(rule.service_matches(7));
        rule.service = 7;
        assert!(rule.service_matches(7));
        assert!(rule.service_matches(0));
        assert!(!rule.service_matches(9));
    }
}
