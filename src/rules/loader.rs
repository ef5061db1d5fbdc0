/// YAML rule definitions; option literals use Snort notation parsed with nom
use super::rule::{Direction, IpSpec, PortSpec, Protocol, RuleAction, RuleHeader, RuleRecord};
use super::ruleset::CompiledRule;
use crate::detection::options::{
    ByteExtract, ByteJumpOption, ByteOp, ByteTestOption, ContentBuffer, ContentModifiers,
    ContentOption, FieldCheck, FlowBitsOption, FlowOption, IsDataAtOption, NumberBase,
    PacketField, PcreOption, TcpFlagsOption,
};
use crate::detection::OptionData;
use crate::error::{KsError, Result};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag_no_case, take_while1, take_while_m_n},
    character::complete::{anychar, char, digit1, space0},
    combinator::{all_consuming, map, map_res, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, separated_pair, terminated, tuple},
    IResult,
};
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info, warn};

/// A YAML scalar that may be written as a number or a string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

fn default_any() -> Scalar {
    Scalar::Text("any".to_string())
}

fn default_one() -> u32 {
    1
}

fn default_priority() -> u8 {
    3
}

/// Top level of a rule file
#[derive(Debug, Clone, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// One rule: header fields plus an ordered option list
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefinition {
    pub sid: u32,
    #[serde(default = "default_one")]
    pub gid: u32,
    #[serde(default = "default_one")]
    pub rev: u32,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_any")]
    pub src_ip: Scalar,
    #[serde(default = "default_any")]
    pub src_port: Scalar,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_any")]
    pub dst_ip: Scalar,
    #[serde(default = "default_any")]
    pub dst_port: Scalar,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub classtype: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Application protocol ordinal, 0 for any
    #[serde(default)]
    pub service: u16,
    #[serde(default)]
    pub options: Vec<OptionDefinition>,
}

impl RuleDefinition {
    pub fn compile(&self) -> Result<CompiledRule> {
        self.compile_inner().map_err(|e| match e {
            KsError::RuleCompileError { .. } => e,
            other => KsError::RuleCompileError {
                sid: self.sid,
                reason: other.to_string(),
            },
        })
    }

    fn compile_inner(&self) -> Result<CompiledRule> {
        let header = RuleHeader {
            protocol: self.protocol,
            src_ip: parse_ip_spec(&self.src_ip.to_string())?,
            src_port: parse_port_spec(&self.src_port.to_string())?,
            direction: self.direction,
            dst_ip: parse_ip_spec(&self.dst_ip.to_string())?,
            dst_port: parse_port_spec(&self.dst_port.to_string())?,
        };

        let mut record = RuleRecord::new(self.sid, header);
        record.action = self.action;
        record.gid = self.gid;
        record.rev = self.rev;
        record.msg = self.msg.clone();
        record.classtype = self.classtype.clone();
        record.priority = self.priority;
        record.service = self.service;

        let options = self
            .options
            .iter()
            .map(OptionDefinition::compile)
            .collect::<Result<Vec<_>>>()?;
        debug!("Compiled sid {} with {} options", self.sid, options.len());
        Ok(CompiledRule::new(record, options))
    }
}

/// One rule option, keyed by its option name
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OptionDefinition {
    Content(ContentDefinition),
    Pcre { pcre: String },
    ByteTest { byte_test: ByteTestDefinition },
    ByteJump { byte_jump: ByteJumpDefinition },
    IsDataAt { isdataat: Scalar },
    Flow { flow: String },
    FlowBits { flowbits: String },
    Flags { flags: String },
    SameIp { sameip: bool },
    FtpBounce { ftpbounce: bool },
    Field(FieldDefinition),
}

impl OptionDefinition {
    pub fn compile(&self) -> Result<OptionData> {
        match self {
            OptionDefinition::Content(content) => content.compile(),
            OptionDefinition::Pcre { pcre } => Ok(OptionData::Pcre(PcreOption::parse(pcre)?)),
            OptionDefinition::ByteTest { byte_test } => byte_test.compile(),
            OptionDefinition::ByteJump { byte_jump } => byte_jump.compile(),
            OptionDefinition::IsDataAt { isdataat } => parse_isdataat(&isdataat.to_string()),
            OptionDefinition::Flow { flow } => Ok(OptionData::Flow(FlowOption::parse(flow)?)),
            OptionDefinition::FlowBits { flowbits } => {
                Ok(OptionData::FlowBits(FlowBitsOption::parse(flowbits)?))
            }
            OptionDefinition::Flags { flags } => {
                Ok(OptionData::TcpFlags(TcpFlagsOption::parse(flags)?))
            }
            OptionDefinition::SameIp { sameip: true } => Ok(OptionData::SameIp),
            OptionDefinition::FtpBounce { ftpbounce: true } => Ok(OptionData::FtpBounce),
            OptionDefinition::SameIp { sameip: false }
            | OptionDefinition::FtpBounce { ftpbounce: false } => Err(
                KsError::InvalidRuleOption("flag options only accept 'true'".to_string()),
            ),
            OptionDefinition::Field(field) => field.compile(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentDefinition {
    pub content: String,
    #[serde(default)]
    pub nocase: bool,
    #[serde(default)]
    pub rawbytes: bool,
    #[serde(default)]
    pub negated: bool,
    /// Search the normalized URI instead of the payload
    #[serde(default)]
    pub uri: bool,
    pub offset: Option<i32>,
    pub depth: Option<u32>,
    pub distance: Option<i32>,
    pub within: Option<u32>,
}

impl ContentDefinition {
    fn compile(&self) -> Result<OptionData> {
        let pattern = parse_content_pattern(&self.content)?;
        let modifiers = ContentModifiers {
            nocase: self.nocase,
            rawbytes: self.rawbytes,
            negated: self.negated,
            offset: self.offset,
            depth: self.depth,
            distance: self.distance,
            within: self.within,
            buffer: if self.uri {
                ContentBuffer::Uri
            } else {
                ContentBuffer::Payload
            },
        };
        Ok(OptionData::Content(ContentOption::new(pattern, modifiers)?))
    }
}

fn parse_number_base(base: Option<&str>) -> Result<Option<NumberBase>> {
    match base.map(str::to_ascii_lowercase).as_deref() {
        None => Ok(None),
        Some("dec") => Ok(Some(NumberBase::Dec)),
        Some("hex") => Ok(Some(NumberBase::Hex)),
        Some("oct") => Ok(Some(NumberBase::Oct)),
        Some(other) => Err(KsError::InvalidRuleOption(format!(
            "unknown number base '{}'",
            other
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ByteTestDefinition {
    pub bytes: u8,
    pub operator: String,
    pub value: u64,
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub relative: bool,
    #[serde(default)]
    pub little_endian: bool,
    /// dec, hex or oct to read ASCII digits
    pub string: Option<String>,
}

impl ByteTestDefinition {
    fn compile(&self) -> Result<OptionData> {
        let extract = ByteExtract {
            bytes: self.bytes,
            offset: self.offset,
            relative: self.relative,
            big_endian: !self.little_endian,
            string: parse_number_base(self.string.as_deref())?,
        };
        extract.validate()?;
        let (op, negate) = ByteOp::parse(self.operator.trim())?;
        Ok(OptionData::ByteTest(ByteTestOption {
            extract,
            op,
            negate,
            value: self.value,
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ByteJumpDefinition {
    pub bytes: u8,
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub relative: bool,
    #[serde(default)]
    pub little_endian: bool,
    pub string: Option<String>,
    #[serde(default = "default_one")]
    pub multiplier: u32,
    #[serde(default)]
    pub align: bool,
    #[serde(default)]
    pub from_beginning: bool,
    #[serde(default)]
    pub post_offset: i32,
}

impl ByteJumpDefinition {
    fn compile(&self) -> Result<OptionData> {
        let extract = ByteExtract {
            bytes: self.bytes,
            offset: self.offset,
            relative: self.relative,
            big_endian: !self.little_endian,
            string: parse_number_base(self.string.as_deref())?,
        };
        extract.validate()?;
        if self.multiplier == 0 {
            return Err(KsError::InvalidRuleOption(
                "byte_jump multiplier must be positive".to_string(),
            ));
        }
        Ok(OptionData::ByteJump(ByteJumpOption {
            extract,
            multiplier: self.multiplier,
            align: self.align,
            from_beginning: self.from_beginning,
            post_offset: self.post_offset,
        }))
    }
}

/// Header-field checks; exactly one key must be present
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    pub dsize: Option<Scalar>,
    pub ttl: Option<Scalar>,
    pub tos: Option<Scalar>,
    pub id: Option<Scalar>,
    pub ip_proto: Option<Scalar>,
    pub seq: Option<Scalar>,
    pub ack: Option<Scalar>,
    pub window: Option<Scalar>,
    pub itype: Option<Scalar>,
    pub icode: Option<Scalar>,
    pub icmp_id: Option<Scalar>,
    pub icmp_seq: Option<Scalar>,
}

impl FieldDefinition {
    fn compile(&self) -> Result<OptionData> {
        let candidates = [
            (PacketField::Dsize, &self.dsize),
            (PacketField::Ttl, &self.ttl),
            (PacketField::Tos, &self.tos),
            (PacketField::IpId, &self.id),
            (PacketField::IpProto, &self.ip_proto),
            (PacketField::TcpSeq, &self.seq),
            (PacketField::TcpAck, &self.ack),
            (PacketField::TcpWindow, &self.window),
            (PacketField::IcmpType, &self.itype),
            (PacketField::IcmpCode, &self.icode),
            (PacketField::IcmpId, &self.icmp_id),
            (PacketField::IcmpSeq, &self.icmp_seq),
        ];
        let mut set = candidates
            .iter()
            .filter_map(|&(field, expr)| expr.as_ref().map(|e| (field, e)));

        match (set.next(), set.next()) {
            (Some((field, expr)), None) => Ok(OptionData::Field(FieldCheck::parse(
                field,
                &expr.to_string(),
            )?)),
            (None, _) => Err(KsError::InvalidRuleOption(
                "option entry names no known option".to_string(),
            )),
            (Some(_), Some(_)) => Err(KsError::InvalidRuleOption(
                "one option per list entry".to_string(),
            )),
        }
    }
}

/// `isdataat:[!]N[,relative]`
fn parse_isdataat(expr: &str) -> Result<OptionData> {
    let mut parts = expr.split(',').map(str::trim);
    let amount = parts.next().unwrap_or_default();
    let (negate, amount) = match amount.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, amount),
    };
    let offset = amount.parse::<u32>().map_err(|_| {
        KsError::InvalidRuleOption(format!("invalid isdataat offset '{}'", amount))
    })?;

    let mut relative = false;
    for modifier in parts {
        match modifier {
            "relative" => relative = true,
            "rawbytes" => {}
            other => {
                return Err(KsError::InvalidRuleOption(format!(
                    "unknown isdataat modifier '{}'",
                    other
                )))
            }
        }
    }
    Ok(OptionData::IsDataAt(IsDataAtOption {
        offset,
        relative,
        negate,
    }))
}

/// Load and compile one rule file. Rules that fail to compile are logged
/// and skipped.
pub fn load_rules_file<P: AsRef<Path>>(path: P) -> Result<Vec<CompiledRule>> {
    let path = path.as_ref();
    info!("Loading rules from: {:?}", path);

    let content = std::fs::read_to_string(path)?;
    let rules = compile_rules(&content)?;
    Ok(rules)
}

/// Rule entries kept as raw YAML so one malformed rule doesn't sink the file
#[derive(Debug, Deserialize)]
struct RawRuleFile {
    #[serde(default)]
    rules: Vec<serde_yaml::Value>,
}

/// Compile every rule in a YAML document, skipping the ones that fail
pub fn compile_rules(yaml: &str) -> Result<Vec<CompiledRule>> {
    let file: RawRuleFile = serde_yaml::from_str(yaml)?;
    let mut compiled = Vec::with_capacity(file.rules.len());
    let mut skipped = 0;

    for (index, entry) in file.rules.into_iter().enumerate() {
        let result = serde_yaml::from_value::<RuleDefinition>(entry)
            .map_err(KsError::from)
            .and_then(|definition| definition.compile());
        match result {
            Ok(rule) => compiled.push(rule),
            Err(e) => {
                warn!("Skipping rule #{}: {}", index + 1, e);
                skipped += 1;
            }
        }
    }

    info!("Compiled {} rules ({} skipped)", compiled.len(), skipped);
    Ok(compiled)
}

/// Load rules from multiple files; unreadable files are logged and skipped
pub fn load_rule_files<P: AsRef<Path>>(paths: &[P]) -> Vec<CompiledRule> {
    let mut rules = Vec::new();
    for path in paths {
        match load_rules_file(path) {
            Ok(loaded) => rules.extend(loaded),
            Err(e) => warn!("Failed to load rules from {:?}: {}", path.as_ref(), e),
        }
    }
    rules
}

fn notation_error<E: fmt::Debug>(what: &str, input: &str, e: E) -> KsError {
    KsError::PatternError(format!("invalid {} '{}': {:?}", what, input, e))
}

/// Decode a content literal: `|41 42|` hex blocks and backslash escapes
pub fn parse_content_pattern(input: &str) -> Result<Vec<u8>> {
    let (_, chunks) = all_consuming(many0(alt((hex_block, escaped_char, literal_run))))(input)
        .map_err(|e| notation_error("content", input, e))?;
    Ok(chunks.concat())
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |s: &str| u8::from_str_radix(s, 16),
    )(input)
}

fn hex_block(input: &str) -> IResult<&str, Vec<u8>> {
    delimited(
        char('|'),
        many0(preceded(space0, hex_byte)),
        preceded(space0, char('|')),
    )(input)
}

fn escaped_char(input: &str) -> IResult<&str, Vec<u8>> {
    map(preceded(char('\\'), anychar), |c| match c {
        'n' => vec![b'\n'],
        'r' => vec![b'\r'],
        't' => vec![b'\t'],
        '0' => vec![0],
        other => other.to_string().into_bytes(),
    })(input)
}

fn literal_run(input: &str) -> IResult<&str, Vec<u8>> {
    map(is_not("|\\"), |s: &str| s.as_bytes().to_vec())(input)
}

/// Parse a port spec: `any`, `80`, `1024:`, `:1023`, `80:90`, `!22`, `[80,443]`
pub fn parse_port_spec(input: &str) -> Result<PortSpec> {
    let trimmed = input.trim();
    all_consuming(port_spec)(trimmed)
        .map(|(_, spec)| spec)
        .map_err(|e| notation_error("port spec", trimmed, e))
}

fn port_spec(input: &str) -> IResult<&str, PortSpec> {
    alt((
        map(
            delimited(
                char('['),
                separated_list1(delimited(space0, char(','), space0), port_item),
                char(']'),
            ),
            PortSpec::List,
        ),
        port_item,
    ))(input)
}

fn port_item(input: &str) -> IResult<&str, PortSpec> {
    alt((
        map(preceded(char('!'), port_spec), |spec| {
            PortSpec::Not(Box::new(spec))
        }),
        port_spec_inner,
    ))(input)
}

fn port_spec_inner(input: &str) -> IResult<&str, PortSpec> {
    alt((
        value(PortSpec::Any, tag_no_case("any")),
        map(separated_pair(parse_u16, char(':'), parse_u16), |(start, end)| {
            PortSpec::Range(start, end)
        }),
        map(terminated(parse_u16, char(':')), |start| {
            PortSpec::Range(start, u16::MAX)
        }),
        map(preceded(char(':'), parse_u16), |end| PortSpec::Range(0, end)),
        map(parse_u16, PortSpec::Port),
    ))(input)
}

/// Parse an address spec: `any`, an address, a CIDR block, `!spec`, `[a,b]`
pub fn parse_ip_spec(input: &str) -> Result<IpSpec> {
    let trimmed = input.trim();
    all_consuming(ip_spec)(trimmed)
        .map(|(_, spec)| spec)
        .map_err(|e| notation_error("address spec", trimmed, e))
}

fn ip_spec(input: &str) -> IResult<&str, IpSpec> {
    alt((
        map(
            delimited(
                char('['),
                separated_list1(delimited(space0, char(','), space0), ip_item),
                char(']'),
            ),
            IpSpec::List,
        ),
        ip_item,
    ))(input)
}

fn ip_item(input: &str) -> IResult<&str, IpSpec> {
    alt((
        map(preceded(char('!'), ip_spec), |spec| IpSpec::Not(Box::new(spec))),
        ip_spec_inner,
    ))(input)
}

fn ip_spec_inner(input: &str) -> IResult<&str, IpSpec> {
    alt((
        value(IpSpec::Any, tag_no_case("any")),
        map(
            tuple((parse_ip_addr, char('/'), parse_u8)),
            |(addr, _, prefix_len)| IpSpec::Cidr { addr, prefix_len },
        ),
        map(parse_ip_addr, IpSpec::Addr),
    ))(input)
}

fn parse_ip_addr(input: &str) -> IResult<&str, IpAddr> {
    map_res(
        alt((
            recognize(tuple((
                digit1,
                char('.'),
                digit1,
                char('.'),
                digit1,
                char('.'),
                digit1,
            ))),
            take_while1(|c: char| c.is_ascii_hexdigit() || c == ':'),
        )),
        |s: &str| s.parse::<IpAddr>(),
    )(input)
}

fn parse_u8(input: &str) -> IResult<&str, u8> {
    map_res(digit1, |s: &str| s.parse::<u8>())(input)
}

fn parse_u16(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |s: &str| s.parse::<u16>())(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::OptionKind;
    use std::io::Write;

    #[test]
    fn test_parse_content_pattern() {
        // Simple text
        assert_eq!(parse_content_pattern("GET").unwrap(), b"GET");

        // Hex notation
        assert_eq!(parse_content_pattern("|48 65 6C 6C 6F|").unwrap(), b"Hello");
        assert_eq!(parse_content_pattern("|0D0A|").unwrap(), b"\r\n");

        // Mixed
        assert_eq!(parse_content_pattern("GET |0D 0A|").unwrap(), b"GET \r\n");

        // Escapes
        assert_eq!(parse_content_pattern(r"a\|b\\c").unwrap(), b"a|b\\c");
    }

    #[test]
    fn test_parse_content_pattern_errors() {
        assert!(parse_content_pattern("|41").is_err());
        assert!(parse_content_pattern("|4|").is_err());
        assert!(parse_content_pattern("|GG|").is_err());
    }

    #[test]
    fn test_parse_port_spec() {
        assert_eq!(parse_port_spec("any").unwrap(), PortSpec::Any);
        assert_eq!(parse_port_spec("80").unwrap(), PortSpec::Port(80));
        assert_eq!(parse_port_spec("80:443").unwrap(), PortSpec::Range(80, 443));
        assert_eq!(parse_port_spec("1024:").unwrap(), PortSpec::Range(1024, u16::MAX));
        assert_eq!(parse_port_spec(":1023").unwrap(), PortSpec::Range(0, 1023));
        assert_eq!(
            parse_port_spec("!22").unwrap(),
            PortSpec::Not(Box::new(PortSpec::Port(22)))
        );
        assert_eq!(
            parse_port_spec("[80, 443]").unwrap(),
            PortSpec::List(vec![PortSpec::Port(80), PortSpec::Port(443)])
        );
        assert!(parse_port_spec("http").is_err());
        assert!(parse_port_spec("70000").is_err());
    }

    #[test]
    fn test_parse_ip_spec() {
        assert_eq!(parse_ip_spec("any").unwrap(), IpSpec::Any);

        match parse_ip_spec("192.168.1.0/24").unwrap() {
            IpSpec::Cidr { addr, prefix_len } => {
                assert_eq!(addr.to_string(), "192.168.1.0");
                assert_eq!(prefix_len, 24);
            }
            other => panic!("Expected IpSpec::Cidr, got {:?}", other),
        }

        match parse_ip_spec("![10.0.0.1,::1]").unwrap() {
            IpSpec::Not(inner) => assert!(matches!(*inner, IpSpec::List(ref l) if l.len() == 2)),
            other => panic!("Expected IpSpec::Not, got {:?}", other),
        }
        assert!(parse_ip_spec("home").is_err());
    }

    const RULES: &str = r#"
rules:
  - sid: 1000001
    msg: "HTTP admin access"
    protocol: tcp
    dst_port: 80
    priority: 2
    options:
      - content: "GET"
        nocase: true
      - content: "/admin"
        distance: 0
      - pcre: "/user=\\w+/R"
      - dsize: ">10"
      - flow: "established,to_server"
  - sid: 1000002
    protocol: tcp
    dst_port: "[80,8080]"
    options:
      - byte_test: { bytes: 2, operator: ">", value: 100, offset: 0 }
      - isdataat: "4,relative"
      - flowbits: "set,seen"
      - ttl: 64
  - sid: 1000003
    options:
      - content: "|00|"
        bogus: true
"#;

    #[test]
    fn test_compile_rules_from_yaml() {
        let rules = compile_rules(RULES).unwrap();
        // The third rule has an unknown content key and is skipped
        assert_eq!(rules.len(), 2);

        let first = &rules[0];
        assert_eq!(first.record.sid, 1000001);
        assert_eq!(first.record.priority, 2);
        assert_eq!(first.record.header.dst_port, PortSpec::Port(80));
        let kinds: Vec<OptionKind> = first.options.iter().map(|o| o.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                OptionKind::Content,
                OptionKind::Content,
                OptionKind::Pcre,
                OptionKind::Dsize,
                OptionKind::Flow
            ]
        );
        assert!(first.options[1].is_relative());
        assert!(first.options[2].is_relative());

        let second = &rules[1];
        let kinds: Vec<OptionKind> = second.options.iter().map(|o| o.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                OptionKind::ByteTest,
                OptionKind::IsDataAt,
                OptionKind::FlowBits,
                OptionKind::Ttl
            ]
        );
    }

    #[test]
    fn test_compile_error_names_sid() {
        let yaml = r#"
rules:
  - sid: 7
    options:
      - content: "x"
        offset: 1
        distance: 1
"#;
        let file: RuleFile = serde_yaml::from_str(yaml).unwrap();
        match file.rules[0].compile() {
            Err(KsError::RuleCompileError { sid, .. }) => assert_eq!(sid, 7),
            other => panic!("Expected compile error, got {:?}", other.map(|r| r.record.sid)),
        }
    }

    #[test]
    fn test_field_definition_requires_one_key() {
        let yaml = r#"
rules:
  - sid: 8
    options:
      - ttl: 1
        tos: 2
"#;
        assert!(compile_rules(yaml).unwrap().is_empty());
    }

    #[test]
    fn test_load_rules_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();

        let rules = load_rules_file(file.path()).unwrap();
        assert_eq!(rules.len(), 2);

        let missing = file.path().with_extension("missing");
        assert!(load_rules_file(&missing).is_err());
        assert_eq!(load_rule_files(&[file.path().to_path_buf(), missing]).len(), 2);
    }
}
