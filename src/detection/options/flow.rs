/// Session-state options: flow and flowbits
use super::super::hash::WordHasher;
use super::super::option::EvalStatus;
use crate::capture::Packet;
use crate::error::{KsError, Result};
use ahash::AHashSet;

/// Flow direction for stateful inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDirection {
    ToServer,
    ToClient,
}

/// `flow:` option
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowOption {
    /// Some(true) = established, Some(false) = not_established
    pub established: Option<bool>,
    pub direction: Option<FlowDirection>,
    pub stateless: bool,
}

impl FlowOption {
    pub fn parse(expr: &str) -> Result<Self> {
        let mut flow = FlowOption::default();
        for part in expr.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "established" => flow.established = Some(true),
                "not_established" => flow.established = Some(false),
                "stateless" => flow.stateless = true,
                "to_server" | "from_client" => flow.direction = Some(FlowDirection::ToServer),
                "to_client" | "from_server" => flow.direction = Some(FlowDirection::ToClient),
                "no_stream" | "only_stream" => {}
                other => {
                    return Err(KsError::InvalidRuleOption(format!(
                        "unknown flow keyword '{}'",
                        other
                    )))
                }
            }
        }
        Ok(flow)
    }

    pub fn evaluate(&self, packet: &Packet) -> EvalStatus {
        if self.stateless || (self.established.is_none() && self.direction.is_none()) {
            return EvalStatus::Match;
        }
        let Some(flow) = packet.flow else {
            return EvalStatus::NoMatch;
        };

        if let Some(established) = self.established {
            if flow.established != established {
                return EvalStatus::NoMatch;
            }
        }
        match self.direction {
            Some(FlowDirection::ToServer) if !flow.from_client => EvalStatus::NoMatch,
            Some(FlowDirection::ToClient) if flow.from_client => EvalStatus::NoMatch,
            _ => EvalStatus::Match,
        }
    }

    pub fn hash(&self, seed: u32) -> u32 {
        WordHasher::new(seed)
            .word(match self.established {
                None => 0,
                Some(true) => 1,
                Some(false) => 2,
            })
            .word(self.direction.map_or(0, |d| d as u32 + 1))
            .flag(self.stateless)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowBitOp {
    Set,
    Unset,
    Toggle,
    IsSet,
    IsNotSet,
    Reset,
    NoAlert,
}

/// `flowbits:` option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowBitsOption {
    pub op: FlowBitOp,
    pub name: Option<String>,
}

impl FlowBitsOption {
    pub fn parse(expr: &str) -> Result<Self> {
        let (op, name) = match expr.split_once(',') {
            Some((op, name)) => (op.trim(), Some(name.trim().to_string())),
            None => (expr.trim(), None),
        };
        let op = match op.to_ascii_lowercase().as_str() {
            "set" => FlowBitOp::Set,
            "unset" => FlowBitOp::Unset,
            "toggle" => FlowBitOp::Toggle,
            "isset" => FlowBitOp::IsSet,
            "isnotset" => FlowBitOp::IsNotSet,
            "reset" => FlowBitOp::Reset,
            "noalert" => FlowBitOp::NoAlert,
            other => {
                return Err(KsError::InvalidRuleOption(format!(
                    "unknown flowbits operation '{}'",
                    other
                )))
            }
        };

        let needs_name = !matches!(op, FlowBitOp::Reset | FlowBitOp::NoAlert);
        match (&name, needs_name) {
            (None, true) => Err(KsError::InvalidRuleOption(format!(
                "flowbits {:?} requires a bit name",
                op
            ))),
            (Some(_), false) => Err(KsError::InvalidRuleOption(format!(
                "flowbits {:?} takes no bit name",
                op
            ))),
            _ => Ok(Self { op, name }),
        }
    }

    pub fn evaluate(&self, bits: &mut FlowBitStore) -> EvalStatus {
        let name = self.name.as_deref().unwrap_or_default();
        match self.op {
            FlowBitOp::Set => {
                bits.set(name);
                EvalStatus::Match
            }
            FlowBitOp::Unset => {
                bits.unset(name);
                EvalStatus::Match
            }
            FlowBitOp::Toggle => {
                if bits.is_set(name) {
                    bits.unset(name);
                } else {
                    bits.set(name);
                }
                EvalStatus::Match
            }
            FlowBitOp::Reset => {
                bits.clear();
                EvalStatus::Match
            }
            FlowBitOp::IsSet if bits.is_set(name) => EvalStatus::Match,
            FlowBitOp::IsNotSet if !bits.is_set(name) => EvalStatus::Match,
            FlowBitOp::IsSet | FlowBitOp::IsNotSet => EvalStatus::FailedFlowbit,
            FlowBitOp::NoAlert => EvalStatus::NoAlert,
        }
    }

    pub fn hash(&self, seed: u32) -> u32 {
        WordHasher::new(seed)
            .word(self.op as u32)
            .bytes(self.name.as_deref().unwrap_or_default().as_bytes())
            .finish()
    }
}

/// Named bits attached to one flow, owned by the session tracker
#[derive(Debug, Clone, Default)]
pub struct FlowBitStore {
    bits: AHashSet<String>,
}

impl FlowBitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str) {
        if !self.bits.contains(name) {
            self.bits.insert(name.to_string());
        }
    }

    pub fn unset(&mut self, name: &str) {
        self.bits.remove(name);
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.bits.contains(name)
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FlowState;
    use chrono::Utc;

    #[test]
    fn test_flow_parse_and_evaluate() {
        let flow = FlowOption::parse("established,to_server").unwrap();
        let mut packet = Packet::tcp(Utc::now(), 1, 40000, 80, Vec::new());
        assert_eq!(flow.evaluate(&packet), EvalStatus::Match);

        packet.flow = Some(FlowState {
            established: true,
            from_client: false,
        });
        assert_eq!(flow.evaluate(&packet), EvalStatus::NoMatch);

        packet.flow = None;
        assert_eq!(flow.evaluate(&packet), EvalStatus::NoMatch);
        assert_eq!(
            FlowOption::parse("stateless").unwrap().evaluate(&packet),
            EvalStatus::Match
        );
        assert!(FlowOption::parse("sideways").is_err());
    }

    #[test]
    fn test_flowbits_set_then_isset() {
        let mut store = FlowBitStore::new();
        let isset = FlowBitsOption::parse("isset,login").unwrap();
        assert_eq!(isset.evaluate(&mut store), EvalStatus::FailedFlowbit);

        let set = FlowBitsOption::parse("set,login").unwrap();
        assert_eq!(set.evaluate(&mut store), EvalStatus::Match);
        assert_eq!(isset.evaluate(&mut store), EvalStatus::Match);

        let isnotset = FlowBitsOption::parse("isnotset,login").unwrap();
        assert_eq!(isnotset.evaluate(&mut store), EvalStatus::FailedFlowbit);

        let toggle = FlowBitsOption::parse("toggle,login").unwrap();
        toggle.evaluate(&mut store);
        assert!(store.is_empty());
    }

    #[test]
    fn test_flowbits_noalert_and_validation() {
        let mut store = FlowBitStore::new();
        let noalert = FlowBitsOption::parse("noalert").unwrap();
        assert_eq!(noalert.evaluate(&mut store), EvalStatus::NoAlert);
        assert!(FlowBitsOption::parse("set").is_err());
        assert!(FlowBitsOption::parse("noalert,x").is_err());
        assert!(FlowBitsOption::parse("flip,x").is_err());
    }
}
