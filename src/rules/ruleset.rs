/// RuleSet: compiled rules grouped by protocol and port, each group an
/// option tree sharing canonical options and subtrees with the others
use super::rule::{Direction, Protocol, RuleHeader, RuleId, RuleRecord};
use crate::alerting::MatchSink;
use crate::capture::Packet;
use crate::detection::{
    Budget, ChainLink, EngineConfig, EvalContext, EvaluationEngine, FlowBitStore, NodeId,
    OptionData, OptionKeyStore, SubtreeStore, TreeBuilder, WorkerState, OPTION_STORE_CAPACITY,
    SUBTREE_STORE_CAPACITY,
};
use crate::error::{KsError, Result};
use ahash::AHashMap;
use std::fmt;
use tracing::{debug, info};

/// A rule record with its ordered option chain
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub record: RuleRecord,
    pub options: Vec<OptionData>,
}

impl CompiledRule {
    pub fn new(record: RuleRecord, options: Vec<OptionData>) -> Self {
        Self { record, options }
    }
}

/// Index key of a rule group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub protocol: Protocol,
    pub dst_port: Option<u16>,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dst_port {
            Some(port) => write!(f, "{}/{}", self.protocol, port),
            None => write!(f, "{}/any", self.protocol),
        }
    }
}

fn group_keys(header: &RuleHeader) -> Vec<GroupKey> {
    let ports = if header.direction == Direction::Either {
        // Either side may carry the port; only the any-port group sees both
        Vec::new()
    } else {
        header.dst_port.index_ports()
    };

    if ports.is_empty() {
        return vec![GroupKey {
            protocol: header.protocol,
            dst_port: None,
        }];
    }

    let mut keys: Vec<GroupKey> = Vec::with_capacity(ports.len());
    for port in ports {
        let key = GroupKey {
            protocol: header.protocol,
            dst_port: Some(port),
        };
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Immutable, shareable set of compiled rules
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<RuleRecord>,
    by_sid: AHashMap<u32, RuleId>,
    options: OptionKeyStore,
    subtrees: SubtreeStore,
    groups: AHashMap<GroupKey, NodeId>,
}

impl RuleSet {
    /// Compile rules into deduplicated option trees
    pub fn build(rules: Vec<CompiledRule>) -> Result<Self> {
        let mut options = OptionKeyStore::with_capacity(OPTION_STORE_CAPACITY)?;
        let mut subtrees = SubtreeStore::with_capacity(SUBTREE_STORE_CAPACITY)?;
        let mut records = Vec::with_capacity(rules.len());
        let mut by_sid = AHashMap::with_capacity(rules.len());
        let mut builders: Vec<(GroupKey, TreeBuilder)> = Vec::new();
        let mut builder_index: AHashMap<GroupKey, usize> = AHashMap::new();

        for CompiledRule { record, options: chain } in rules {
            if by_sid.contains_key(&record.sid) {
                return Err(KsError::DuplicateSid(record.sid));
            }
            let id = u32::try_from(records.len())
                .map(RuleId)
                .map_err(|_| KsError::RuleTreeError("too many rules".to_string()))?;

            let links = chain
                .into_iter()
                .map(|data| -> Result<ChainLink> {
                    let kind = data.kind();
                    let is_relative = data.is_relative();
                    let (option, _) = options.canonicalize(data)?;
                    Ok(ChainLink {
                        kind,
                        option,
                        is_relative,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            for key in group_keys(&record.header) {
                let slot = *builder_index.entry(key).or_insert_with(|| {
                    builders.push((key, TreeBuilder::new()));
                    builders.len() - 1
                });
                builders[slot].1.add_chain(&links, id);
            }

            by_sid.insert(record.sid, id);
            records.push(record);
        }

        let mut groups = AHashMap::with_capacity(builders.len());
        for (key, builder) in builders {
            let count = builder.rule_count();
            let root = builder.finish(&mut subtrees)?;
            debug!("Group {} holds {} rules under root {:?}", key, count, root);
            groups.insert(key, root);
        }

        let ruleset = Self {
            rules: records,
            by_sid,
            options,
            subtrees,
            groups,
        };
        let stats = ruleset.stats();
        info!(
            "Built rule set: {} rules, {} groups, {} options ({} shared), {} nodes ({} shared)",
            stats.rules,
            stats.groups,
            stats.unique_options,
            stats.option_dedup_hits,
            stats.nodes,
            stats.subtree_dedup_hits
        );
        Ok(ruleset)
    }

    pub fn engine(&self, config: EngineConfig) -> EvaluationEngine<'_> {
        EvaluationEngine::new(&self.options, &self.subtrees, &self.rules, config)
    }

    /// Fresh per-worker state sized for this rule set
    pub fn worker_state(&self) -> WorkerState {
        WorkerState::new(self.subtrees.len())
    }

    /// Roots of the groups that may match the packet: its port group, the
    /// any-port group, and the same two for IP rules
    pub fn candidate_roots(&self, packet: &Packet) -> Vec<NodeId> {
        let mut protocols = vec![packet.protocol];
        if packet.protocol != Protocol::Ip {
            protocols.push(Protocol::Ip);
        }

        let mut roots = Vec::new();
        for protocol in protocols {
            let mut keys = vec![GroupKey {
                protocol,
                dst_port: None,
            }];
            if let Some(port) = packet.dst_port {
                keys.insert(
                    0,
                    GroupKey {
                        protocol,
                        dst_port: Some(port),
                    },
                );
            }
            for key in keys {
                if let Some(&root) = self.groups.get(&key) {
                    if !roots.contains(&root) {
                        roots.push(root);
                    }
                }
            }
        }
        roots
    }

    /// Evaluate every candidate group for the packet in `cx`
    pub fn inspect(
        &self,
        config: EngineConfig,
        cx: &mut EvalContext<'_>,
        state: &mut WorkerState,
    ) -> u32 {
        let engine = self.engine(config);
        let mut total = 0;
        for root in self.candidate_roots(cx.packet()) {
            total += engine.evaluate_root(root, cx, state);
            if cx.aborted() {
                break;
            }
        }
        total
    }

    /// Inspect a packet that shares no flow with earlier ones: flowbits
    /// start empty, so earlier packets on this worker cannot influence it
    pub fn inspect_isolated<S: MatchSink, B: Budget>(
        &self,
        config: EngineConfig,
        packet: &Packet,
        sink: &mut S,
        flowbits: &mut FlowBitStore,
        budget: &mut B,
        state: &mut WorkerState,
    ) -> u32 {
        flowbits.clear();
        let mut cx = EvalContext::new(packet, sink, flowbits, budget);
        self.inspect(config, &mut cx, state)
    }

    pub fn rule(&self, id: RuleId) -> Option<&RuleRecord> {
        self.rules.get(id.index())
    }

    pub fn rule_by_sid(&self, sid: u32) -> Option<&RuleRecord> {
        self.by_sid.get(&sid).and_then(|id| self.rule(*id))
    }

    pub fn rules(&self) -> &[RuleRecord] {
        &self.rules
    }

    pub fn options(&self) -> &OptionKeyStore {
        &self.options
    }

    pub fn subtrees(&self) -> &SubtreeStore {
        &self.subtrees
    }

    pub fn group_root(&self, key: GroupKey) -> Option<NodeId> {
        self.groups.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn stats(&self) -> RuleSetStats {
        let mut by_protocol = AHashMap::new();
        for rule in &self.rules {
            *by_protocol.entry(rule.header.protocol).or_insert(0) += 1;
        }

        RuleSetStats {
            rules: self.rules.len(),
            groups: self.groups.len(),
            roots: self.subtrees.roots().len(),
            unique_options: self.options.len(),
            option_dedup_hits: self.options.dedup_hits(),
            nodes: self.subtrees.len(),
            subtree_dedup_hits: self.subtrees.dedup_hits(),
            by_protocol,
        }
    }

    /// Release every option and node. Workers must have dropped their
    /// references first, which holding the set by value guarantees.
    pub fn teardown(mut self) {
        info!(
            "Tearing down rule set: {} rules, {} nodes",
            self.rules.len(),
            self.subtrees.len()
        );
        self.subtrees.clear();
        self.options.clear();
        self.groups.clear();
        self.by_sid.clear();
        self.rules.clear();
    }
}

/// Statistics about a rule set
#[derive(Debug, Clone)]
pub struct RuleSetStats {
    pub rules: usize,
    pub groups: usize,
    pub roots: usize,
    pub unique_options: usize,
    pub option_dedup_hits: u64,
    pub nodes: usize,
    pub subtree_dedup_hits: u64,
    pub by_protocol: AHashMap<Protocol, usize>,
}

impl fmt::Display for RuleSetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rule Set Statistics:")?;
        writeln!(f, "  Total rules: {}", self.rules)?;
        writeln!(f, "  Groups: {} ({} distinct roots)", self.groups, self.roots)?;
        writeln!(
            f,
            "  Options: {} unique, {} shared",
            self.unique_options, self.option_dedup_hits
        )?;
        writeln!(
            f,
            "  Tree nodes: {} unique, {} shared",
            self.nodes, self.subtree_dedup_hits
        )?;
        writeln!(f, "  By protocol:")?;
        for (proto, count) in &self.by_protocol {
            writeln!(f, "    {}: {}", proto, count)?;
        }
        Ok(())
    }
}
