/// Per-packet evaluation of canonical option trees.
///
/// The trees are shared and immutable; everything a walk writes (the
/// memoization record and the node counters) lives in a [`WorkerState`]
/// owned by one worker and indexed by [`NodeId`].
use super::budget::Budget;
use super::option::{EvalStatus, OptionScratch};
use super::option_store::OptionKeyStore;
use super::options::FlowBitStore;
use super::tree::{NodeId, NodeTarget, SubtreeStore};
use crate::alerting::MatchSink;
use crate::capture::{CacheKey, Packet, PacketFlags};
use crate::rules::rule::{RuleId, RuleRecord};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    /// Record per-node self time
    pub enable_profiling: bool,
}

/// Memoized outcome of a node for one packet identity
#[derive(Debug, Clone, Copy, Default)]
struct LastCheck {
    key: Option<CacheKey>,
    result: u32,
    flowbit_failed: bool,
}

/// Counters of one node, per worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Self time in nanoseconds, children excluded
    pub ticks: u64,
    pub ticks_match: u64,
    pub ticks_no_match: u64,
    /// Evaluations that were not answered from the cache
    pub checks: u64,
    /// Packets whose budget ran out below this root
    pub disables: u64,
    pub cache_hits: u64,
    /// Leaf matches
    pub matches: u64,
}

impl NodeStats {
    pub fn merge(&mut self, other: &NodeStats) {
        self.ticks += other.ticks;
        self.ticks_match += other.ticks_match;
        self.ticks_no_match += other.ticks_no_match;
        self.checks += other.checks;
        self.disables += other.disables;
        self.cache_hits += other.cache_hits;
        self.matches += other.matches;
    }
}

#[derive(Debug, Clone, Default)]
struct NodeState {
    last_check: LastCheck,
    stats: NodeStats,
}

/// Mutable per-node state of one worker
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    nodes: Vec<NodeState>,
}

impl WorkerState {
    pub fn new(node_count: usize) -> Self {
        Self {
            nodes: vec![NodeState::default(); node_count],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self, id: NodeId) -> Option<&NodeStats> {
        self.nodes.get(id.index()).map(|n| &n.stats)
    }

    /// Counters of every node, indexed like the subtree store
    pub fn node_stats(&self) -> impl Iterator<Item = &NodeStats> + '_ {
        self.nodes.iter().map(|n| &n.stats)
    }

    pub fn reset_stats(&mut self) {
        for node in &mut self.nodes {
            node.stats = NodeStats::default();
        }
    }

    fn fit(&mut self, node_count: usize) {
        if self.nodes.len() < node_count {
            self.nodes.resize(node_count, NodeState::default());
        }
    }
}

/// State of one evaluation pass over a packet
pub struct EvalContext<'a> {
    packet: &'a Packet,
    key: CacheKey,
    sink: &'a mut dyn MatchSink,
    flowbits: &'a mut FlowBitStore,
    budget: &'a mut dyn Budget,
    pattern_len: usize,
    suppress_alert: bool,
    flowbit_failed: bool,
    aborted: bool,
    cursor: usize,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        packet: &'a Packet,
        sink: &'a mut dyn MatchSink,
        flowbits: &'a mut FlowBitStore,
        budget: &'a mut dyn Budget,
    ) -> Self {
        Self {
            packet,
            key: packet.cache_key(),
            sink,
            flowbits,
            budget,
            pattern_len: 0,
            suppress_alert: false,
            flowbit_failed: false,
            aborted: false,
            cursor: 0,
        }
    }

    /// Fast-pattern length reported with every match
    pub fn with_pattern_len(mut self, pattern_len: usize) -> Self {
        self.pattern_len = pattern_len;
        self
    }

    pub fn packet(&self) -> &Packet {
        self.packet
    }

    /// The packet's budget ran out; no further roots are evaluated
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn flowbit_check_failed(&self) -> bool {
        self.flowbit_failed
    }

    fn begin_pass(&mut self) {
        self.suppress_alert = false;
        self.flowbit_failed = false;
        self.cursor = 0;
    }
}

/// Self time of one node, paused while its children run
struct NodeTimer {
    enabled: bool,
    started: Option<Instant>,
    elapsed: Duration,
}

impl NodeTimer {
    fn start(enabled: bool) -> Self {
        Self {
            enabled,
            started: enabled.then(Instant::now),
            elapsed: Duration::ZERO,
        }
    }

    fn pause(&mut self) {
        if let Some(started) = self.started.take() {
            self.elapsed += started.elapsed();
        }
    }

    fn resume(&mut self) {
        if self.enabled {
            self.started = Some(Instant::now());
        }
    }

    fn stop(mut self) -> u64 {
        self.pause();
        u64::try_from(self.elapsed.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Walks canonical trees for one rule set
#[derive(Debug, Clone, Copy)]
pub struct EvaluationEngine<'r> {
    options: &'r OptionKeyStore,
    tree: &'r SubtreeStore,
    rules: &'r [RuleRecord],
    config: EngineConfig,
}

impl<'r> EvaluationEngine<'r> {
    pub fn new(
        options: &'r OptionKeyStore,
        tree: &'r SubtreeStore,
        rules: &'r [RuleRecord],
        config: EngineConfig,
    ) -> Self {
        Self {
            options,
            tree,
            rules,
            config,
        }
    }

    /// Evaluate one rule group for the packet in `cx`, returning the number
    /// of rule matches found (retries included)
    pub fn evaluate_root(
        &self,
        root: NodeId,
        cx: &mut EvalContext<'_>,
        state: &mut WorkerState,
    ) -> u32 {
        if cx.aborted {
            return 0;
        }
        state.fit(self.tree.len());
        cx.begin_pass();

        let result = self.evaluate_node(root, cx, state);
        if cx.aborted {
            if let Some(node) = state.nodes.get_mut(root.index()) {
                node.stats.disables += 1;
            }
            debug!(
                "Packet {} aborted in root {:?} with {} partial matches",
                cx.packet.packet_number, root, result
            );
        }
        result
    }

    fn evaluate_node(&self, id: NodeId, cx: &mut EvalContext<'_>, state: &mut WorkerState) -> u32 {
        let Some(node) = self.tree.node(id) else {
            trace!("Unknown node {:?}", id);
            return 0;
        };
        let idx = id.index();

        if !node.is_relative() && !node.has_relative_children() {
            let last = state.nodes[idx].last_check;
            if last.key == Some(cx.key)
                && !last.flowbit_failed
                && !cx.packet.flags.contains(PacketFlags::IP_RULE_2ND)
            {
                state.nodes[idx].stats.cache_hits += 1;
                trace!("Node {:?} ({}) cached: {}", id, node.kind(), last.result);
                return last.result;
            }
        }

        let mut timer = NodeTimer::start(self.config.enable_profiling);
        {
            let entry = &mut state.nodes[idx];
            entry.stats.checks += 1;
            entry.last_check = LastCheck {
                key: Some(cx.key),
                result: 0,
                flowbit_failed: false,
            };
        }

        let mut scratch: Option<OptionScratch<'r>> = match node.target() {
            NodeTarget::Option(option) => match self.options.get(option) {
                Some(data) => Some(data.scratch()),
                None => {
                    trace!("Node {:?} refers to unknown option {:?}", id, option);
                    return self.finalize(idx, cx, state, 0, timer);
                }
            },
            _ => None,
        };

        let entry_cursor = cx.cursor;
        let mut result = 0u32;

        loop {
            let status = match (node.target(), scratch.as_mut()) {
                (NodeTarget::Root, _) => EvalStatus::Match,
                (NodeTarget::Rule(rule), _) => {
                    self.evaluate_leaf(rule, cx, &mut state.nodes[idx].stats)
                }
                (NodeTarget::Option(_), Some(option)) => {
                    option.evaluate(cx.packet, &mut cx.cursor, cx.flowbits)
                }
                (NodeTarget::Option(_), None) => EvalStatus::NoMatch,
            };
            trace!("Node {:?} ({}) -> {:?}", id, node.kind(), status);

            match status {
                EvalStatus::NoMatch => break,
                EvalStatus::FailedFlowbit => {
                    cx.flowbit_failed = true;
                    return self.finalize(idx, cx, state, 0, timer);
                }
                EvalStatus::Match if node.is_leaf() => result += 1,
                EvalStatus::Match | EvalStatus::NoAlert => {}
            }

            let saved_suppress = cx.suppress_alert;
            if status == EvalStatus::NoAlert {
                cx.suppress_alert = true;
            }
            let child_cursor = cx.cursor;

            timer.pause();
            for &child in node.children() {
                cx.cursor = child_cursor;
                result += self.evaluate_node(child, cx, state);
                if cx.aborted {
                    break;
                }
                if cx.budget.is_enabled() && cx.budget.poll() {
                    debug!(
                        "Packet {} exceeded its evaluation budget below node {:?}",
                        cx.packet.packet_number, id
                    );
                    cx.aborted = true;
                    break;
                }
            }
            timer.resume();
            cx.suppress_alert = saved_suppress;

            if cx.aborted {
                break;
            }
            let retry = status == EvalStatus::Match
                && node.has_relative_children()
                && scratch.as_mut().map_or(false, |option| option.advance());
            if !retry {
                break;
            }
            cx.cursor = entry_cursor;
        }

        self.finalize(idx, cx, state, result, timer)
    }

    fn evaluate_leaf(
        &self,
        rule: RuleId,
        cx: &mut EvalContext<'_>,
        stats: &mut NodeStats,
    ) -> EvalStatus {
        let Some(record) = self.rules.get(rule.index()) else {
            return EvalStatus::NoMatch;
        };
        if !record.service_matches(cx.packet.app_protocol) {
            trace!(
                "Rule {} wants service {}, packet has {}",
                record.sid,
                record.service,
                cx.packet.app_protocol
            );
            return EvalStatus::NoMatch;
        }
        if !record.header.matches(cx.packet) {
            return EvalStatus::NoMatch;
        }

        stats.matches += 1;
        if cx.suppress_alert {
            trace!("Rule {} matched with alerts suppressed", record.sid);
        } else {
            cx.sink.append_match(cx.pattern_len, record);
        }
        EvalStatus::Match
    }

    fn finalize(
        &self,
        idx: usize,
        cx: &EvalContext<'_>,
        state: &mut WorkerState,
        result: u32,
        timer: NodeTimer,
    ) -> u32 {
        let ticks = timer.stop();
        let entry = &mut state.nodes[idx];
        entry.last_check.result = result;
        if cx.flowbit_failed {
            entry.last_check.flowbit_failed = true;
        }
        entry.stats.ticks += ticks;
        if result > 0 {
            entry.stats.ticks_match += ticks;
        } else {
            entry.stats.ticks_no_match += ticks;
        }
        result
    }
}
