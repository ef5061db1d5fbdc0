// Statistics - per-rule profiles rolled up from per-node counters
use crate::detection::{NodeId, NodeStats, NodeTarget, WorkerState};
use crate::rules::RuleSet;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Accumulated cost attributed to one rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleProfile {
    pub gid: u32,
    pub sid: u32,
    pub rev: u32,
    pub ticks: u64,
    pub ticks_match: u64,
    pub ticks_no_match: u64,
    pub checks: u64,
    pub matches: u64,
    pub disables: u64,
}

impl RuleProfile {
    pub fn avg_ticks_per_check(&self) -> f64 {
        if self.checks == 0 {
            0.0
        } else {
            self.ticks as f64 / self.checks as f64
        }
    }
}

/// Ticks accumulated along the path from a root
#[derive(Debug, Clone, Copy, Default)]
struct PathTicks {
    ticks: u64,
    ticks_match: u64,
    ticks_no_match: u64,
}

/// Sums node counters across workers and attributes them to rules
#[derive(Debug)]
pub struct StatsAggregator<'r> {
    ruleset: &'r RuleSet,
    totals: Vec<NodeStats>,
    workers: usize,
}

impl<'r> StatsAggregator<'r> {
    pub fn new(ruleset: &'r RuleSet) -> Self {
        Self {
            ruleset,
            totals: vec![NodeStats::default(); ruleset.subtrees().len()],
            workers: 0,
        }
    }

    pub fn add_worker(&mut self, state: &WorkerState) {
        for (total, stats) in self.totals.iter_mut().zip(state.node_stats()) {
            total.merge(stats);
        }
        self.workers += 1;
    }

    /// Summed counters of one node
    pub fn node_totals(&self, id: NodeId) -> Option<&NodeStats> {
        self.totals.get(id.index())
    }

    /// Push path ticks from every visited root down to its leaves.
    ///
    /// A rule reachable from several roots, or along several paths, is
    /// credited once per path; its checks and disables are those of the
    /// roots it was reached from.
    pub fn rollup(&self) -> RuleProfiles {
        let mut profiles: Vec<RuleProfile> = self
            .ruleset
            .rules()
            .iter()
            .map(|rule| RuleProfile {
                gid: rule.gid,
                sid: rule.sid,
                rev: rule.rev,
                ..Default::default()
            })
            .collect();

        let tree = self.ruleset.subtrees();
        for &root in tree.roots() {
            let Some(root_stats) = self.totals.get(root.index()).copied() else {
                continue;
            };
            if root_stats.checks == 0 {
                continue;
            }
            self.push_down(root, PathTicks::default(), &root_stats, &mut profiles);
        }

        for (id, node) in tree.iter() {
            if let NodeTarget::Rule(rule) = node.target() {
                if let (Some(profile), Some(stats)) =
                    (profiles.get_mut(rule.index()), self.totals.get(id.index()))
                {
                    profile.matches += stats.matches;
                }
            }
        }

        debug!(
            "Rolled up {} rules from {} workers",
            profiles.len(),
            self.workers
        );
        RuleProfiles { profiles }
    }

    fn push_down(
        &self,
        id: NodeId,
        parent: PathTicks,
        root: &NodeStats,
        profiles: &mut [RuleProfile],
    ) {
        let (Some(node), Some(stats)) = (self.ruleset.subtrees().node(id), self.totals.get(id.index()))
        else {
            return;
        };
        let path = PathTicks {
            ticks: parent.ticks + stats.ticks,
            ticks_match: parent.ticks_match + stats.ticks_match,
            ticks_no_match: parent.ticks_no_match + stats.ticks_no_match,
        };

        if let NodeTarget::Rule(rule) = node.target() {
            if let Some(profile) = profiles.get_mut(rule.index()) {
                profile.ticks += path.ticks;
                profile.ticks_match += path.ticks_match;
                profile.ticks_no_match += path.ticks_no_match;
                profile.checks += root.checks;
                profile.disables += root.disables;
            }
            return;
        }

        for &child in node.children() {
            self.push_down(child, path, root, profiles);
        }
    }
}

/// Per-rule profiles of one rule set
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleProfiles {
    profiles: Vec<RuleProfile>,
}

impl RuleProfiles {
    pub fn get(&self, sid: u32) -> Option<&RuleProfile> {
        self.profiles.iter().find(|p| p.sid == sid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleProfile> {
        self.profiles.iter()
    }

    /// Profiles of rules that were checked, most expensive first
    pub fn sorted_by_ticks(&self) -> Vec<&RuleProfile> {
        let mut sorted: Vec<&RuleProfile> = self.profiles.iter().filter(|p| p.checks > 0).collect();
        sorted.sort_by(|a, b| b.ticks.cmp(&a.ticks).then(a.sid.cmp(&b.sid)));
        sorted
    }
}

impl fmt::Display for RuleProfiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rule Profile Statistics (sorted by total ticks):")?;
        writeln!(
            f,
            "  {:>4} {:>10} {:>4} {:>10} {:>10} {:>9} {:>14} {:>12}",
            "Num", "SID", "GID", "Checks", "Matches", "Disables", "Ticks", "Avg/Check"
        )?;
        for (i, p) in self.sorted_by_ticks().into_iter().enumerate() {
            writeln!(
                f,
                "  {:>4} {:>10} {:>4} {:>10} {:>10} {:>9} {:>14} {:>12.1}",
                i + 1,
                p.sid,
                p.gid,
                p.checks,
                p.matches,
                p.disables,
                p.ticks,
                p.avg_ticks_per_check()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::RuleMatch;
    use crate::capture::Packet;
    use crate::detection::options::{ContentModifiers, ContentOption};
    use crate::detection::{EngineConfig, EvalContext, FlowBitStore, NoBudget, OptionData};
    use crate::rules::rule::{PortSpec, Protocol, RuleHeader, RuleRecord};
    use crate::rules::CompiledRule;
    use chrono::Utc;

    fn rule(sid: u32, dst_port: PortSpec, patterns: &[&str]) -> CompiledRule {
        let header = RuleHeader {
            protocol: Protocol::Tcp,
            dst_port,
            ..Default::default()
        };
        let options = patterns
            .iter()
            .map(|p| {
                OptionData::Content(
                    ContentOption::new(p.as_bytes().to_vec(), ContentModifiers::default()).unwrap(),
                )
            })
            .collect();
        CompiledRule::new(RuleRecord::new(sid, header), options)
    }

    fn run(ruleset: &RuleSet, state: &mut WorkerState, number: u64, port: u16, payload: &[u8]) {
        let packet = Packet::tcp(Utc::now(), number, 40000, port, payload.to_vec());
        let mut sink: Vec<RuleMatch> = Vec::new();
        let mut flowbits = FlowBitStore::new();
        let mut budget = NoBudget;
        let mut cx = EvalContext::new(&packet, &mut sink, &mut flowbits, &mut budget);
        let config = EngineConfig {
            enable_profiling: true,
        };
        ruleset.inspect(config, &mut cx, state);
    }

    fn ruleset() -> RuleSet {
        RuleSet::build(vec![
            rule(1, PortSpec::List(vec![PortSpec::Port(80), PortSpec::Port(8080)]), &["GET"]),
            rule(2, PortSpec::Port(80), &["POST"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_rollup_credits_each_root() {
        let ruleset = ruleset();
        let mut state = ruleset.worker_state();
        run(&ruleset, &mut state, 1, 80, b"GET /");
        run(&ruleset, &mut state, 2, 8080, b"GET /");

        let mut aggregator = StatsAggregator::new(&ruleset);
        aggregator.add_worker(&state);
        let profiles = aggregator.rollup();

        let get = profiles.get(1).unwrap();
        // Reached from the port 80 and port 8080 roots
        assert_eq!(get.checks, 2);
        assert_eq!(get.matches, 2);

        let post = profiles.get(2).unwrap();
        assert_eq!(post.checks, 1);
        assert_eq!(post.matches, 0);
    }

    #[test]
    fn test_workers_are_summed() {
        let ruleset = ruleset();
        let mut first = ruleset.worker_state();
        let mut second = ruleset.worker_state();
        run(&ruleset, &mut first, 1, 80, b"GET /");
        run(&ruleset, &mut second, 2, 80, b"POST /");

        let mut aggregator = StatsAggregator::new(&ruleset);
        aggregator.add_worker(&first);
        aggregator.add_worker(&second);
        let profiles = aggregator.rollup();

        assert_eq!(profiles.get(1).unwrap().checks, 2);
        assert_eq!(profiles.get(1).unwrap().matches, 1);
        assert_eq!(profiles.get(2).unwrap().matches, 1);
        for profile in profiles.iter() {
            assert_eq!(profile.ticks, profile.ticks_match + profile.ticks_no_match);
        }
    }

    #[test]
    fn test_unvisited_roots_contribute_nothing() {
        let ruleset = ruleset();
        let aggregator = StatsAggregator::new(&ruleset);
        let profiles = aggregator.rollup();
        assert!(profiles.iter().all(|p| p.checks == 0 && p.ticks == 0));
        assert!(profiles.sorted_by_ticks().is_empty());
    }

    #[test]
    fn test_report_lists_checked_rules() {
        let ruleset = ruleset();
        let mut state = ruleset.worker_state();
        run(&ruleset, &mut state, 1, 8080, b"GET /");

        let mut aggregator = StatsAggregator::new(&ruleset);
        aggregator.add_worker(&state);
        let report = aggregator.rollup().to_string();
        assert!(report.contains("Rule Profile Statistics"));
        assert_eq!(report.lines().count(), 3);
    }
}
