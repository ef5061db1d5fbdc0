// Alerting - collects rule matches produced by the detection engine
use crate::capture::Packet;
use crate::rules::rule::{RuleAction, RuleRecord};
use chrono::{DateTime, Utc};
use crossbeam::channel::Sender;
use serde::Serialize;
use tracing::{debug, warn};

/// Receiver of matches raised by leaf nodes
pub trait MatchSink {
    /// Record a match for `rule`; `pattern_len` is the fast-pattern length hint
    fn append_match(&mut self, pattern_len: usize, rule: &RuleRecord);
}

/// A fully matched rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub gid: u32,
    pub sid: u32,
    pub rev: u32,
    pub action: RuleAction,
    pub priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    pub pattern_len: usize,
}

impl RuleMatch {
    pub fn from_rule(pattern_len: usize, rule: &RuleRecord) -> Self {
        Self {
            gid: rule.gid,
            sid: rule.sid,
            rev: rule.rev,
            action: rule.action,
            priority: rule.priority,
            msg: rule.msg.clone(),
            pattern_len,
        }
    }
}

/// A match stamped with the packet that produced it
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub packet_number: u64,
    #[serde(flatten)]
    pub rule: RuleMatch,
}

/// Per-packet match queue, bounded and ordered by rule priority
#[derive(Debug, Clone)]
pub struct MatchQueue {
    matches: Vec<RuleMatch>,
    limit: usize,
    dropped: u64,
}

impl MatchQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            matches: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Matches discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Take the queued matches, highest priority first; equal priorities
    /// keep their insertion order
    pub fn drain_ordered(&mut self) -> Vec<RuleMatch> {
        let mut matches = std::mem::take(&mut self.matches);
        matches.sort_by_key(|m| m.priority);
        matches
    }

    /// Drain the queue into alerts for `packet`
    pub fn drain_alerts(&mut self, packet: &Packet) -> Vec<Alert> {
        self.drain_ordered()
            .into_iter()
            .map(|rule| Alert {
                timestamp: packet.timestamp,
                packet_number: packet.packet_number,
                rule,
            })
            .collect()
    }
}

impl MatchSink for MatchQueue {
    fn append_match(&mut self, pattern_len: usize, rule: &RuleRecord) {
        if self.matches.len() >= self.limit {
            self.dropped += 1;
            debug!("Match queue full, dropping sid {}", rule.sid);
            return;
        }
        self.matches.push(RuleMatch::from_rule(pattern_len, rule));
    }
}

impl MatchSink for Vec<RuleMatch> {
    fn append_match(&mut self, pattern_len: usize, rule: &RuleRecord) {
        self.push(RuleMatch::from_rule(pattern_len, rule));
    }
}

impl MatchSink for Sender<RuleMatch> {
    fn append_match(&mut self, pattern_len: usize, rule: &RuleRecord) {
        if let Err(e) = self.send(RuleMatch::from_rule(pattern_len, rule)) {
            warn!("Failed to forward match for sid {}: {}", rule.sid, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::rule::RuleHeader;

    fn rule(sid: u32, priority: u8) -> RuleRecord {
        let mut rule = RuleRecord::new(sid, RuleHeader::default());
        rule.priority = priority;
        rule
    }

    #[test]
    fn test_queue_orders_by_priority() {
        let mut queue = MatchQueue::new(8);
        queue.append_match(3, &rule(1, 3));
        queue.append_match(3, &rule(2, 1));
        queue.append_match(3, &rule(3, 3));

        let sids: Vec<u32> = queue.drain_ordered().iter().map(|m| m.sid).collect();
        assert_eq!(sids, vec![2, 1, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_limit_drops_overflow() {
        let mut queue = MatchQueue::new(1);
        queue.append_match(0, &rule(1, 3));
        queue.append_match(0, &rule(2, 3));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn test_sender_sink_forwards_matches() {
        let (mut tx, rx) = crossbeam::channel::unbounded();
        tx.append_match(4, &rule(7, 2));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.sid, 7);
        assert_eq!(received.pattern_len, 4);
    }

    #[test]
    fn test_alert_serializes_flat() {
        let mut queue = MatchQueue::new(4);
        let mut record = rule(42, 1);
        record.msg = Some("test".to_string());
        queue.append_match(3, &record);

        let packet = Packet::new(Utc::now(), 9, b"x".to_vec());
        let alerts = queue.drain_alerts(&packet);
        let json = serde_json::to_value(&alerts[0]).unwrap();
        assert_eq!(json["sid"], 42);
        assert_eq!(json["packet_number"], 9);
        assert_eq!(json["msg"], "test");
    }
}
