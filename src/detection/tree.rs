/// Option trees: prefix-sharing tries of rule option chains, hash-consed
/// bottom-up so structurally equal subtrees become one node
use super::hash::{finalize, mix};
use super::option::OptionKind;
use super::option_store::OptionId;
use crate::error::{KsError, Result};
use crate::rules::rule::RuleId;
use ahash::AHashMap;
use tracing::{debug, trace};

/// Default bucket capacity of the subtree store
pub const SUBTREE_STORE_CAPACITY: usize = 8192;

/// Handle of a canonical node inside a [`SubtreeStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a node refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeTarget {
    /// Entry of a rule group
    Root,
    Option(OptionId),
    /// Terminal node carrying the matched rule
    Rule(RuleId),
}

impl NodeTarget {
    /// Identity word fed into structural hashes
    fn identity(self) -> u32 {
        match self {
            NodeTarget::Root => u32::MAX,
            NodeTarget::Option(id) => id.0.wrapping_mul(2),
            NodeTarget::Rule(id) => id.0.wrapping_mul(2).wrapping_add(1),
        }
    }
}

/// One canonical node of an option tree
#[derive(Debug, Clone)]
pub struct TreeNode {
    kind: OptionKind,
    target: NodeTarget,
    children: Vec<NodeId>,
    is_relative: bool,
    has_relative_children: bool,
    hash: u32,
}

impl TreeNode {
    pub fn kind(&self) -> OptionKind {
        self.kind
    }

    pub fn target(&self) -> NodeTarget {
        self.target
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.target, NodeTarget::Rule(_))
    }

    pub fn is_relative(&self) -> bool {
        self.is_relative
    }

    pub fn has_relative_children(&self) -> bool {
        self.has_relative_children
    }

    pub fn structural_hash(&self) -> u32 {
        self.hash
    }
}

/// A node waiting to be canonicalized; its children are already canonical
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub kind: OptionKind,
    pub target: NodeTarget,
    pub is_relative: bool,
    pub children: Vec<NodeId>,
}

impl NodeSpec {
    pub fn root(children: Vec<NodeId>) -> Self {
        Self {
            kind: OptionKind::Root,
            target: NodeTarget::Root,
            is_relative: false,
            children,
        }
    }

    pub fn leaf(rule: RuleId) -> Self {
        Self {
            kind: OptionKind::Leaf,
            target: NodeTarget::Rule(rule),
            is_relative: false,
            children: Vec::new(),
        }
    }

    pub fn option(kind: OptionKind, id: OptionId, is_relative: bool, children: Vec<NodeId>) -> Self {
        Self {
            kind,
            target: NodeTarget::Option(id),
            is_relative,
            children,
        }
    }
}

/// Arena of canonical tree nodes keyed by structural hash
#[derive(Debug, Default)]
pub struct SubtreeStore {
    nodes: Vec<TreeNode>,
    buckets: AHashMap<u32, Vec<NodeId>>,
    roots: Vec<NodeId>,
    dedup_hits: u64,
}

impl SubtreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with room for `capacity` nodes; fails if the
    /// allocation cannot be satisfied
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut store = Self::default();
        store.nodes.try_reserve(capacity).map_err(|e| {
            KsError::RuleTreeError(format!("cannot allocate subtree store: {}", e))
        })?;
        store.buckets.try_reserve(capacity).map_err(|e| {
            KsError::RuleTreeError(format!("cannot allocate subtree store: {}", e))
        })?;
        Ok(store)
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every canonical node with its handle
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    /// Canonical group roots, in the order they were first created
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of nodes answered with an existing subtree
    pub fn dedup_hits(&self) -> u64 {
        self.dedup_hits
    }

    /// Hash of a node over its own target and its ordered children
    fn hash_spec(&self, spec: &NodeSpec) -> u32 {
        let mut a = spec.target.identity();
        let mut b = 0u32;
        let mut c = 0u32;
        for child in &spec.children {
            let node = &self.nodes[child.index()];
            a = a.wrapping_add(node.target.identity());
            c = c.wrapping_add(node.hash);
            mix(&mut a, &mut b, &mut c);
            a = a.wrapping_add(node.children.len() as u32);
            mix(&mut a, &mut b, &mut c);
        }
        finalize(&mut a, &mut b, &mut c);
        c
    }

    /// Recursive structural equality of two canonical nodes
    pub fn structurally_equal(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        match (self.node(a), self.node(b)) {
            (Some(x), Some(y)) => {
                x.kind == y.kind
                    && x.target == y.target
                    && x.children.len() == y.children.len()
                    && x
                        .children
                        .iter()
                        .zip(&y.children)
                        .all(|(ca, cb)| self.structurally_equal(*ca, *cb))
            }
            _ => false,
        }
    }

    fn matches_spec(&self, id: NodeId, spec: &NodeSpec) -> bool {
        let node = &self.nodes[id.index()];
        node.kind == spec.kind
            && node.target == spec.target
            && node.children.len() == spec.children.len()
            && node
                .children
                .iter()
                .zip(&spec.children)
                .all(|(a, b)| self.structurally_equal(*a, *b))
    }

    fn validate(&self, spec: &NodeSpec) -> Result<()> {
        if let Some(bad) = spec.children.iter().find(|c| c.index() >= self.nodes.len()) {
            return Err(KsError::RuleTreeError(format!(
                "child {:?} is not a canonical node",
                bad
            )));
        }
        match spec.target {
            NodeTarget::Rule(_) if !spec.children.is_empty() => Err(KsError::RuleTreeError(
                "leaf nodes cannot have children".to_string(),
            )),
            NodeTarget::Option(_) | NodeTarget::Root if spec.children.is_empty() => {
                Err(KsError::RuleTreeError(format!(
                    "{} node without children cannot reach a rule",
                    spec.kind
                )))
            }
            _ => Ok(()),
        }
    }

    /// Return the canonical node structurally equal to `spec`, inserting it
    /// when none exists. The flag is true when an existing node was reused.
    pub fn canonicalize(&mut self, spec: NodeSpec) -> Result<(NodeId, bool)> {
        self.validate(&spec)?;
        let hash = self.hash_spec(&spec);

        if let Some(ids) = self.buckets.get(&hash) {
            if let Some(&existing) = ids.iter().find(|id| self.matches_spec(**id, &spec)) {
                self.dedup_hits += 1;
                trace!("Reusing {} subtree {:?}", spec.kind, existing);
                return Ok((existing, true));
            }
        }

        let id = u32::try_from(self.nodes.len())
            .map(NodeId)
            .map_err(|_| KsError::RuleTreeError("subtree store is full".to_string()))?;
        let has_relative_children = spec
            .children
            .iter()
            .any(|c| self.nodes[c.index()].is_relative);
        if spec.target == NodeTarget::Root {
            self.roots.push(id);
        }
        self.nodes.push(TreeNode {
            kind: spec.kind,
            target: spec.target,
            children: spec.children,
            is_relative: spec.is_relative,
            has_relative_children,
            hash,
        });
        self.buckets.entry(hash).or_default().push(id);
        Ok((id, false))
    }

    /// Release every node
    pub fn clear(&mut self) {
        debug!(
            "Releasing {} tree nodes in {} roots",
            self.nodes.len(),
            self.roots.len()
        );
        self.nodes.clear();
        self.buckets.clear();
        self.roots.clear();
        self.dedup_hits = 0;
    }
}

/// One option of a rule chain, already canonical in the option store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub kind: OptionKind,
    pub option: OptionId,
    pub is_relative: bool,
}

#[derive(Debug)]
struct TrieNode {
    link: Option<ChainLink>,
    rule: Option<RuleId>,
    children: Vec<usize>,
}

/// Builds the option trie of one rule group.
///
/// Chains sharing a leading run of options share those trie nodes; each
/// chain ends in its own leaf. Child order is insertion order.
#[derive(Debug)]
pub struct TreeBuilder {
    nodes: Vec<TrieNode>,
    rules: usize,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode {
                link: None,
                rule: None,
                children: Vec::new(),
            }],
            rules: 0,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules
    }

    pub fn add_chain(&mut self, chain: &[ChainLink], rule: RuleId) {
        let mut current = 0;
        for link in chain {
            let existing = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].link.map(|l| l.option) == Some(link.option));
            current = match existing {
                Some(child) => child,
                None => self.push_child(
                    current,
                    TrieNode {
                        link: Some(*link),
                        rule: None,
                        children: Vec::new(),
                    },
                ),
            };
        }
        self.push_child(
            current,
            TrieNode {
                link: None,
                rule: Some(rule),
                children: Vec::new(),
            },
        );
        self.rules += 1;
    }

    fn push_child(&mut self, parent: usize, node: TrieNode) -> usize {
        let index = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(index);
        index
    }

    /// Canonicalize the trie bottom-up into `store` and return its root
    pub fn finish(self, store: &mut SubtreeStore) -> Result<NodeId> {
        if self.rules == 0 {
            return Err(KsError::RuleTreeError("rule group has no rules".to_string()));
        }
        let mut canonical: Vec<Option<NodeId>> = vec![None; self.nodes.len()];

        // Post-order walk without recursion: children are always pushed
        // after their parent, so a reverse index sweep visits them first.
        for index in (0..self.nodes.len()).rev() {
            let node = &self.nodes[index];
            let children = node
                .children
                .iter()
                .map(|&c| {
                    canonical[c].ok_or_else(|| {
                        KsError::RuleTreeError(format!("trie node {} built out of order", c))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let spec = match (index, node.link, node.rule) {
                (0, _, _) => NodeSpec::root(children),
                (_, _, Some(rule)) => NodeSpec::leaf(rule),
                (_, Some(link), None) => {
                    NodeSpec::option(link.kind, link.option, link.is_relative, children)
                }
                (_, None, None) => {
                    return Err(KsError::RuleTreeError(format!(
                        "trie node {} has no option",
                        index
                    )))
                }
            };
            let (id, _) = store.canonicalize(spec)?;
            canonical[index] = Some(id);
        }

        canonical[0].ok_or_else(|| KsError::RuleTreeError("trie has no root".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(option: u32) -> ChainLink {
        ChainLink {
            kind: OptionKind::Content,
            option: OptionId(option),
            is_relative: false,
        }
    }

    fn relative(option: u32) -> ChainLink {
        ChainLink {
            kind: OptionKind::Content,
            option: OptionId(option),
            is_relative: true,
        }
    }

    #[test]
    fn test_shared_prefix_builds_one_branch() {
        let mut store = SubtreeStore::new();
        let mut builder = TreeBuilder::new();
        builder.add_chain(&[link(0), link(1)], RuleId(0));
        builder.add_chain(&[link(0), link(2)], RuleId(1));
        let root = builder.finish(&mut store).unwrap();

        let root_node = store.node(root).unwrap();
        assert_eq!(root_node.kind(), OptionKind::Root);
        assert_eq!(root_node.children().len(), 1);

        let shared = store.node(root_node.children()[0]).unwrap();
        assert_eq!(shared.target(), NodeTarget::Option(OptionId(0)));
        assert_eq!(shared.children().len(), 2);
    }

    #[test]
    fn test_identical_subtrees_across_groups_share_nodes() {
        let mut store = SubtreeStore::new();

        let mut first = TreeBuilder::new();
        first.add_chain(&[link(0), link(1)], RuleId(0));
        let a = first.finish(&mut store).unwrap();
        let before = store.len();

        let mut second = TreeBuilder::new();
        second.add_chain(&[link(0), link(1)], RuleId(0));
        let b = second.finish(&mut store).unwrap();

        assert_eq!(a, b);
        assert_eq!(store.len(), before);
        assert_eq!(store.roots().len(), 1);
        assert!(store.dedup_hits() >= 3);
    }

    #[test]
    fn test_leaves_for_different_rules_never_merge() {
        let mut store = SubtreeStore::new();
        let (a, _) = store.canonicalize(NodeSpec::leaf(RuleId(0))).unwrap();
        let (b, reused) = store.canonicalize(NodeSpec::leaf(RuleId(1))).unwrap();
        assert_ne!(a, b);
        assert!(!reused);
        assert!(!store.structurally_equal(a, b));
    }

    #[test]
    fn test_child_order_matters() {
        let mut store = SubtreeStore::new();
        let (x, _) = store.canonicalize(NodeSpec::leaf(RuleId(0))).unwrap();
        let (y, _) = store.canonicalize(NodeSpec::leaf(RuleId(1))).unwrap();
        let (p, _) = store
            .canonicalize(NodeSpec::option(OptionKind::Content, OptionId(0), false, vec![x, y]))
            .unwrap();
        let (q, reused) = store
            .canonicalize(NodeSpec::option(OptionKind::Content, OptionId(0), false, vec![y, x]))
            .unwrap();
        assert_ne!(p, q);
        assert!(!reused);
    }

    #[test]
    fn test_relative_child_flag() {
        let mut store = SubtreeStore::new();
        let mut builder = TreeBuilder::new();
        builder.add_chain(&[link(0), relative(1)], RuleId(0));
        let root = builder.finish(&mut store).unwrap();

        let top = store.node(root).unwrap().children()[0];
        let top = store.node(top).unwrap();
        assert!(!top.is_relative());
        assert!(top.has_relative_children());
        let child = store.node(top.children()[0]).unwrap();
        assert!(child.is_relative());
        assert!(!child.has_relative_children());
    }

    #[test]
    fn test_invalid_specs_rejected() {
        let mut store = SubtreeStore::new();
        assert!(store
            .canonicalize(NodeSpec::option(OptionKind::Content, OptionId(0), false, vec![NodeId(9)]))
            .is_err());
        assert!(store
            .canonicalize(NodeSpec::option(OptionKind::Content, OptionId(0), false, Vec::new()))
            .is_err());
        assert!(TreeBuilder::new().finish(&mut store).is_err());
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut store = SubtreeStore::with_capacity(8).unwrap();
        let mut builder = TreeBuilder::new();
        builder.add_chain(&[link(0)], RuleId(0));
        builder.finish(&mut store).unwrap();
        assert!(!store.is_empty());
        store.clear();
        assert!(store.is_empty());
        assert!(store.roots().is_empty());
    }
}
