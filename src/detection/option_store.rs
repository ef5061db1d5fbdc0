/// Content-addressed store of rule option configurations
use super::option::{OptionData, OptionKind};
use crate::error::{KsError, Result};
use ahash::AHashMap;
use tracing::{debug, trace};

/// Default bucket capacity of the option store
pub const OPTION_STORE_CAPACITY: usize = 16384;

/// Handle of a canonical option instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionId(pub u32);

impl OptionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Deduplicates option configurations so equal options share one instance.
///
/// Keyed by (kind, kind-specific hash); collisions are resolved with the
/// kind's equality so only truly equal configurations are merged.
#[derive(Debug)]
pub struct OptionKeyStore {
    options: Vec<OptionData>,
    buckets: AHashMap<(OptionKind, u32), Vec<OptionId>>,
    dedup_hits: u64,
}

impl Default for OptionKeyStore {
    fn default() -> Self {
        Self {
            options: Vec::new(),
            buckets: AHashMap::new(),
            dedup_hits: 0,
        }
    }
}

impl OptionKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with room for `capacity` options; fails if the
    /// allocation cannot be satisfied
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut store = Self::default();
        store.options.try_reserve(capacity).map_err(|e| {
            KsError::RuleTreeError(format!("cannot allocate option store: {}", e))
        })?;
        store.buckets.try_reserve(capacity).map_err(|e| {
            KsError::RuleTreeError(format!("cannot allocate option store: {}", e))
        })?;
        Ok(store)
    }

    /// Return the canonical instance equal to `data`, inserting it when
    /// none exists. The flag is true when an existing instance was reused
    /// and `data` was discarded.
    pub fn canonicalize(&mut self, data: OptionData) -> Result<(OptionId, bool)> {
        let kind = data.kind();
        let key = (kind, data.option_hash());

        if let Some(ids) = self.buckets.get(&key) {
            if let Some(&existing) = ids
                .iter()
                .find(|id| self.options[id.index()].option_eq(&data))
            {
                self.dedup_hits += 1;
                trace!("Reusing {} option {:?}", kind, existing);
                return Ok((existing, true));
            }
        }

        let id = u32::try_from(self.options.len())
            .map(OptionId)
            .map_err(|_| KsError::RuleTreeError("option store is full".to_string()))?;
        self.options.push(data);
        self.buckets.entry(key).or_default().push(id);
        Ok((id, false))
    }

    pub fn get(&self, id: OptionId) -> Option<&OptionData> {
        self.options.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Number of insertions answered with an existing instance
    pub fn dedup_hits(&self) -> u64 {
        self.dedup_hits
    }

    /// Release every option instance
    pub fn clear(&mut self) {
        debug!("Releasing {} option instances", self.options.len());
        self.options.clear();
        self.buckets.clear();
        self.dedup_hits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::options::{
        ContentModifiers, ContentOption, FieldCheck, FieldOp, PacketField, PcreOption,
    };

    fn content(pattern: &str, nocase: bool) -> OptionData {
        let mods = ContentModifiers {
            nocase,
            ..Default::default()
        };
        OptionData::Content(ContentOption::new(pattern.as_bytes().to_vec(), mods).unwrap())
    }

    #[test]
    fn test_equal_options_share_instance() {
        let mut store = OptionKeyStore::new();
        let (a, reused_a) = store.canonicalize(content("GET", false)).unwrap();
        let (b, reused_b) = store.canonicalize(content("GET", false)).unwrap();
        assert_eq!(a, b);
        assert!(!reused_a);
        assert!(reused_b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.dedup_hits(), 1);
    }

    #[test]
    fn test_modifiers_distinguish_options() {
        let mut store = OptionKeyStore::new();
        let (a, _) = store.canonicalize(content("GET", false)).unwrap();
        let (b, _) = store.canonicalize(content("GET", true)).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_kinds_never_merge() {
        let mut store = OptionKeyStore::new();
        let (ttl, _) = store
            .canonicalize(OptionData::Field(FieldCheck::new(PacketField::Ttl, FieldOp::Eq, 64)))
            .unwrap();
        let (tos, _) = store
            .canonicalize(OptionData::Field(FieldCheck::new(PacketField::Tos, FieldOp::Eq, 64)))
            .unwrap();
        assert_ne!(ttl, tos);
    }

    #[test]
    fn test_ftpbounce_instances_stay_distinct() {
        let mut store = OptionKeyStore::new();
        let (a, _) = store.canonicalize(OptionData::FtpBounce).unwrap();
        let (b, reused) = store.canonicalize(OptionData::FtpBounce).unwrap();
        assert_ne!(a, b);
        assert!(!reused);
    }

    #[test]
    fn test_pcre_dedup_and_clear() {
        let mut store = OptionKeyStore::with_capacity(16).unwrap();
        let (a, _) = store
            .canonicalize(OptionData::Pcre(PcreOption::parse("/admin/i").unwrap()))
            .unwrap();
        let (b, _) = store
            .canonicalize(OptionData::Pcre(PcreOption::parse("/admin/i").unwrap()))
            .unwrap();
        assert_eq!(a, b);
        assert!(store.get(a).is_some());

        store.clear();
        assert!(store.is_empty());
        assert!(store.get(a).is_none());
    }
}
