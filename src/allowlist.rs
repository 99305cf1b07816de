//! Allowlist model and aggregation
//!
//! Resolved references from every approved entry are folded, in document
//! order, into one [`Allowlist`] keyed by source identity. Entries sharing an
//! identity contribute to the same reference map.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::pattern::SourceIdentity;

/// Metadata attached to one allowed reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefMetadata {
    pub expires_at: NaiveDate,
    /// Retained across re-pins (preserved wildcards)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keep: bool,
}

impl RefMetadata {
    pub fn expiring(expires_at: NaiveDate) -> Self {
        Self {
            expires_at,
            keep: false,
        }
    }

    pub fn kept(expires_at: NaiveDate) -> Self {
        Self {
            expires_at,
            keep: true,
        }
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expires_at < today
    }
}

/// Reference identifier (commit, digest, `*`, or tag alias) to metadata
pub type ReferenceMap = BTreeMap<String, RefMetadata>;

/// The full allowlist for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allowlist {
    entries: BTreeMap<String, ReferenceMap>,
}

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `refs` into the entry for `identity`; later metadata wins
    pub fn merge(&mut self, identity: &SourceIdentity, refs: ReferenceMap) {
        self.entries
            .entry(identity.as_str().to_string())
            .or_default()
            .extend(refs);
    }

    pub fn get(&self, identity: &str) -> Option<&ReferenceMap> {
        self.entries.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ReferenceMap)> {
        self.entries.iter()
    }

    /// Total number of references across all sources
    pub fn reference_count(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// `identity@reference` patterns still valid on `today`, sorted and
    /// deduplicated
    pub fn patterns(&self, today: NaiveDate) -> Vec<String> {
        let patterns: BTreeSet<String> = self
            .entries
            .iter()
            .flat_map(|(identity, refs)| {
                refs.iter()
                    .filter(|(_, meta)| !meta.is_expired(today))
                    .map(move |(reference, _)| format!("{}@{}", identity, reference))
            })
            .collect();
        patterns.into_iter().collect()
    }

    /// Render as the `actions.yml` document
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Per-cycle counts for the summary log line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Lines read from the document
    pub entries: usize,
    /// Lines rejected by the parser
    pub malformed: usize,
    /// Lines that parsed but could not be resolved
    pub unresolved: usize,
    /// Lines whose references were merged
    pub resolved: usize,
}

impl CycleReport {
    pub fn skipped(&self) -> usize {
        self.malformed + self.unresolved
    }
}

/// Single-writer fold of resolution results into an [`Allowlist`]
#[derive(Debug, Default)]
pub struct AllowlistAggregator {
    allowlist: Allowlist,
    report: CycleReport,
}

impl AllowlistAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a line the parser rejected
    pub fn record_malformed(&mut self) {
        self.report.entries += 1;
        self.report.malformed += 1;
    }

    /// Fold one entry's result; `None` contributes nothing
    pub fn add(&mut self, identity: &SourceIdentity, resolved: Option<ReferenceMap>) {
        self.report.entries += 1;
        match resolved {
            Some(refs) => {
                self.allowlist.merge(identity, refs);
                self.report.resolved += 1;
            }
            None => self.report.unresolved += 1,
        }
    }

    pub fn finish(self) -> (Allowlist, CycleReport) {
        (self.allowlist, self.report)
    }
}

/// Aggregate `(identity, result)` pairs in order
pub fn aggregate<I>(results: I) -> Allowlist
where
    I: IntoIterator<Item = (SourceIdentity, Option<ReferenceMap>)>,
{
    let mut aggregator = AllowlistAggregator::new();
    for (identity, resolved) in results {
        aggregator.add(&identity, resolved);
    }
    aggregator.finish().0
}
