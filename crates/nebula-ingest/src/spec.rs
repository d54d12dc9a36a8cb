//! Ingestion specs and their lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use nebula_common::{hash64, NebulaError, NebulaResult};
use nebula_meta::{DataFormat, NodeId};

/// Lifecycle state of a spec.
///
/// Legal transitions:
///
/// ```text
/// NEW ──assign──▶ ASSIGNED ──succeeded──▶ READY
///  ▲                  │                      │
///  └──demote──────────┘◀────affinity lost────┘
///
/// ASSIGNED ──rejected for good──▶ FAILED ──reassign──▶ NEW
/// ```
///
/// Anything else is a programming error and is treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecState {
    /// Enumerated but not yet placed on a node.
    New,
    /// Placed on a node; ingestion not yet confirmed.
    Assigned,
    /// At least one live block exists on the affinity node.
    Ready,
    /// A node permanently refused the spec.
    Failed,
}

impl SpecState {
    /// Returns true if moving `self -> to` is a legal transition.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::New, Self::Assigned)
                | (Self::Assigned, Self::Ready)
                | (Self::Assigned, Self::New)
                | (Self::Assigned, Self::Failed)
                | (Self::Ready, Self::New)
                | (Self::Failed, Self::New)
        )
    }
}

impl fmt::Display for SpecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Assigned => "ASSIGNED",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A deterministic unit of ingestion.
///
/// Derived from `(table, source, partition)`. The signature is the spec's
/// sole identity: equal across ticks for identical inputs, and never shared
/// by two distinct ingest units. Content freshness (`mtime`, `size`) is
/// deliberately *not* part of the signature — a changed partition keeps its
/// identity and is demoted for re-ingestion instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSpec {
    signature: String,
    table: String,
    source_index: usize,
    /// Concrete partition path behind the source template.
    uri: String,
    format: DataFormat,
    time_column: String,
    state: SpecState,
    affinity: Option<NodeId>,
    size: u64,
    mtime: u64,
    #[serde(skip)]
    last_sent_tick: Option<u64>,
    #[serde(skip)]
    failures: u32,
}

impl IngestSpec {
    /// Builds the stable signature for an ingest unit.
    ///
    /// The partition path is hashed rather than embedded so signatures stay
    /// short; collisions across distinct paths are caught by the repo at
    /// refresh time and treated as fatal.
    #[must_use]
    pub fn signature_of(table: &str, source_index: usize, uri: &str) -> String {
        format!("{}@{}/{:016x}", table, source_index, hash64(uri.as_bytes()))
    }

    /// Creates a spec in state `NEW`.
    pub fn new(
        table: impl Into<String>,
        source_index: usize,
        uri: impl Into<String>,
        format: DataFormat,
        time_column: impl Into<String>,
        size: u64,
        mtime: u64,
    ) -> Self {
        let table = table.into();
        let uri = uri.into();
        let signature = Self::signature_of(&table, source_index, &uri);
        Self {
            signature,
            table,
            source_index,
            uri,
            format,
            time_column: time_column.into(),
            state: SpecState::New,
            affinity: None,
            size,
            mtime,
            last_sent_tick: None,
            failures: 0,
        }
    }

    /// Stable identity.
    #[inline]
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Owning table.
    #[inline]
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Index of the source within the table definition.
    #[inline]
    #[must_use]
    pub const fn source_index(&self) -> usize {
        self.source_index
    }

    /// Concrete partition path.
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Payload format.
    #[inline]
    #[must_use]
    pub const fn format(&self) -> DataFormat {
        self.format
    }

    /// Event-time column.
    #[inline]
    #[must_use]
    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> SpecState {
        self.state
    }

    /// The node this spec is placed on, if any.
    #[inline]
    #[must_use]
    pub const fn affinity(&self) -> Option<&NodeId> {
        self.affinity.as_ref()
    }

    /// Estimated raw bytes post-ingest.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Source last-modified marker.
    #[inline]
    #[must_use]
    pub const fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Consecutive ingestion failures on the current affinity.
    #[inline]
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns true if the dispatcher should (re)send this spec's
    /// ingestion task in the given tick.
    ///
    /// A spec syncs when it is `ASSIGNED` and has not already been sent
    /// this tick — which also covers a spec that just left `NEW` through
    /// assignment.
    #[must_use]
    pub fn need_sync(&self, tick: u64) -> bool {
        self.state == SpecState::Assigned && self.last_sent_tick != Some(tick)
    }

    /// Moves to `state`, enforcing transition legality.
    pub fn set_state(&mut self, state: SpecState) -> NebulaResult<()> {
        if !self.state.can_transition(state) {
            return Err(NebulaError::invariant(format!(
                "illegal spec transition {} -> {} for {}",
                self.state, state, self.signature
            )));
        }
        self.state = state;
        Ok(())
    }

    /// Places the spec on a node. Legal by construction: callers only
    /// place specs that are `NEW` or re-affirm an existing placement.
    pub(crate) fn place(&mut self, node: NodeId) {
        if self.state == SpecState::New {
            self.state = SpecState::Assigned;
        }
        self.affinity = Some(node);
    }

    /// Drops back to `NEW` with no affinity, clearing dispatch bookkeeping.
    pub(crate) fn demote(&mut self) {
        self.state = SpecState::New;
        self.affinity = None;
        self.last_sent_tick = None;
        self.failures = 0;
    }

    pub(crate) fn refresh_content(&mut self, size: u64, mtime: u64) {
        self.size = size;
        self.mtime = mtime;
    }

    pub(crate) fn mark_sent(&mut self, tick: u64) {
        self.last_sent_tick = Some(tick);
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.failures += 1;
        self.failures
    }

    pub(crate) fn clear_failures(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> IngestSpec {
        IngestSpec::new(
            "events",
            0,
            "local:/data/events/part-0.csv",
            DataFormat::Csv,
            "ts",
            1024,
            77,
        )
    }

    #[test]
    fn test_signature_stable_and_injective() {
        let a = spec();
        let b = spec();
        assert_eq!(a.signature(), b.signature());

        let other = IngestSpec::new(
            "events",
            0,
            "local:/data/events/part-1.csv",
            DataFormat::Csv,
            "ts",
            1024,
            77,
        );
        assert_ne!(a.signature(), other.signature());

        // Content freshness does not affect identity.
        let fresher = IngestSpec::new(
            "events",
            0,
            "local:/data/events/part-0.csv",
            DataFormat::Csv,
            "ts",
            2048,
            99,
        );
        assert_eq!(a.signature(), fresher.signature());
    }

    #[test]
    fn test_legal_lifecycle_path() {
        let mut s = spec();
        s.place(NodeId::new("a", 9199));
        assert_eq!(s.state(), SpecState::Assigned);
        s.set_state(SpecState::Ready).unwrap();
        s.demote();
        assert_eq!(s.state(), SpecState::New);
        assert!(s.affinity().is_none());
    }

    #[test]
    fn test_illegal_transition_is_invariant() {
        let mut s = spec();
        let err = s.set_state(SpecState::Ready).unwrap_err();
        assert!(err.is_fatal());
        // State unchanged after the rejected transition.
        assert_eq!(s.state(), SpecState::New);
    }

    #[test]
    fn test_need_sync_per_tick() {
        let mut s = spec();
        assert!(!s.need_sync(1));
        s.place(NodeId::new("a", 9199));
        assert!(s.need_sync(1));
        s.mark_sent(1);
        assert!(!s.need_sync(1));
        assert!(s.need_sync(2));
        s.set_state(SpecState::Ready).unwrap();
        assert!(!s.need_sync(2));
    }
}
