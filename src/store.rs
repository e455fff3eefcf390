use chrono::{DateTime, Utc};

use crate::model::{Fact, FactId, OrigLink};

/// Error type for the storage collaborator
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("fact overlaps stored fact {0}")]
    Conflict(FactId),
    #[error("store rejected fact: {0}")]
    Rejected(String),
    #[error("io error: {0}")]
    Io(String),
}

/// The opaque persistence backend the editing core commits to.
///
/// `save` persists one fact and returns the stored version, which always
/// carries a freshly assigned identifier and no original link. `ignore_pks`
/// lists every pk in the same commit batch so the store does not flag them
/// as conflicting with each other mid-batch.
pub trait FactStore {
    fn save(&mut self, fact: &Fact, ignore_pks: &[FactId]) -> Result<Fact, StoreError>;

    /// Most recent stored fact starting before `ref_time` — used to seed an
    /// otherwise empty editing session.
    fn antecedent(&mut self, ref_time: DateTime<Utc>) -> Option<Fact>;
}

/// In-memory store: the reference backend for the test suite and a usable
/// scratch backend for hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    facts: Vec<Fact>,
    next_pk: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            facts: Vec::new(),
            next_pk: 0,
        }
    }

    /// Seed with already-stored facts; pks must be positive and unique.
    pub fn with_facts(facts: impl IntoIterator<Item = Fact>) -> Self {
        let mut store = MemoryStore::new();
        for fact in facts {
            debug_assert!(fact.pk.is_stored());
            store.next_pk = store.next_pk.max(fact.pk.0);
            store.facts.push(fact);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn by_pk(&self, pk: FactId) -> Option<&Fact> {
        self.facts.iter().find(|f| f.pk == pk)
    }

    fn overlaps(a: &Fact, b: &Fact) -> bool {
        let a_end = a.end.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let b_end = b.end.unwrap_or(DateTime::<Utc>::MAX_UTC);
        a.start < b_end && b.start < a_end
    }
}

impl FactStore for MemoryStore {
    fn save(&mut self, fact: &Fact, ignore_pks: &[FactId]) -> Result<Fact, StoreError> {
        if !fact.deleted {
            if let Some(existing) = self
                .facts
                .iter()
                .find(|f| f.pk != fact.pk && !ignore_pks.contains(&f.pk) && Self::overlaps(f, fact))
            {
                return Err(StoreError::Conflict(existing.pk));
            }
        }

        // The stored version supersedes whatever record carried the old pk.
        self.facts.retain(|f| f.pk != fact.pk);

        self.next_pk += 1;
        let mut saved = fact.copy_for_edit();
        saved.pk = FactId(self.next_pk);
        saved.orig = OrigLink::Unset;
        saved.dirty_reasons.clear();
        if !saved.deleted {
            self.facts.push(saved.clone());
        }
        Ok(saved)
    }

    fn antecedent(&mut self, ref_time: DateTime<Utc>) -> Option<Fact> {
        self.facts
            .iter()
            .filter(|f| f.start < ref_time)
            .max_by_key(|f| f.sort_key())
            .cloned()
    }
}
