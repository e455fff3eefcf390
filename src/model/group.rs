use chrono::{DateTime, Utc};

use super::fact::{Fact, FactId};

/// Error type for container lookups
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("fact with pk {0} is not in the group")]
    NotFound(FactId),
}

/// A run of facts kept sorted by `(start, end)` at all times.
///
/// Lookup by identifier is a linear scan — fine at interactive scale, and it
/// keeps the container oblivious to pk reassignment. Groups themselves order
/// by their first fact's key, so a collection of groups can be sorted the
/// same way its members are.
#[derive(Debug, Clone, Default)]
pub struct FactGroup {
    facts: Vec<Fact>,
}

impl FactGroup {
    pub fn new() -> Self {
        FactGroup { facts: Vec::new() }
    }

    pub fn from_facts(facts: impl IntoIterator<Item = Fact>) -> Self {
        let mut group = FactGroup::new();
        for fact in facts {
            group.add(fact);
        }
        group
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Insert maintaining sort order. Equal keys insert after existing
    /// entries, so an edited copy lands next to the fact it shadows.
    pub fn add(&mut self, fact: Fact) {
        let pos = self.facts.partition_point(|f| f.sort_key() <= fact.sort_key());
        self.facts.insert(pos, fact);
    }

    /// Position of the fact with this pk. Identifier equality, not full
    /// equality — an edited copy is found at its original's slot.
    pub fn index_of(&self, pk: FactId) -> Result<usize, GroupError> {
        self.facts
            .iter()
            .position(|f| f.pk == pk)
            .ok_or(GroupError::NotFound(pk))
    }

    pub fn get(&self, index: usize) -> Option<&Fact> {
        self.facts.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Fact> {
        self.facts.get_mut(index)
    }

    pub fn remove(&mut self, index: usize) -> Fact {
        self.facts.remove(index)
    }

    pub fn by_pk(&self, pk: FactId) -> Option<&Fact> {
        self.facts.iter().find(|f| f.pk == pk)
    }

    pub fn contains_pk(&self, pk: FactId) -> bool {
        self.facts.iter().any(|f| f.pk == pk)
    }

    /// First index whose key is not less than `key`.
    pub fn bisect_key_left(&self, key: (DateTime<Utc>, DateTime<Utc>)) -> usize {
        self.facts.partition_point(|f| f.sort_key() < key)
    }

    pub fn first(&self) -> Option<&Fact> {
        self.facts.first()
    }

    pub fn last(&self) -> Option<&Fact> {
        self.facts.last()
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.facts.first().map(|f| f.start)
    }

    pub fn final_time(&self) -> Option<DateTime<Utc>> {
        self.facts.last().and_then(|f| f.end)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Fact> {
        self.facts.iter()
    }

    pub fn as_slice(&self) -> &[Fact] {
        &self.facts
    }
}

impl<'a> IntoIterator for &'a FactGroup {
    type Item = &'a Fact;
    type IntoIter = std::slice::Iter<'a, Fact>;

    fn into_iter(self) -> Self::IntoIter {
        self.facts.iter()
    }
}

/// Groups compare by their first fact's key (container-of-containers
/// contract: grouping callers sort groups exactly like facts).
impl PartialEq for FactGroup {
    fn eq(&self, other: &Self) -> bool {
        (self.first_time(), self.final_time()) == (other.first_time(), other.final_time())
    }
}

impl PartialOrd for FactGroup {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        let lhs = self.first().map(Fact::sort_key);
        let rhs = other.first().map(Fact::sort_key);
        lhs.partial_cmp(&rhs)
    }
}

/// Facts sorted by time key, whatever order they arrive in.
pub fn sorted_facts(facts: impl IntoIterator<Item = Fact>) -> Vec<Fact> {
    let mut sorted: Vec<Fact> = facts.into_iter().collect();
    sorted.sort_by_key(Fact::sort_key);
    sorted
}
