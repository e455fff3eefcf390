use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{DirtyReason, Fact, FactGroup, FactId};

/// Owns the full working set of facts (stored, edited copies, gap fills),
/// the focus pointer, and the claimed time spans used by rift detection.
///
/// Navigation returns `None` at a boundary and leaves the focus where it is —
/// callers treat that as "stay put", never as an error.
#[derive(Debug, Default)]
pub struct Timeline {
    group: FactGroup,
    curr: Option<FactId>,
    /// Time spans owned by stored originals, recorded at setup so a fact
    /// edited away from its slot does not read as a hole in the timeline.
    claimed: Vec<(DateTime<Utc>, Option<DateTime<Utc>>)>,
    /// Source of placeholder pks for synthesized facts. Strictly decreasing.
    next_placeholder: i64,
}

impl Timeline {
    pub fn new() -> Self {
        Timeline {
            group: FactGroup::new(),
            curr: None,
            claimed: Vec::new(),
            next_placeholder: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.group.iter()
    }

    pub fn group(&self) -> &FactGroup {
        &self.group
    }

    pub fn by_pk(&self, pk: FactId) -> Option<&Fact> {
        self.group.by_pk(pk)
    }

    pub fn contains_pk(&self, pk: FactId) -> bool {
        self.group.contains_pk(pk)
    }

    pub fn dirty_facts(&self) -> Vec<&Fact> {
        self.group.iter().filter(|f| f.dirty()).collect()
    }

    /// Fresh placeholder pk for a synthesized fact.
    pub fn fresh_placeholder_pk(&mut self) -> FactId {
        self.next_placeholder -= 1;
        FactId(self.next_placeholder)
    }

    pub fn add_facts(&mut self, facts: impl IntoIterator<Item = Fact>) {
        for fact in facts {
            self.group.add(fact);
        }
    }

    /// Replace the container's record for this pk (re-sorting when the time
    /// key moved), or insert it if the pk is new to the working set.
    pub fn update_fact(&mut self, fact: Fact) {
        match self.group.index_of(fact.pk) {
            Ok(idx) => {
                self.group.remove(idx);
                self.group.add(fact);
            }
            Err(_) => self.group.add(fact),
        }
    }

    // ------------------------------------------------------------------
    // Focus
    // ------------------------------------------------------------------

    pub fn curr_pk(&self) -> Option<FactId> {
        self.curr
    }

    pub fn curr_fact(&self) -> Option<&Fact> {
        self.curr.and_then(|pk| self.group.by_pk(pk))
    }

    pub fn curr_index(&self) -> Option<usize> {
        self.curr.and_then(|pk| self.group.index_of(pk).ok())
    }

    /// Point the focus at a fact already in the working set and refresh its
    /// transient neighbor ids.
    pub fn set_curr(&mut self, pk: FactId) {
        debug_assert!(self.group.contains_pk(pk));
        self.curr = Some(pk);
        self.link_neighbors(pk);
    }

    /// Maintain `prev_fact`/`next_fact` on the focused fact only.
    fn link_neighbors(&mut self, pk: FactId) {
        let Ok(idx) = self.group.index_of(pk) else {
            return;
        };
        let prev = idx.checked_sub(1).and_then(|i| self.group.get(i)).map(|f| f.pk);
        let next = self.group.get(idx + 1).map(|f| f.pk);
        if let Some(fact) = self.group.get_mut(idx) {
            fact.prev_fact = prev;
            fact.next_fact = next;
        }
    }

    /// First dirty fact in time order, falling back to the first fact.
    pub fn find_first_dirty(&self) -> Option<FactId> {
        self.group
            .iter()
            .find(|f| f.dirty())
            .or_else(|| self.group.first())
            .map(|f| f.pk)
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub fn jump_fact_dec(&mut self) -> Option<&Fact> {
        let idx = self.curr_index()?;
        let target = idx.checked_sub(1)?;
        self.focus_index(target)
    }

    pub fn jump_fact_inc(&mut self) -> Option<&Fact> {
        let idx = self.curr_index()?;
        let target = idx + 1;
        if target >= self.group.len() {
            return None;
        }
        self.focus_index(target)
    }

    /// Latest fact starting on an earlier calendar day.
    pub fn jump_day_dec(&mut self) -> Option<&Fact> {
        let curr_day = self.curr_fact()?.start.date_naive();
        let target = self
            .group
            .iter()
            .enumerate()
            .rev()
            .find(|(_, f)| f.start.date_naive() < curr_day)
            .map(|(i, _)| i)?;
        self.focus_index(target)
    }

    /// Earliest fact starting on a later calendar day.
    pub fn jump_day_inc(&mut self) -> Option<&Fact> {
        let curr_day = self.curr_fact()?.start.date_naive();
        let target = self
            .group
            .iter()
            .enumerate()
            .find(|(_, f)| f.start.date_naive() > curr_day)
            .map(|(i, _)| i)?;
        self.focus_index(target)
    }

    /// First fact of the contiguous run the focus sits in; if the focus is
    /// already there, the first fact of the run across the previous rift.
    pub fn jump_rift_dec(&mut self) -> Option<&Fact> {
        let idx = self.curr_index()?;
        let start = self.run_start(idx);
        let target = if start != idx {
            start
        } else {
            let prev = start.checked_sub(1)?;
            self.run_start(prev)
        };
        self.focus_index(target)
    }

    /// Final fact of the contiguous run the focus sits in; if the focus is
    /// already there, the final fact of the run across the next rift.
    pub fn jump_rift_inc(&mut self) -> Option<&Fact> {
        let idx = self.curr_index()?;
        let end = self.run_end(idx);
        let target = if end != idx {
            end
        } else {
            let next = end + 1;
            if next >= self.group.len() {
                return None;
            }
            self.run_end(next)
        };
        self.focus_index(target)
    }

    fn focus_index(&mut self, idx: usize) -> Option<&Fact> {
        let pk = self.group.get(idx)?.pk;
        self.set_curr(pk);
        self.group.get(idx)
    }

    fn contiguous(&self, i: usize) -> bool {
        match (self.group.get(i), self.group.get(i + 1)) {
            (Some(a), Some(b)) => a.end == Some(b.start),
            _ => false,
        }
    }

    fn run_start(&self, mut idx: usize) -> usize {
        while idx > 0 && self.contiguous(idx - 1) {
            idx -= 1;
        }
        idx
    }

    fn run_end(&self, mut idx: usize) -> usize {
        while self.contiguous(idx) {
            idx += 1;
        }
        idx
    }

    // ------------------------------------------------------------------
    // Rifts
    // ------------------------------------------------------------------

    /// Record a stored original's span as accounted for, so rift placement
    /// does not synthesize a filler where an edit moved a fact away.
    pub fn claim_time_span(&mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) {
        self.claimed.push((start, end));
    }

    fn span_claimed(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.claimed.iter().any(|(cs, ce)| match ce {
            Some(ce) => *cs <= start && *ce >= end,
            None => *cs <= start,
        })
    }

    /// Synthesize editable placeholder facts for every uncovered hole between
    /// adjacent facts, plus an ongoing placeholder after the final closed
    /// fact up to `now`.
    pub fn place_time_rifts(&mut self, now: DateTime<Utc>) {
        let mut rifts: Vec<(DateTime<Utc>, Option<DateTime<Utc>>)> = Vec::new();

        let facts = self.group.as_slice();
        for pair in facts.windows(2) {
            let (Some(prev_end), next_start) = (pair[0].end, pair[1].start) else {
                continue;
            };
            if prev_end < next_start && !self.span_claimed(prev_end, next_start) {
                rifts.push((prev_end, Some(next_start)));
            }
        }
        if let Some(last) = self.group.last()
            && let Some(last_end) = last.end
            && last_end < now
        {
            rifts.push((last_end, None));
        }

        for (start, end) in rifts {
            let pk = self.fresh_placeholder_pk();
            debug!(%pk, %start, "placing rift fact");
            let mut gap = Fact::new(pk, start, end);
            gap.dirty_reasons.insert(DirtyReason::IntervalGap);
            self.group.add(gap);
        }
    }
}
