use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the storage backend.
///
/// Positive ids come from the store. Zero and negative ids are placeholders
/// for facts that have never been saved (gap fills, imports, splits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactId(pub i64);

impl FactId {
    /// Whether this id was assigned by the store (as opposed to a placeholder).
    pub fn is_stored(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link from a working fact to its stored original.
///
/// `Stored(pk)` is an index into the manager-owned arena of originals, so
/// invalidating every link after a save is a matter of clearing ids rather
/// than chasing references. Only one level of tracking exists: facts in the
/// arena are always `IsOriginal`, never `Stored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrigLink {
    /// Not yet linked — only valid before setup publishes the fact.
    Unset,
    /// This fact is the original, unedited record.
    IsOriginal,
    /// This fact was copied from the stored original with this id.
    Stored(FactId),
}

impl OrigLink {
    pub fn is_unset(self) -> bool {
        matches!(self, OrigLink::Unset)
    }

    pub fn is_original(self) -> bool {
        matches!(self, OrigLink::IsOriginal)
    }

    /// The arena id, if this fact links to a stored original.
    pub fn stored_pk(self) -> Option<FactId> {
        match self {
            OrigLink::Stored(pk) => Some(pk),
            _ => None,
        }
    }
}

/// Why a working copy differs from its stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirtyReason {
    /// User edits not yet persisted.
    UnsavedFact,
    /// Result of merging an adjacent fact.
    Squash,
    /// Synthesized placeholder covering a hole in the timeline.
    IntervalGap,
    /// An ongoing fact was given an end.
    Stopped,
    /// The end boundary changed.
    End,
    /// Tombstoned as the second half of a squash.
    DeletedSquashed,
}

impl fmt::Display for DirtyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DirtyReason::UnsavedFact => "unsaved-fact",
            DirtyReason::Squash => "squash",
            DirtyReason::IntervalGap => "interval-gap",
            DirtyReason::Stopped => "stopped",
            DirtyReason::End => "end",
            DirtyReason::DeletedSquashed => "deleted-squashed",
        };
        f.write_str(s)
    }
}

/// One activity interval under review.
///
/// A fact is either the original loaded from the store or a working copy made
/// through the copy-on-write protocol. `prev_fact`/`next_fact` are transient
/// neighbor ids maintained only while the fact is focused; they never survive
/// a copy or a save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub pk: FactId,
    pub start: DateTime<Utc>,
    /// None = ongoing fact, still being tracked.
    pub end: Option<DateTime<Utc>>,
    pub activity: String,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub description: Option<String>,
    /// Tombstone; the fact is kept in the working set until save.
    pub deleted: bool,
    pub dirty_reasons: BTreeSet<DirtyReason>,
    pub orig: OrigLink,
    #[serde(skip)]
    pub prev_fact: Option<FactId>,
    #[serde(skip)]
    pub next_fact: Option<FactId>,
}

impl Fact {
    pub fn new(pk: FactId, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Fact {
            pk,
            start,
            end,
            activity: String::new(),
            category: None,
            tags: BTreeSet::new(),
            description: None,
            deleted: false,
            dirty_reasons: BTreeSet::new(),
            orig: OrigLink::Unset,
            prev_fact: None,
            next_fact: None,
        }
    }

    /// Clone for the copy-on-write protocol: keeps content, dirty reasons and
    /// the original link, drops the transient neighbor ids.
    pub fn copy_for_edit(&self) -> Fact {
        let mut copy = self.clone();
        copy.prev_fact = None;
        copy.next_fact = None;
        copy
    }

    /// Overwrite editable state from a ledger snapshot. Neighbor ids are left
    /// alone; the original link must already agree.
    pub fn restore_edited(&mut self, restore: &Fact) {
        debug_assert_eq!(self.orig, restore.orig);
        self.start = restore.start;
        self.end = restore.end;
        self.activity = restore.activity.clone();
        self.category = restore.category.clone();
        self.tags = restore.tags.clone();
        self.description = restore.description.clone();
        self.deleted = restore.deleted;
        self.dirty_reasons = restore.dirty_reasons.clone();
    }

    /// Value equality over the user-editable fields only. Identifiers, links
    /// and dirty bookkeeping are excluded, so a copy that has been edited back
    /// to match its snapshot compares equal. This is the single no-op test
    /// used by the undo-pruning logic.
    pub fn same_content(&self, other: &Fact) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.activity == other.activity
            && self.category == other.category
            && self.tags == other.tags
            && self.description == other.description
            && self.deleted == other.deleted
    }

    /// Sort key for the ordered container: `(start, end)` with ongoing facts
    /// ordering after any closed fact sharing the same start. Identifiers are
    /// deliberately excluded so edited copies sort with their originals.
    pub fn sort_key(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end.unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn dirty(&self) -> bool {
        self.unstored() || !self.dirty_reasons.is_empty()
    }

    pub fn unstored(&self) -> bool {
        !self.pk.is_stored()
    }

    pub fn is_gap(&self) -> bool {
        self.dirty_reasons.contains(&DirtyReason::IntervalGap)
    }

    /// The interval this fact covers; `(start, None)` while ongoing.
    pub fn time_span(&self) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        (self.start, self.end)
    }

    /// Merge an adjacent, never-stored fact into this ongoing one: its time
    /// becomes this fact's end, activity wins when present, tags union,
    /// descriptions concatenate with `sep`. The other fact is tombstoned but
    /// kept around so the save pass can verify the pair.
    pub fn squash(&mut self, other: &mut Fact, sep: &str) {
        debug_assert!(!other.pk.is_stored());
        debug_assert!(!self.deleted && !other.deleted);
        debug_assert!(self.end.is_none());

        self.end = Some(other.start);

        if !other.activity.is_empty() || other.category.is_some() {
            self.activity = other.activity.clone();
            self.category = other.category.clone();
        }

        self.tags.extend(other.tags.iter().cloned());
        self.squash_description(other, sep);

        self.dirty_reasons.insert(DirtyReason::Squash);
        self.dirty_reasons.insert(DirtyReason::Stopped);
        self.dirty_reasons.insert(DirtyReason::End);

        other.deleted = true;
        // Mirror the merged interval onto the tombstone so verification can
        // compare the pair directly.
        other.start = self.start;
        other.end = self.end;
        other.dirty_reasons.insert(DirtyReason::DeletedSquashed);
    }

    fn squash_description(&mut self, other: &mut Fact, sep: &str) {
        let Some(theirs) = other.description.take() else {
            return;
        };
        let merged = match self.description.take() {
            Some(ours) if !ours.is_empty() => format!("{}{}{}", ours, sep, theirs),
            _ => theirs,
        };
        self.description = Some(merged);
    }

    /// Short display form for logging: id plus interval.
    pub fn short(&self) -> String {
        match self.end {
            Some(end) => format!(
                "#{} {} to {}",
                self.pk,
                self.start.format("%Y-%m-%d %H:%M"),
                end.format("%H:%M")
            ),
            None => format!("#{} {} to <ongoing>", self.pk, self.start.format("%Y-%m-%d %H:%M")),
        }
    }
}

/// Equality matches the container's ordering contract: same `(start, end)`
/// key, nothing else. Two facts with different pks but the same interval are
/// equal on purpose.
impl PartialEq for Fact {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Fact {}

impl PartialOrd for Fact {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fact {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 14, hour, 0, 0).unwrap()
    }

    fn fact(pk: i64, start_h: u32, end_h: Option<u32>) -> Fact {
        let mut f = Fact::new(FactId(pk), at(start_h), end_h.map(at));
        f.activity = "work".into();
        f
    }

    #[test]
    fn ordering_ignores_pk() {
        let a = fact(1, 9, Some(10));
        let b = fact(99, 9, Some(10));
        assert_eq!(a, b);
        assert!(fact(1, 9, Some(10)) < fact(1, 9, Some(11)));
        assert!(fact(1, 9, Some(10)) < fact(1, 10, Some(11)));
    }

    #[test]
    fn ongoing_sorts_after_closed_with_same_start() {
        let closed = fact(1, 9, Some(23));
        let ongoing = fact(2, 9, None);
        assert!(closed < ongoing);
    }

    #[test]
    fn copy_for_edit_drops_neighbor_links() {
        let mut f = fact(1, 9, Some(10));
        f.prev_fact = Some(FactId(7));
        f.next_fact = Some(FactId(8));
        f.dirty_reasons.insert(DirtyReason::UnsavedFact);
        f.orig = OrigLink::Stored(FactId(1));

        let copy = f.copy_for_edit();
        assert_eq!(copy.prev_fact, None);
        assert_eq!(copy.next_fact, None);
        assert_eq!(copy.orig, OrigLink::Stored(FactId(1)));
        assert!(copy.dirty_reasons.contains(&DirtyReason::UnsavedFact));
    }

    #[test]
    fn same_content_excludes_bookkeeping() {
        let a = fact(1, 9, Some(10));
        let mut b = fact(42, 9, Some(10));
        b.dirty_reasons.insert(DirtyReason::UnsavedFact);
        b.orig = OrigLink::IsOriginal;
        assert!(a.same_content(&b));

        b.description = Some("changed".into());
        assert!(!a.same_content(&b));
    }

    #[test]
    fn dirty_when_unstored_or_flagged() {
        let stored = fact(1, 9, Some(10));
        assert!(!stored.dirty());

        let unstored = fact(-1, 9, Some(10));
        assert!(unstored.dirty());

        let mut flagged = fact(1, 9, Some(10));
        flagged.dirty_reasons.insert(DirtyReason::UnsavedFact);
        assert!(flagged.dirty());
    }

    #[test]
    fn restore_edited_round_trips_content() {
        let mut f = fact(1, 9, Some(10));
        f.orig = OrigLink::Stored(FactId(1));
        let snapshot = f.copy_for_edit();

        f.activity = "play".into();
        f.tags.insert("fun".into());
        f.deleted = true;
        assert!(!f.same_content(&snapshot));

        f.restore_edited(&snapshot);
        assert!(f.same_content(&snapshot));
        assert!(!f.deleted);
    }

    #[test]
    fn squash_merges_and_tombstones() {
        let mut ongoing = fact(1, 9, None);
        ongoing.description = Some("first".into());
        ongoing.tags.insert("a".into());

        let mut other = fact(-1, 11, None);
        other.activity = "late work".into();
        other.description = Some("second".into());
        other.tags.insert("b".into());

        ongoing.squash(&mut other, "\n\n");

        assert_eq!(ongoing.end, Some(at(11)));
        assert_eq!(ongoing.activity, "late work");
        assert_eq!(ongoing.description.as_deref(), Some("first\n\nsecond"));
        assert!(ongoing.tags.contains("a") && ongoing.tags.contains("b"));
        assert!(ongoing.dirty_reasons.contains(&DirtyReason::Squash));
        assert!(ongoing.dirty_reasons.contains(&DirtyReason::Stopped));

        assert!(other.deleted);
        assert_eq!(other.description, None);
        assert!(other.dirty_reasons.contains(&DirtyReason::DeletedSquashed));
        assert_eq!((other.start, other.end), (ongoing.start, ongoing.end));
    }

    #[test]
    fn squash_keeps_activity_when_other_is_blank() {
        let mut ongoing = fact(1, 9, None);
        let mut other = fact(-1, 11, None);
        other.activity = String::new();
        ongoing.squash(&mut other, "");
        assert_eq!(ongoing.activity, "work");
    }
}
