use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::model::{DirtyReason, Fact, FactId, OrigLink, sorted_facts};
use crate::store::FactStore;

use super::clipboard::{Clipboard, PastedWhat};
use super::timeline::Timeline;
use super::undo::{EditKind, UndoStack};

/// Separator between descriptions when two facts are squashed into one.
const SQUASH_SEP: &str = "\n\n";

/// Error type for host-driven manager operations
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("fact {0} is not in the working set")]
    NotInWorkingSet(FactId),
}

/// Which fact boundary a time adjustment moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustWhich {
    Start,
    End,
    Both,
}

/// The fact-editing state machine.
///
/// Owns the working set (timeline), the undo/redo ledger, the clipboard, the
/// mapping of pending edits, and the arena of stored originals. Every
/// navigation, edit, undo and save operation goes through here; nothing else
/// mutates `edit_facts` or the ledger.
///
/// Single-threaded by construction: operations run synchronously on the
/// host's dispatch thread, and the only blocking call is the final save.
pub struct EditsManager<S: FactStore> {
    store: S,
    timeline: Timeline,
    undo: UndoStack,
    clipboard: Clipboard,
    /// Facts with pending changes, keyed by pk. A fact that was never stored
    /// has nowhere else to live, so it stays here even when "clean".
    edit_facts: IndexMap<FactId, Fact>,
    /// Stored originals, archived on first edit or linked at setup. Values
    /// are always `IsOriginal`; edited copies link in by pk.
    orig_facts: IndexMap<FactId, Fact>,
    /// Pks the user must page through before a save is confirmable.
    verify_fact_pks: HashSet<FactId>,
    viewed_fact_pks: HashSet<FactId>,
    on_dirty: Option<Box<dyn FnMut()>>,
    on_error: Option<Box<dyn FnMut(&str)>>,
}

impl<S: FactStore> EditsManager<S> {
    pub fn new(store: S) -> Self {
        EditsManager {
            store,
            timeline: Timeline::new(),
            undo: UndoStack::new(),
            clipboard: Clipboard::new(),
            edit_facts: IndexMap::new(),
            orig_facts: IndexMap::new(),
            verify_fact_pks: HashSet::new(),
            viewed_fact_pks: HashSet::new(),
            on_dirty: None,
            on_error: None,
        }
    }

    pub fn with_facts(store: S, edit_facts: Vec<Fact>, orig_facts: Vec<Fact>) -> Self {
        let mut manager = EditsManager::new(store);
        manager.setup_editing(edit_facts, orig_facts);
        manager
    }

    /// Invoked after every committed change (never for a no-op edit).
    pub fn set_dirty_callback(&mut self, callback: impl FnMut() + 'static) {
        self.on_dirty = Some(Box::new(callback));
    }

    /// Invoked with a message when an individual save fails.
    pub fn set_error_callback(&mut self, callback: impl FnMut(&str) + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Initialize (or fully reset) editing state from a list of working
    /// facts and the stored originals they were derived from. Originals are
    /// archived in the arena and their time spans claimed; facts with no
    /// stored counterpart become their own original.
    pub fn setup_editing(&mut self, edit_facts: Vec<Fact>, orig_facts: Vec<Fact>) {
        self.timeline = Timeline::new();
        self.undo.clear();
        self.clipboard = Clipboard::new();
        self.edit_facts.clear();
        self.orig_facts.clear();

        let mut orig_lkup: IndexMap<FactId, Fact> =
            orig_facts.into_iter().map(|f| (f.pk, f)).collect();

        let mut working = Vec::with_capacity(edit_facts.len());
        for mut fact in edit_facts {
            debug_assert!(fact.orig.is_unset());
            match orig_lkup.swap_remove(&fact.pk) {
                Some(mut orig) => {
                    debug_assert!(orig.orig.is_unset());
                    orig.orig = OrigLink::IsOriginal;
                    self.timeline.claim_time_span(orig.start, orig.end);
                    fact.orig = OrigLink::Stored(orig.pk);
                    self.orig_facts.insert(orig.pk, orig);
                }
                None => fact.orig = OrigLink::IsOriginal,
            }
            working.push(fact);
        }

        self.verify_fact_pks = working.iter().map(|f| f.pk).collect();
        self.viewed_fact_pks = HashSet::new();

        for fact in &working {
            if fact.dirty() {
                self.edit_facts.insert(fact.pk, fact.copy_for_edit());
            }
        }
        self.timeline.add_facts(working);
    }

    /// Bring the carousel up: seed from the store when the load produced
    /// nothing (there is no empty carousel state), synthesize rift facts,
    /// and focus the first dirty fact. Returns the focused pk.
    pub fn stand_up(&mut self, now: DateTime<Utc>) -> Option<FactId> {
        if self.timeline.is_empty() {
            let mut latest = self.store.antecedent(now)?;
            debug_assert!(latest.orig.is_unset());
            latest.orig = OrigLink::IsOriginal;
            self.verify_fact_pks.insert(latest.pk);
            self.timeline.add_facts([latest]);
        }
        self.timeline.place_time_rifts(now);
        let first = self.timeline.find_first_dirty()?;
        self.focus(first);
        Some(first)
    }

    // ------------------------------------------------------------------
    // Focus & navigation
    // ------------------------------------------------------------------

    pub fn curr_fact(&self) -> Option<&Fact> {
        self.timeline.curr_fact()
    }

    /// The edited copy of the focused fact if one is pending, else the
    /// focused fact itself. Never mutate the result directly — go through
    /// `editable_fact` first.
    pub fn curr_edit(&self) -> Option<&Fact> {
        let curr = self.timeline.curr_fact()?;
        Some(self.edit_facts.get(&curr.pk).unwrap_or(curr))
    }

    /// The true stored original of the focused fact, or the fact itself when
    /// it has never been stored.
    pub fn curr_orig(&self) -> Option<&Fact> {
        let curr = self.timeline.curr_fact()?;
        Some(match curr.orig.stored_pk() {
            Some(opk) => self.orig_facts.get(&opk).unwrap_or(curr),
            None => curr,
        })
    }

    pub fn focus_fact(&mut self, pk: FactId) -> Result<(), EditError> {
        if !self.timeline.contains_pk(pk) {
            return Err(EditError::NotInWorkingSet(pk));
        }
        self.focus(pk);
        Ok(())
    }

    fn focus(&mut self, pk: FactId) {
        let before = self.timeline.curr_pk();
        self.timeline.set_curr(pk);
        self.note_focus(before, pk);
    }

    /// Focus bookkeeping: an actual change resets the paste cycle, and the
    /// fact counts as reviewed either way.
    fn note_focus(&mut self, before: Option<FactId>, pk: FactId) {
        if before != Some(pk) {
            self.clipboard.reset_paste();
        }
        self.viewed_fact_pks.insert(pk);
        debug!(fact = %pk, "focused");
    }

    pub fn jump_fact_dec(&mut self) -> Option<&Fact> {
        let before = self.timeline.curr_pk();
        let pk = self.timeline.jump_fact_dec()?.pk;
        self.note_focus(before, pk);
        self.timeline.by_pk(pk)
    }

    pub fn jump_fact_inc(&mut self) -> Option<&Fact> {
        let before = self.timeline.curr_pk();
        let pk = self.timeline.jump_fact_inc()?.pk;
        self.note_focus(before, pk);
        self.timeline.by_pk(pk)
    }

    pub fn jump_day_dec(&mut self) -> Option<&Fact> {
        let before = self.timeline.curr_pk();
        let pk = self.timeline.jump_day_dec()?.pk;
        self.note_focus(before, pk);
        self.timeline.by_pk(pk)
    }

    pub fn jump_day_inc(&mut self) -> Option<&Fact> {
        let before = self.timeline.curr_pk();
        let pk = self.timeline.jump_day_inc()?.pk;
        self.note_focus(before, pk);
        self.timeline.by_pk(pk)
    }

    pub fn jump_rift_dec(&mut self) -> Option<&Fact> {
        let before = self.timeline.curr_pk();
        let pk = self.timeline.jump_rift_dec()?.pk;
        self.note_focus(before, pk);
        self.timeline.by_pk(pk)
    }

    pub fn jump_rift_inc(&mut self) -> Option<&Fact> {
        let before = self.timeline.curr_pk();
        let pk = self.timeline.jump_rift_inc()?.pk;
        self.note_focus(before, pk);
        self.timeline.by_pk(pk)
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    // ------------------------------------------------------------------
    // Dirty-state queries
    // ------------------------------------------------------------------

    pub fn is_dirty(&self) -> bool {
        !self.edit_facts.is_empty()
    }

    pub fn edit_fact_count(&self) -> usize {
        self.edit_facts.len()
    }

    /// Position of the focused fact among the pending edits, time-ordered.
    pub fn edit_fact_index(&self) -> Option<usize> {
        let curr_pk = self.timeline.curr_pk()?;
        sorted_facts(self.edit_facts.values().cloned())
            .iter()
            .position(|f| f.pk == curr_pk)
    }

    /// Whether every fact loaded at setup has been paged through at least
    /// once — the review gate before a save is confirmable.
    pub fn user_viewed_all_new_facts(&self) -> bool {
        self.verify_fact_pks.is_subset(&self.viewed_fact_pks)
    }

    pub fn undo_count(&self) -> usize {
        self.undo.undo_len()
    }

    // ------------------------------------------------------------------
    // Copy-on-write editing
    // ------------------------------------------------------------------

    /// The gateway through which all mutation must pass: returns a copy that
    /// is safe to mutate without touching the container, the original, or
    /// anything else, until `apply_edits` republishes it.
    pub fn editable_fact(&mut self) -> Option<Fact> {
        let pk = self.timeline.curr_pk()?;
        let target = self.timeline.by_pk(pk)?.clone();
        Some(self.editable_fact_from(&target))
    }

    fn editable_fact_from(&mut self, ref_fact: &Fact) -> Fact {
        debug!(fact = %ref_fact.pk, "editable copy requested");
        if let Some(edit) = self.edit_facts.get(&ref_fact.pk) {
            return edit.copy_for_edit();
        }
        let mut copy = ref_fact.copy_for_edit();
        match ref_fact.orig {
            OrigLink::Stored(opk) => {
                debug_assert!(self.orig_facts.contains_key(&opk));
                copy.orig = OrigLink::Stored(opk);
            }
            OrigLink::IsOriginal => {
                // First edit of a stored fact: archive its content so the
                // copy can link back to it. Never-stored facts stay their
                // own original.
                if ref_fact.pk.is_stored() {
                    self.orig_facts.entry(ref_fact.pk).or_insert_with(|| {
                        let mut orig = ref_fact.copy_for_edit();
                        orig.orig = OrigLink::IsOriginal;
                        orig
                    });
                    copy.orig = OrigLink::Stored(ref_fact.pk);
                }
            }
            OrigLink::Unset => {
                debug_assert!(false, "fact published without an original link");
                copy.orig = OrigLink::IsOriginal;
            }
        }
        copy
    }

    /// `editable_fact` plus a ledger snapshot: the pre-edit state is pushed
    /// under `what`; `apply_edits` pops it again if nothing changed.
    pub fn undoable_editable_fact(&mut self, what: EditKind) -> Option<Fact> {
        let edit_fact = self.editable_fact()?;
        self.undo.add_undoable(vec![edit_fact.copy_for_edit()], what);
        Some(edit_fact)
    }

    /// Commit a batch of mutated copies. `None` entries are edits a
    /// sub-operation decided not to produce. Fires the dirty callback once
    /// per call — never for a no-op batch.
    pub fn apply_edits(&mut self, edits: impl IntoIterator<Item = Option<Fact>>) {
        let edits: Vec<Fact> = edits.into_iter().flatten().collect();
        if self.recompose_lookups(edits) {
            return;
        }
        self.fire_dirty();
    }

    /// Returns true when the batch was a no-op and got pruned.
    fn recompose_lookups(&mut self, mut edits: Vec<Fact>) -> bool {
        if self.undo.remove_undo_if_nothing_changed(&edits) {
            return true;
        }
        for (idx, edit_fact) in edits.iter_mut().enumerate() {
            edit_fact.dirty_reasons.insert(DirtyReason::UnsavedFact);
            if idx == 0 {
                // The primary edit of the batch claims its slot for real:
                // un-tombstone and drop the gap highlight.
                edit_fact.dirty_reasons.remove(&DirtyReason::IntervalGap);
                edit_fact.deleted = false;
            }
        }
        // Ledger the facts as published, dirty markers included — these are
        // the states redo brings back.
        self.undo.attach_altered(&edits);
        for edit_fact in edits {
            self.update_edited_fact(edit_fact);
        }
        false
    }

    /// Republishing rule: still-dirty copies land in `edit_facts`; a copy
    /// edited back to match its snapshot is dropped from the mapping (a
    /// never-stored fact is always dirty and so never dropped). The
    /// container record refreshes regardless — display follows the latest
    /// content even transiently.
    fn update_edited_fact(&mut self, edit_fact: Fact) {
        if edit_fact.dirty() {
            self.edit_facts.insert(edit_fact.pk, edit_fact.copy_for_edit());
        } else {
            if let Some(opk) = edit_fact.orig.stored_pk() {
                debug_assert!(self.orig_facts.get(&opk).is_none_or(|o| !o.dirty()));
            }
            self.edit_facts.shift_remove(&edit_fact.pk);
        }
        self.timeline.update_fact(edit_fact);
    }

    // ------------------------------------------------------------------
    // Undo / redo
    // ------------------------------------------------------------------

    pub fn undo_last_edit(&mut self) -> Option<EditKind> {
        let entry = self.undo.pop_undo()?;
        self.restore_facts(&entry.pristine);
        let what = entry.what;
        self.undo.push_redo(entry);
        Some(what)
    }

    pub fn redo_last_undo(&mut self) -> Option<EditKind> {
        let entry = self.undo.pop_redo()?;
        debug_assert!(!entry.altered.is_empty());
        self.restore_facts(&entry.altered);
        let what = entry.what;
        self.undo.push_undo(entry);
        Some(what)
    }

    fn restore_facts(&mut self, restore_facts: &[Fact]) {
        if let Some(first) = restore_facts.first() {
            self.focus(first.pk);
        }
        for restore_fact in restore_facts {
            self.restore_edit_fact(restore_fact);
        }
        self.fire_dirty();
    }

    fn restore_edit_fact(&mut self, restore_fact: &Fact) {
        let mut edit_fact = self.editable_fact_from(restore_fact);
        edit_fact.restore_edited(restore_fact);
        debug_assert!(!restore_fact.orig.is_unset());
        self.update_edited_fact(edit_fact);
    }

    // ------------------------------------------------------------------
    // Clipboard
    // ------------------------------------------------------------------

    pub fn fact_copy_activity(&mut self) {
        if let Some(fact) = self.curr_edit().cloned() {
            self.clipboard.copy_activity(&fact);
        }
    }

    pub fn fact_copy_tags(&mut self) {
        if let Some(fact) = self.curr_edit().cloned() {
            self.clipboard.copy_tags(&fact);
        }
    }

    pub fn fact_copy_description(&mut self) {
        if let Some(fact) = self.curr_edit().cloned() {
            self.clipboard.copy_description(&fact);
        }
    }

    pub fn fact_copy_fact(&mut self) {
        if let Some(fact) = self.curr_edit().cloned() {
            self.clipboard.copy_fact(&fact);
        }
    }

    /// Paste the clipboard onto the focused fact. Repeated invocations
    /// without a focus change cycle through attribute categories; the ledger
    /// rewrite below keeps exactly one undo entry per paste gesture.
    pub fn paste_copied_meta(&mut self) -> Option<PastedWhat> {
        if !self.clipboard.has_content() {
            return None;
        }
        let mut edit_fact = self.undoable_editable_fact(EditKind::PasteCopied)?;

        let EditsManager { clipboard, undo, .. } = self;
        let pasted =
            clipboard.paste_copied_meta(&mut edit_fact, |fact| Self::reset_copied_meta(undo, fact));

        self.apply_edits([Some(edit_fact)]);
        pasted
    }

    /// Between cycle steps the fact rewinds to the state before the cycle
    /// began, so only one attribute differs from baseline at a time, and the
    /// ledger shows one entry per paste gesture rather than one per step.
    fn reset_copied_meta(undo: &mut UndoStack, edit_fact: &mut Fact) {
        // The most recent entry is the one this very paste call just pushed.
        let Some(latest) = undo.pop_undo() else {
            debug_assert!(false, "paste cycle with no pending undo entry");
            return;
        };
        debug_assert_eq!(latest.pristine.len(), 1);
        debug_assert_eq!(latest.pristine[0].pk, edit_fact.pk);

        // The entry before it holds the baseline from the cycle start. When
        // the previous step was pruned as a no-op there is no baseline entry
        // and nothing to rewind; the fact already sits at the baseline.
        let has_baseline = undo.peek_undo().is_some_and(|entry| {
            entry.what == EditKind::PasteCopied
                && !entry.altered.is_empty()
                && entry.pristine.first().is_some_and(|p| p.pk == edit_fact.pk)
        });
        if !has_baseline {
            undo.push_undo(latest);
            return;
        }
        let Some(before_paste) = undo.pop_undo() else {
            return;
        };
        debug_assert_eq!(before_paste.pristine.len(), 1);

        let baseline = &before_paste.pristine[0];
        edit_fact.activity = baseline.activity.clone();
        edit_fact.category = baseline.category.clone();
        edit_fact.tags = baseline.tags.clone();
        edit_fact.description = baseline.description.clone();
        debug_assert!(!edit_fact.orig.is_unset());

        // One fresh entry replaces both: pristine is the rewound fact, and
        // apply_edits fills in the altered side after the paste lands.
        undo.add_undoable(vec![edit_fact.copy_for_edit()], before_paste.what);
    }

    // ------------------------------------------------------------------
    // Time adjustment
    // ------------------------------------------------------------------

    /// Nudge the focused fact's start and/or end by `delta`, clamping so the
    /// interval never inverts, and dragging the abutting neighbor's boundary
    /// along when the facts are contiguous. One ledger entry, one batch.
    pub fn edit_time_adjust(&mut self, delta: TimeDelta, which: AdjustWhich) -> Option<()> {
        let mut edit_fact = self.editable_fact()?;
        let mut snapshots = vec![edit_fact.copy_for_edit()];
        let mut edit_prev: Option<Fact> = None;
        let mut edit_next: Option<Fact> = None;

        if matches!(which, AdjustWhich::Start | AdjustWhich::Both) {
            let old_start = edit_fact.start;
            let mut new_start = old_start + delta;
            if let Some(end) = edit_fact.end {
                new_start = new_start.min(end);
            }
            if let Some(mut prev) = self.editable_fact_prev(&edit_fact) {
                new_start = new_start.max(prev.start);
                if prev.end == Some(old_start) {
                    snapshots.push(prev.copy_for_edit());
                    prev.end = Some(new_start);
                    edit_prev = Some(prev);
                }
            }
            edit_fact.start = new_start;
        }

        if matches!(which, AdjustWhich::End | AdjustWhich::Both)
            && let Some(old_end) = edit_fact.end
        {
            let mut new_end = (old_end + delta).max(edit_fact.start);
            if let Some(mut next) = self.editable_fact_next(&edit_fact) {
                if let Some(next_end) = next.end {
                    new_end = new_end.min(next_end);
                }
                if next.start == old_end {
                    snapshots.push(next.copy_for_edit());
                    next.start = new_end;
                    edit_next = Some(next);
                }
            }
            edit_fact.end = Some(new_end);
        }

        self.undo.add_undoable(snapshots, EditKind::TimeAdjust);
        self.apply_edits([Some(edit_fact), edit_prev, edit_next]);
        Some(())
    }

    /// Editable copy of the fact before `edit_fact`, restoring focus after
    /// the detour. `None` at the first fact.
    pub fn editable_fact_prev(&mut self, edit_fact: &Fact) -> Option<Fact> {
        self.jump_fact_dec()?;
        let edit_prev = self.editable_fact();
        let back_pk = self.jump_fact_inc().map(|f| f.pk);
        debug_assert_eq!(back_pk, Some(edit_fact.pk));
        edit_prev
    }

    /// Editable copy of the fact after `edit_fact`; `None` at the last fact.
    pub fn editable_fact_next(&mut self, edit_fact: &Fact) -> Option<Fact> {
        self.jump_fact_inc()?;
        let edit_next = self.editable_fact();
        let back_pk = self.jump_fact_dec().map(|f| f.pk);
        debug_assert_eq!(back_pk, Some(edit_fact.pk));
        edit_next
    }

    // ------------------------------------------------------------------
    // Squash
    // ------------------------------------------------------------------

    /// Merge the focused ongoing fact with its never-stored successor. The
    /// successor is tombstoned and both land in one ledger entry.
    pub fn squash_with_next(&mut self) -> Option<()> {
        let mut edit_fact = self.editable_fact()?;
        if edit_fact.end.is_some() {
            return None;
        }
        let mut edit_next = self.editable_fact_next(&edit_fact)?;
        if edit_next.pk.is_stored() || edit_next.deleted {
            return None;
        }

        self.undo.add_undoable(
            vec![edit_fact.copy_for_edit(), edit_next.copy_for_edit()],
            EditKind::Squash,
        );
        edit_fact.squash(&mut edit_next, SQUASH_SEP);
        self.apply_edits([Some(edit_fact), Some(edit_next)]);
        Some(())
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Every dirty fact, time-ordered. Debug-asserts the dirty mapping and
    /// a scan of the container agree (untouched gap placeholders are not
    /// prepared — they are display artifacts until edited).
    pub fn prepared_facts(&self) -> Vec<Fact> {
        let prepared = sorted_facts(self.edit_facts.values().cloned());

        #[cfg(debug_assertions)]
        {
            let from_view: Vec<FactId> = self
                .timeline
                .facts()
                .filter(|f| {
                    f.dirty()
                        && !(f.is_gap() && !f.dirty_reasons.contains(&DirtyReason::UnsavedFact))
                })
                .map(|f| f.pk)
                .collect();
            let from_edit: Vec<FactId> = prepared.iter().map(|f| f.pk).collect();
            debug_assert_eq!(from_edit, from_view);
        }

        prepared
    }

    /// Commit every pending edit to the store.
    ///
    /// All-or-nothing per fact, NOT transactional across the batch: the
    /// first failing save reports through the error callback, halts the
    /// batch, and returns `None` with the in-memory dirty state untouched —
    /// the store may be left partially committed (keep it under revision
    /// control). On success every identifier was reassigned, so rather than
    /// patching links everywhere the manager resets itself around the saved
    /// fact that corresponds to the focus. Returns that fact plus the full
    /// saved batch.
    pub fn save_edited_facts(&mut self) -> Option<(Fact, Vec<Fact>)> {
        let curr_pk = self.timeline.curr_pk()?;
        let edited_facts = self.prepared_facts();
        if edited_facts.is_empty() {
            return self.timeline.curr_fact().cloned().map(|f| (f, Vec::new()));
        }

        let ignore_pks: Vec<FactId> = edited_facts.iter().map(|f| f.pk).collect();
        let mut saved_facts = Vec::with_capacity(edited_facts.len());
        let mut keep_fact: Option<Fact> = None;

        for edit_fact in &edited_facts {
            let new_fact = match self.store.save(edit_fact, &ignore_pks) {
                Ok(new_fact) => new_fact,
                Err(err) => {
                    // The store may now hold part of the batch. Leave the
                    // in-memory state alone so the user can retry.
                    self.fire_error(&format!("Failed to save fact!\n\n  \u{201c}{}\u{201d}", err));
                    return None;
                }
            };
            debug_assert!(new_fact.pk.is_stored());
            debug_assert!(new_fact.pk.0 >= edit_fact.pk.0);
            debug_assert!(new_fact.orig.is_unset());
            if edit_fact.pk == curr_pk {
                keep_fact = Some(new_fact.clone());
            }
            saved_facts.push(new_fact);
        }

        // Every pk changed, so every cross-reference in memory is stale.
        // Resetting around one fact beats patching links in the container,
        // the ledger, and both lookaside maps. Known sharp edge: unsaved
        // facts other than the kept one are dropped from the session.
        let mut keep_fact = keep_fact
            .or_else(|| self.timeline.curr_fact().cloned())
            .filter(|f| !f.deleted)
            .or_else(|| saved_facts.iter().find(|f| !f.deleted).cloned())?;
        keep_fact.orig = OrigLink::Unset;
        keep_fact.prev_fact = None;
        keep_fact.next_fact = None;

        self.setup_editing(vec![keep_fact.clone()], Vec::new());
        self.focus(keep_fact.pk);
        Some((keep_fact, saved_facts))
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    fn fire_dirty(&mut self) {
        if let Some(callback) = self.on_dirty.as_mut() {
            callback();
        }
    }

    fn fire_error(&mut self, message: &str) {
        warn!(%message, "save failed");
        if let Some(callback) = self.on_error.as_mut() {
            callback(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::cell::Cell;
    use std::rc::Rc;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 14, hour, 0, 0).unwrap()
    }

    fn stored_fact(pk: i64, start_h: u32, end_h: Option<u32>) -> Fact {
        let mut f = Fact::new(FactId(pk), at(start_h), end_h.map(at));
        f.activity = format!("activity-{}", pk);
        f
    }

    /// Two stored facts loaded clean, focus on the first.
    fn manager_with_two_facts() -> EditsManager<MemoryStore> {
        let facts = vec![stored_fact(1, 8, Some(9)), stored_fact(2, 10, Some(11))];
        let store = MemoryStore::with_facts(facts.clone());
        let mut manager = EditsManager::with_facts(store, facts, Vec::new());
        manager.focus_fact(FactId(1)).unwrap();
        manager
    }

    fn dirty_counter(manager: &mut EditsManager<MemoryStore>) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let probe = Rc::clone(&count);
        manager.set_dirty_callback(move || probe.set(probe.get() + 1));
        count
    }

    #[test]
    fn editable_fact_is_never_the_original_and_is_stable() {
        let mut manager = manager_with_two_facts();
        let first = manager.editable_fact().unwrap();
        let second = manager.editable_fact().unwrap();

        assert_eq!(first.orig, OrigLink::Stored(FactId(1)));
        assert!(first.same_content(&second));
        assert_eq!(first.pk, second.pk);

        // The archived original is untouched and marked as such.
        let orig = manager.curr_orig().unwrap();
        assert_eq!(orig.orig, OrigLink::IsOriginal);
    }

    #[test]
    fn apply_edits_publishes_and_fires_dirty_once() {
        let mut manager = manager_with_two_facts();
        let count = dirty_counter(&mut manager);

        let mut edit = manager.undoable_editable_fact(EditKind::Edit).unwrap();
        edit.description = Some("reviewed".into());
        manager.apply_edits([Some(edit)]);

        assert_eq!(count.get(), 1);
        assert!(manager.is_dirty());
        assert_eq!(manager.edit_fact_count(), 1);
        assert_eq!(
            manager.curr_edit().unwrap().description.as_deref(),
            Some("reviewed")
        );
        assert!(
            manager
                .curr_edit()
                .unwrap()
                .dirty_reasons
                .contains(&DirtyReason::UnsavedFact)
        );
        // The container shows the edited content too.
        assert_eq!(
            manager
                .timeline()
                .by_pk(FactId(1))
                .unwrap()
                .description
                .as_deref(),
            Some("reviewed")
        );
    }

    #[test]
    fn noop_edit_leaves_no_trace() {
        let mut manager = manager_with_two_facts();
        let count = dirty_counter(&mut manager);

        let edit = manager.undoable_editable_fact(EditKind::Edit).unwrap();
        manager.apply_edits([Some(edit)]);

        assert_eq!(count.get(), 0);
        assert_eq!(manager.undo_count(), 0);
        assert!(!manager.is_dirty());
    }

    #[test]
    fn undo_then_redo_round_trips_content_and_focus() {
        let mut manager = manager_with_two_facts();

        let mut edit = manager.undoable_editable_fact(EditKind::Edit).unwrap();
        edit.description = Some("take one".into());
        manager.apply_edits([Some(edit)]);

        // Wander off, then undo: focus returns to the restored fact.
        manager.jump_fact_inc().unwrap();
        assert_eq!(manager.undo_last_edit(), Some(EditKind::Edit));
        assert_eq!(manager.curr_fact().unwrap().pk, FactId(1));
        assert_eq!(manager.curr_edit().unwrap().description, None);
        assert!(!manager.is_dirty());

        assert_eq!(manager.redo_last_undo(), Some(EditKind::Edit));
        assert_eq!(manager.curr_fact().unwrap().pk, FactId(1));
        assert_eq!(
            manager.curr_edit().unwrap().description.as_deref(),
            Some("take one")
        );
        assert!(manager.is_dirty());
    }

    #[test]
    fn redone_edit_stays_pending_for_save() {
        let mut manager = manager_with_two_facts();
        let mut edit = manager.undoable_editable_fact(EditKind::Edit).unwrap();
        edit.description = Some("reviewed".into());
        manager.apply_edits([Some(edit)]);

        manager.undo_last_edit().unwrap();
        manager.redo_last_undo().unwrap();

        // The redone edit carries its dirty marker, so the save pass still
        // picks it up.
        assert!(manager.is_dirty());
        assert!(
            manager
                .curr_edit()
                .unwrap()
                .dirty_reasons
                .contains(&DirtyReason::UnsavedFact)
        );
        let (_, saved_facts) = manager.save_edited_facts().unwrap();
        assert_eq!(saved_facts.len(), 1);
        assert_eq!(saved_facts[0].description.as_deref(), Some("reviewed"));
    }

    #[test]
    fn paste_cycle_keeps_one_undo_entry() {
        let mut manager = manager_with_two_facts();

        // Give fact 2 tags and a description, copy it whole, then paste
        // onto fact 1 four times.
        manager.jump_fact_inc().unwrap();
        let mut donor_edit = manager.undoable_editable_fact(EditKind::Edit).unwrap();
        donor_edit.tags.insert("copied".into());
        donor_edit.description = Some("donor notes".into());
        manager.apply_edits([Some(donor_edit)]);
        manager.fact_copy_fact();

        manager.jump_fact_dec().unwrap();
        let undo_before = manager.undo_count();

        assert_eq!(manager.paste_copied_meta(), Some(PastedWhat::Activity));
        assert_eq!(manager.paste_copied_meta(), Some(PastedWhat::Tags));
        assert_eq!(manager.paste_copied_meta(), Some(PastedWhat::Description));
        assert_eq!(manager.paste_copied_meta(), Some(PastedWhat::Everything));

        // Four gestures, one logical paste: a single ledger entry.
        assert_eq!(manager.undo_count(), undo_before + 1);
        let fact = manager.curr_edit().unwrap();
        assert_eq!(fact.activity, "activity-2");
        assert!(fact.tags.contains("copied"));
        assert_eq!(fact.description.as_deref(), Some("donor notes"));
    }

    #[test]
    fn paste_cycle_steps_do_not_stack() {
        let mut manager = manager_with_two_facts();

        manager.jump_fact_inc().unwrap();
        let mut donor_edit = manager.undoable_editable_fact(EditKind::Edit).unwrap();
        donor_edit.tags.insert("copied".into());
        manager.apply_edits([Some(donor_edit)]);
        manager.fact_copy_fact();

        manager.jump_fact_dec().unwrap();
        manager.paste_copied_meta(); // activity
        let after_first = manager.curr_edit().unwrap().clone();
        assert_eq!(after_first.activity, "activity-2");

        manager.paste_copied_meta(); // tags — activity reverts to baseline
        let after_second = manager.curr_edit().unwrap();
        assert_eq!(after_second.activity, "activity-1");
        assert!(after_second.tags.contains("copied"));
    }

    #[test]
    fn focus_change_resets_the_paste_cycle() {
        let mut manager = manager_with_two_facts();
        manager.fact_copy_fact();
        manager.paste_copied_meta();

        manager.jump_fact_inc().unwrap();
        manager.jump_fact_dec().unwrap();

        // Back at the start of the cycle: first paste is activity again.
        assert_eq!(manager.paste_copied_meta(), Some(PastedWhat::Activity));
    }

    #[test]
    fn time_adjust_drags_contiguous_neighbor() {
        let facts = vec![stored_fact(1, 8, Some(10)), stored_fact(2, 10, Some(12))];
        let store = MemoryStore::with_facts(facts.clone());
        let mut manager = EditsManager::with_facts(store, facts, Vec::new());
        manager.focus_fact(FactId(2)).unwrap();

        manager
            .edit_time_adjust(TimeDelta::hours(1), AdjustWhich::Start)
            .unwrap();

        let moved = manager.timeline().by_pk(FactId(2)).unwrap();
        assert_eq!(moved.start, at(11));
        let neighbor = manager.timeline().by_pk(FactId(1)).unwrap();
        assert_eq!(neighbor.end, Some(at(11)));
        // One entry covers both facts.
        assert_eq!(manager.undo_count(), 1);

        manager.undo_last_edit().unwrap();
        assert_eq!(manager.timeline().by_pk(FactId(2)).unwrap().start, at(10));
        assert_eq!(
            manager.timeline().by_pk(FactId(1)).unwrap().end,
            Some(at(10))
        );
    }

    #[test]
    fn time_adjust_clamps_against_inversion() {
        let mut manager = manager_with_two_facts();
        manager
            .edit_time_adjust(TimeDelta::hours(5), AdjustWhich::Start)
            .unwrap();
        let fact = manager.timeline().by_pk(FactId(1)).unwrap();
        assert_eq!(fact.start, at(9)); // clamped to its own end
    }

    #[test]
    fn squash_with_next_merges_and_tombstones() {
        let mut ongoing = stored_fact(1, 8, None);
        ongoing.description = Some("before".into());
        let mut extra = stored_fact(-5, 10, None);
        extra.activity = "followup".into();
        extra.description = Some("after".into());

        let store = MemoryStore::new();
        let mut manager = EditsManager::with_facts(store, vec![ongoing, extra], Vec::new());
        manager.focus_fact(FactId(1)).unwrap();

        manager.squash_with_next().unwrap();

        let merged = manager.timeline().by_pk(FactId(1)).unwrap();
        assert_eq!(merged.end, Some(at(10)));
        assert_eq!(merged.activity, "followup");
        assert_eq!(merged.description.as_deref(), Some("before\n\nafter"));
        let tombstone = manager.timeline().by_pk(FactId(-5)).unwrap();
        assert!(tombstone.deleted);
        assert_eq!(manager.undo_count(), 1);
    }

    #[test]
    fn squash_requires_ongoing_focus_and_unstored_next() {
        let mut manager = manager_with_two_facts();
        // Focused fact has an end: refuse.
        assert_eq!(manager.squash_with_next(), None);
    }

    #[test]
    fn stand_up_seeds_from_store_when_empty() {
        let store = MemoryStore::with_facts([stored_fact(7, 8, Some(9))]);
        let mut manager = EditsManager::new(store);

        // The trailing rift fact covering 9:00 onward is the first dirty
        // fact, so it gets the focus.
        let focused = manager.stand_up(at(12)).unwrap();
        assert!(!focused.is_stored());
        assert!(manager.curr_fact().unwrap().is_gap());
        assert_eq!(manager.timeline().len(), 2);
        assert!(manager.timeline().contains_pk(FactId(7)));
    }

    #[test]
    fn viewed_tracking_gates_on_paging_through_everything() {
        let mut manager = manager_with_two_facts();
        assert!(!manager.user_viewed_all_new_facts());
        manager.jump_fact_inc().unwrap();
        assert!(manager.user_viewed_all_new_facts());
    }

    #[test]
    fn save_resets_to_single_kept_fact() {
        let mut manager = manager_with_two_facts();
        let mut edit = manager.undoable_editable_fact(EditKind::Edit).unwrap();
        edit.description = Some("edited".into());
        manager.apply_edits([Some(edit)]);

        let (keep_fact, saved_facts) = manager.save_edited_facts().unwrap();
        assert_eq!(saved_facts.len(), 1);
        assert!(keep_fact.pk.is_stored());
        assert_ne!(keep_fact.pk, FactId(1)); // fresh identifier

        assert_eq!(manager.timeline().len(), 1);
        assert!(!manager.is_dirty());
        assert_eq!(manager.undo_count(), 0);
        let only = manager.curr_fact().unwrap();
        assert_eq!(only.pk, keep_fact.pk);
        assert_eq!(only.orig, OrigLink::IsOriginal);
        assert_eq!(only.prev_fact, None);
    }

    #[test]
    fn save_with_nothing_dirty_keeps_current_fact() {
        let mut manager = manager_with_two_facts();
        let (keep_fact, saved_facts) = manager.save_edited_facts().unwrap();
        assert!(saved_facts.is_empty());
        assert_eq!(keep_fact.pk, FactId(1));
        assert_eq!(manager.timeline().len(), 2); // no reset
    }
}
