use std::fmt;

use crate::model::Fact;

const UNDO_STACK_LIMIT: usize = 500;

/// What kind of edit produced a ledger entry — shown in the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Attribute edit through the prompt surface.
    Edit,
    /// Paste of a copied attribute (or the whole clipboard fact).
    PasteCopied,
    /// Start/end nudge, possibly dragging a neighbor boundary.
    TimeAdjust,
    /// Merge of an ongoing fact with its successor.
    Squash,
}

impl fmt::Display for EditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EditKind::Edit => "edit",
            EditKind::PasteCopied => "paste-copied",
            EditKind::TimeAdjust => "time-adjust",
            EditKind::Squash => "squash",
        };
        f.write_str(s)
    }
}

/// One ledger entry: the snapshots taken before an edit and the states the
/// edit produced. `altered` stays empty until the edit is confirmed
/// non-trivial by `remove_undo_if_nothing_changed`.
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub pristine: Vec<Fact>,
    pub altered: Vec<Fact>,
    pub what: EditKind,
}

/// Two-stack undo/redo ledger over fact snapshots.
///
/// The stack never applies anything itself — the manager pops entries and
/// restores through its own copy-on-write pipeline, then hands the entry to
/// the opposite stack. Entries are committed in strict call order.
#[derive(Debug, Default)]
pub struct UndoStack {
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
}

impl UndoStack {
    pub fn new() -> Self {
        UndoStack::default()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Push pre-edit snapshots. Any new edit invalidates the redo stack.
    pub fn add_undoable(&mut self, pristine: Vec<Fact>, what: EditKind) {
        self.undo.push(UndoEntry {
            pristine,
            altered: Vec::new(),
            what,
        });
        if self.undo.len() > UNDO_STACK_LIMIT {
            self.undo.drain(..self.undo.len() - UNDO_STACK_LIMIT);
        }
        self.redo.clear();
    }

    /// Check the pending entry against the post-edit states. When every
    /// edited fact still matches its snapshot the entry is discarded and
    /// `true` comes back — the caller must not publish anything. Otherwise
    /// the entry stays; the caller attaches the altered states with
    /// `attach_altered` once its dirty bookkeeping is final.
    pub fn remove_undo_if_nothing_changed(&mut self, edits: &[Fact]) -> bool {
        let Some(entry) = self.undo.last() else {
            debug_assert!(edits.is_empty());
            return true;
        };
        let changed = edits.iter().any(|edit| {
            entry
                .pristine
                .iter()
                .find(|was| was.pk == edit.pk)
                .is_none_or(|was| !was.same_content(edit))
        });
        if !changed {
            self.undo.pop();
        }
        !changed
    }

    /// Record the final published states on the pending entry. These are
    /// what redo restores, so they must carry the dirty markers exactly as
    /// published.
    pub fn attach_altered(&mut self, edits: &[Fact]) {
        let Some(entry) = self.undo.last_mut() else {
            debug_assert!(false, "no pending entry to attach altered states to");
            return;
        };
        entry.altered = edits.iter().map(Fact::copy_for_edit).collect();
    }

    /// Pop the most recent entry for restoration; the caller pushes it back
    /// onto the redo side with `push_redo` once the facts are restored.
    pub fn pop_undo(&mut self) -> Option<UndoEntry> {
        self.undo.pop()
    }

    pub fn push_redo(&mut self, entry: UndoEntry) {
        self.redo.push(entry);
    }

    pub fn pop_redo(&mut self) -> Option<UndoEntry> {
        self.redo.pop()
    }

    /// Re-push an entry without clearing the redo stack — used by the
    /// paste-cycle rewrite, which pops and replaces its own entries.
    pub fn push_undo(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
    }

    pub fn peek_undo(&self) -> Option<&UndoEntry> {
        self.undo.last()
    }
}
