use std::collections::BTreeSet;
use std::fmt;

use crate::model::Fact;

/// What the last copy gesture grabbed.
#[derive(Debug, Clone)]
pub enum ClipboardContent {
    Activity {
        activity: String,
        category: Option<String>,
    },
    Tags(BTreeSet<String>),
    Description(Option<String>),
    /// Whole fact — repeated pastes cycle through its attributes.
    Fact(Box<Fact>),
}

/// Which attributes a paste gesture applied — for the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PastedWhat {
    Activity,
    Tags,
    Description,
    Everything,
}

impl fmt::Display for PastedWhat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PastedWhat::Activity => "activity",
            PastedWhat::Tags => "tags",
            PastedWhat::Description => "description",
            PastedWhat::Everything => "everything",
        };
        f.write_str(s)
    }
}

/// Copy buffer with a paste cycle.
///
/// With a whole fact on the clipboard, repeated pastes without a focus change
/// walk activity → tags → description → everything. Between steps the caller
/// resets the fact to its pre-cycle baseline (see the manager's paste-cycle
/// rewrite), so exactly one attribute set differs from baseline at a time.
#[derive(Debug, Default)]
pub struct Clipboard {
    content: Option<ClipboardContent>,
    paste_cnt: usize,
}

impl Clipboard {
    pub fn new() -> Self {
        Clipboard::default()
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// True once at least one paste has landed since the cycle reset.
    pub fn mid_cycle(&self) -> bool {
        self.paste_cnt > 0
    }

    pub fn copy_activity(&mut self, fact: &Fact) {
        self.content = Some(ClipboardContent::Activity {
            activity: fact.activity.clone(),
            category: fact.category.clone(),
        });
        self.reset_paste();
    }

    pub fn copy_tags(&mut self, fact: &Fact) {
        self.content = Some(ClipboardContent::Tags(fact.tags.clone()));
        self.reset_paste();
    }

    pub fn copy_description(&mut self, fact: &Fact) {
        self.content = Some(ClipboardContent::Description(fact.description.clone()));
        self.reset_paste();
    }

    pub fn copy_fact(&mut self, fact: &Fact) {
        self.content = Some(ClipboardContent::Fact(Box::new(fact.copy_for_edit())));
        self.reset_paste();
    }

    /// Called whenever focus changes: the next paste starts a fresh cycle.
    pub fn reset_paste(&mut self) {
        self.paste_cnt = 0;
    }

    /// Apply the clipboard to `edit_fact`. `reset` is invoked before every
    /// step after the first, restoring the fact to the cycle baseline so the
    /// steps do not stack. Returns `None` when the clipboard is empty.
    pub fn paste_copied_meta(
        &mut self,
        edit_fact: &mut Fact,
        reset: impl FnOnce(&mut Fact),
    ) -> Option<PastedWhat> {
        let content = self.content.clone()?;
        if self.paste_cnt > 0 {
            reset(edit_fact);
        }
        let pasted = match &content {
            ClipboardContent::Activity { activity, category } => {
                edit_fact.activity = activity.clone();
                edit_fact.category = category.clone();
                PastedWhat::Activity
            }
            ClipboardContent::Tags(tags) => {
                edit_fact.tags = tags.clone();
                PastedWhat::Tags
            }
            ClipboardContent::Description(description) => {
                edit_fact.description = description.clone();
                PastedWhat::Description
            }
            ClipboardContent::Fact(copied) => match self.paste_cnt % 4 {
                0 => {
                    edit_fact.activity = copied.activity.clone();
                    edit_fact.category = copied.category.clone();
                    PastedWhat::Activity
                }
                1 => {
                    edit_fact.tags = copied.tags.clone();
                    PastedWhat::Tags
                }
                2 => {
                    edit_fact.description = copied.description.clone();
                    PastedWhat::Description
                }
                _ => {
                    edit_fact.activity = copied.activity.clone();
                    edit_fact.category = copied.category.clone();
                    edit_fact.tags = copied.tags.clone();
                    edit_fact.description = copied.description.clone();
                    PastedWhat::Everything
                }
            },
        };
        self.paste_cnt += 1;
        Some(pasted)
    }
}
