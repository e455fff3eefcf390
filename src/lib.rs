//! Fact-editing state machine for a time-tracking review carousel.
//!
//! The host drives a [`edit::EditsManager`] with navigation, edit, undo and
//! save calls; the manager owns the working set, the copy-on-write editing
//! pipeline, the undo/redo ledger and the clipboard, and commits through a
//! [`store::FactStore`] it never looks inside.

pub mod edit;
pub mod model;
pub mod store;
