use std::fmt;

use crate::page::Page;

type UndoAction = Box<dyn FnOnce(&dyn Page)>;

/// Ledger of undo actions, replayed newest first.
#[derive(Default)]
pub struct UndoStack {
    actions: Vec<UndoAction>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: impl FnOnce(&dyn Page) + 'static) {
        self.actions.push(Box::new(action));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every recorded action against `page`, most recent first.
    pub fn unwind(&mut self, page: &dyn Page) {
        while let Some(action) = self.actions.pop() {
            action(page);
        }
    }
}

impl fmt::Debug for UndoStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoStack")
            .field("len", &self.actions.len())
            .finish()
    }
}
