use crate::expense::ExpenseId;
use log::trace;
use std::collections::BTreeSet;

/// Multi-select over ledger entries, used for bulk actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    Inactive,
    Active(BTreeSet<ExpenseId>),
}

impl Selection {
    pub fn is_active(&self) -> bool {
        matches!(self, Selection::Active(_))
    }

    /// Enter select mode. There is nothing to select in an empty period, so this is a
    /// no-op (returning false) when `available` is zero.
    pub fn enter(&mut self, available: usize) -> bool {
        if available == 0 {
            return false;
        }

        if !self.is_active() {
            *self = Selection::Active(BTreeSet::new());
        }
        true
    }

    /// Leave select mode, dropping the selection
    pub fn exit(&mut self) {
        *self = Selection::Inactive;
    }

    /// Flip `id` in or out of the selection. Ignored unless select mode is active.
    pub fn toggle(&mut self, id: ExpenseId) {
        if let Selection::Active(ids) = self {
            if !ids.remove(&id) {
                trace!("selected {}", id);
                ids.insert(id);
            }
        }
    }

    pub fn is_selected(&self, id: &ExpenseId) -> bool {
        match self {
            Selection::Active(ids) => ids.contains(id),
            Selection::Inactive => false,
        }
    }

    pub fn selected(&self) -> Option<&BTreeSet<ExpenseId>> {
        match self {
            Selection::Active(ids) => Some(ids),
            Selection::Inactive => None,
        }
    }

    /// Hand the selection to a bulk action and leave select mode
    pub fn take(&mut self) -> BTreeSet<ExpenseId> {
        match std::mem::take(self) {
            Selection::Active(ids) => ids,
            Selection::Inactive => BTreeSet::new(),
        }
    }
}
