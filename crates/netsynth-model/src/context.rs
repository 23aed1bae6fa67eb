//! Selection context stack
//!
//! A persistent stack of [`SelectionTable`]s, innermost last. Lookups scan
//! from the innermost table outward and stop at the first entry for the key:
//! a selection (including [`Selection::Nothing`]) is returned, a cleared
//! entry reports the key as unset.
//!
//! Contexts are values. [`SelectionContext::with_table`] returns a new
//! context sharing every outer table with the original, which is how
//! recursive instantiation threads scoping through each call.

use crate::error::SelectionError;
use crate::requirements::InstanceRequirements;
use crate::selection::{Selection, SelectionEntry, SelectionKey, SelectionTable};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Proof of a push, consumed by the matching pop
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pushed scope must be popped with its handle"]
pub struct ScopeHandle {
    depth: usize,
}

impl ScopeHandle {
    /// Stack depth right after the push
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Stack of selection tables
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    frames: im::Vector<Arc<SelectionTable>>,
}

impl SelectionContext {
    /// Empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context holding a single table
    #[must_use]
    pub fn from_table(table: SelectionTable) -> Self {
        let mut context = Self::new();
        context.frames.push_back(Arc::new(table));
        context
    }

    /// Number of tables
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Push a table on top
    pub fn push(&mut self, table: SelectionTable) -> ScopeHandle {
        self.frames.push_back(Arc::new(table));
        ScopeHandle {
            depth: self.frames.len(),
        }
    }

    /// Pop the table pushed with `handle`
    ///
    /// # Errors
    /// [`SelectionError::ScopeMismatch`] if `handle` is not the top scope.
    pub fn pop(&mut self, handle: ScopeHandle) -> Result<Arc<SelectionTable>, SelectionError> {
        let depth = self.frames.len();
        if handle.depth != depth {
            return Err(SelectionError::ScopeMismatch {
                handle: handle.depth,
                depth,
            });
        }
        self.frames.pop_back().ok_or(SelectionError::ScopeMismatch {
            handle: handle.depth,
            depth,
        })
    }

    /// A new context with `table` on top of this one
    #[must_use]
    pub fn with_table(&self, table: SelectionTable) -> Self {
        let mut context = self.clone();
        if !table.is_empty() {
            context.frames.push_back(Arc::new(table));
        }
        context
    }

    /// Innermost visible selection for a key
    #[must_use]
    pub fn resolve(&self, key: &SelectionKey) -> Option<&Selection> {
        for frame in self.frames.iter().rev() {
            match frame.get(key) {
                Some(SelectionEntry::Selected(selection)) => return Some(selection),
                Some(SelectionEntry::Cleared) => return None,
                None => {}
            }
        }
        None
    }

    /// Follow model selections from `model` until none applies
    ///
    /// `Producer -> ProducerV2 -> ProducerV3` yields `ProducerV3`. Only
    /// component selections are followed.
    ///
    /// # Errors
    /// [`SelectionError::SelectionLoop`] if the chain comes back to a model.
    pub fn resolve_chain(&self, model: &str) -> Result<String, SelectionError> {
        let mut visited = BTreeSet::from([model.to_string()]);
        let mut current = model.to_string();
        while let Some(Selection::Component(next)) =
            self.resolve(&SelectionKey::model(current.as_str()))
        {
            if *next == current {
                break;
            }
            if !visited.insert(next.clone()) {
                return Err(SelectionError::SelectionLoop(next.clone()));
            }
            current = next.clone();
        }
        Ok(current)
    }

    /// Flattened view with the same precedence as [`SelectionContext::resolve`]
    #[must_use]
    pub fn current_state(&self) -> SelectionTable {
        let mut state = SelectionTable::new();
        for frame in &self.frames {
            for (key, entry) in frame.iter() {
                state.set_entry(key.clone(), entry.clone());
            }
        }
        state.drop_cleared();
        for frame in self.frames.iter().rev() {
            for (from, to) in frame.overrides() {
                state.push_override(from.clone(), to.clone());
            }
        }
        state
    }

    /// Innermost override registered for `requirements`
    #[must_use]
    pub fn direct_selection_for(
        &self,
        requirements: &InstanceRequirements,
    ) -> Option<&InstanceRequirements> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.direct_selection_for(requirements))
    }
}
