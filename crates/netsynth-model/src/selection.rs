//! Dependency-injection selection tables
//!
//! One table is one level of selections: which implementation fills a child
//! role or stands in for a model. A table never holds two different
//! selections for the same key.

use crate::error::SelectionError;
use crate::requirements::InstanceRequirements;
use crate::types::TaskId;
use std::collections::BTreeMap;

/// What a selection applies to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SelectionKey {
    /// Child role name, possibly a dotted path into grandchildren
    Role(String),
    /// Component or ability model name
    Model(String),
}

impl SelectionKey {
    /// Key for a child role
    #[inline]
    #[must_use]
    pub fn role(name: impl Into<String>) -> Self {
        Self::Role(name.into())
    }

    /// Key for a model
    #[inline]
    #[must_use]
    pub fn model(name: impl Into<String>) -> Self {
        Self::Model(name.into())
    }

    /// Key name without its kind
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Role(name) | Self::Model(name) => name,
        }
    }
}

impl std::fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Role(name) => write!(f, "role `{name}`"),
            Self::Model(name) => write!(f, "model `{name}`"),
        }
    }
}

/// A replacement chosen for a key
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Instantiate this component model
    Component(String),
    /// Instantiate these requirements
    Requirements(Box<InstanceRequirements>),
    /// Reuse an existing task
    Task(TaskId),
    /// Use a specific bound service of a component
    Service {
        /// Component model
        component: String,
        /// Bound service name
        service: String,
    },
    /// Explicitly nothing, hiding inherited selections
    Nothing,
}

impl Selection {
    /// Component model selection
    #[inline]
    #[must_use]
    pub fn component(name: impl Into<String>) -> Self {
        Self::Component(name.into())
    }

    /// Requirements selection
    #[inline]
    #[must_use]
    pub fn requirements(requirements: InstanceRequirements) -> Self {
        Self::Requirements(Box::new(requirements))
    }

    /// Bound service selection
    #[inline]
    #[must_use]
    pub fn service(component: impl Into<String>, service: impl Into<String>) -> Self {
        Self::Service {
            component: component.into(),
            service: service.into(),
        }
    }

    /// Whether this is the explicit nothing sentinel
    #[inline]
    #[must_use]
    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Component(name) => f.write_str(name),
            Self::Requirements(requirements) => write!(f, "{requirements}"),
            Self::Task(id) => write!(f, "{id}"),
            Self::Service { component, service } => write!(f, "{component}.{service}_srv"),
            Self::Nothing => f.write_str("nothing"),
        }
    }
}

/// Table entry
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEntry {
    /// A selection visible to lookups
    Selected(Selection),
    /// Stops the lookup and reports the key as unset
    Cleared,
}

/// One level of dependency-injection selections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionTable {
    entries: BTreeMap<SelectionKey, SelectionEntry>,
    overrides: Vec<(InstanceRequirements, InstanceRequirements)>,
}

impl SelectionTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a selection
    ///
    /// Selecting the same value twice is a no-op.
    ///
    /// # Errors
    /// [`SelectionError::Conflict`] if the key already has a different entry.
    pub fn select(&mut self, key: SelectionKey, selection: Selection) -> Result<(), SelectionError> {
        match self.entries.get(&key) {
            Some(SelectionEntry::Selected(existing)) if *existing == selection => Ok(()),
            Some(existing) => Err(SelectionError::Conflict {
                key: key.to_string(),
                existing: entry_label(existing),
                new: selection.to_string(),
            }),
            None => {
                self.entries.insert(key, SelectionEntry::Selected(selection));
                Ok(())
            }
        }
    }

    /// Add a selection, builder style
    ///
    /// # Errors
    /// See [`SelectionTable::select`].
    pub fn with(mut self, key: SelectionKey, selection: Selection) -> Result<Self, SelectionError> {
        self.select(key, selection)?;
        Ok(self)
    }

    /// Hide the key from outer tables, replacing any entry it had here
    pub fn clear(&mut self, key: SelectionKey) {
        self.entries.insert(key, SelectionEntry::Cleared);
    }

    /// Register a whole-descriptor override
    ///
    /// # Errors
    /// [`SelectionError::OverrideConflict`] if `from` is already overridden
    /// with different requirements.
    pub fn override_requirements(
        &mut self,
        from: InstanceRequirements,
        to: InstanceRequirements,
    ) -> Result<(), SelectionError> {
        if let Some((_, existing)) = self.overrides.iter().find(|(f, _)| *f == from) {
            if *existing == to {
                return Ok(());
            }
            return Err(SelectionError::OverrideConflict {
                requirements: from.to_string(),
                existing: existing.to_string(),
                new: to.to_string(),
            });
        }
        self.overrides.push((from, to));
        Ok(())
    }

    /// Raw entry for a key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &SelectionKey) -> Option<&SelectionEntry> {
        self.entries.get(key)
    }

    /// Visible selection for a key
    #[must_use]
    pub fn selection(&self, key: &SelectionKey) -> Option<&Selection> {
        match self.entries.get(key) {
            Some(SelectionEntry::Selected(selection)) => Some(selection),
            _ => None,
        }
    }

    /// Override registered for a descriptor equal to `requirements`
    #[must_use]
    pub fn direct_selection_for(
        &self,
        requirements: &InstanceRequirements,
    ) -> Option<&InstanceRequirements> {
        self.overrides
            .iter()
            .find(|(from, _)| from == requirements)
            .map(|(_, to)| to)
    }

    /// Union with another table
    ///
    /// # Errors
    /// The first key or override on which the tables disagree.
    pub fn merge(&mut self, other: &SelectionTable) -> Result<(), SelectionError> {
        for (key, entry) in &other.entries {
            match entry {
                SelectionEntry::Selected(selection) => self.select(key.clone(), selection.clone())?,
                SelectionEntry::Cleared => self.clear(key.clone()),
            }
        }
        for (from, to) in &other.overrides {
            self.override_requirements(from.clone(), to.clone())?;
        }
        Ok(())
    }

    /// Selections below `role`, re-keyed relative to it
    ///
    /// `role.x` becomes `x`; every other key is left out.
    #[must_use]
    pub fn role_subtable(&self, role: &str) -> SelectionTable {
        let prefix = format!("{role}.");
        let entries = self
            .entries
            .iter()
            .filter_map(|(key, entry)| match key {
                SelectionKey::Role(path) => path
                    .strip_prefix(&prefix)
                    .map(|rest| (SelectionKey::role(rest), entry.clone())),
                SelectionKey::Model(_) => None,
            })
            .collect();
        SelectionTable {
            entries,
            overrides: Vec::new(),
        }
    }

    /// Set an entry, replacing whatever was there
    pub(crate) fn set_entry(&mut self, key: SelectionKey, entry: SelectionEntry) {
        self.entries.insert(key, entry);
    }

    /// Remove cleared entries
    pub(crate) fn drop_cleared(&mut self) {
        self.entries
            .retain(|_, entry| !matches!(entry, SelectionEntry::Cleared));
    }

    /// Requirement overrides, in registration order
    #[inline]
    #[must_use]
    pub fn overrides(&self) -> &[(InstanceRequirements, InstanceRequirements)] {
        &self.overrides
    }

    pub(crate) fn push_override(&mut self, from: InstanceRequirements, to: InstanceRequirements) {
        if !self.overrides.iter().any(|(f, _)| *f == from) {
            self.overrides.push((from, to));
        }
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&SelectionKey, &SelectionEntry)> {
        self.entries.iter()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entry and no override
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.overrides.is_empty()
    }
}

fn entry_label(entry: &SelectionEntry) -> String {
    match entry {
        SelectionEntry::Selected(selection) => selection.to_string(),
        SelectionEntry::Cleared => "cleared".to_string(),
    }
}
