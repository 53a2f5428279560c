//! List reconciliation: applies a stream of typed entity events to an
//! in-memory ordered collection while preserving id-uniqueness and
//! selection integrity.
//!
//! The guarantees are per-id idempotency, not causal ordering: an update
//! arriving after its matching delete is a safe no-op because the row is
//! already absent. Newest rows sit at the front; display layers may apply
//! their own sort/filter on top.

use std::sync::Arc;

use crate::session::{set_typed, KvStore};
use crate::types::{Customer, Estimate, Invoice, Lead};

/// A row that can live in a reconciled list.
pub trait EntityRow {
    fn entity_id(&self) -> &str;
}

impl EntityRow for Lead {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl EntityRow for Estimate {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl EntityRow for Invoice {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl EntityRow for Customer {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// A hydrated entity event, produced by the materializing subscriber.
#[derive(Debug, Clone)]
pub enum EntityEvent<T> {
    Insert(T),
    Update(T),
    Delete(String),
}

pub struct ListReconciler<T: EntityRow> {
    rows: Vec<T>,
    selected_id: Option<String>,
    store: Option<Arc<dyn KvStore>>,
    last_selected_key: Option<String>,
}

impl<T: EntityRow> ListReconciler<T> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            selected_id: None,
            store: None,
            last_selected_key: None,
        }
    }

    /// Persist the last selected id under `key` for session continuity.
    pub fn with_persistence(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            selected_id: None,
            store: Some(store),
            last_selected_key: Some(key.into()),
        }
    }

    /// Replace the collection wholesale (initial fetch).
    pub fn load(&mut self, rows: Vec<T>) {
        self.rows = rows;
        if let Some(sel) = self.selected_id.clone() {
            if self.index_of(&sel).is_none() {
                self.clear_selection();
            }
        }
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    pub fn select(&mut self, id: Option<String>) {
        self.selected_id = id.clone();
        if let (Some(store), Some(key)) = (&self.store, &self.last_selected_key) {
            match id {
                Some(id) => set_typed(store.as_ref(), key, &id),
                None => store.remove(key),
            }
        }
    }

    /// Apply one hydrated event.
    pub fn apply(&mut self, event: EntityEvent<T>) {
        match event {
            EntityEvent::Insert(row) => self.on_insert(row),
            EntityEvent::Update(row) => self.on_update(row),
            EntityEvent::Delete(id) => self.on_delete(&id),
        }
    }

    /// Idempotent insert: an existing id is replaced in place, otherwise
    /// the row is prepended (newest first).
    pub fn on_insert(&mut self, row: T) {
        match self.index_of(row.entity_id()) {
            Some(idx) => self.rows[idx] = row,
            None => self.rows.insert(0, row),
        }
    }

    /// In-place replace; an unknown id is a no-op (never an upsert).
    pub fn on_update(&mut self, row: T) {
        if let Some(idx) = self.index_of(row.entity_id()) {
            self.rows[idx] = row;
        }
    }

    /// Remove by id. Deleting the selected row clears both the live
    /// selection and the persisted last-selected pointer, so the view
    /// falls back to list-only.
    pub fn on_delete(&mut self, id: &str) {
        if let Some(idx) = self.index_of(id) {
            self.rows.remove(idx);
        }
        if self.selected_id.as_deref() == Some(id) {
            self.clear_selection();
        }
    }

    fn clear_selection(&mut self) {
        self.selected_id = None;
        if let (Some(store), Some(key)) = (&self.store, &self.last_selected_key) {
            store.remove(key);
        }
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.entity_id() == id)
    }
}

impl<T: EntityRow> Default for ListReconciler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{get_typed, MemoryStore};

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        label: String,
    }

    impl Row {
        fn new(id: &str, label: &str) -> Self {
            Self {
                id: id.to_string(),
                label: label.to_string(),
            }
        }
    }

    impl EntityRow for Row {
        fn entity_id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let mut list = ListReconciler::new();
        list.on_insert(Row::new("x", "first"));
        list.on_insert(Row::new("x", "again"));

        assert_eq!(list.rows().len(), 1);
        assert_eq!(list.rows()[0].label, "again");
    }

    #[test]
    fn test_insert_prepends() {
        let mut list = ListReconciler::new();
        list.on_insert(Row::new("a", ""));
        list.on_insert(Row::new("b", ""));
        assert_eq!(list.rows()[0].id, "b");
        assert_eq!(list.rows()[1].id, "a");
    }

    #[test]
    fn test_update_without_match_does_not_insert() {
        let mut list = ListReconciler::new();
        list.on_insert(Row::new("a", ""));
        list.on_update(Row::new("ghost", ""));
        assert_eq!(list.rows().len(), 1);
        assert_eq!(list.rows()[0].id, "a");
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut list = ListReconciler::new();
        list.on_insert(Row::new("a", "old"));
        list.on_insert(Row::new("b", ""));
        list.on_update(Row::new("a", "new"));

        assert_eq!(list.rows()[1].id, "a");
        assert_eq!(list.rows()[1].label, "new");
    }

    #[test]
    fn test_delete_clears_selection_and_persisted_pointer() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut list = ListReconciler::with_persistence(store.clone(), "lastSelectedLead");
        list.load(vec![Row::new("s", ""), Row::new("other", "")]);
        list.select(Some("s".to_string()));
        assert_eq!(
            get_typed::<String>(store.as_ref(), "lastSelectedLead"),
            Some("s".to_string())
        );

        list.on_delete("s");

        assert!(list.selected_id().is_none());
        assert!(get_typed::<String>(store.as_ref(), "lastSelectedLead").is_none());
        assert_eq!(list.rows().len(), 1);
    }

    #[test]
    fn test_delete_of_unselected_row_keeps_selection() {
        let mut list = ListReconciler::new();
        list.load(vec![Row::new("keep", ""), Row::new("drop", "")]);
        list.select(Some("keep".to_string()));
        list.on_delete("drop");
        assert_eq!(list.selected_id(), Some("keep"));
    }

    #[test]
    fn test_update_after_delete_is_noop() {
        let mut list = ListReconciler::new();
        list.on_insert(Row::new("a", ""));
        list.on_delete("a");
        list.on_update(Row::new("a", "late"));
        assert!(list.rows().is_empty());
    }
}
