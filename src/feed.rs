//! Change-feed bus: per-table subscriptions over raw row change events.
//!
//! The backing store emits a `ChangeEvent` after every committed mutation;
//! the bus fans each event out to live subscriptions for that table. A
//! subscription may be scoped to one customer, in which case only events
//! whose row belongs to that customer are delivered. Raw events carry
//! partial rows only — consumers re-fetch the canonical joined shape
//! before touching any view state (see `subscriber`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::{ChangeEvent, Table};

struct SubEntry {
    id: u64,
    scope: Option<String>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// Fan-out hub for raw change events.
pub struct ChangeFeed {
    subscribers: Mutex<HashMap<Table, Vec<SubEntry>>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Open a subscription to one table, optionally scoped to a customer id.
    ///
    /// For the `customers` table the scope matches the customer row itself;
    /// for child tables it matches the row's owning `customer_id`.
    pub fn subscribe(self: &Arc<Self>, table: Table, scope: Option<String>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .entry(table)
            .or_default()
            .push(SubEntry { id, scope, tx });
        log::debug!("Change feed: opened subscription {} on {:?}", id, table);
        Subscription {
            rx,
            feed: Arc::clone(self),
            table,
            id,
        }
    }

    /// Deliver an event to every matching live subscription.
    ///
    /// Closed receivers are pruned lazily here rather than on drop alone, so
    /// a leaked handle never wedges the sender side.
    pub fn emit(&self, event: ChangeEvent) {
        let mut subs = self.subscribers.lock();
        let Some(entries) = subs.get_mut(&event.table) else {
            return;
        };
        entries.retain(|entry| {
            if !entry_matches(entry, &event) {
                return !entry.tx.is_closed();
            }
            entry.tx.send(event.clone()).is_ok()
        });
    }

    fn unsubscribe(&self, table: Table, id: u64) {
        let mut subs = self.subscribers.lock();
        if let Some(entries) = subs.get_mut(&table) {
            entries.retain(|e| e.id != id);
        }
        log::debug!("Change feed: closed subscription {} on {:?}", id, table);
    }

    /// Number of live subscriptions on a table (test/diagnostic helper).
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.subscribers
            .lock()
            .get(&table)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

fn entry_matches(entry: &SubEntry, event: &ChangeEvent) -> bool {
    let Some(scope) = entry.scope.as_deref() else {
        return true;
    };
    if event.table == Table::Customers {
        return event.row_id() == Some(scope);
    }
    event.customer_id() == Some(scope)
}

/// A live change-feed subscription. Dropping it tears the listener down.
pub struct Subscription {
    pub rx: mpsc::UnboundedReceiver<ChangeEvent>,
    feed: Arc<ChangeFeed>,
    table: Table,
    id: u64,
}

impl Subscription {
    /// Receive the next event, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.feed.unsubscribe(self.table, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, PartialRow};

    fn insert_event(table: Table, id: &str, customer_id: Option<&str>) -> ChangeEvent {
        ChangeEvent {
            table,
            kind: ChangeKind::Insert,
            new: Some(PartialRow {
                id: id.to_string(),
                customer_id: customer_id.map(|s| s.to_string()),
            }),
            old: None,
        }
    }

    #[tokio::test]
    async fn test_unscoped_subscription_receives_all() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe(Table::Leads, None);

        feed.emit(insert_event(Table::Leads, "l1", Some("c1")));
        feed.emit(insert_event(Table::Leads, "l2", Some("c2")));

        assert_eq!(sub.recv().await.unwrap().row_id(), Some("l1"));
        assert_eq!(sub.recv().await.unwrap().row_id(), Some("l2"));
    }

    #[tokio::test]
    async fn test_scope_filters_by_customer() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe(Table::Invoices, Some("c1".to_string()));

        feed.emit(insert_event(Table::Invoices, "i-other", Some("c2")));
        feed.emit(insert_event(Table::Invoices, "i-mine", Some("c1")));

        assert_eq!(sub.recv().await.unwrap().row_id(), Some("i-mine"));
    }

    #[tokio::test]
    async fn test_customer_scope_matches_row_id() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe(Table::Customers, Some("c1".to_string()));

        feed.emit(insert_event(Table::Customers, "c2", None));
        feed.emit(insert_event(Table::Customers, "c1", None));

        assert_eq!(sub.recv().await.unwrap().row_id(), Some("c1"));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let feed = ChangeFeed::new();
        let sub = feed.subscribe(Table::Leads, None);
        assert_eq!(feed.subscriber_count(Table::Leads), 1);
        drop(sub);
        assert_eq!(feed.subscriber_count(Table::Leads), 0);
    }

    #[tokio::test]
    async fn test_events_only_reach_matching_table() {
        let feed = ChangeFeed::new();
        let mut leads = feed.subscribe(Table::Leads, None);
        let mut invoices = feed.subscribe(Table::Invoices, None);

        feed.emit(insert_event(Table::Invoices, "i1", Some("c1")));
        assert_eq!(invoices.recv().await.unwrap().row_id(), Some("i1"));

        feed.emit(insert_event(Table::Leads, "l1", Some("c1")));
        assert_eq!(leads.recv().await.unwrap().row_id(), Some("l1"));
    }
}
