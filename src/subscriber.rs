//! Materializing entity subscriber.
//!
//! Raw change events carry partial rows, so they are never handed to view
//! state directly. For every insert/update the subscriber re-fetches the
//! canonical joined row and only then emits a typed `EntityEvent`. A row
//! that vanished between the event and the refetch is silently dropped.
//!
//! Side channel: list rows embed denormalized customer fields, so an
//! update to a parent customer re-hydrates every child row of that
//! customer and emits an `Update` for each.
//!
//! Communication/activity log changes go through `subscribe_timeline`,
//! which projects the hydrated row straight into a `TimelineEvent`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::db::PortalDb;
use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::reconciler::EntityEvent;
use crate::timeline::{
    project_activity, project_call, project_email, project_sms, TimelineEvent,
};
use crate::types::{ChangeKind, Estimate, Invoice, Lead, Table, TimelineItem, TimelineKind};

type Fetch<T> = Arc<dyn Fn(&PortalDb, &str) -> Result<Option<T>, StoreError> + Send + Sync>;

/// Handle owning the subscription tasks. Dropping (or `close`-ing) it
/// aborts the tasks, which drops their feed subscriptions — no leaked
/// listeners.
pub struct SubscriberHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SubscriberHandle {
    pub(crate) fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    /// Tear the subscription down. Idempotent.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscribe to hydrated lead events, optionally scoped to one customer.
pub fn subscribe_leads(
    db: Arc<Mutex<PortalDb>>,
    feed: Arc<ChangeFeed>,
    scope: Option<String>,
    tx: UnboundedSender<EntityEvent<Lead>>,
) -> SubscriberHandle {
    subscribe_entities(db, feed, Table::Leads, scope, Arc::new(PortalDb::get_lead), tx)
}

/// Subscribe to hydrated estimate events.
pub fn subscribe_estimates(
    db: Arc<Mutex<PortalDb>>,
    feed: Arc<ChangeFeed>,
    scope: Option<String>,
    tx: UnboundedSender<EntityEvent<Estimate>>,
) -> SubscriberHandle {
    subscribe_entities(
        db,
        feed,
        Table::Estimates,
        scope,
        Arc::new(PortalDb::get_estimate),
        tx,
    )
}

/// Subscribe to hydrated invoice events.
pub fn subscribe_invoices(
    db: Arc<Mutex<PortalDb>>,
    feed: Arc<ChangeFeed>,
    scope: Option<String>,
    tx: UnboundedSender<EntityEvent<Invoice>>,
) -> SubscriberHandle {
    subscribe_entities(
        db,
        feed,
        Table::Invoices,
        scope,
        Arc::new(PortalDb::get_invoice),
        tx,
    )
}

/// Generic variant: one task follows the entity table, a second follows
/// `customers` for the parent-update side channel.
pub fn subscribe_entities<T: Send + 'static>(
    db: Arc<Mutex<PortalDb>>,
    feed: Arc<ChangeFeed>,
    table: Table,
    scope: Option<String>,
    fetch: Fetch<T>,
    tx: UnboundedSender<EntityEvent<T>>,
) -> SubscriberHandle {
    let entity_task = {
        let mut sub = feed.subscribe(table, scope.clone());
        let db = Arc::clone(&db);
        let fetch = Arc::clone(&fetch);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                let Some(id) = event.row_id().map(|s| s.to_string()) else {
                    continue;
                };
                match event.kind {
                    ChangeKind::Delete => {
                        if tx.send(EntityEvent::Delete(id)).is_err() {
                            break;
                        }
                    }
                    ChangeKind::Insert | ChangeKind::Update => {
                        let row = {
                            let db = db.lock();
                            fetch(&db, &id)
                        };
                        match row {
                            Ok(Some(row)) => {
                                let hydrated = match event.kind {
                                    ChangeKind::Insert => EntityEvent::Insert(row),
                                    _ => EntityEvent::Update(row),
                                };
                                if tx.send(hydrated).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {
                                // Row deleted between event and refetch
                                log::debug!("Dropping stale {table:?} event for {id}");
                            }
                            Err(e) => {
                                log::warn!("Refetch failed for {table:?} {id}: {e}");
                            }
                        }
                    }
                }
            }
        })
    };

    let customer_task = {
        let mut sub = feed.subscribe(Table::Customers, scope);
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                if event.kind != ChangeKind::Update {
                    continue;
                }
                let Some(customer_id) = event.row_id().map(|s| s.to_string()) else {
                    continue;
                };
                let rows = {
                    let db = db.lock();
                    db.child_ids(table, &customer_id).map(|ids| {
                        ids.iter()
                            .filter_map(|id| fetch(&db, id).ok().flatten())
                            .collect::<Vec<_>>()
                    })
                };
                match rows {
                    Ok(rows) => {
                        for row in rows {
                            if tx.send(EntityEvent::Update(row)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("Child refetch failed for customer {customer_id}: {e}");
                    }
                }
            }
        })
    };

    SubscriberHandle {
        tasks: vec![entity_task, customer_task],
    }
}

/// Subscribe to the four communication/activity log tables, projecting
/// each hydrated row into a `TimelineEvent` ready for `Timeline::apply`.
/// Optionally scoped to one customer, like the entity subscriptions.
pub fn subscribe_timeline(
    db: Arc<Mutex<PortalDb>>,
    feed: Arc<ChangeFeed>,
    scope: Option<String>,
    tx: UnboundedSender<TimelineEvent>,
) -> SubscriberHandle {
    let tables = [
        Table::EmailLog,
        Table::SmsLog,
        Table::CallLog,
        Table::ActivityLog,
    ];
    let tasks = tables
        .into_iter()
        .map(|table| {
            let mut sub = feed.subscribe(table, scope.clone());
            let db = Arc::clone(&db);
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = sub.recv().await {
                    let Some(id) = event.row_id().map(|s| s.to_string()) else {
                        continue;
                    };
                    let out = match event.kind {
                        ChangeKind::Delete => Some(match table {
                            Table::EmailLog => TimelineEvent::Remove(id, TimelineKind::Email),
                            Table::SmsLog => TimelineEvent::Remove(id, TimelineKind::Sms),
                            Table::CallLog => TimelineEvent::Remove(id, TimelineKind::Call),
                            _ => TimelineEvent::RemoveBusiness(id),
                        }),
                        ChangeKind::Insert | ChangeKind::Update => {
                            let item = {
                                let db = db.lock();
                                project_log_row(&db, table, &id)
                            };
                            match item {
                                Ok(Some(item)) => Some(match event.kind {
                                    ChangeKind::Insert => TimelineEvent::Insert(item),
                                    _ => TimelineEvent::Update(item),
                                }),
                                Ok(None) => {
                                    // Row deleted between event and refetch
                                    log::debug!("Dropping stale {table:?} event for {id}");
                                    None
                                }
                                Err(e) => {
                                    log::warn!("Refetch failed for {table:?} {id}: {e}");
                                    None
                                }
                            }
                        }
                    };
                    if let Some(out) = out {
                        if tx.send(out).is_err() {
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    SubscriberHandle::new(tasks)
}

fn project_log_row(
    db: &PortalDb,
    table: Table,
    id: &str,
) -> Result<Option<TimelineItem>, StoreError> {
    Ok(match table {
        Table::EmailLog => db.get_email(id)?.map(|r| project_email(&r)),
        Table::SmsLog => db.get_sms(id)?.map(|r| project_sms(&r)),
        Table::CallLog => db.get_call(id)?.map(|r| project_call(&r)),
        Table::ActivityLog => db.get_activity(id)?.map(|r| project_activity(&r)),
        _ => None,
    })
}
