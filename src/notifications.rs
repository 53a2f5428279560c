//! Employee-portal notification aggregation.
//!
//! On demand (initial load plus a debounced realtime signal) the
//! aggregator unions five sources — unreplied inbound SMS, unreplied
//! inbound email, invoices created in the last 7 days, deposits paid in
//! the last 7 days, and `new` leads from the last 24 hours — into one
//! feed sorted descending by timestamp. Ids are source-prefixed and
//! stable across refetches so the persisted dismissed set keeps working.
//!
//! Realtime table changes never refetch per-event; they coalesce through
//! a 500 ms trailing debounce to bound request volume under bursty
//! writes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::params;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::db::PortalDb;
use crate::error::{PortalError, StoreError};
use crate::feed::ChangeFeed;
use crate::session::{get_typed, set_typed, KvStore};
use crate::subscriber::SubscriberHandle;
use crate::types::{NotificationKind, PortalNotification, Table};

/// Trailing window for invoice-created and deposit-paid notifications.
const INVOICE_WINDOW_DAYS: i64 = 7;
/// Trailing window for new-lead notifications.
const LEAD_WINDOW_HOURS: i64 = 24;
/// Realtime signals within this window coalesce into one refetch.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

const DISMISSED_KEY: &str = "dismissedNotifications";

// ---------------------------------------------------------------------------
// Source queries
// ---------------------------------------------------------------------------

/// A raw notification source row: everything needed to build the common
/// shape, before dismissal filtering.
struct SourceRow {
    kind: NotificationKind,
    source_id: String,
    title: String,
    description: Option<String>,
    timestamp: DateTime<Utc>,
    customer_id: Option<String>,
    customer_name: Option<String>,
    href: String,
}

impl PortalDb {
    fn unreplied_sms_rows(&self) -> Result<Vec<SourceRow>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT s.id, s.body, s.created_at, s.customer_id, c.full_name
             FROM sms_log s JOIN customers c ON c.id = s.customer_id
             WHERE s.direction = 'inbound' AND s.replied = 0
             ORDER BY s.created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let customer_id: String = row.get(3)?;
            Ok(SourceRow {
                kind: NotificationKind::UnrepliedSms,
                source_id: row.get(0)?,
                title: "Unreplied text message".to_string(),
                description: Some(row.get::<_, String>(1)?),
                timestamp: crate::db::ts_col(row, 2)?,
                href: format!("/portal/communications?customer={customer_id}"),
                customer_id: Some(customer_id),
                customer_name: Some(row.get(4)?),
            })
        })?;
        collect(rows)
    }

    fn unreplied_email_rows(&self) -> Result<Vec<SourceRow>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT e.id, e.subject, e.created_at, e.customer_id, c.full_name
             FROM email_log e JOIN customers c ON c.id = e.customer_id
             WHERE e.direction = 'inbound' AND e.replied = 0
             ORDER BY e.created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let customer_id: String = row.get(3)?;
            Ok(SourceRow {
                kind: NotificationKind::UnrepliedEmail,
                source_id: row.get(0)?,
                title: "Unreplied email".to_string(),
                description: Some(row.get::<_, String>(1)?),
                timestamp: crate::db::ts_col(row, 2)?,
                href: format!("/portal/communications?customer={customer_id}"),
                customer_id: Some(customer_id),
                customer_name: Some(row.get(4)?),
            })
        })?;
        collect(rows)
    }

    fn invoice_created_rows(&self, cutoff: DateTime<Utc>) -> Result<Vec<SourceRow>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT i.id, i.created_at, i.customer_id, c.full_name
             FROM invoices i JOIN customers c ON c.id = i.customer_id
             WHERE i.created_at >= ?1
             ORDER BY i.created_at DESC",
        )?;
        let rows = stmt.query_map(params![crate::db::ts_text(cutoff)], |row| {
            let id: String = row.get(0)?;
            Ok(SourceRow {
                kind: NotificationKind::InvoiceCreated,
                title: "Invoice created".to_string(),
                description: None,
                timestamp: crate::db::ts_col(row, 1)?,
                customer_id: Some(row.get(2)?),
                customer_name: Some(row.get(3)?),
                href: format!("/portal/invoices/{id}"),
                source_id: id,
            })
        })?;
        collect(rows)
    }

    fn deposit_paid_rows(&self, cutoff: DateTime<Utc>) -> Result<Vec<SourceRow>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT i.id, i.deposit_paid_at, i.customer_id, c.full_name
             FROM invoices i JOIN customers c ON c.id = i.customer_id
             WHERE i.deposit_paid_at IS NOT NULL AND i.deposit_paid_at >= ?1
             ORDER BY i.deposit_paid_at DESC",
        )?;
        let rows = stmt.query_map(params![crate::db::ts_text(cutoff)], |row| {
            let id: String = row.get(0)?;
            Ok(SourceRow {
                kind: NotificationKind::DepositPaid,
                title: "Deposit paid".to_string(),
                description: None,
                timestamp: crate::db::ts_col(row, 1)?,
                customer_id: Some(row.get(2)?),
                customer_name: Some(row.get(3)?),
                href: format!("/portal/invoices/{id}"),
                source_id: id,
            })
        })?;
        collect(rows)
    }

    fn new_lead_rows(&self, cutoff: DateTime<Utc>) -> Result<Vec<SourceRow>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT l.id, l.created_at, l.customer_id, c.full_name
             FROM leads l JOIN customers c ON c.id = l.customer_id
             WHERE l.status = 'new' AND l.created_at >= ?1
             ORDER BY l.created_at DESC",
        )?;
        let rows = stmt.query_map(params![crate::db::ts_text(cutoff)], |row| {
            let id: String = row.get(0)?;
            Ok(SourceRow {
                kind: NotificationKind::NewLead,
                title: "New lead".to_string(),
                description: None,
                timestamp: crate::db::ts_col(row, 1)?,
                customer_id: Some(row.get(2)?),
                customer_name: Some(row.get(3)?),
                href: format!("/portal/leads/{id}"),
                source_id: id,
            })
        })?;
        collect(rows)
    }
}

fn collect<'a>(
    rows: impl Iterator<Item = rusqlite::Result<SourceRow>> + 'a,
) -> Result<Vec<SourceRow>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn to_notification(row: SourceRow) -> PortalNotification {
    PortalNotification {
        id: format!("{}_{}", row.kind.id_prefix(), row.source_id),
        kind: row.kind,
        title: row.title,
        description: row.description,
        timestamp: row.timestamp,
        reference_id: row.source_id,
        customer_id: row.customer_id,
        customer_name: row.customer_name,
        href: row.href,
    }
}

// ---------------------------------------------------------------------------
// Dismissed set
// ---------------------------------------------------------------------------

/// The persisted set of dismissed notification ids. Garbage-collected on
/// every fetch: ids no longer present in the raw union are pruned so the
/// set never grows unbounded.
pub struct DismissedSet {
    store: Arc<dyn KvStore>,
}

impl DismissedSet {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn ids(&self) -> HashSet<String> {
        get_typed(self.store.as_ref(), DISMISSED_KEY).unwrap_or_default()
    }

    pub fn dismiss(&self, id: &str) {
        let mut ids = self.ids();
        ids.insert(id.to_string());
        set_typed(self.store.as_ref(), DISMISSED_KEY, &ids);
    }

    /// Drop dismissed ids that no longer appear in the raw union.
    fn gc(&self, live: &HashSet<&str>) -> HashSet<String> {
        let ids = self.ids();
        let pruned: HashSet<String> = ids
            .iter()
            .filter(|id| live.contains(id.as_str()))
            .cloned()
            .collect();
        if pruned.len() != ids.len() {
            set_typed(self.store.as_ref(), DISMISSED_KEY, &pruned);
        }
        pruned
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct NotificationAggregator {
    db: Arc<Mutex<PortalDb>>,
    dismissed: DismissedSet,
}

impl NotificationAggregator {
    pub fn new(db: Arc<Mutex<PortalDb>>, durable_store: Arc<dyn KvStore>) -> Self {
        Self {
            db,
            dismissed: DismissedSet::new(durable_store),
        }
    }

    /// Fetch the five-source union, garbage-collect and apply the
    /// dismissed set, and return the feed sorted descending by timestamp.
    pub fn fetch(&self) -> Result<Vec<PortalNotification>, PortalError> {
        let now = Utc::now();
        let invoice_cutoff = now - chrono::Duration::days(INVOICE_WINDOW_DAYS);
        let lead_cutoff = now - chrono::Duration::hours(LEAD_WINDOW_HOURS);

        let raw: Vec<PortalNotification> = {
            let db = self.db.lock();
            let mut rows = db.unreplied_sms_rows()?;
            rows.extend(db.unreplied_email_rows()?);
            rows.extend(db.invoice_created_rows(invoice_cutoff)?);
            rows.extend(db.deposit_paid_rows(invoice_cutoff)?);
            rows.extend(db.new_lead_rows(lead_cutoff)?);
            rows.into_iter().map(to_notification).collect()
        };

        let live: HashSet<&str> = raw.iter().map(|n| n.id.as_str()).collect();
        let dismissed = self.dismissed.gc(&live);

        let mut feed: Vec<PortalNotification> = raw
            .into_iter()
            .filter(|n| !dismissed.contains(&n.id))
            .collect();
        feed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(feed)
    }

    /// Dismiss a notification by its stable id. It stays hidden across
    /// refetches until its source row leaves the raw union.
    pub fn dismiss(&self, id: &str) {
        self.dismissed.dismiss(id);
    }
}

// ---------------------------------------------------------------------------
// Debounced realtime signal
// ---------------------------------------------------------------------------

/// Trailing-edge debouncer: the first signal opens a window; everything
/// arriving inside it coalesces into a single pulse on `out` when the
/// window closes. The timer task dies with the struct, so nothing fires
/// into a torn-down view.
pub struct Debouncer {
    tx: UnboundedSender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Debouncer {
    pub fn new(window: Duration, out: UnboundedSender<()>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(window).await;
                // Drain everything that arrived inside the window
                while rx.try_recv().is_ok() {}
                if out.send(()).is_err() {
                    break;
                }
            }
        });
        Self { tx, task }
    }

    pub fn signal(&self) {
        let _ = self.tx.send(());
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch the five notification source tables and forward every raw change
/// into the debouncer. The returned handle tears the watchers down.
pub fn watch_notification_tables(
    feed: &Arc<ChangeFeed>,
    debouncer: Arc<Debouncer>,
) -> SubscriberHandle {
    let tables = [
        Table::SmsLog,
        Table::EmailLog,
        Table::Invoices,
        Table::Leads,
        Table::ActivityLog,
    ];
    let tasks = tables
        .into_iter()
        .map(|table| {
            let mut sub = feed.subscribe(table, None);
            let debouncer = Arc::clone(&debouncer);
            tokio::spawn(async move {
                while sub.recv().await.is_some() {
                    debouncer.signal();
                }
            })
        })
        .collect();
    SubscriberHandle::new(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CustomerInput;
    use crate::session::MemoryStore;
    use crate::types::{Direction, InvoiceStatus};

    fn setup() -> (Arc<Mutex<PortalDb>>, NotificationAggregator) {
        let _ = env_logger::builder().is_test(true).try_init();
        let feed = ChangeFeed::new();
        let db = Arc::new(Mutex::new(
            PortalDb::open_in_memory(feed).expect("open"),
        ));
        let aggregator =
            NotificationAggregator::new(Arc::clone(&db), Arc::new(MemoryStore::new()));
        (db, aggregator)
    }

    fn seed_customer(db: &Arc<Mutex<PortalDb>>, name: &str) -> String {
        db.lock()
            .create_customer(CustomerInput {
                full_name: name.to_string(),
                ..Default::default()
            })
            .expect("customer")
            .id
    }

    /// Pin a row's timestamp a fixed number of minutes ago, so ordering is
    /// deterministic while every row stays inside the notification windows.
    fn backdate(db: &Arc<Mutex<PortalDb>>, table: &str, column: &str, id: &str, minute: u32) {
        let ts = crate::db::ts_text(Utc::now() - chrono::Duration::minutes(60 - minute as i64));
        db.lock()
            .conn_ref()
            .execute(
                &format!("UPDATE {table} SET {column} = ?1 WHERE id = ?2"),
                params![ts, id],
            )
            .expect("backdate");
    }

    /// Push a row's timestamp far outside every notification window.
    fn age_out(db: &Arc<Mutex<PortalDb>>, table: &str, id: &str) {
        let ts = crate::db::ts_text(Utc::now() - chrono::Duration::days(60));
        db.lock()
            .conn_ref()
            .execute(
                &format!("UPDATE {table} SET created_at = ?1 WHERE id = ?2"),
                params![ts, id],
            )
            .expect("age out");
    }

    #[test]
    fn test_feed_sorts_descending_across_sources() {
        let (db, aggregator) = setup();
        let cid = seed_customer(&db, "Nadia");

        // Timestamps 3,1,5,2,4 across a source mix
        let sms = db.lock().log_sms(&cid, Direction::Inbound, "hi").expect("sms");
        backdate(&db, "sms_log", "created_at", &sms.id, 3);
        let email = db
            .lock()
            .log_email(&cid, Direction::Inbound, "Quote?", None)
            .expect("email");
        backdate(&db, "email_log", "created_at", &email.id, 1);
        let lead = db.lock().create_lead(&cid, None, None).expect("lead");
        backdate(&db, "leads", "created_at", &lead.id, 5);
        let inv1 = db.lock().create_invoice(&cid, None, 1000, 200).expect("inv");
        backdate(&db, "invoices", "created_at", &inv1.id, 2);
        let inv2 = db.lock().create_invoice(&cid, None, 2000, 400).expect("inv");
        db.lock()
            .set_invoice_status(&inv2.id, InvoiceStatus::DepositPaid)
            .expect("status");
        backdate(&db, "invoices", "deposit_paid_at", &inv2.id, 4);
        // Keep inv2's creation out of the mix so exactly five items remain
        age_out(&db, "invoices", &inv2.id);

        let feed = aggregator.fetch().expect("fetch");
        let minutes: Vec<NotificationKind> = feed.iter().map(|n| n.kind).collect();
        assert_eq!(
            minutes,
            vec![
                NotificationKind::NewLead,       // 5
                NotificationKind::DepositPaid,   // 4
                NotificationKind::UnrepliedSms,  // 3
                NotificationKind::InvoiceCreated, // 2
                NotificationKind::UnrepliedEmail, // 1
            ]
        );
        for pair in feed.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[test]
    fn test_ids_are_source_prefixed_and_stable() {
        let (db, aggregator) = setup();
        let cid = seed_customer(&db, "Omar");
        let sms = db.lock().log_sms(&cid, Direction::Inbound, "hey").expect("sms");

        let first = aggregator.fetch().expect("fetch");
        let second = aggregator.fetch().expect("fetch");
        let id = format!("unreplied_sms_{}", sms.id);
        assert!(first.iter().any(|n| n.id == id));
        assert!(second.iter().any(|n| n.id == id));
    }

    #[test]
    fn test_dismissal_persists_and_gcs() {
        let (db, aggregator) = setup();
        let cid = seed_customer(&db, "Pia");
        let sms = db.lock().log_sms(&cid, Direction::Inbound, "allo").expect("sms");
        let id = format!("unreplied_sms_{}", sms.id);

        aggregator.dismiss(&id);

        // Still in the raw union, but hidden
        let feed = aggregator.fetch().expect("fetch");
        assert!(feed.iter().all(|n| n.id != id));
        assert!(aggregator.dismissed.ids().contains(&id));

        // Reply to the SMS: it leaves the raw union, so the dismissed set
        // is pruned on the next fetch.
        db.lock().mark_sms_replied(&sms.id).expect("replied");
        aggregator.fetch().expect("fetch");
        assert!(!aggregator.dismissed.ids().contains(&id));
    }

    #[test]
    fn test_replied_rows_do_not_notify() {
        let (db, aggregator) = setup();
        let cid = seed_customer(&db, "Quinn");
        let email = db
            .lock()
            .log_email(&cid, Direction::Inbound, "Hi", None)
            .expect("email");
        db.lock().mark_email_replied(&email.id).expect("replied");
        // Outbound traffic never notifies either
        db.lock()
            .log_email(&cid, Direction::Outbound, "Re: Hi", None)
            .expect("email");

        let feed = aggregator.fetch().expect("fetch");
        assert!(feed
            .iter()
            .all(|n| n.kind != NotificationKind::UnrepliedEmail));
    }

    #[test]
    fn test_deposit_paid_appears_after_status_update() {
        // End-to-end: an invoice updated to deposit_paid shows up in the
        // next aggregator fetch within the window.
        let (db, aggregator) = setup();
        let cid = seed_customer(&db, "Rosa");
        let invoice = db.lock().create_invoice(&cid, None, 5000, 1000).expect("inv");

        db.lock()
            .set_invoice_status(&invoice.id, InvoiceStatus::DepositPaid)
            .expect("status");

        let feed = aggregator.fetch().expect("fetch");
        let expected = format!("deposit_paid_{}", invoice.id);
        let hit = feed.iter().find(|n| n.id == expected).expect("notification");
        assert_eq!(hit.reference_id, invoice.id);
        assert_eq!(hit.customer_name.as_deref(), Some("Rosa"));
    }

    #[test]
    fn test_old_rows_fall_outside_windows() {
        let (db, aggregator) = setup();
        let cid = seed_customer(&db, "Sven");
        let lead = db.lock().create_lead(&cid, None, None).expect("lead");
        let invoice = db.lock().create_invoice(&cid, None, 100, 0).expect("inv");

        age_out(&db, "leads", &lead.id);
        age_out(&db, "invoices", &invoice.id);

        let feed = aggregator.fetch().expect("fetch");
        assert!(feed.iter().all(|n| n.kind != NotificationKind::NewLead));
        assert!(feed
            .iter()
            .all(|n| n.kind != NotificationKind::InvoiceCreated));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_debounce_coalesces_bursts() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(DEBOUNCE_WINDOW, out_tx);

        debouncer.signal();
        debouncer.signal();
        debouncer.signal();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(out_rx.try_recv().is_ok(), "burst flushes exactly once");
        assert!(out_rx.try_recv().is_err());

        debouncer.signal();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(out_rx.try_recv().is_ok(), "later signal flushes again");
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_table_watchers_feed_debouncer() {
        let feed = ChangeFeed::new();
        let db = Arc::new(Mutex::new(
            PortalDb::open_in_memory(feed.clone()).expect("open"),
        ));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let debouncer = Arc::new(Debouncer::new(DEBOUNCE_WINDOW, out_tx));
        let _watch = watch_notification_tables(&feed, debouncer);

        let cid = seed_customer(&db, "Tess");
        db.lock().log_sms(&cid, Direction::Inbound, "a").expect("sms");
        db.lock().log_sms(&cid, Direction::Inbound, "b").expect("sms");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(out_rx.try_recv().is_ok());
        assert!(out_rx.try_recv().is_err(), "burst coalesced to one refetch");
    }
}
