//! Unified customer timeline merge.
//!
//! Merges four heterogeneous sources — email log, SMS log, call log,
//! activity log — into one chronologically ordered feed of
//! `TimelineItem`s. Identity is the `(id, kind)` pair: ids are only
//! unique within their source table. A detail view wants ascending order;
//! the global feed wants descending — callers pick the mode up front.
//!
//! Live inserts are placed positionally (linear scan, fine at this data
//! volume) instead of re-sorting, so concurrent renders keep stable
//! mid-list insert points.

use crate::types::{
    ActivityLog, CallLog, Direction, EmailLog, SmsLog, TimelineItem, TimelineKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineOrder {
    /// Oldest first — single-customer detail view.
    Ascending,
    /// Newest first — global cross-customer feed.
    Descending,
}

// ---------------------------------------------------------------------------
// Source projections
// ---------------------------------------------------------------------------

pub fn project_email(row: &EmailLog) -> TimelineItem {
    TimelineItem {
        id: row.id.clone(),
        kind: TimelineKind::Email,
        direction: row.direction,
        timestamp: row.created_at,
        title: row.subject.clone(),
        description: row.body_preview.clone(),
        customer_id: Some(row.customer_id.clone()),
    }
}

pub fn project_sms(row: &SmsLog) -> TimelineItem {
    TimelineItem {
        id: row.id.clone(),
        kind: TimelineKind::Sms,
        direction: row.direction,
        timestamp: row.created_at,
        title: row.body.clone(),
        description: None,
        customer_id: Some(row.customer_id.clone()),
    }
}

pub fn project_call(row: &CallLog) -> TimelineItem {
    TimelineItem {
        id: row.id.clone(),
        kind: TimelineKind::Call,
        direction: row.direction,
        timestamp: row.created_at,
        title: match row.direction {
            Direction::Inbound => "Incoming call".to_string(),
            _ => "Outgoing call".to_string(),
        },
        description: row.notes.clone(),
        customer_id: Some(row.customer_id.clone()),
    }
}

pub fn project_activity(row: &ActivityLog) -> TimelineItem {
    TimelineItem {
        id: row.id.clone(),
        kind: business_kind(&row.event_type),
        direction: Direction::System,
        timestamp: row.created_at,
        title: row.description.clone(),
        description: None,
        customer_id: row.customer_id.clone(),
    }
}

/// Map an activity `event_type` onto a business timeline category.
///
/// Unrecognized event types fall back to `lead` (the historical behavior)
/// but log a warning so a newly added event type doesn't get silently
/// miscategorized forever.
pub fn business_kind(event_type: &str) -> TimelineKind {
    match event_type {
        "lead_created" | "lead_status_changed" => TimelineKind::Lead,
        "estimate_created" | "estimate_sent" => TimelineKind::Estimate,
        "invoice_created" | "deposit_paid" | "invoice_paid" => TimelineKind::Invoice,
        other => {
            log::warn!("Unrecognized activity event_type '{other}', mapping to lead");
            TimelineKind::Lead
        }
    }
}

// ---------------------------------------------------------------------------
// Timeline container
// ---------------------------------------------------------------------------

/// A hydrated, projected timeline change (see `subscriber::subscribe_timeline`).
#[derive(Debug, Clone)]
pub enum TimelineEvent {
    Insert(TimelineItem),
    Update(TimelineItem),
    Remove(String, TimelineKind),
    /// An activity row vanished; its business category is no longer
    /// recoverable, so remove whichever business item carries the id.
    RemoveBusiness(String),
}

pub struct Timeline {
    items: Vec<TimelineItem>,
    order: TimelineOrder,
}

impl Timeline {
    pub fn new(order: TimelineOrder) -> Self {
        Self {
            items: Vec::new(),
            order,
        }
    }

    /// Initial load: project all four sources, concatenate, sort once.
    pub fn load(
        &mut self,
        emails: &[EmailLog],
        sms: &[SmsLog],
        calls: &[CallLog],
        activities: &[ActivityLog],
    ) {
        let mut items: Vec<TimelineItem> = Vec::with_capacity(
            emails.len() + sms.len() + calls.len() + activities.len(),
        );
        items.extend(emails.iter().map(project_email));
        items.extend(sms.iter().map(project_sms));
        items.extend(calls.iter().map(project_call));
        items.extend(activities.iter().map(project_activity));

        match self.order {
            TimelineOrder::Ascending => items.sort_by_key(|i| i.timestamp),
            TimelineOrder::Descending => {
                items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp))
            }
        }
        self.items = items;
    }

    pub fn items(&self) -> &[TimelineItem] {
        &self.items
    }

    pub fn order(&self) -> TimelineOrder {
        self.order
    }

    /// Live insert: place the item at its chronological position without
    /// re-sorting. An item already present under the same `(id, kind)` is
    /// replaced in place instead.
    pub fn insert(&mut self, item: TimelineItem) {
        if let Some(idx) = self.index_of(&item.id, item.kind) {
            self.items[idx] = item;
            return;
        }
        let pos = match self.order {
            TimelineOrder::Ascending => self
                .items
                .iter()
                .position(|existing| existing.timestamp > item.timestamp),
            TimelineOrder::Descending => self
                .items
                .iter()
                .position(|existing| existing.timestamp < item.timestamp),
        };
        match pos {
            Some(idx) => self.items.insert(idx, item),
            None => self.items.push(item),
        }
    }

    /// Replace the item matching `(id, kind)`; unknown keys are a no-op.
    pub fn update(&mut self, item: TimelineItem) {
        if let Some(idx) = self.index_of(&item.id, item.kind) {
            self.items[idx] = item;
        }
    }

    /// Apply one live event.
    pub fn apply(&mut self, event: TimelineEvent) {
        match event {
            TimelineEvent::Insert(item) => self.insert(item),
            TimelineEvent::Update(item) => self.update(item),
            TimelineEvent::Remove(id, kind) => self.remove(&id, kind),
            TimelineEvent::RemoveBusiness(id) => self.remove_business(&id),
        }
    }

    /// Remove the item matching `(id, kind)`.
    pub fn remove(&mut self, id: &str, kind: TimelineKind) {
        if let Some(idx) = self.index_of(id, kind) {
            self.items.remove(idx);
        }
    }

    /// Remove a business item (lead/estimate/invoice category) by id alone.
    pub fn remove_business(&mut self, id: &str) {
        self.items.retain(|i| {
            i.id != id
                || !matches!(
                    i.kind,
                    TimelineKind::Lead | TimelineKind::Estimate | TimelineKind::Invoice
                )
        });
    }

    fn index_of(&self, id: &str, kind: TimelineKind) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.id == id && i.kind == kind)
    }
}
