use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Customers and pipeline entities
// =============================================================================

/// Site/portal language for a customer (bilingual EN/FR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Fr,
}

impl Default for Language {
    fn default() -> Self {
        Language::En
    }
}

/// A customer record — the identity anchor that owns leads, estimates,
/// invoices, and communication log rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    EstimateScheduled,
    EstimateSent,
    Won,
    Lost,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    Draft,
    Sent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    DepositPaid,
    FullyPaid,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

str_enum!(Language { En => "en", Fr => "fr" });
str_enum!(LeadStatus {
    New => "new",
    Contacted => "contacted",
    EstimateScheduled => "estimate_scheduled",
    EstimateSent => "estimate_sent",
    Won => "won",
    Lost => "lost",
    Archived => "archived",
});
str_enum!(EstimateStatus { Draft => "draft", Sent => "sent" });
str_enum!(InvoiceStatus {
    Unpaid => "unpaid",
    DepositPaid => "deposit_paid",
    FullyPaid => "fully_paid",
});

/// A lead row joined with its owning customer.
///
/// This is the canonical shape handed to list views; denormalized customer
/// fields are embedded, which is why a customer update must re-hydrate
/// every child row (see `subscriber`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub customer_id: String,
    pub status: LeadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub customer: Customer,
}

/// An estimate row joined with its owning customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub id: String,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    pub status: EstimateStatus,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub customer: Customer,
}

/// An invoice row joined with its owning customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    pub status: InvoiceStatus,
    pub total_cents: i64,
    pub deposit_cents: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_paid_at: Option<DateTime<Utc>>,
    pub customer: Customer,
}

// =============================================================================
// Communication log rows
// =============================================================================

/// Direction of a communication or activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    System,
}

str_enum!(Direction {
    Inbound => "inbound",
    Outbound => "outbound",
    System => "system",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLog {
    pub id: String,
    pub customer_id: String,
    pub direction: Direction,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,
    pub replied: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsLog {
    pub id: String,
    pub customer_id: String,
    pub direction: Direction,
    pub body: String,
    pub replied: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLog {
    pub id: String,
    pub customer_id: String,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A business activity entry (entity created, status changed, ...).
///
/// `event_type` is an open string set ("invoice_created", "estimate_created",
/// "lead_created", ...); the timeline maps it onto a closed category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub event_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Derived projections
// =============================================================================

/// Display category of a timeline item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    Email,
    Sms,
    Call,
    Lead,
    Estimate,
    Invoice,
}

/// A normalized, displayable event merged from the four log sources.
///
/// Identity is the `(id, kind)` pair — ids are only unique within their
/// source table, not across tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TimelineKind,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl TimelineItem {
    /// The `(id, kind)` identity key.
    pub fn key(&self) -> (&str, TimelineKind) {
        (&self.id, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    UnrepliedSms,
    UnrepliedEmail,
    InvoiceCreated,
    DepositPaid,
    NewLead,
}

impl NotificationKind {
    /// Stable id prefix for this source. Dismissed-set entries are keyed on
    /// `<prefix>_<sourceId>`, so prefixes must never change.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            NotificationKind::UnrepliedSms => "unreplied_sms",
            NotificationKind::UnrepliedEmail => "unreplied_email",
            NotificationKind::InvoiceCreated => "invoice_created",
            NotificationKind::DepositPaid => "deposit_paid",
            NotificationKind::NewLead => "new_lead",
        }
    }
}

/// A single entry in the employee-portal notification feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalNotification {
    /// Source-prefixed stable id, e.g. `unreplied_sms_<rowId>`.
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub reference_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    /// Deep-link target within the portal.
    pub href: String,
}

// =============================================================================
// Stain catalogue (client portal wizard)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StainOption {
    pub id: String,
    pub name: String,
    pub tone: String,
    pub opacity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StainSelection {
    pub customer_id: String,
    pub option_id: String,
    pub selected_at: DateTime<Utc>,
}

// =============================================================================
// Change feed payloads
// =============================================================================

/// Table names carried on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Customers,
    Leads,
    Estimates,
    Invoices,
    EmailLog,
    SmsLog,
    CallLog,
    ActivityLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The partial row shape carried on raw change events. Only the id (and the
/// owning customer id, when the table has one) is guaranteed; consumers must
/// re-fetch the canonical joined row before showing anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRow {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

/// A raw change event as emitted by the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<PartialRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<PartialRow>,
}

impl ChangeEvent {
    /// The id of the affected row, preferring the new image.
    pub fn row_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .map(|r| r.id.as_str())
    }

    /// The owning customer id, preferring the new image.
    pub fn customer_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .and_then(|r| r.customer_id.as_deref())
            .or_else(|| self.old.as_ref().and_then(|r| r.customer_id.as_deref()))
    }
}
