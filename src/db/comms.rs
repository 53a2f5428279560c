//! Communication log rows: email, SMS, call, and activity entries.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{
    ActivityLog, CallLog, ChangeKind, Direction, EmailLog, PartialRow, SmsLog, Table,
};

use super::{enum_col, ts_col, ts_text, PortalDb};

fn email_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmailLog> {
    Ok(EmailLog {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        direction: enum_col(row, 2, Direction::parse)?,
        subject: row.get(3)?,
        body_preview: row.get(4)?,
        replied: row.get(5)?,
        created_at: ts_col(row, 6)?,
    })
}

fn sms_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SmsLog> {
    Ok(SmsLog {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        direction: enum_col(row, 2, Direction::parse)?,
        body: row.get(3)?,
        replied: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn call_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallLog> {
    Ok(CallLog {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        direction: enum_col(row, 2, Direction::parse)?,
        notes: row.get(3)?,
        duration_secs: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityLog> {
    Ok(ActivityLog {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        event_type: row.get(2)?,
        description: row.get(3)?,
        reference_id: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

/// Build the `WHERE customer_id = ?` / `LIMIT` suffix shared by the log
/// list queries. Results are newest-first; callers re-order as needed.
fn scope_clause(customer_id: Option<&str>) -> &'static str {
    match customer_id {
        Some(_) => "WHERE customer_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        None => "ORDER BY created_at DESC LIMIT ?1",
    }
}

macro_rules! list_logs {
    ($self:expr, $cols:literal, $table:literal, $customer_id:expr, $limit:expr, $mapper:expr) => {{
        let sql = format!(
            "SELECT {} FROM {} {}",
            $cols,
            $table,
            scope_clause($customer_id)
        );
        let mut stmt = $self.conn_ref().prepare(&sql)?;
        let mut out = Vec::new();
        match $customer_id {
            Some(cid) => {
                let rows = stmt.query_map(params![cid, $limit as i64], $mapper)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let rows = stmt.query_map(params![$limit as i64], $mapper)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }};
}

impl PortalDb {
    pub fn log_email(
        &self,
        customer_id: &str,
        direction: Direction,
        subject: &str,
        body_preview: Option<&str>,
    ) -> Result<EmailLog, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.conn_ref().execute(
            "INSERT INTO email_log (id, customer_id, direction, subject, body_preview, replied, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![id, customer_id, direction.as_str(), subject, body_preview, ts_text(created_at)],
        )?;
        self.emit(
            Table::EmailLog,
            ChangeKind::Insert,
            Some(PartialRow {
                id: id.clone(),
                customer_id: Some(customer_id.to_string()),
            }),
            None,
        );
        Ok(EmailLog {
            id,
            customer_id: customer_id.to_string(),
            direction,
            subject: subject.to_string(),
            body_preview: body_preview.map(|s| s.to_string()),
            replied: false,
            created_at,
        })
    }

    pub fn log_sms(
        &self,
        customer_id: &str,
        direction: Direction,
        body: &str,
    ) -> Result<SmsLog, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.conn_ref().execute(
            "INSERT INTO sms_log (id, customer_id, direction, body, replied, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![id, customer_id, direction.as_str(), body, ts_text(created_at)],
        )?;
        self.emit(
            Table::SmsLog,
            ChangeKind::Insert,
            Some(PartialRow {
                id: id.clone(),
                customer_id: Some(customer_id.to_string()),
            }),
            None,
        );
        Ok(SmsLog {
            id,
            customer_id: customer_id.to_string(),
            direction,
            body: body.to_string(),
            replied: false,
            created_at,
        })
    }

    pub fn log_call(
        &self,
        customer_id: &str,
        direction: Direction,
        notes: Option<&str>,
        duration_secs: Option<i64>,
    ) -> Result<CallLog, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.conn_ref().execute(
            "INSERT INTO call_log (id, customer_id, direction, notes, duration_secs, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, customer_id, direction.as_str(), notes, duration_secs, ts_text(created_at)],
        )?;
        self.emit(
            Table::CallLog,
            ChangeKind::Insert,
            Some(PartialRow {
                id: id.clone(),
                customer_id: Some(customer_id.to_string()),
            }),
            None,
        );
        Ok(CallLog {
            id,
            customer_id: customer_id.to_string(),
            direction,
            notes: notes.map(|s| s.to_string()),
            duration_secs,
            created_at,
        })
    }

    /// Append a business activity entry. Public variant of the internal
    /// `touch_activity` used by the pipeline mutations.
    pub fn log_activity(
        &self,
        customer_id: Option<&str>,
        event_type: &str,
        description: &str,
        reference_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.touch_activity(customer_id, event_type, description, reference_id)
    }

    /// Mark an inbound email as replied (clears it from the unreplied feed).
    pub fn mark_email_replied(&self, id: &str) -> Result<(), StoreError> {
        let customer_id = self.child_customer("email_log", id)?;
        self.conn_ref().execute(
            "UPDATE email_log SET replied = 1 WHERE id = ?1",
            params![id],
        )?;
        self.emit(
            Table::EmailLog,
            ChangeKind::Update,
            Some(PartialRow {
                id: id.to_string(),
                customer_id,
            }),
            None,
        );
        Ok(())
    }

    /// Mark an inbound SMS as replied.
    pub fn mark_sms_replied(&self, id: &str) -> Result<(), StoreError> {
        let customer_id = self.child_customer("sms_log", id)?;
        self.conn_ref().execute(
            "UPDATE sms_log SET replied = 1 WHERE id = ?1",
            params![id],
        )?;
        self.emit(
            Table::SmsLog,
            ChangeKind::Update,
            Some(PartialRow {
                id: id.to_string(),
                customer_id,
            }),
            None,
        );
        Ok(())
    }

    pub fn get_email(&self, id: &str) -> Result<Option<EmailLog>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, customer_id, direction, subject, body_preview, replied, created_at
             FROM email_log WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], email_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_sms(&self, id: &str) -> Result<Option<SmsLog>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, customer_id, direction, body, replied, created_at
             FROM sms_log WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], sms_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_call(&self, id: &str) -> Result<Option<CallLog>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, customer_id, direction, notes, duration_secs, created_at
             FROM call_log WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], call_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_activity(&self, id: &str) -> Result<Option<ActivityLog>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, customer_id, event_type, description, reference_id, created_at
             FROM activity_log WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], activity_row)?;
        Ok(rows.next().transpose()?)
    }

    /// Email log rows, optionally scoped to one customer, newest first.
    pub fn list_emails(
        &self,
        customer_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EmailLog>, StoreError> {
        list_logs!(
            self,
            "id, customer_id, direction, subject, body_preview, replied, created_at",
            "email_log",
            customer_id,
            limit,
            email_row
        )
    }

    pub fn list_sms(
        &self,
        customer_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SmsLog>, StoreError> {
        list_logs!(
            self,
            "id, customer_id, direction, body, replied, created_at",
            "sms_log",
            customer_id,
            limit,
            sms_row
        )
    }

    pub fn list_calls(
        &self,
        customer_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CallLog>, StoreError> {
        list_logs!(
            self,
            "id, customer_id, direction, notes, duration_secs, created_at",
            "call_log",
            customer_id,
            limit,
            call_row
        )
    }

    pub fn list_activity(
        &self,
        customer_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityLog>, StoreError> {
        list_logs!(
            self,
            "id, customer_id, event_type, description, reference_id, created_at",
            "activity_log",
            customer_id,
            limit,
            activity_row
        )
    }
}
