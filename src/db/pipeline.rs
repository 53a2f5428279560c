//! Lead / estimate / invoice CRUD with joined customer projections.
//!
//! Every mutation publishes a change event after commit, and entity
//! creation / status milestones also append an `activity_log` row so the
//! timeline and notification feeds see them.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{
    ChangeKind, Estimate, EstimateStatus, Invoice, InvoiceStatus, Lead, LeadStatus, PartialRow,
    Table,
};

use super::customers::customer_at;
use super::{enum_col, opt_ts_col, ts_col, ts_text, PortalDb};

const CUSTOMER_JOIN_COLS: &str = "c.id, c.full_name, c.email, c.phone, c.address, c.language, c.internal_notes, c.created_at";

fn lead_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        status: enum_col(row, 2, LeadStatus::parse)?,
        project_description: row.get(3)?,
        source: row.get(4)?,
        created_at: ts_col(row, 5)?,
        customer: customer_at(row, 6)?,
    })
}

fn estimate_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Estimate> {
    Ok(Estimate {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        lead_id: row.get(2)?,
        status: enum_col(row, 3, EstimateStatus::parse)?,
        total_cents: row.get(4)?,
        created_at: ts_col(row, 5)?,
        customer: customer_at(row, 6)?,
    })
}

fn invoice_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        lead_id: row.get(2)?,
        status: enum_col(row, 3, InvoiceStatus::parse)?,
        total_cents: row.get(4)?,
        deposit_cents: row.get(5)?,
        created_at: ts_col(row, 6)?,
        deposit_paid_at: opt_ts_col(row, 7)?,
        customer: customer_at(row, 8)?,
    })
}

impl PortalDb {
    // -----------------------------------------------------------------------
    // Leads
    // -----------------------------------------------------------------------

    pub fn create_lead(
        &self,
        customer_id: &str,
        project_description: Option<&str>,
        source: Option<&str>,
    ) -> Result<Lead, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.conn_ref().execute(
            "INSERT INTO leads (id, customer_id, status, project_description, source, created_at)
             VALUES (?1, ?2, 'new', ?3, ?4, ?5)",
            params![id, customer_id, project_description, source, ts_text(created_at)],
        )?;

        self.emit(
            Table::Leads,
            ChangeKind::Insert,
            Some(PartialRow {
                id: id.clone(),
                customer_id: Some(customer_id.to_string()),
            }),
            None,
        );
        self.touch_activity(Some(customer_id), "lead_created", "New lead", Some(&id))?;

        self.get_lead(&id)?.ok_or(StoreError::RowNotFound {
            table: "leads",
            id,
        })
    }

    pub fn set_lead_status(&self, id: &str, status: LeadStatus) -> Result<(), StoreError> {
        let changed = self.conn_ref().execute(
            "UPDATE leads SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                table: "leads",
                id: id.to_string(),
            });
        }
        self.emit_child_update(Table::Leads, "leads", id)?;
        let customer_id = self.child_customer("leads", id)?;
        self.touch_activity(
            customer_id.as_deref(),
            "lead_status_changed",
            &format!("Lead marked {}", status.as_str()),
            Some(id),
        )?;
        Ok(())
    }

    pub fn delete_lead(&self, id: &str) -> Result<(), StoreError> {
        self.delete_child(Table::Leads, "leads", id)
    }

    pub fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT l.id, l.customer_id, l.status, l.project_description, l.source, l.created_at,
                    {CUSTOMER_JOIN_COLS}
             FROM leads l JOIN customers c ON c.id = l.customer_id
             WHERE l.id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], lead_row)?;
        Ok(rows.next().transpose()?)
    }

    /// All leads joined with their customers, newest first.
    pub fn list_leads(&self) -> Result<Vec<Lead>, StoreError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT l.id, l.customer_id, l.status, l.project_description, l.source, l.created_at,
                    {CUSTOMER_JOIN_COLS}
             FROM leads l JOIN customers c ON c.id = l.customer_id
             ORDER BY l.created_at DESC"
        ))?;
        let rows = stmt.query_map([], lead_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Estimates
    // -----------------------------------------------------------------------

    pub fn create_estimate(
        &self,
        customer_id: &str,
        lead_id: Option<&str>,
        total_cents: i64,
    ) -> Result<Estimate, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.conn_ref().execute(
            "INSERT INTO estimates (id, customer_id, lead_id, status, total_cents, created_at)
             VALUES (?1, ?2, ?3, 'draft', ?4, ?5)",
            params![id, customer_id, lead_id, total_cents, ts_text(created_at)],
        )?;

        self.emit(
            Table::Estimates,
            ChangeKind::Insert,
            Some(PartialRow {
                id: id.clone(),
                customer_id: Some(customer_id.to_string()),
            }),
            None,
        );
        self.touch_activity(
            Some(customer_id),
            "estimate_created",
            "Estimate drafted",
            Some(&id),
        )?;

        self.get_estimate(&id)?.ok_or(StoreError::RowNotFound {
            table: "estimates",
            id,
        })
    }

    pub fn set_estimate_status(&self, id: &str, status: EstimateStatus) -> Result<(), StoreError> {
        let changed = self.conn_ref().execute(
            "UPDATE estimates SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                table: "estimates",
                id: id.to_string(),
            });
        }
        self.emit_child_update(Table::Estimates, "estimates", id)?;
        if status == EstimateStatus::Sent {
            let customer_id = self.child_customer("estimates", id)?;
            self.touch_activity(
                customer_id.as_deref(),
                "estimate_sent",
                "Estimate sent",
                Some(id),
            )?;
        }
        Ok(())
    }

    pub fn delete_estimate(&self, id: &str) -> Result<(), StoreError> {
        self.delete_child(Table::Estimates, "estimates", id)
    }

    pub fn get_estimate(&self, id: &str) -> Result<Option<Estimate>, StoreError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT e.id, e.customer_id, e.lead_id, e.status, e.total_cents, e.created_at,
                    {CUSTOMER_JOIN_COLS}
             FROM estimates e JOIN customers c ON c.id = e.customer_id
             WHERE e.id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], estimate_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_estimates(&self) -> Result<Vec<Estimate>, StoreError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT e.id, e.customer_id, e.lead_id, e.status, e.total_cents, e.created_at,
                    {CUSTOMER_JOIN_COLS}
             FROM estimates e JOIN customers c ON c.id = e.customer_id
             ORDER BY e.created_at DESC"
        ))?;
        let rows = stmt.query_map([], estimate_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Invoices
    // -----------------------------------------------------------------------

    pub fn create_invoice(
        &self,
        customer_id: &str,
        lead_id: Option<&str>,
        total_cents: i64,
        deposit_cents: i64,
    ) -> Result<Invoice, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.conn_ref().execute(
            "INSERT INTO invoices (id, customer_id, lead_id, status, total_cents, deposit_cents, created_at)
             VALUES (?1, ?2, ?3, 'unpaid', ?4, ?5, ?6)",
            params![id, customer_id, lead_id, total_cents, deposit_cents, ts_text(created_at)],
        )?;

        self.emit(
            Table::Invoices,
            ChangeKind::Insert,
            Some(PartialRow {
                id: id.clone(),
                customer_id: Some(customer_id.to_string()),
            }),
            None,
        );
        self.touch_activity(
            Some(customer_id),
            "invoice_created",
            "Invoice issued",
            Some(&id),
        )?;

        self.get_invoice(&id)?.ok_or(StoreError::RowNotFound {
            table: "invoices",
            id,
        })
    }

    /// Advance an invoice's payment status. Reaching `deposit_paid` stamps
    /// `deposit_paid_at`, which the notification window queries rely on.
    pub fn set_invoice_status(&self, id: &str, status: InvoiceStatus) -> Result<(), StoreError> {
        let changed = match status {
            InvoiceStatus::DepositPaid => self.conn_ref().execute(
                "UPDATE invoices SET status = ?2, deposit_paid_at = COALESCE(deposit_paid_at, ?3)
                 WHERE id = ?1",
                params![id, status.as_str(), super::now_text()],
            )?,
            _ => self.conn_ref().execute(
                "UPDATE invoices SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                table: "invoices",
                id: id.to_string(),
            });
        }
        self.emit_child_update(Table::Invoices, "invoices", id)?;
        if status == InvoiceStatus::DepositPaid {
            let customer_id = self.child_customer("invoices", id)?;
            self.touch_activity(
                customer_id.as_deref(),
                "deposit_paid",
                "Deposit received",
                Some(id),
            )?;
        }
        Ok(())
    }

    pub fn delete_invoice(&self, id: &str) -> Result<(), StoreError> {
        self.delete_child(Table::Invoices, "invoices", id)
    }

    pub fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, StoreError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT i.id, i.customer_id, i.lead_id, i.status, i.total_cents, i.deposit_cents,
                    i.created_at, i.deposit_paid_at, {CUSTOMER_JOIN_COLS}
             FROM invoices i JOIN customers c ON c.id = i.customer_id
             WHERE i.id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], invoice_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_invoices(&self) -> Result<Vec<Invoice>, StoreError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT i.id, i.customer_id, i.lead_id, i.status, i.total_cents, i.deposit_cents,
                    i.created_at, i.deposit_paid_at, {CUSTOMER_JOIN_COLS}
             FROM invoices i JOIN customers c ON c.id = i.customer_id
             ORDER BY i.created_at DESC"
        ))?;
        let rows = stmt.query_map([], invoice_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Shared child-row plumbing
    // -----------------------------------------------------------------------

    /// Ids of all rows in `table` owned by a customer. Used by the
    /// subscriber's parent-update side channel.
    pub fn child_ids(&self, table: Table, customer_id: &str) -> Result<Vec<String>, StoreError> {
        let sql = match table {
            Table::Leads => "SELECT id FROM leads WHERE customer_id = ?1",
            Table::Estimates => "SELECT id FROM estimates WHERE customer_id = ?1",
            Table::Invoices => "SELECT id FROM invoices WHERE customer_id = ?1",
            _ => return Ok(Vec::new()),
        };
        let mut stmt = self.conn_ref().prepare(sql)?;
        let rows = stmt.query_map(params![customer_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub(crate) fn child_customer(
        &self,
        table: &'static str,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut stmt = self
            .conn_ref()
            .prepare(&format!("SELECT customer_id FROM {table} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], |row| row.get(0))?;
        Ok(rows.next().transpose()?)
    }

    fn emit_child_update(
        &self,
        table: Table,
        table_name: &'static str,
        id: &str,
    ) -> Result<(), StoreError> {
        let customer_id = self.child_customer(table_name, id)?;
        self.emit(
            table,
            ChangeKind::Update,
            Some(PartialRow {
                id: id.to_string(),
                customer_id,
            }),
            None,
        );
        Ok(())
    }

    fn delete_child(
        &self,
        table: Table,
        table_name: &'static str,
        id: &str,
    ) -> Result<(), StoreError> {
        let customer_id = self.child_customer(table_name, id)?;
        let changed = self
            .conn_ref()
            .execute(&format!("DELETE FROM {table_name} WHERE id = ?1"), params![id])?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                table: table_name,
                id: id.to_string(),
            });
        }
        self.emit(
            table,
            ChangeKind::Delete,
            None,
            Some(PartialRow {
                id: id.to_string(),
                customer_id,
            }),
        );
        Ok(())
    }
}
