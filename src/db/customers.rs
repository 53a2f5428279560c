//! Customer CRUD.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{ChangeKind, Customer, Language, PartialRow, Table};

use super::{enum_col, now_text, ts_col, ts_text, PortalDb};

/// Input fields for creating or editing a customer.
#[derive(Debug, Clone, Default)]
pub struct CustomerInput {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub language: Language,
    pub internal_notes: Option<String>,
}

/// Map a customer from a row whose customer columns start at `base`.
/// Column order: id, full_name, email, phone, address, language,
/// internal_notes, created_at.
pub(crate) fn customer_at(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(base)?,
        full_name: row.get(base + 1)?,
        email: row.get(base + 2)?,
        phone: row.get(base + 3)?,
        address: row.get(base + 4)?,
        language: enum_col(row, base + 5, Language::parse)?,
        internal_notes: row.get(base + 6)?,
        created_at: ts_col(row, base + 7)?,
    })
}

const CUSTOMER_COLS: &str =
    "id, full_name, email, phone, address, language, internal_notes, created_at";

impl PortalDb {
    /// Insert a customer and publish the insert event.
    pub fn create_customer(&self, input: CustomerInput) -> Result<Customer, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.conn_ref().execute(
            "INSERT INTO customers (id, full_name, email, phone, address, language, internal_notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                input.full_name,
                input.email,
                input.phone,
                input.address,
                input.language.as_str(),
                input.internal_notes,
                ts_text(created_at),
            ],
        )?;

        self.emit(
            Table::Customers,
            ChangeKind::Insert,
            Some(PartialRow {
                id: id.clone(),
                customer_id: None,
            }),
            None,
        );

        Ok(Customer {
            id,
            full_name: input.full_name,
            email: input.email,
            phone: input.phone,
            address: input.address,
            language: input.language,
            internal_notes: input.internal_notes,
            created_at,
        })
    }

    /// Overwrite a customer's editable fields and publish the update event.
    pub fn update_customer(&self, id: &str, input: CustomerInput) -> Result<(), StoreError> {
        let changed = self.conn_ref().execute(
            "UPDATE customers SET full_name = ?2, email = ?3, phone = ?4, address = ?5,
                    language = ?6, internal_notes = ?7
             WHERE id = ?1",
            params![
                id,
                input.full_name,
                input.email,
                input.phone,
                input.address,
                input.language.as_str(),
                input.internal_notes,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::RowNotFound {
                table: "customers",
                id: id.to_string(),
            });
        }

        self.emit(
            Table::Customers,
            ChangeKind::Update,
            Some(PartialRow {
                id: id.to_string(),
                customer_id: None,
            }),
            None,
        );
        Ok(())
    }

    pub fn get_customer(&self, id: &str) -> Result<Option<Customer>, StoreError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {CUSTOMER_COLS} FROM customers WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], |row| customer_at(row, 0))?;
        Ok(rows.next().transpose()?)
    }

    /// All customers, newest first.
    pub fn list_customers(&self) -> Result<Vec<Customer>, StoreError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {CUSTOMER_COLS} FROM customers ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], |row| customer_at(row, 0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Addresses of all customers that have one (map view input).
    pub fn customer_addresses(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn_ref()
            .prepare("SELECT id, address FROM customers WHERE address IS NOT NULL")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub(crate) fn touch_activity(
        &self,
        customer_id: Option<&str>,
        event_type: &str,
        description: &str,
        reference_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn_ref().execute(
            "INSERT INTO activity_log (id, customer_id, event_type, description, reference_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, customer_id, event_type, description, reference_id, now_text()],
        )?;
        self.emit(
            Table::ActivityLog,
            ChangeKind::Insert,
            Some(PartialRow {
                id,
                customer_id: customer_id.map(|s| s.to_string()),
            }),
            None,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeFeed;

    fn test_db() -> PortalDb {
        PortalDb::open_in_memory(ChangeFeed::new()).expect("open")
    }

    #[test]
    fn test_create_and_get_customer() {
        let db = test_db();
        let created = db
            .create_customer(CustomerInput {
                full_name: "Marie Tremblay".to_string(),
                email: Some("marie@example.com".to_string()),
                language: Language::Fr,
                ..Default::default()
            })
            .expect("create");

        let fetched = db.get_customer(&created.id).expect("get").expect("exists");
        assert_eq!(fetched.full_name, "Marie Tremblay");
        assert_eq!(fetched.language, Language::Fr);
    }

    #[test]
    fn test_update_missing_customer_errors() {
        let db = test_db();
        let err = db
            .update_customer("nope", CustomerInput::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::RowNotFound { .. }));
    }

    #[tokio::test]
    async fn test_mutations_publish_events() {
        let feed = ChangeFeed::new();
        let mut sub = feed.subscribe(Table::Customers, None);
        let db = PortalDb::open_in_memory(feed).expect("open");

        let c = db
            .create_customer(CustomerInput {
                full_name: "Paul".to_string(),
                ..Default::default()
            })
            .expect("create");

        let event = sub.recv().await.expect("event");
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.row_id(), Some(c.id.as_str()));
    }
}
