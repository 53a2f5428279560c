//! Stain catalogue and client selections.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{StainOption, StainSelection};

use super::{ts_col, ts_text, PortalDb};

impl PortalDb {
    pub fn add_stain_option(
        &self,
        name: &str,
        tone: &str,
        opacity: &str,
    ) -> Result<StainOption, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn_ref().execute(
            "INSERT INTO stain_options (id, name, tone, opacity) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, tone, opacity],
        )?;
        Ok(StainOption {
            id,
            name: name.to_string(),
            tone: tone.to_string(),
            opacity: opacity.to_string(),
        })
    }

    pub fn list_stain_options(&self) -> Result<Vec<StainOption>, StoreError> {
        let mut stmt = self
            .conn_ref()
            .prepare("SELECT id, name, tone, opacity FROM stain_options ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(StainOption {
                id: row.get(0)?,
                name: row.get(1)?,
                tone: row.get(2)?,
                opacity: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Record (or replace) a customer's confirmed stain selection and log
    /// the activity so it shows on the customer timeline.
    pub fn record_stain_selection(
        &self,
        customer_id: &str,
        option_id: &str,
    ) -> Result<StainSelection, StoreError> {
        let selected_at = Utc::now();
        self.conn_ref().execute(
            "INSERT INTO stain_selections (customer_id, option_id, selected_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(customer_id) DO UPDATE SET option_id = ?2, selected_at = ?3",
            params![customer_id, option_id, ts_text(selected_at)],
        )?;
        self.touch_activity(
            Some(customer_id),
            "stain_selected",
            "Stain selection confirmed",
            Some(option_id),
        )?;
        Ok(StainSelection {
            customer_id: customer_id.to_string(),
            option_id: option_id.to_string(),
            selected_at,
        })
    }

    pub fn get_stain_selection(
        &self,
        customer_id: &str,
    ) -> Result<Option<StainSelection>, StoreError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT customer_id, option_id, selected_at FROM stain_selections WHERE customer_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![customer_id], |row| {
            Ok(StainSelection {
                customer_id: row.get(0)?,
                option_id: row.get(1)?,
                selected_at: ts_col(row, 2)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::customers::CustomerInput;
    use crate::feed::ChangeFeed;

    #[test]
    fn test_selection_replaces_previous() {
        let db = PortalDb::open_in_memory(ChangeFeed::new()).expect("open");
        let cid = db
            .create_customer(CustomerInput {
                full_name: "Réal".to_string(),
                ..Default::default()
            })
            .expect("customer")
            .id;
        let cedar = db.add_stain_option("Cedar", "warm", "semi-transparent").expect("opt");
        let walnut = db.add_stain_option("Walnut", "dark", "solid").expect("opt");

        db.record_stain_selection(&cid, &cedar.id).expect("select");
        db.record_stain_selection(&cid, &walnut.id).expect("reselect");

        let selection = db
            .get_stain_selection(&cid)
            .expect("get")
            .expect("exists");
        assert_eq!(selection.option_id, walnut.id);
    }
}
