use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::Db;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsRow {
    pub category: String,
    pub key: String,
    pub value: String,
    pub value_type: String,
}

/// Raw key/value overrides backing `crate::settings::Settings::load`.
#[derive(Clone)]
pub struct SettingsRepository {
    db: Db,
}

impl SettingsRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn load_all(&self) -> Result<Vec<SettingsRow>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare("SELECT category, key, value, type FROM web_settings")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SettingsRow {
                    category: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                    value_type: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set(&self, category: &str, key: &str, value: &str, value_type: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO web_settings (category, key, value, type) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(category, key) DO UPDATE SET value = excluded.value, type = excluded.type",
            params![category, key, value, value_type],
        )?;
        Ok(())
    }
}
