use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::Db;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub voice_id: String,
    pub voice_settings: String,
    pub instructions_md: String,
    pub is_active: bool,
    pub sort_order: i64,
    pub use_dialogue_api: bool,
    pub dialogue_model: String,
    pub voice_config: String,
}

#[derive(Clone)]
pub struct TopicRepository {
    db: Db,
}

impl TopicRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn upsert(&self, topic: &Topic) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO topics
                (slug, name, description, voice_id, voice_settings, instructions_md,
                 is_active, sort_order, use_dialogue_api, dialogue_model, voice_config)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(slug) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                voice_id = excluded.voice_id,
                voice_settings = excluded.voice_settings,
                instructions_md = excluded.instructions_md,
                is_active = excluded.is_active,
                sort_order = excluded.sort_order,
                use_dialogue_api = excluded.use_dialogue_api,
                dialogue_model = excluded.dialogue_model,
                voice_config = excluded.voice_config",
            params![
                topic.slug,
                topic.name,
                topic.description,
                topic.voice_id,
                topic.voice_settings,
                topic.instructions_md,
                topic.is_active as i64,
                topic.sort_order,
                topic.use_dialogue_api as i64,
                topic.dialogue_model,
                topic.voice_config,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Result<Option<Topic>> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT slug, name, description, voice_id, voice_settings, instructions_md,
                    is_active, sort_order, use_dialogue_api, dialogue_model, voice_config
             FROM topics WHERE slug = ?1",
            params![slug],
            row_to_topic,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_active(&self) -> Result<Vec<Topic>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT slug, name, description, voice_id, voice_settings, instructions_md,
                    is_active, sort_order, use_dialogue_api, dialogue_model, voice_config
             FROM topics WHERE is_active = 1 ORDER BY sort_order, slug",
        )?;
        let rows = stmt
            .query_map([], row_to_topic)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_topic(row: &rusqlite::Row) -> rusqlite::Result<Topic> {
    Ok(Topic {
        slug: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        voice_id: row.get(3)?,
        voice_settings: row.get(4)?,
        instructions_md: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
        sort_order: row.get(7)?,
        use_dialogue_api: row.get::<_, i64>(8)? != 0,
        dialogue_model: row.get(9)?,
        voice_config: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_repo() -> (tempfile::TempDir, TopicRepository) {
        let (dir, db) = super::super::test_db();
        (dir, TopicRepository::new(db))
    }

    fn sample(slug: &str) -> Topic {
        Topic {
            slug: slug.to_string(),
            name: "AI News".to_string(),
            description: "".to_string(),
            voice_id: "voice-1".to_string(),
            voice_settings: "{}".to_string(),
            instructions_md: "".to_string(),
            is_active: true,
            sort_order: 0,
            use_dialogue_api: false,
            dialogue_model: "".to_string(),
            voice_config: "{}".to_string(),
        }
    }

    #[test]
    fn upsert_then_get_roundtrips() {
        let (_dir, repo) = test_repo();
        repo.upsert(&sample("ai-news")).unwrap();
        let reloaded = repo.get("ai-news").unwrap().unwrap();
        assert_eq!(reloaded.name, "AI News");
    }

    #[test]
    fn list_active_excludes_inactive() {
        let (_dir, repo) = test_repo();
        let mut inactive = sample("archived");
        inactive.is_active = false;
        repo.upsert(&sample("ai-news")).unwrap();
        repo.upsert(&inactive).unwrap();
        let active = repo.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].slug, "ai-news");
    }
}
