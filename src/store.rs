//! Persistence boundary for exported narrations.
//!
//! After a successful export exactly one record — article, text, or
//! podcast — may be updated with the produced file paths. The trait keeps
//! the pipeline testable; [`SqliteRecordStore`] is the shipped backend.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::SqlitePool;

/// File paths attached to a record once its narration exists.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub markdown_file: Option<PathBuf>,
    pub audio_file: PathBuf,
    pub image_file: Option<PathBuf>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn update_article(&self, article_id: &str, update: &RecordUpdate) -> anyhow::Result<()>;
    async fn update_text(&self, text_id: i64, update: &RecordUpdate) -> anyhow::Result<()>;
    async fn update_podcast(&self, podcast_id: i64, update: &RecordUpdate) -> anyhow::Result<()>;
}

/// SQLite-backed record store over the application database.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn path_str(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.display().to_string())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn update_article(&self, article_id: &str, update: &RecordUpdate) -> anyhow::Result<()> {
        sqlx::query("UPDATE articles SET markdown_file = ?, audio_file = ?, img_file = ? WHERE id = ?")
            .bind(path_str(&update.markdown_file))
            .bind(update.audio_file.display().to_string())
            .bind(path_str(&update.image_file))
            .bind(article_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("updating article {article_id}"))?;
        tracing::info!(article_id, "article record updated with audio data");
        Ok(())
    }

    async fn update_text(&self, text_id: i64, update: &RecordUpdate) -> anyhow::Result<()> {
        sqlx::query("UPDATE texts SET markdown_file = ?, audio_file = ?, img_file = ? WHERE id = ?")
            .bind(path_str(&update.markdown_file))
            .bind(update.audio_file.display().to_string())
            .bind(path_str(&update.image_file))
            .bind(text_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("updating text {text_id}"))?;
        tracing::info!(text_id, "text record updated with audio data");
        Ok(())
    }

    async fn update_podcast(&self, podcast_id: i64, update: &RecordUpdate) -> anyhow::Result<()> {
        sqlx::query("UPDATE podcasts SET audio_file = ?, img_file = ? WHERE id = ?")
            .bind(update.audio_file.display().to_string())
            .bind(path_str(&update.image_file))
            .bind(podcast_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("updating podcast {podcast_id}"))?;
        tracing::info!(podcast_id, "podcast record updated with audio data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    async fn pool_with_schema() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        for ddl in [
            "CREATE TABLE articles (id TEXT PRIMARY KEY, markdown_file TEXT, audio_file TEXT, img_file TEXT)",
            "CREATE TABLE texts (id INTEGER PRIMARY KEY, markdown_file TEXT, audio_file TEXT, img_file TEXT)",
            "CREATE TABLE podcasts (id INTEGER PRIMARY KEY, audio_file TEXT, img_file TEXT)",
        ] {
            sqlx::query(ddl).execute(&pool).await.unwrap();
        }
        pool
    }

    fn update() -> RecordUpdate {
        RecordUpdate {
            markdown_file: Some(PathBuf::from("/out/story.md")),
            audio_file: PathBuf::from("/out/story.mp3"),
            image_file: None,
        }
    }

    #[tokio::test]
    async fn article_row_receives_file_paths() {
        let pool = pool_with_schema().await;
        sqlx::query("INSERT INTO articles (id) VALUES ('a-1')")
            .execute(&pool)
            .await
            .unwrap();

        let store = SqliteRecordStore::new(pool.clone());
        store.update_article("a-1", &update()).await.unwrap();

        let row = sqlx::query("SELECT audio_file, markdown_file FROM articles WHERE id = 'a-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("audio_file"), "/out/story.mp3");
        assert_eq!(row.get::<String, _>("markdown_file"), "/out/story.md");
    }

    #[tokio::test]
    async fn podcast_row_receives_audio_only() {
        let pool = pool_with_schema().await;
        sqlx::query("INSERT INTO podcasts (id) VALUES (7)")
            .execute(&pool)
            .await
            .unwrap();

        let store = SqliteRecordStore::new(pool.clone());
        store.update_podcast(7, &update()).await.unwrap();

        let row = sqlx::query("SELECT audio_file FROM podcasts WHERE id = 7")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("audio_file"), "/out/story.mp3");
    }
}
