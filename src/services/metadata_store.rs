//! src/services/metadata_store.rs
//!
//! Relational persistence of photo records. The pipeline only needs
//! insert/get/update/delete by content key, so that is all [`MetadataStore`]
//! exposes; [`SqliteMetadataStore`] is the production implementation.

use crate::models::photo::Photo;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const PHOTO_COLUMNS: &str = "hash, user_id, name, description, camera, lens, focal_length, iso, \
     shutter_speed, aperture, location, latitude, longitude, taken_at, privacy, nsfw, \
     width, height, url, created_at, updated_at";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("photo `{0}` not found")]
    NotFound(String),
    #[error("photo `{0}` already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the hash is taken.
    async fn insert(&self, photo: &Photo) -> MetadataResult<()>;

    async fn get(&self, hash: &str) -> MetadataResult<Photo>;

    /// Persist the descriptive fields of an existing record.
    async fn update(&self, photo: &Photo) -> MetadataResult<()>;

    async fn delete(&self, hash: &str) -> MetadataResult<()>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> MetadataResult<()>;
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, photo: &Photo) -> MetadataResult<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO photos ({PHOTO_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&photo.hash)
        .bind(&photo.user_id)
        .bind(&photo.name)
        .bind(&photo.description)
        .bind(&photo.camera)
        .bind(&photo.lens)
        .bind(&photo.focal_length)
        .bind(photo.iso)
        .bind(&photo.shutter_speed)
        .bind(&photo.aperture)
        .bind(&photo.location)
        .bind(photo.latitude)
        .bind(photo.longitude)
        .bind(photo.taken_at)
        .bind(photo.privacy)
        .bind(photo.nsfw)
        .bind(photo.width)
        .bind(photo.height)
        .bind(&photo.url)
        .bind(photo.created_at)
        .bind(photo.updated_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(MetadataError::AlreadyExists(photo.hash.clone()))
            }
            Err(err) => Err(MetadataError::Sqlx(err)),
        }
    }

    async fn get(&self, hash: &str) -> MetadataResult<Photo> {
        sqlx::query_as::<_, Photo>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE hash = ?"
        ))
        .bind(hash)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => MetadataError::NotFound(hash.to_string()),
            other => MetadataError::Sqlx(other),
        })
    }

    async fn update(&self, photo: &Photo) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE photos SET
                name = ?, description = ?, camera = ?, lens = ?, focal_length = ?,
                iso = ?, shutter_speed = ?, aperture = ?, location = ?, privacy = ?,
                latitude = ?, longitude = ?, taken_at = ?, nsfw = ?, updated_at = ?
             WHERE hash = ?",
        )
        .bind(&photo.name)
        .bind(&photo.description)
        .bind(&photo.camera)
        .bind(&photo.lens)
        .bind(&photo.focal_length)
        .bind(photo.iso)
        .bind(&photo.shutter_speed)
        .bind(&photo.aperture)
        .bind(&photo.location)
        .bind(photo.privacy)
        .bind(photo.latitude)
        .bind(photo.longitude)
        .bind(photo.taken_at)
        .bind(photo.nsfw)
        .bind(photo.updated_at)
        .bind(&photo.hash)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(photo.hash.clone()));
        }
        Ok(())
    }

    async fn delete(&self, hash: &str) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM photos WHERE hash = ?")
            .bind(hash)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(hash.to_string()));
        }
        debug!("deleted metadata row {}", hash);
        Ok(())
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Apply the embedded schema, one statement at a time.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    /// Single-connection in-memory database; every connection to
    /// `sqlite::memory:` would otherwise see its own empty schema.
    pub(crate) async fn memory_pool() -> Arc<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(pool)
    }

    fn sample(hash: &str) -> Photo {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Photo {
            hash: hash.to_string(),
            user_id: Some("alice".into()),
            name: "Harbour".into(),
            description: "Morning fog".into(),
            camera: "X100V".into(),
            lens: "23mm".into(),
            focal_length: "23mm".into(),
            iso: Some(160),
            shutter_speed: "1/250".into(),
            aperture: "f/5.6".into(),
            location: "Lisbon".into(),
            latitude: Some(38.7),
            longitude: Some(-9.14),
            taken_at: Some(now),
            privacy: false,
            nsfw: false,
            width: 640,
            height: 480,
            url: format!("http://localhost/photos/{hash}/file"),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteMetadataStore::new(memory_pool().await);
        let photo = sample("HashOne1");

        store.insert(&photo).await.unwrap();
        assert_eq!(store.get("HashOne1").await.unwrap(), photo);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_reported() {
        let store = SqliteMetadataStore::new(memory_pool().await);
        let photo = sample("HashDup1");

        store.insert(&photo).await.unwrap();
        assert!(matches!(
            store.insert(&photo).await,
            Err(MetadataError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = SqliteMetadataStore::new(memory_pool().await);
        let mut photo = sample("HashUpd1");
        store.insert(&photo).await.unwrap();

        photo.name = "Renamed".into();
        photo.nsfw = true;
        store.update(&photo).await.unwrap();
        let stored = store.get("HashUpd1").await.unwrap();
        assert_eq!(stored.name, "Renamed");
        assert!(stored.nsfw);

        store.delete("HashUpd1").await.unwrap();
        assert!(matches!(
            store.get("HashUpd1").await,
            Err(MetadataError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("HashUpd1").await,
            Err(MetadataError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let store = SqliteMetadataStore::new(memory_pool().await);
        assert!(matches!(
            store.update(&sample("Nowhere1")).await,
            Err(MetadataError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ping() {
        let store = SqliteMetadataStore::new(memory_pool().await);
        store.ping().await.unwrap();
    }
}
