//! Filesystem blob store for raw CV bytes.
//!
//! Two interchangeable backends, selected once at startup: the mounted
//! persistent volume in production, or a project-local directory everywhere
//! else. Files are stored flat and named deterministically from the owning
//! extraction id; the user-supplied filename contributes nothing but its
//! extension, so path traversal is impossible by construction.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::extraction::CvFileRow;

/// Well-known persistent volume mount used by production deployments.
const VOLUME_MOUNT: &str = "/data/cv-storage";
/// Fallback directory for local development and tests.
const LOCAL_DIR: &str = ".cv-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage directory {0} is not writable")]
    Unavailable(String),

    #[error("no stored file for extraction {0}")]
    NotFound(Uuid),

    #[error("blob lookup failed: {0}")]
    Lookup(#[from] sqlx::Error),
}

/// Which backend the startup probe selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEnvironment {
    Volume,
    Local,
}

impl StorageEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEnvironment::Volume => "volume",
            StorageEnvironment::Local => "local",
        }
    }
}

/// Metadata attached to a stored blob.
#[derive(Debug, Clone)]
pub struct SaveMeta {
    pub extraction_id: Uuid,
    pub tenant_id: Uuid,
    pub mime_type: String,
}

/// Canonical result of a successful save.
#[derive(Debug, Clone, Serialize)]
pub struct SavedBlob {
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub original_filename: String,
    pub storage_type: StorageEnvironment,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageHealth {
    pub status: String,
    pub writable: bool,
    pub path: String,
    pub environment: StorageEnvironment,
}

/// The blob store. Cheap to clone behind an `Arc` in `AppState`.
#[derive(Debug)]
pub struct CvStorage {
    root: PathBuf,
    environment: StorageEnvironment,
}

impl CvStorage {
    /// Probes the environment and opens the selected backend, creating the
    /// directory if absent. The directory must be writable before this
    /// returns; a failed probe is a startup error, not a deferred one.
    pub async fn from_env(
        storage_mode: Option<&str>,
        railway_environment: Option<&str>,
    ) -> Result<Self, StorageError> {
        let volume_exists = Path::new(VOLUME_MOUNT).is_dir();
        let forced_production =
            storage_mode == Some("production") || railway_environment.is_some();

        let (root, environment) = if volume_exists || forced_production {
            (PathBuf::from(VOLUME_MOUNT), StorageEnvironment::Volume)
        } else {
            (PathBuf::from(LOCAL_DIR), StorageEnvironment::Local)
        };

        let storage = Self::open(root, environment).await?;
        info!(
            "CV storage ready: {} backend at {}",
            storage.environment.as_str(),
            storage.root.display()
        );
        Ok(storage)
    }

    /// Opens a store rooted at an explicit directory. Used by tests and by
    /// `from_env` after backend selection.
    pub async fn open(
        root: PathBuf,
        environment: StorageEnvironment,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await.map_err(|e| StorageError::Io {
            path: root.display().to_string(),
            source: e,
        })?;

        let storage = Self { root, environment };
        let health = storage.health_check().await;
        if !health.writable {
            return Err(StorageError::Unavailable(health.path));
        }
        Ok(storage)
    }

    /// Deterministic on-disk name: `cv_<extraction_id>_<YYYY-MM-DD><ext>`.
    /// Only the extension survives from the user-supplied filename.
    pub fn file_name(extraction_id: Uuid, original_filename: &str, date: NaiveDate) -> String {
        let ext = extension_of(original_filename);
        format!("cv_{extraction_id}_{}{ext}", date.format("%Y-%m-%d"))
    }

    /// Writes the blob and returns its canonical metadata.
    ///
    /// The write goes through a temp file and an atomic rename, so a reader
    /// can never observe a partially written blob under the final name.
    pub async fn save(
        &self,
        data: &[u8],
        original_filename: &str,
        meta: &SaveMeta,
    ) -> Result<SavedBlob, StorageError> {
        let name = Self::file_name(meta.extraction_id, original_filename, Utc::now().date_naive());
        let final_path = self.root.join(&name);
        let tmp_path = self.root.join(format!("{name}.tmp-{}", Uuid::new_v4()));

        fs::write(&tmp_path, data).await.map_err(|e| StorageError::Io {
            path: tmp_path.display().to_string(),
            source: e,
        })?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| StorageError::Io {
                path: final_path.display().to_string(),
                source: e,
            })?;

        debug!(
            extraction_id = %meta.extraction_id,
            size = data.len(),
            path = %final_path.display(),
            "stored CV blob"
        );

        Ok(SavedBlob {
            file_path: final_path.display().to_string(),
            file_size: data.len() as i64,
            mime_type: meta.mime_type.clone(),
            original_filename: original_filename.to_string(),
            storage_type: self.environment,
        })
    }

    pub async fn read(&self, file_path: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(file_path).await.map_err(|e| StorageError::Io {
            path: file_path.to_string(),
            source: e,
        })
    }

    /// Looks up the blob record for an extraction and reads its bytes.
    pub async fn read_by_extraction_id(
        &self,
        pool: &PgPool,
        extraction_id: Uuid,
    ) -> Result<Vec<u8>, StorageError> {
        let row: Option<CvFileRow> =
            sqlx::query_as("SELECT * FROM cv_files WHERE extraction_id = $1")
                .bind(extraction_id)
                .fetch_optional(pool)
                .await?;
        let row = row.ok_or(StorageError::NotFound(extraction_id))?;
        self.read(&row.file_path).await
    }

    /// Idempotent delete: a missing file is not an error.
    pub async fn delete(&self, file_path: &str) -> Result<(), StorageError> {
        match fs::remove_file(file_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io {
                path: file_path.to_string(),
                source: e,
            }),
        }
    }

    #[allow(dead_code)] // part of the storage contract; callers live outside this core
    pub async fn delete_by_extraction_id(
        &self,
        pool: &PgPool,
        extraction_id: Uuid,
    ) -> Result<(), StorageError> {
        let row: Option<CvFileRow> =
            sqlx::query_as("SELECT * FROM cv_files WHERE extraction_id = $1")
                .bind(extraction_id)
                .fetch_optional(pool)
                .await?;
        if let Some(row) = row {
            self.delete(&row.file_path).await?;
        }
        Ok(())
    }

    /// Verifies directory accessibility and write capability with a probe
    /// file round trip.
    pub async fn health_check(&self) -> StorageHealth {
        let probe = self.root.join(format!(".health-probe-{}", Uuid::new_v4()));
        let writable = match fs::write(&probe, b"probe").await {
            Ok(()) => {
                let readable = fs::read(&probe).await.is_ok();
                let _ = fs::remove_file(&probe).await;
                readable
            }
            Err(e) => {
                warn!("storage probe write failed at {}: {e}", probe.display());
                false
            }
        };

        StorageHealth {
            status: if writable { "ok" } else { "unavailable" }.to_string(),
            writable,
            path: self.root.display().to_string(),
            environment: self.environment,
        }
    }

    /// File count and total byte size of the store, for the ops endpoint.
    pub async fn directory_stats(&self) -> Result<(u64, u64), StorageError> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| StorageError::Io {
            path: self.root.display().to_string(),
            source: e,
        })?;

        let mut count = 0u64;
        let mut bytes = 0u64;
        while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::Io {
            path: self.root.display().to_string(),
            source: e,
        })? {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    count += 1;
                    bytes += meta.len();
                }
            }
        }
        Ok((count, bytes))
    }
}

fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_storage() -> (TempDir, CvStorage) {
        let dir = TempDir::new().unwrap();
        let storage = CvStorage::open(dir.path().to_path_buf(), StorageEnvironment::Local)
            .await
            .unwrap();
        (dir, storage)
    }

    fn meta(extraction_id: Uuid) -> SaveMeta {
        SaveMeta {
            extraction_id,
            tenant_id: Uuid::new_v4(),
            mime_type: "application/pdf".to_string(),
        }
    }

    #[test]
    fn test_file_name_is_deterministic_and_ignores_user_name() {
        let id = Uuid::nil();
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();
        let name = CvStorage::file_name(id, "../../etc/passwd.pdf", date);
        assert_eq!(
            name,
            "cv_00000000-0000-0000-0000-000000000000_2026-08-07.pdf"
        );
        // Same inputs, same name.
        assert_eq!(name, CvStorage::file_name(id, "totally different.pdf", date));
    }

    #[test]
    fn test_file_name_extension_normalized() {
        let id = Uuid::nil();
        let date = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert!(CvStorage::file_name(id, "CV.DOCX", date).ends_with(".docx"));
        assert!(!CvStorage::file_name(id, "no_extension", date).contains('.'));
    }

    #[tokio::test]
    async fn test_save_then_read_round_trip() {
        let (_dir, storage) = temp_storage().await;
        let id = Uuid::new_v4();
        let saved = storage.save(b"hello cv", "resume.pdf", &meta(id)).await.unwrap();

        assert_eq!(saved.file_size, 8);
        assert_eq!(saved.storage_type, StorageEnvironment::Local);
        let bytes = storage.read(&saved.file_path).await.unwrap();
        assert_eq!(bytes, b"hello cv");
    }

    #[tokio::test]
    async fn test_saved_size_matches_disk_size() {
        let (_dir, storage) = temp_storage().await;
        let data = vec![7u8; 4096];
        let saved = storage
            .save(&data, "resume.docx", &meta(Uuid::new_v4()))
            .await
            .unwrap();
        let on_disk = std::fs::metadata(&saved.file_path).unwrap().len();
        assert_eq!(saved.file_size as u64, on_disk);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, storage) = temp_storage().await;
        let saved = storage
            .save(b"bytes", "cv.pdf", &meta(Uuid::new_v4()))
            .await
            .unwrap();

        storage.delete(&saved.file_path).await.unwrap();
        // Second delete of a now-missing file still succeeds.
        storage.delete(&saved.file_path).await.unwrap();
    }

    #[tokio::test]
    async fn test_health_check_reports_writable() {
        let (_dir, storage) = temp_storage().await;
        let health = storage.health_check().await;
        assert!(health.writable);
        assert_eq!(health.status, "ok");
        assert_eq!(health.environment, StorageEnvironment::Local);
    }

    #[tokio::test]
    async fn test_directory_stats_counts_files_and_bytes() {
        let (_dir, storage) = temp_storage().await;
        storage.save(b"12345", "a.pdf", &meta(Uuid::new_v4())).await.unwrap();
        storage.save(b"123", "b.pdf", &meta(Uuid::new_v4())).await.unwrap();

        let (count, bytes) = storage.directory_stats().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(bytes, 8);
    }

    #[tokio::test]
    async fn test_no_tmp_files_left_behind() {
        let (dir, storage) = temp_storage().await;
        storage.save(b"x", "a.pdf", &meta(Uuid::new_v4())).await.unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
