//! Durable, append-only store of enrolled signatures backed by SQLite.
//!
//! Each append runs in its own transaction, so a crash mid-write leaves the
//! previous committed sequence intact. Signatures are stored as little-endian
//! f32 blobs and read back in insertion order, bit for bit.

use crate::types::Signature;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS signatures (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    dim        INTEGER NOT NULL,
    vector     BLOB    NOT NULL,
    created_at TEXT    NOT NULL
)";

const IN_MEMORY: &str = ":memory:";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("face store {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("failed to write face store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to prepare face store location {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to enroll an empty signature")]
    EmptySignature,
    #[error("signature has {actual} dimensions but the store holds {expected}-dimensional signatures")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Enrolled signatures, mirrored in memory and on disk.
pub struct FaceStore {
    conn: Connection,
    path: PathBuf,
    signatures: Vec<Signature>,
}

impl std::fmt::Debug for FaceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceStore")
            .field("path", &self.path)
            .field("count", &self.signatures.len())
            .finish()
    }
}

impl FaceStore {
    /// Open (or create) the store at `path` and load every committed signature.
    ///
    /// Fails with [`StoreError::Corrupt`] when the file exists but cannot be decoded.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let corrupt = |e: rusqlite::Error| StoreError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let conn = Connection::open(path).map_err(corrupt)?;
        conn.pragma_update(None, "synchronous", "FULL").map_err(corrupt)?;
        conn.execute_batch(SCHEMA).map_err(corrupt)?;
        let signatures = read_signatures(&conn, path)?;

        tracing::info!(path = %path.display(), count = signatures.len(), "face store opened");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            signatures,
        })
    }

    /// Open the store, moving an undecodable file aside and starting empty.
    ///
    /// If even a fresh file cannot be created the store falls back to memory
    /// so the service still starts; enrollments then last until restart.
    pub fn open_or_recover(path: &Path) -> Self {
        match Self::open(path) {
            Ok(store) => store,
            Err(err @ StoreError::Corrupt { .. }) => {
                let aside = quarantine_path(path);
                tracing::error!(
                    error = %err,
                    moved_to = %aside.display(),
                    "face store unreadable; starting with an empty store"
                );
                if let Err(e) = std::fs::rename(path, &aside) {
                    tracing::error!(error = %e, "could not move corrupt face store aside");
                }
                Self::open(path).unwrap_or_else(|e| {
                    tracing::error!(error = %e, "could not recreate face store; using in-memory store");
                    Self::in_memory()
                })
            }
            Err(err) => {
                tracing::error!(error = %err, "face store unavailable; using in-memory store");
                Self::in_memory()
            }
        }
    }

    /// Volatile store, used as a last-resort fallback and in tests.
    pub fn in_memory() -> Self {
        // Opening an in-memory database only fails on allocation failure.
        let conn = Connection::open_in_memory()
            .and_then(|conn| conn.execute_batch(SCHEMA).map(|_| conn))
            .expect("in-memory SQLite database");
        Self {
            conn,
            path: PathBuf::from(IN_MEMORY),
            signatures: Vec::new(),
        }
    }

    /// Append a signature and commit it before returning.
    ///
    /// On failure nothing is added, in memory or on disk.
    pub fn append(&mut self, signature: Signature) -> Result<(), StoreError> {
        if signature.is_empty() {
            return Err(StoreError::EmptySignature);
        }
        if let Some(first) = self.signatures.first() {
            if first.dim() != signature.dim() {
                return Err(StoreError::DimensionMismatch {
                    expected: first.dim(),
                    actual: signature.dim(),
                });
            }
        }

        let path = &self.path;
        let write_err = |source: rusqlite::Error| StoreError::Write {
            path: path.clone(),
            source,
        };

        let tx = self.conn.transaction().map_err(write_err)?;
        tx.execute(
            "INSERT INTO signatures (dim, vector, created_at) VALUES (?1, ?2, ?3)",
            params![
                signature.dim() as i64,
                encode_vector(signature.values()),
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(write_err)?;
        tx.commit().map_err(write_err)?;

        self.signatures.push(signature);
        tracing::debug!(count = self.signatures.len(), "signature committed");
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.signatures.len()
    }

    pub fn all(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read the committed sequence at `path` without keeping the store open.
///
/// An absent file is an empty store, not an error.
pub fn load(path: &Path) -> Result<Vec<Signature>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open(path).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    read_signatures(&conn, path)
}

fn read_signatures(conn: &Connection, path: &Path) -> Result<Vec<Signature>, StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        message,
    };

    let mut stmt = conn
        .prepare("SELECT id, dim, vector FROM signatures ORDER BY id")
        .map_err(|e| corrupt(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })
        .map_err(|e| corrupt(e.to_string()))?;

    let mut signatures: Vec<Signature> = Vec::new();
    for row in rows {
        let (id, dim, blob) = row.map_err(|e| corrupt(e.to_string()))?;
        let values = decode_vector(&blob, dim).map_err(|m| corrupt(format!("row {id}: {m}")))?;
        if let Some(first) = signatures.first() {
            if first.dim() != values.len() {
                return Err(corrupt(format!(
                    "row {id}: {}-dimensional signature among {}-dimensional ones",
                    values.len(),
                    first.dim()
                )));
            }
        }
        signatures.push(Signature::new(values));
    }
    Ok(signatures)
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8], dim: i64) -> Result<Vec<f32>, String> {
    if dim <= 0 {
        return Err(format!("invalid dimension {dim}"));
    }
    if blob.len() != dim as usize * 4 {
        return Err(format!("expected {} bytes for {dim} floats, got {}", dim * 4, blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{stamp}"));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sig(values: &[f32]) -> Signature {
        Signature::new(values.to_vec())
    }

    #[test]
    fn test_load_absent_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let loaded = load(&tmp.path().join("missing.db")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_append_persists_and_reloads_exactly() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/faces.db");

        let first = sig(&[0.1, -0.25, 1.0e-7]);
        let second = sig(&[f32::MAX, 0.0, -3.5]);
        {
            let mut store = FaceStore::open(&path).unwrap();
            assert_eq!(store.count(), 0);
            store.append(first.clone()).unwrap();
            store.append(second.clone()).unwrap();
            assert_eq!(store.count(), 2);
        }

        assert_eq!(load(&path).unwrap(), vec![first.clone(), second.clone()]);
        let reopened = FaceStore::open(&path).unwrap();
        assert_eq!(reopened.all(), &[first, second]);
    }

    #[test]
    fn test_rejects_empty_signature() {
        let mut store = FaceStore::in_memory();
        assert!(matches!(store.append(sig(&[])), Err(StoreError::EmptySignature)));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let mut store = FaceStore::in_memory();
        store.append(sig(&[1.0, 2.0])).unwrap();
        let err = store.append(sig(&[1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_failed_write_leaves_memory_and_disk_unchanged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("faces.db");
        let mut store = FaceStore::open(&path).unwrap();
        store.append(sig(&[1.0, 0.0])).unwrap();

        store.conn.pragma_update(None, "query_only", true).unwrap();
        let err = store.append(sig(&[0.0, 1.0])).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert_eq!(store.count(), 1);
        assert_eq!(load(&path).unwrap(), vec![sig(&[1.0, 0.0])]);
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("faces.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

        assert!(matches!(load(&path), Err(StoreError::Corrupt { .. })));
        assert!(matches!(FaceStore::open(&path), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_truncated_vector_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("faces.db");
        FaceStore::open(&path).unwrap().append(sig(&[1.0, 2.0])).unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO signatures (dim, vector, created_at) VALUES (2, ?1, 'x')",
            params![vec![0u8; 5]],
        )
        .unwrap();
        drop(conn);

        assert!(matches!(load(&path), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_open_or_recover_moves_corrupt_file_aside() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("faces.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

        let mut store = FaceStore::open_or_recover(&path);
        assert_eq!(store.count(), 0);
        store.append(sig(&[0.5])).unwrap();
        assert_eq!(load(&path).unwrap(), vec![sig(&[0.5])]);

        let quarantined = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }
}
