//! mien-store — canonical identity roster on SQLite.
//!
//! Owns the `persons` table. Embeddings are stored in their JSON wire form
//! and validated against the deployment's embedding dimension on the way in
//! and out. The enrollment write is a single row update, so a commit either
//! lands completely or not at all.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;
use uuid::Uuid;

use mien_core::codec;
use mien_core::{CodecError, Embedding, Identity};

type RawRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<bool>,
    Option<String>,
);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored embedding for identity {id} is corrupt: {source}")]
    CorruptEmbedding {
        id: String,
        #[source]
        source: CodecError,
    },
    #[error("embedding has {actual} values, store expects {expected}")]
    Dimension { expected: usize, actual: usize },
    #[error("identity {0} not found")]
    NotFound(String),
    #[error("identity {0} already exists")]
    AlreadyExists(String),
}

/// SQLite-backed identity roster.
///
/// Not internally synchronized — hand it to a single owner (the engine
/// thread) and route all access through that owner.
pub struct RosterStore {
    conn: Connection,
    dim: usize,
}

impl RosterStore {
    /// Open (creating if needed) the roster database at `path`.
    pub fn open(path: &Path, dim: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn, dim)
    }

    /// In-memory roster, for tests and diagnostics.
    pub fn open_in_memory(dim: usize) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, dim)
    }

    fn init(conn: Connection, dim: usize) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS persons (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                photo_ref   TEXT,
                embedding   TEXT,
                present     INTEGER,
                enrolled_at TEXT
            );",
        )?;
        Ok(Self { conn, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Create a new, un-enrolled identity. A fresh UUID is assigned when no
    /// id is given.
    pub fn add(&self, id: Option<String>, name: &str) -> Result<Identity, StoreError> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO persons (id, name) VALUES (?1, ?2)",
            params![id, name],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(id));
        }
        tracing::debug!(id = %id, name, "identity added");
        Ok(Identity::new(id, name))
    }

    /// Insert the given (id, name) pairs if the roster is empty. Returns the
    /// number of rows inserted — zero when the roster was already populated.
    pub fn seed(&self, roster: &[(String, String)]) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }
        for (id, name) in roster {
            self.conn.execute(
                "INSERT INTO persons (id, name) VALUES (?1, ?2)",
                params![id, name],
            )?;
        }
        tracing::info!(count = roster.len(), "seeded roster");
        Ok(roster.len())
    }

    /// Snapshot of every identity, ordered by id so matching passes see a
    /// deterministic candidate order.
    pub fn all(&self) -> Result<Vec<Identity>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, photo_ref, embedding, present, enrolled_at
             FROM persons ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::raw_row)?;

        let mut identities = Vec::new();
        for row in rows {
            identities.push(self.assemble(row?)?);
        }
        Ok(identities)
    }

    /// First identity whose id or name contains `query`, in id order.
    pub fn find(&self, query: &str) -> Result<Option<Identity>, StoreError> {
        let pattern = format!("%{query}%");
        let mut stmt = self.conn.prepare(
            "SELECT id, name, photo_ref, embedding, present, enrolled_at
             FROM persons WHERE id LIKE ?1 OR name LIKE ?1 ORDER BY id LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![pattern], Self::raw_row)?;
        match rows.next() {
            Some(row) => Ok(Some(self.assemble(row?)?)),
            None => Ok(None),
        }
    }

    /// Attach an embedding (and optional photo reference) to an identity.
    /// Single atomic row update; stamps `enrolled_at`.
    pub fn persist_enrollment(
        &self,
        id: &str,
        embedding: &Embedding,
        photo_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        if embedding.len() != self.dim {
            return Err(StoreError::Dimension {
                expected: self.dim,
                actual: embedding.len(),
            });
        }
        let wire = codec::encode(embedding).map_err(|source| StoreError::CorruptEmbedding {
            id: id.to_string(),
            source,
        })?;
        let enrolled_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let updated = self.conn.execute(
            "UPDATE persons SET embedding = ?2, photo_ref = ?3, enrolled_at = ?4 WHERE id = ?1",
            params![id, wire, photo_ref, enrolled_at],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tracing::info!(id, "enrollment persisted");
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM persons WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_present(&self, id: &str, present: bool) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE persons SET present = ?2 WHERE id = ?1",
            params![id, present],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn assemble(&self, row: RawRow) -> Result<Identity, StoreError> {
        let (id, name, photo_ref, raw_embedding, present, enrolled_at) = row;
        let embedding = match raw_embedding {
            Some(text) => Some(codec::decode(&text, self.dim).map_err(|source| {
                StoreError::CorruptEmbedding {
                    id: id.clone(),
                    source,
                }
            })?),
            None => None,
        };
        Ok(Identity {
            id,
            name,
            embedding,
            photo_ref,
            present,
            enrolled_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> RosterStore {
        RosterStore::open_in_memory(2).unwrap()
    }

    #[test]
    fn open_creates_database_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("roster.db");
        let store = RosterStore::open(&path, 2).unwrap();
        store.add(Some("1".into()), "Gourav").unwrap();
        drop(store);

        let reopened = RosterStore::open(&path, 2).unwrap();
        assert_eq!(reopened.all().unwrap().len(), 1);
    }

    #[test]
    fn add_assigns_uuid_when_no_id_given() {
        let store = store();
        let identity = store.add(None, "Priya").unwrap();
        assert!(!identity.id.is_empty());
        assert!(!identity.is_enrolled());
    }

    #[test]
    fn add_duplicate_id_rejected() {
        let store = store();
        store.add(Some("1".into()), "Gourav").unwrap();
        let err = store.add(Some("1".into()), "Imposter").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == "1"));
    }

    #[test]
    fn seed_only_populates_empty_roster() {
        let store = store();
        let roster = vec![
            ("1".to_string(), "Gourav".to_string()),
            ("2".to_string(), "Priya".to_string()),
        ];
        assert_eq!(store.seed(&roster).unwrap(), 2);
        assert_eq!(store.seed(&roster).unwrap(), 0);
        assert_eq!(store.all().unwrap().len(), 2);
    }

    #[test]
    fn persist_enrollment_round_trips_embedding() {
        let store = store();
        store.add(Some("1".into()), "Gourav").unwrap();
        let embedding = Embedding::new(vec![0.6, 0.8]);
        store
            .persist_enrollment("1", &embedding, Some("photo_1.jpg"))
            .unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].embedding.as_ref(), Some(&embedding));
        assert_eq!(all[0].photo_ref.as_deref(), Some("photo_1.jpg"));
        assert!(all[0].enrolled_at.is_some());
    }

    #[test]
    fn persist_enrollment_unknown_identity() {
        let store = store();
        let err = store
            .persist_enrollment("ghost", &Embedding::new(vec![1.0, 0.0]), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn persist_enrollment_wrong_dimension() {
        let store = store();
        store.add(Some("1".into()), "Gourav").unwrap();
        let err = store
            .persist_enrollment("1", &Embedding::new(vec![1.0, 0.0, 0.0]), None)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Dimension {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn find_matches_partial_id_or_name() {
        let store = store();
        store.add(Some("1".into()), "Gourav").unwrap();
        store.add(Some("2".into()), "Priya").unwrap();

        assert_eq!(store.find("Pri").unwrap().unwrap().id, "2");
        assert_eq!(store.find("1").unwrap().unwrap().name, "Gourav");
        assert!(store.find("nobody").unwrap().is_none());
    }

    #[test]
    fn all_returns_identities_in_id_order() {
        let store = store();
        store.add(Some("2".into()), "Priya").unwrap();
        store.add(Some("1".into()), "Gourav").unwrap();
        let ids: Vec<_> = store.all().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn remove_deletes_row() {
        let store = store();
        store.add(Some("1".into()), "Gourav").unwrap();
        store.remove("1").unwrap();
        assert!(store.all().unwrap().is_empty());
        assert!(matches!(store.remove("1"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn set_present_updates_flag() {
        let store = store();
        store.add(Some("1".into()), "Gourav").unwrap();
        store.set_present("1", true).unwrap();
        assert_eq!(store.all().unwrap()[0].present, Some(true));
    }

    #[test]
    fn corrupt_stored_embedding_is_reported() {
        let store = store();
        store.add(Some("1".into()), "Gourav").unwrap();
        store
            .conn
            .execute(
                "UPDATE persons SET embedding = '[1.0]' WHERE id = '1'",
                [],
            )
            .unwrap();
        let err = store.all().unwrap_err();
        assert!(matches!(err, StoreError::CorruptEmbedding { id, .. } if id == "1"));
    }
}
