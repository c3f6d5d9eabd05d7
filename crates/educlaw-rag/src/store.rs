//! Embedding stores — where indexed chunks and their vectors live.
//!
//! Two backends behind one trait: an in-memory map for tests and ephemeral
//! runs, and a sqlite file for persistence across CLI invocations. Writes
//! are replace-all per content id, so regeneration can never leave stale
//! fragments behind.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use educlaw_core::error::{EduClawError, Result};
use educlaw_core::types::DocumentChunk;

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    fn name(&self) -> &str;

    /// Delete all chunks for `content_id`, then insert `chunks` atomically.
    async fn replace_content(&self, content_id: &str, chunks: Vec<DocumentChunk>) -> Result<usize>;

    /// Delete all chunks for `content_id`; returns how many were removed.
    async fn delete_content(&self, content_id: &str) -> Result<usize>;

    /// Fetch every chunk, optionally restricted to one content id, ordered
    /// by content id then chunk index.
    async fn chunks(&self, scope: Option<&str>) -> Result<Vec<DocumentChunk>>;

    async fn chunk_count(&self) -> Result<usize>;
}

/// Build the store named by the config backend string.
pub fn create_store(backend: &str, path: &Path) -> Result<Arc<dyn EmbeddingStore>> {
    match backend {
        "memory" => Ok(Arc::new(MemoryEmbeddingStore::new())),
        "sqlite" => Ok(Arc::new(SqliteEmbeddingStore::open(path)?)),
        other => Err(EduClawError::Config(format!("Unknown store backend: {other}"))),
    }
}

// ─── Memory Backend ─────────────────────────────────────────────────────────

/// In-memory store: a map of content id to its chunks.
#[derive(Default)]
pub struct MemoryEmbeddingStore {
    chunks: Mutex<HashMap<String, Vec<DocumentChunk>>>,
}

impl MemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingStore for MemoryEmbeddingStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn replace_content(&self, content_id: &str, chunks: Vec<DocumentChunk>) -> Result<usize> {
        let count = chunks.len();
        let mut map = self.chunks.lock().map_err(|e| EduClawError::Store(e.to_string()))?;
        map.insert(content_id.to_string(), chunks);
        Ok(count)
    }

    async fn delete_content(&self, content_id: &str) -> Result<usize> {
        let mut map = self.chunks.lock().map_err(|e| EduClawError::Store(e.to_string()))?;
        Ok(map.remove(content_id).map(|v| v.len()).unwrap_or(0))
    }

    async fn chunks(&self, scope: Option<&str>) -> Result<Vec<DocumentChunk>> {
        let map = self.chunks.lock().map_err(|e| EduClawError::Store(e.to_string()))?;
        let mut out: Vec<DocumentChunk> = match scope {
            Some(id) => map.get(id).cloned().unwrap_or_default(),
            None => map.values().flatten().cloned().collect(),
        };
        out.sort_by(|a, b| {
            a.content_id.cmp(&b.content_id).then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(out)
    }

    async fn chunk_count(&self) -> Result<usize> {
        let map = self.chunks.lock().map_err(|e| EduClawError::Store(e.to_string()))?;
        Ok(map.values().map(|v| v.len()).sum())
    }
}

// ─── Sqlite Backend ─────────────────────────────────────────────────────────

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    content_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    metadata TEXT DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_content ON chunks(content_id);";

/// Sqlite-backed store. Vectors are packed as little-endian f32 BLOBs.
pub struct SqliteEmbeddingStore {
    conn: Mutex<Connection>,
}

impl SqliteEmbeddingStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| EduClawError::Store(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| EduClawError::Store(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| EduClawError::Store(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| EduClawError::Store(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl EmbeddingStore for SqliteEmbeddingStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn replace_content(&self, content_id: &str, chunks: Vec<DocumentChunk>) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|e| EduClawError::Store(e.to_string()))?;
        let tx = conn.transaction().map_err(|e| EduClawError::Store(e.to_string()))?;

        tx.execute("DELETE FROM chunks WHERE content_id = ?1", rusqlite::params![content_id])
            .map_err(|e| EduClawError::Store(e.to_string()))?;
        for chunk in &chunks {
            tx.execute(
                "INSERT INTO chunks (id, content_id, chunk_index, text, embedding, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    chunk.id,
                    chunk.content_id,
                    chunk.chunk_index,
                    chunk.text,
                    pack_vector(&chunk.embedding),
                    chunk.metadata.to_string(),
                    chunk.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| EduClawError::Store(e.to_string()))?;
        }

        tx.commit().map_err(|e| EduClawError::Store(e.to_string()))?;
        Ok(chunks.len())
    }

    async fn delete_content(&self, content_id: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| EduClawError::Store(e.to_string()))?;
        conn.execute("DELETE FROM chunks WHERE content_id = ?1", rusqlite::params![content_id])
            .map_err(|e| EduClawError::Store(e.to_string()))
    }

    async fn chunks(&self, scope: Option<&str>) -> Result<Vec<DocumentChunk>> {
        let conn = self.conn.lock().map_err(|e| EduClawError::Store(e.to_string()))?;
        let mut stmt;
        let rows = match scope {
            Some(id) => {
                stmt = conn
                    .prepare(
                        "SELECT id, content_id, chunk_index, text, embedding, metadata, created_at
                         FROM chunks WHERE content_id = ?1 ORDER BY chunk_index",
                    )
                    .map_err(|e| EduClawError::Store(e.to_string()))?;
                stmt.query_map(rusqlite::params![id], row_to_chunk)
                    .map_err(|e| EduClawError::Store(e.to_string()))?
            }
            None => {
                stmt = conn
                    .prepare(
                        "SELECT id, content_id, chunk_index, text, embedding, metadata, created_at
                         FROM chunks ORDER BY content_id, chunk_index",
                    )
                    .map_err(|e| EduClawError::Store(e.to_string()))?;
                stmt.query_map([], row_to_chunk)
                    .map_err(|e| EduClawError::Store(e.to_string()))?
            }
        };
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn chunk_count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| EduClawError::Store(e.to_string()))?;
        conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| EduClawError::Store(e.to_string()))
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentChunk> {
    let blob: Vec<u8> = row.get(4)?;
    let metadata: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(DocumentChunk {
        id: row.get(0)?,
        content_id: row.get(1)?,
        chunk_index: row.get(2)?,
        text: row.get(3)?,
        embedding: unpack_vector(&blob),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_default(),
    })
}

fn pack_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn unpack_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
