use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use pearl_core::{Memory, MemoryType, Scope};

use crate::error::{Result, StoreError};
use crate::schema;

/// Filters accepted by [`Store::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub agent_id: Option<String>,
    pub types: Vec<MemoryType>,
    pub tag: Option<String>,
    pub content_substring: Option<String>,
    pub has_embedding: Option<bool>,
    pub order_by: OrderBy,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    CreatedAt,
    AccessedAt,
    AccessCount,
}

impl OrderBy {
    fn column(self) -> &'static str {
        match self {
            OrderBy::CreatedAt => "created_at",
            OrderBy::AccessedAt => "accessed_at",
            OrderBy::AccessCount => "access_count",
        }
    }
}

/// Partial update: only supplied fields are written.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub confidence: Option<f64>,
    pub expires_at: Option<Option<u64>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub total_memories: u64,
    pub agents: u64,
    pub with_embedding: u64,
    pub db_size_bytes: u64,
}

/// Single-writer, internally-serialized handle to the memory store's SQLite
/// connection. `rusqlite::Connection` is `Send` but not `Sync`; the mutex is
/// what lets `Arc<Store>` be shared across concurrent request tasks at all,
/// and it is the only lock any caller in this crate holds for the duration
/// of a network-free, in-process call.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Verify the connection is still usable.
    pub fn health_check(&self) -> Result<()> {
        self.lock()
            .execute_batch("SELECT 1")
            .map_err(StoreError::Sqlite)
    }

    /// Run a TRUNCATE checkpoint — flushes WAL and removes the file. Used during
    /// clean shutdown.
    pub fn checkpoint_truncate(&self) {
        let _ = self.lock().execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
    }

    pub fn create(&self, memory: &Memory) -> Result<()> {
        if memory.agent_id.is_empty() {
            return Err(StoreError::InvalidData("agent_id must not be empty".into()));
        }
        let tags_json = serde_json::to_string(&memory.tags)?;
        let embedding_blob = memory.embedding.as_ref().map(|v| encode_embedding(v));
        self.lock().execute(
            "INSERT INTO memories (
                id, agent_id, type, content, tags, embedding, confidence,
                created_at, updated_at, accessed_at, access_count, expires_at,
                source_session_id, source_message_id,
                scope, scope_confidence, target_agent_id, scope_reasoning
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                memory.id,
                memory.agent_id,
                memory.memory_type.as_str(),
                memory.content,
                tags_json,
                embedding_blob,
                memory.confidence,
                memory.created_at as i64,
                memory.updated_at as i64,
                memory.accessed_at.map(|v| v as i64),
                memory.access_count as i64,
                memory.expires_at.map(|v| v as i64),
                memory.source_session_id,
                memory.source_message_id,
                scope_str(memory.scope),
                memory.scope_confidence,
                memory.target_agent_id,
                memory.scope_reasoning,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(SELECT_COLUMNS)?;
        let memory = stmt
            .query_row([id], row_to_memory)
            .optional()?;
        memory.transpose()
    }

    pub fn update(&self, id: &str, update: &MemoryUpdate) -> Result<()> {
        let existing = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let content = update.content.clone().unwrap_or(existing.content);
        let tags = update.tags.clone().unwrap_or(existing.tags);
        let confidence = update.confidence.unwrap_or(existing.confidence);
        let expires_at = update.expires_at.unwrap_or(existing.expires_at);
        let tags_json = serde_json::to_string(&tags)?;
        let now = pearl_core::time::now_unix_secs();

        let rows = self.lock().execute(
            "UPDATE memories SET content = ?1, tags = ?2, confidence = ?3, expires_at = ?4, updated_at = ?5 WHERE id = ?6",
            params![content, tags_json, confidence, expires_at.map(|v| v as i64), now as i64, id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let rows = self
            .lock()
            .execute("DELETE FROM memories WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<Memory>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(agent_id) = &filter.agent_id {
            sql.push_str(" AND agent_id = ?");
            params_vec.push(Box::new(agent_id.clone()));
        }
        if !filter.types.is_empty() {
            let placeholders = filter.types.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND type IN ({placeholders})"));
            for t in &filter.types {
                params_vec.push(Box::new(t.as_str().to_string()));
            }
        }
        if let Some(tag) = &filter.tag {
            sql.push_str(" AND tags LIKE ?");
            params_vec.push(Box::new(format!("%\"{tag}\"%")));
        }
        if let Some(substr) = &filter.content_substring {
            sql.push_str(" AND content LIKE ?");
            params_vec.push(Box::new(format!("%{substr}%")));
        }
        if let Some(has_embedding) = filter.has_embedding {
            sql.push_str(if has_embedding {
                " AND embedding IS NOT NULL"
            } else {
                " AND embedding IS NULL"
            });
        }

        sql.push_str(&format!(" ORDER BY {} DESC", filter.order_by.column()));
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = filter.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .collect()
    }

    /// Batched `accessed_at = now`, `access_count += 1` over an id set. Monotonic:
    /// never decreases either field.
    pub fn record_access(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = pearl_core::time::now_unix_secs();
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE memories SET accessed_at = ?1, access_count = access_count + 1 WHERE id = ?2",
            )?;
            for id in ids {
                stmt.execute(params![now as i64, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Recent `(id, embedding)` pairs for an agent within a time window, for
    /// near-duplicate checks before extraction inserts a new memory.
    pub fn get_recent_for_dedup(
        &self,
        agent_id: &str,
        since_unix_secs: u64,
    ) -> Result<Vec<(String, Option<Vec<f32>>)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, embedding FROM memories WHERE agent_id = ?1 AND created_at >= ?2",
        )?;
        let rows = stmt.query_map(params![agent_id, since_unix_secs as i64], |row| {
            let id: String = row.get(0)?;
            let blob: Option<Vec<u8>> = row.get(1)?;
            Ok((id, blob.map(|b| decode_embedding(&b))))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    pub fn prune_expired(&self, now_unix_secs: u64) -> Result<u64> {
        let rows = self.lock().execute(
            "DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at < ?1",
            [now_unix_secs as i64],
        )?;
        Ok(rows as u64)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.lock();
        let total_memories: i64 =
            conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        let agents: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT agent_id) FROM memories",
            [],
            |r| r.get(0),
        )?;
        let with_embedding: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE embedding IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let db_size_bytes: i64 = conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        Ok(StoreStats {
            total_memories: total_memories as u64,
            agents: agents as u64,
            with_embedding: with_embedding as u64,
            db_size_bytes: db_size_bytes as u64,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, agent_id, type, content, tags, embedding, confidence, \
     created_at, updated_at, accessed_at, access_count, expires_at, \
     source_session_id, source_message_id, scope, scope_confidence, target_agent_id, scope_reasoning \
     FROM memories";

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Result<Memory>> {
    let type_str: String = row.get(2)?;
    let tags_json: String = row.get(4)?;
    let embedding_blob: Option<Vec<u8>> = row.get(5)?;
    let scope_str_val: String = row.get(14)?;

    let memory_type = match MemoryType::from_str(&type_str) {
        Some(t) => t,
        None => return Ok(Err(StoreError::InvalidData(format!("unknown memory type: {type_str}")))),
    };
    let tags: BTreeSet<String> = match serde_json::from_str(&tags_json) {
        Ok(t) => t,
        Err(e) => return Ok(Err(StoreError::from(e))),
    };
    let scope = match scope_str_val.as_str() {
        "global" => Scope::Global,
        "agent" => Scope::Agent,
        "inferred" => Scope::Inferred,
        other => return Ok(Err(StoreError::InvalidData(format!("unknown scope: {other}")))),
    };

    Ok(Ok(Memory {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        memory_type,
        content: row.get(3)?,
        tags,
        embedding: embedding_blob.map(|b| decode_embedding(&b)),
        confidence: row.get(6)?,
        created_at: row.get::<_, i64>(7)? as u64,
        updated_at: row.get::<_, i64>(8)? as u64,
        accessed_at: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        access_count: row.get::<_, i64>(10)? as u64,
        expires_at: row.get::<_, Option<i64>>(11)?.map(|v| v as u64),
        source_session_id: row.get(12)?,
        source_message_id: row.get(13)?,
        scope,
        scope_confidence: row.get(15)?,
        target_agent_id: row.get(16)?,
        scope_reasoning: row.get(17)?,
    }))
}

fn scope_str(scope: Scope) -> &'static str {
    match scope {
        Scope::Global => "global",
        Scope::Agent => "agent",
        Scope::Inferred => "inferred",
    }
}

/// Fixed-width little-endian float32 blob encoding.
pub fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.lock().execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample(id: &str, agent: &str) -> Memory {
        Memory {
            id: id.to_string(),
            agent_id: agent.to_string(),
            memory_type: MemoryType::Fact,
            content: "the user prefers dark mode".to_string(),
            tags: BTreeSet::from(["ui".to_string()]),
            embedding: Some(vec![1.0, 0.0, 0.0]),
            confidence: 0.9,
            created_at: 1000,
            updated_at: 1000,
            accessed_at: None,
            access_count: 0,
            expires_at: None,
            source_session_id: Some("s1".into()),
            source_message_id: Some("m1".into()),
            scope: Scope::Agent,
            scope_confidence: 1.0,
            target_agent_id: None,
            scope_reasoning: None,
        }
    }

    #[test]
    fn create_then_get_returns_equal_memory() {
        let store = Store::open_in_memory().unwrap();
        let m = sample("1", "nova");
        store.create(&m).unwrap();
        let fetched = store.get("1").unwrap().unwrap();
        assert_eq!(fetched.content, m.content);
        assert_eq!(fetched.embedding, m.embedding);
        assert_eq!(fetched.access_count, 0);
        assert_eq!(fetched.accessed_at, None);
    }

    #[test]
    fn query_never_returns_other_agents_memories() {
        let store = Store::open_in_memory().unwrap();
        store.create(&sample("1", "nova")).unwrap();
        store.create(&sample("2", "zephyr")).unwrap();
        let results = store
            .query(&QueryFilter {
                agent_id: Some("nova".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(results.iter().all(|m| m.agent_id == "nova"));
    }

    #[test]
    fn record_access_is_monotonic() {
        let store = Store::open_in_memory().unwrap();
        store.create(&sample("1", "nova")).unwrap();
        store.record_access(&["1".to_string()]).unwrap();
        let after_first = store.get("1").unwrap().unwrap();
        assert_eq!(after_first.access_count, 1);
        store.record_access(&["1".to_string()]).unwrap();
        let after_second = store.get("1").unwrap().unwrap();
        assert_eq!(after_second.access_count, 2);
        assert!(after_second.accessed_at.unwrap() >= after_first.accessed_at.unwrap());
    }

    #[test]
    fn prune_expired_deletes_only_past_expiry() {
        let store = Store::open_in_memory().unwrap();
        let mut expired = sample("1", "nova");
        expired.expires_at = Some(500);
        let mut alive = sample("2", "nova");
        alive.expires_at = Some(2_000_000_000);
        store.create(&expired).unwrap();
        store.create(&alive).unwrap();
        let removed = store.prune_expired(1000).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("1").unwrap().is_none());
        assert!(store.get("2").unwrap().is_some());
    }

    #[test]
    fn embedding_blob_round_trips() {
        let v = vec![1.5_f32, -2.25, 0.0, 3.125];
        let bytes = encode_embedding(&v);
        let decoded = decode_embedding(&bytes);
        assert_eq!(v, decoded);
    }

    #[test]
    fn partial_update_only_touches_supplied_fields() {
        let store = Store::open_in_memory().unwrap();
        store.create(&sample("1", "nova")).unwrap();
        store
            .update(
                "1",
                &MemoryUpdate {
                    confidence: Some(0.5),
                    ..Default::default()
                },
            )
            .unwrap();
        let updated = store.get("1").unwrap().unwrap();
        assert_eq!(updated.confidence, 0.5);
        assert_eq!(updated.content, "the user prefers dark mode");
    }

    #[test]
    fn delete_returns_false_for_missing_id() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.delete("missing").unwrap());
    }
}
