//! Stage 0: the embedding-keyed plan cache that short-circuits intent
//! extraction and query planning when a semantically similar prior query
//! exists. Grounded on the teacher's `db::vectors` (same `BEGIN IMMEDIATE`
//! transaction idiom, same `ON CONFLICT` upsert pattern, same
//! `embedding_to_bytes`/`bytes_to_embedding` little-endian encoding and
//! `cosine_similarity`) and `search::ann_index::AnnIndex` for the
//! similarity lookup.

mod ann_index;

pub use ann_index::{cosine_similarity, AnnIndex};

use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::Result;
use crate::intent::IntentState;
use crate::planner::QueryPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheHitType {
    Exact,
    Similar,
    Miss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPlan {
    pub id: String,
    pub query_hash: String,
    pub original_query: String,
    pub query_embedding: Vec<f32>,
    pub intent_state: IntentState,
    pub execution_plan: QueryPlan,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub confidence: f32,
    pub schema_version: String,
}

#[derive(Debug, Clone)]
pub struct CacheLookupResult {
    pub hit_type: CacheHitType,
    pub similarity: f32,
    pub plan: Option<CachedPlan>,
}

/// Normalize a query the same way for both hashing and embedding, so exact
/// and similarity semantics agree. Matches `SPEC_FULL.md §9` "Hash and
/// embedding stability".
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

pub fn query_hash(query: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(normalize_query(query).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

const LOW_USAGE_TTL_DAYS: i64 = 365;
const LOW_USAGE_THRESHOLD: u64 = 5;

pub struct PlanCache {
    conn: Mutex<Connection>,
    similarity_threshold: f32,
    confidence_threshold: f32,
    store_confidence_threshold: f32,
    schema_version: String,
}

impl PlanCache {
    pub fn open_in_memory(
        similarity_threshold: f32,
        confidence_threshold: f32,
        store_confidence_threshold: f32,
        schema_version: String,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            similarity_threshold,
            confidence_threshold,
            store_confidence_threshold,
            schema_version,
        })
    }

    pub fn open(
        path: &std::path::Path,
        similarity_threshold: f32,
        confidence_threshold: f32,
        store_confidence_threshold: f32,
        schema_version: String,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            similarity_threshold,
            confidence_threshold,
            store_confidence_threshold,
            schema_version,
        })
    }

    /// Idempotently create the `plans` table and its unique index. Exposed
    /// separately so the CLI's `index-ensure` command can call it directly.
    pub fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                query_hash TEXT NOT NULL UNIQUE,
                original_query TEXT NOT NULL,
                query_embedding BLOB NOT NULL,
                intent_state TEXT NOT NULL,
                execution_plan TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 1,
                last_used TEXT NOT NULL,
                created_at TEXT NOT NULL,
                confidence REAL NOT NULL,
                schema_version TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_plans_query_hash ON plans(query_hash);",
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, query, query_embedding))]
    pub fn lookup(&self, query: &str, query_embedding: &[f32]) -> Result<CacheLookupResult> {
        let hash = query_hash(query);
        let conn = self.conn.lock().unwrap();

        if let Some(plan) = self.load_by_hash(&conn, &hash)? {
            if plan.schema_version == self.schema_version {
                return Ok(CacheLookupResult {
                    hit_type: CacheHitType::Exact,
                    similarity: 1.0,
                    plan: Some(plan),
                });
            }
        }

        let all = self.load_all_embeddings(&conn)?;
        drop(conn);
        let index = AnnIndex::build(all);
        if let Some((id, similarity)) = index.nearest(query_embedding) {
            if similarity >= self.similarity_threshold {
                let conn = self.conn.lock().unwrap();
                if let Some(plan) = self.load_by_id(&conn, &id)? {
                    if plan.confidence >= self.confidence_threshold && plan.schema_version == self.schema_version {
                        return Ok(CacheLookupResult {
                            hit_type: CacheHitType::Similar,
                            similarity,
                            plan: Some(plan),
                        });
                    }
                }
            }
        }

        Ok(CacheLookupResult {
            hit_type: CacheHitType::Miss,
            similarity: 0.0,
            plan: None,
        })
    }

    /// Insert a freshly computed plan, or — on `queryHash` collision —
    /// bump usage stats without overwriting a higher-confidence entry.
    #[tracing::instrument(skip(self, plan))]
    pub fn store(&self, plan: &CachedPlan) -> Result<()> {
        if plan.confidence < self.store_confidence_threshold {
            tracing::debug!(confidence = plan.confidence, "skipping cache store below threshold");
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let existing_confidence: Option<f32> = tx
            .query_row(
                "SELECT confidence FROM plans WHERE query_hash = ?1",
                params![plan.query_hash],
                |row| row.get(0),
            )
            .ok();

        let result = (|| -> rusqlite::Result<()> {
            match existing_confidence {
                Some(existing) if existing >= plan.confidence => {
                    tx.execute(
                        "UPDATE plans SET usage_count = usage_count + 1, last_used = ?2 WHERE query_hash = ?1",
                        params![plan.query_hash, plan.last_used.to_rfc3339()],
                    )?;
                }
                _ => {
                    tx.execute(
                        "INSERT INTO plans (id, query_hash, original_query, query_embedding, intent_state, execution_plan, usage_count, last_used, created_at, confidence, schema_version)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                         ON CONFLICT(query_hash) DO UPDATE SET
                            original_query = excluded.original_query,
                            query_embedding = excluded.query_embedding,
                            intent_state = excluded.intent_state,
                            execution_plan = excluded.execution_plan,
                            usage_count = plans.usage_count + 1,
                            last_used = excluded.last_used,
                            confidence = excluded.confidence,
                            schema_version = excluded.schema_version",
                        params![
                            plan.id,
                            plan.query_hash,
                            plan.original_query,
                            embedding_to_bytes(&plan.query_embedding),
                            serde_json::to_string(&plan.intent_state).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
                            serde_json::to_string(&plan.execution_plan).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
                            plan.usage_count,
                            plan.last_used.to_rfc3339(),
                            plan.created_at.to_rfc3339(),
                            plan.confidence,
                            plan.schema_version,
                        ],
                    )?;
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(e) => {
                // tx dropped here rolls back implicitly
                Err(e.into())
            }
        }
    }

    /// Evict entries past their TTL: low-usage entries expire after
    /// `LOW_USAGE_TTL_DAYS`; high-usage entries are retained indefinitely.
    pub fn evict_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - Duration::days(LOW_USAGE_TTL_DAYS)).to_rfc3339();
        let deleted = conn.execute(
            "DELETE FROM plans WHERE usage_count < ?1 AND created_at < ?2",
            params![LOW_USAGE_THRESHOLD, cutoff],
        )?;
        Ok(deleted)
    }

    fn load_by_hash(&self, conn: &Connection, hash: &str) -> Result<Option<CachedPlan>> {
        self.load_where(conn, "query_hash = ?1", hash)
    }

    fn load_by_id(&self, conn: &Connection, id: &str) -> Result<Option<CachedPlan>> {
        self.load_where(conn, "id = ?1", id)
    }

    fn load_where(&self, conn: &Connection, clause: &str, param: &str) -> Result<Option<CachedPlan>> {
        let sql = format!(
            "SELECT id, query_hash, original_query, query_embedding, intent_state, execution_plan, usage_count, last_used, created_at, confidence, schema_version
             FROM plans WHERE {clause}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row(params![param], row_to_cached_plan);
        match result {
            Ok(plan) => Ok(Some(plan)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all_embeddings(&self, conn: &Connection) -> Result<Vec<(String, Vec<f32>)>> {
        let mut stmt = conn.prepare("SELECT id, query_embedding FROM plans")?;
        let rows = stmt.query_map(params![], |row| {
            let id: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((id, bytes_to_embedding(&bytes)))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_cached_plan(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedPlan> {
    let intent_raw: String = row.get(4)?;
    let plan_raw: String = row.get(5)?;
    let last_used: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let embedding_bytes: Vec<u8> = row.get(3)?;

    Ok(CachedPlan {
        id: row.get(0)?,
        query_hash: row.get(1)?,
        original_query: row.get(2)?,
        query_embedding: bytes_to_embedding(&embedding_bytes),
        intent_state: serde_json::from_str(&intent_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?,
        execution_plan: serde_json::from_str(&plan_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?,
        usage_count: row.get(6)?,
        last_used: DateTime::parse_from_rfc3339(&last_used)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e)))?
            .with_timezone(&Utc),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?
            .with_timezone(&Utc),
        confidence: row.get(9)?,
        schema_version: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{FusionMethod, Strategy};

    fn sample_plan(query: &str, confidence: f32) -> CachedPlan {
        let now = Utc::now();
        CachedPlan {
            id: uuid::Uuid::new_v4().to_string(),
            query_hash: query_hash(query),
            original_query: query.to_string(),
            query_embedding: vec![1.0, 0.0, 0.0],
            intent_state: IntentState::default(),
            execution_plan: QueryPlan {
                strategy: Strategy::VectorOnly,
                vector_sources: vec![],
                structured_sources: vec![],
                fusion: FusionMethod::None,
                max_refinement_cycles: 0,
                confidence,
                explanation: String::new(),
            },
            usage_count: 1,
            last_used: now,
            created_at: now,
            confidence,
            schema_version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn miss_then_store_then_exact_hit() {
        let cache = PlanCache::open_in_memory(0.92, 0.5, 0.5, "1.0.0".to_string()).unwrap();
        let lookup = cache.lookup("self hosted cli", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(lookup.hit_type, CacheHitType::Miss);

        let plan = sample_plan("self hosted cli", 0.8);
        cache.store(&plan).unwrap();

        let lookup = cache.lookup("self hosted cli", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(lookup.hit_type, CacheHitType::Exact);
        assert_eq!(lookup.similarity, 1.0);
    }

    #[test]
    fn similar_query_hits_above_threshold() {
        let cache = PlanCache::open_in_memory(0.9, 0.5, 0.5, "1.0.0".to_string()).unwrap();
        cache.store(&sample_plan("self hosted cli tool", 0.8)).unwrap();

        let lookup = cache.lookup("totally different text", &[0.99, 0.01, 0.0]).unwrap();
        assert_eq!(lookup.hit_type, CacheHitType::Similar);
    }

    #[test]
    fn collision_does_not_overwrite_higher_confidence() {
        // second confidence (0.6) must clear store_confidence_threshold (0.5) so the
        // write actually reaches the collision branch instead of being skipped upfront.
        let cache = PlanCache::open_in_memory(0.92, 0.5, 0.5, "1.0.0".to_string()).unwrap();
        cache.store(&sample_plan("query", 0.9)).unwrap();
        cache.store(&sample_plan("query", 0.6)).unwrap();

        let lookup = cache.lookup("query", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(lookup.plan.unwrap().confidence, 0.9);
    }

    #[test]
    fn schema_version_mismatch_forces_miss() {
        let cache = PlanCache::open_in_memory(0.92, 0.5, 0.5, "2.0.0".to_string()).unwrap();
        let mut plan = sample_plan("query", 0.9);
        plan.schema_version = "1.0.0".to_string();
        cache.store(&plan).unwrap();

        let lookup = cache.lookup("query", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(lookup.hit_type, CacheHitType::Miss);
    }

    #[test]
    fn query_hash_is_case_and_whitespace_insensitive() {
        assert_eq!(query_hash("Self Hosted CLI"), query_hash("  self hosted cli  "));
    }
}
