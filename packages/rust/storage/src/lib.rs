//! libSQL storage layer for sources, documents, and embedded chunks.
//!
//! The [`Storage`] struct wraps a local libSQL database in WAL mode.
//!
//! **Access rules:**
//! - All writes go through one connection guarded by an async write lock, and
//!   a document plus its full chunk set is replaced in a single transaction.
//! - Reads open their own connection, so they see either the previous or the
//!   new chunk set of a document, never an intermediate state.
//! - [`Storage::open_readonly`] rejects every write.

mod migrations;
pub mod vectors;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use sitekb_shared::{ChunkRecord, DocumentRecord, DocumentUpsert, NewChunk, Result, SiteKbError};

pub use vectors::{blob_to_vec, cosine_similarity, is_zero_vector, vec_to_blob};

const DOC_COLUMNS: &str = "id, source_id, url, canonical_url, url_hash, path_segments, path_depth, \
     title, page_type, language, fetched_at, status_code, content_len, content_hash, metadata, \
     created_at, updated_at";

const CHUNK_COLUMNS: &str = "id, doc_id, chunk_index, start_char, end_char, heading_path, anchor, \
     text, text_tokens, is_boilerplate, embedding_model, embedding_dim, embedding, metadata";

const HIT_COLUMNS: &str = "c.id, c.doc_id, c.chunk_index, c.text, c.heading_path, c.anchor, d.url, d.title";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
    readonly: bool,
    embedding_dim: usize,
}

/// Outcome of [`Storage::write_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentWrite {
    pub doc_id: String,
    pub source_id: String,
    /// `true` when the canonical URL was not stored before.
    pub created: bool,
    pub chunk_count: usize,
}

/// Which search leg produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Vector,
    Keyword,
}

/// A chunk returned by search, with its parent document's url and title.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub heading_path: Vec<String>,
    pub anchor: Option<String>,
    pub url: String,
    pub title: Option<String>,
    /// Cosine similarity for vector hits, negated bm25 for keyword hits.
    pub score: f64,
    pub kind: MatchKind,
}

/// Row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sources: u64,
    pub documents: u64,
    pub chunks: u64,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    ///
    /// `embedding_dim` is recorded on first open; reopening with a different
    /// dimension fails.
    pub async fn open(path: &Path, embedding_dim: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SiteKbError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(SiteKbError::storage)?;
        let conn = db.connect().map_err(SiteKbError::storage)?;

        pragma(&conn, "PRAGMA journal_mode = WAL").await?;
        pragma(&conn, "PRAGMA busy_timeout = 5000").await?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(SiteKbError::storage)?;

        let storage = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
            readonly: false,
            embedding_dim,
        };
        storage.run_migrations().await?;
        storage.ensure_embedding_dim().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(SiteKbError::storage)?;
        let conn = db.connect().map_err(SiteKbError::storage)?;

        let mut storage = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
            readonly: true,
            embedding_dim: 0,
        };
        storage.embedding_dim = storage.stored_embedding_dim().await?.unwrap_or(0);
        Ok(storage)
    }

    /// Store-wide embedding dimension.
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SiteKbError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", ())
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    async fn stored_embedding_dim(&self) -> Result<Option<usize>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM store_meta WHERE key = 'embedding_dim'",
                (),
            )
            .await
            .map_err(SiteKbError::storage)?;

        match rows.next().await.map_err(SiteKbError::storage)? {
            Some(row) => {
                let value = get_string(&row, 0)?;
                value
                    .parse()
                    .map(Some)
                    .map_err(|e| SiteKbError::Storage(format!("bad embedding_dim {value:?}: {e}")))
            }
            None => Ok(None),
        }
    }

    async fn ensure_embedding_dim(&self) -> Result<()> {
        match self.stored_embedding_dim().await? {
            Some(stored) if stored != self.embedding_dim => Err(SiteKbError::validation(format!(
                "database was created with embedding dimension {stored}, configured {}",
                self.embedding_dim
            ))),
            Some(_) => Ok(()),
            None => {
                self.conn
                    .execute(
                        "INSERT INTO store_meta (key, value) VALUES ('embedding_dim', ?1)",
                        params![self.embedding_dim.to_string()],
                    )
                    .await
                    .map_err(SiteKbError::storage)?;
                Ok(())
            }
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SiteKbError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// A fresh connection for reads.
    fn reader(&self) -> Result<Connection> {
        self.db.connect().map_err(SiteKbError::storage)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Upsert a document by canonical URL and replace all of its chunks.
    ///
    /// Source, document, and chunks are written in one transaction. Incoming
    /// null scalars keep the stored value; metadata keys are merged over the
    /// stored map; hashes, URLs, and path fields are always overwritten.
    #[instrument(skip_all, fields(canonical_url = %doc.canonical_url, chunks = chunks.len()))]
    pub async fn write_document(
        &self,
        doc: &DocumentUpsert,
        chunks: &[NewChunk],
    ) -> Result<DocumentWrite> {
        self.check_writable()?;

        if let Some(bad) = chunks
            .iter()
            .find(|c| c.embedding.len() != self.embedding_dim)
        {
            return Err(SiteKbError::validation(format!(
                "chunk {} embedding has {} dimensions, store expects {}",
                bad.chunk_index,
                bad.embedding.len(),
                self.embedding_dim
            )));
        }

        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(SiteKbError::storage)?;

        match write_document_tx(&tx, doc, chunks).await {
            Ok(result) => {
                tx.commit().await.map_err(SiteKbError::storage)?;
                debug!(doc_id = %result.doc_id, created = result.created, "document written");
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Look up a document by its canonical URL.
    pub async fn get_document_by_canonical_url(
        &self,
        canonical_url: &str,
    ) -> Result<Option<DocumentRecord>> {
        let conn = self.reader()?;
        let mut rows = conn
            .query(
                &format!("SELECT {DOC_COLUMNS} FROM documents WHERE canonical_url = ?1"),
                params![canonical_url],
            )
            .await
            .map_err(SiteKbError::storage)?;

        match rows.next().await.map_err(SiteKbError::storage)? {
            Some(row) => Ok(Some(row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    /// Look up a document by id.
    pub async fn get_document(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.reader()?;
        let mut rows = conn
            .query(
                &format!("SELECT {DOC_COLUMNS} FROM documents WHERE id = ?1"),
                params![doc_id],
            )
            .await
            .map_err(SiteKbError::storage)?;

        match rows.next().await.map_err(SiteKbError::storage)? {
            Some(row) => Ok(Some(row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    /// All chunks of a document in `chunk_index` order.
    pub async fn list_chunks(&self, doc_id: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.reader()?;
        let mut rows = conn
            .query(
                &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE doc_id = ?1 ORDER BY chunk_index"),
                params![doc_id],
            )
            .await
            .map_err(SiteKbError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(SiteKbError::storage)? {
            results.push(row_to_chunk(&row)?);
        }
        Ok(results)
    }

    /// A document's chunk texts in order, joined by newlines.
    pub async fn full_document_text(&self, doc_id: &str) -> Result<String> {
        let conn = self.reader()?;
        let mut rows = conn
            .query(
                "SELECT text FROM chunks WHERE doc_id = ?1 ORDER BY chunk_index",
                params![doc_id],
            )
            .await
            .map_err(SiteKbError::storage)?;

        let mut parts = Vec::new();
        while let Some(row) = rows.next().await.map_err(SiteKbError::storage)? {
            parts.push(get_string(&row, 0)?);
        }
        Ok(parts.join("\n"))
    }

    /// Row counts per table.
    pub async fn stats(&self) -> Result<StoreStats> {
        let conn = self.reader()?;
        let mut rows = conn
            .query(
                "SELECT (SELECT COUNT(*) FROM sources), (SELECT COUNT(*) FROM documents), \
                 (SELECT COUNT(*) FROM chunks)",
                (),
            )
            .await
            .map_err(SiteKbError::storage)?;

        match rows.next().await.map_err(SiteKbError::storage)? {
            Some(row) => Ok(StoreStats {
                sources: get_i64(&row, 0)? as u64,
                documents: get_i64(&row, 1)? as u64,
                chunks: get_i64(&row, 2)? as u64,
            }),
            None => Ok(StoreStats::default()),
        }
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Top-`k` chunks by cosine similarity to `query`.
    ///
    /// Boilerplate chunks and zero (degraded) embeddings are never returned.
    #[instrument(skip_all, fields(k))]
    pub async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<ChunkHit>> {
        if query.len() != self.embedding_dim {
            return Err(SiteKbError::validation(format!(
                "query embedding has {} dimensions, store expects {}",
                query.len(),
                self.embedding_dim
            )));
        }
        if k == 0 || is_zero_vector(query) {
            return Ok(Vec::new());
        }

        let conn = self.reader()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {HIT_COLUMNS}, c.embedding
                     FROM chunks c JOIN documents d ON d.id = c.doc_id
                     WHERE c.is_boilerplate = 0
                     ORDER BY c.doc_id, c.chunk_index"
                ),
                (),
            )
            .await
            .map_err(SiteKbError::storage)?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next().await.map_err(SiteKbError::storage)? {
            let embedding = blob_to_vec(&get_blob(&row, 8)?);
            if is_zero_vector(&embedding) {
                continue;
            }
            let score = cosine_similarity(query, &embedding) as f64;
            hits.push(row_to_hit(&row, score, MatchKind::Vector)?);
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        debug!(hits = hits.len(), "vector search complete");
        Ok(hits)
    }

    /// Top-`k` chunks by bm25 for all terms of `query`.
    ///
    /// Terms are quoted, so punctuation in user input cannot break the FTS
    /// syntax. Matching ignores case and diacritics.
    #[instrument(skip_all, fields(k))]
    pub async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<ChunkHit>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.reader()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {HIT_COLUMNS}, bm25(chunks_fts) AS rank
                     FROM chunks_fts
                     JOIN chunks c ON c.rowid = chunks_fts.rowid
                     JOIN documents d ON d.id = c.doc_id
                     WHERE chunks_fts MATCH ?1 AND c.is_boilerplate = 0
                     ORDER BY rank
                     LIMIT ?2"
                ),
                params![fts_query.as_str(), k as i64],
            )
            .await
            .map_err(SiteKbError::storage)?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next().await.map_err(SiteKbError::storage)? {
            let rank: f64 = row.get(8).unwrap_or(0.0);
            hits.push(row_to_hit(&row, -rank, MatchKind::Keyword)?);
        }
        debug!(hits = hits.len(), "keyword search complete");
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Transaction body
// ---------------------------------------------------------------------------

async fn write_document_tx(
    conn: &Connection,
    doc: &DocumentUpsert,
    chunks: &[NewChunk],
) -> Result<DocumentWrite> {
    let now = Utc::now().to_rfc3339();
    let source_id = upsert_source(conn, &doc.domain, &now).await?;

    let existing = {
        let mut rows = conn
            .query(
                "SELECT id, metadata FROM documents WHERE canonical_url = ?1",
                params![doc.canonical_url.as_str()],
            )
            .await
            .map_err(SiteKbError::storage)?;
        match rows.next().await.map_err(SiteKbError::storage)? {
            Some(row) => {
                let doc_id = get_string(&row, 0)?;
                let metadata = parse_map(&get_string(&row, 1)?, &doc_id, "metadata")
                    .unwrap_or_else(|e| {
                        warn!(doc_id = %doc_id, error = %e, "replacing unreadable metadata");
                        Map::new()
                    });
                Some((doc_id, metadata))
            }
            None => None,
        }
    };

    let path_segments = to_json(&doc.path_segments)?;
    let fetched_at = doc.fetched_at.map(|t| t.to_rfc3339());
    let status_code = doc.status_code.map(i64::from);
    let content_len = doc.content_len.map(|l| l as i64);

    let (doc_id, created) = match existing {
        Some((doc_id, mut metadata)) => {
            metadata.extend(doc.metadata.clone());
            conn.execute(
                "UPDATE documents SET
                   source_id = ?1, url = ?2, url_hash = ?3, path_segments = ?4, path_depth = ?5,
                   title = COALESCE(?6, title),
                   page_type = COALESCE(?7, page_type),
                   language = COALESCE(?8, language),
                   fetched_at = COALESCE(?9, fetched_at),
                   status_code = COALESCE(?10, status_code),
                   content_len = COALESCE(?11, content_len),
                   content_hash = ?12, metadata = ?13, updated_at = ?14
                 WHERE id = ?15",
                params![
                    source_id.as_str(),
                    doc.url.as_str(),
                    doc.url_hash.as_str(),
                    path_segments.as_str(),
                    doc.path_depth as i64,
                    doc.title.as_deref(),
                    doc.page_type.as_deref(),
                    doc.language.as_deref(),
                    fetched_at.as_deref(),
                    status_code,
                    content_len,
                    doc.content_hash.as_str(),
                    to_json(&metadata)?,
                    now.as_str(),
                    doc_id.as_str(),
                ],
            )
            .await
            .map_err(SiteKbError::storage)?;
            (doc_id, false)
        }
        None => {
            let doc_id = Uuid::now_v7().to_string();
            conn.execute(
                "INSERT INTO documents (id, source_id, url, canonical_url, url_hash, path_segments,
                   path_depth, title, page_type, language, fetched_at, status_code, content_len,
                   content_hash, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)",
                params![
                    doc_id.as_str(),
                    source_id.as_str(),
                    doc.url.as_str(),
                    doc.canonical_url.as_str(),
                    doc.url_hash.as_str(),
                    path_segments.as_str(),
                    doc.path_depth as i64,
                    doc.title.as_deref(),
                    doc.page_type.as_deref(),
                    doc.language.as_deref(),
                    fetched_at.as_deref(),
                    status_code,
                    content_len,
                    doc.content_hash.as_str(),
                    to_json(&doc.metadata)?,
                    now.as_str(),
                ],
            )
            .await
            .map_err(SiteKbError::storage)?;
            (doc_id, true)
        }
    };

    conn.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id.as_str()])
        .await
        .map_err(SiteKbError::storage)?;

    for chunk in chunks {
        conn.execute(
            "INSERT INTO chunks (id, doc_id, chunk_index, start_char, end_char, heading_path,
               anchor, text, text_tokens, is_boilerplate, embedding_model, embedding_dim,
               embedding, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                Uuid::now_v7().to_string(),
                doc_id.as_str(),
                chunk.chunk_index as i64,
                chunk.start_char as i64,
                chunk.end_char as i64,
                to_json(&chunk.heading_path)?,
                chunk.anchor.as_deref(),
                chunk.text.as_str(),
                chunk.text_tokens as i64,
                i64::from(chunk.is_boilerplate),
                chunk.embedding_model.as_str(),
                chunk.embedding.len() as i64,
                libsql::Value::Blob(vec_to_blob(&chunk.embedding)),
                to_json(&chunk.metadata)?,
                now.as_str(),
            ],
        )
        .await
        .map_err(SiteKbError::storage)?;
    }

    Ok(DocumentWrite {
        doc_id,
        source_id,
        created,
        chunk_count: chunks.len(),
    })
}

/// Resolve the source for `domain`, creating it on first use.
async fn upsert_source(conn: &Connection, domain: &str, now: &str) -> Result<String> {
    let mut rows = conn
        .query("SELECT id FROM sources WHERE domain = ?1", params![domain])
        .await
        .map_err(SiteKbError::storage)?;
    if let Some(row) = rows.next().await.map_err(SiteKbError::storage)? {
        return get_string(&row, 0);
    }

    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO sources (id, domain, created_at) VALUES (?1, ?2, ?3)",
        params![id.as_str(), domain, now],
    )
    .await
    .map_err(SiteKbError::storage)?;
    debug!(domain, source_id = %id, "created source");
    Ok(id)
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Run a pragma that reports its value as a row.
async fn pragma(conn: &Connection, sql: &str) -> Result<()> {
    let mut rows = conn.query(sql, ()).await.map_err(SiteKbError::storage)?;
    rows.next().await.map_err(SiteKbError::storage)?;
    Ok(())
}

/// Build an FTS5 query that requires every word of `input`.
fn fts_query(input: &str) -> Option<String> {
    let terms: Vec<String> = input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

fn get_string(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(SiteKbError::storage)
}

fn get_i64(row: &libsql::Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx).map_err(SiteKbError::storage)
}

fn get_blob(row: &libsql::Row, idx: i32) -> Result<Vec<u8>> {
    row.get::<Vec<u8>>(idx).map_err(SiteKbError::storage)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SiteKbError::Storage(format!("invalid date {s:?}: {e}")))
}

/// Decode a JSON column; `row_id` and `column` name the value in errors.
fn parse_json<T: serde::de::DeserializeOwned>(s: &str, row_id: &str, column: &str) -> Result<T> {
    serde_json::from_str(s)
        .map_err(|e| SiteKbError::Storage(format!("corrupt {column} JSON in row {row_id}: {e}")))
}

fn parse_map(s: &str, row_id: &str, column: &str) -> Result<Map<String, Value>> {
    parse_json(s, row_id, column)
}

fn parse_list(s: &str, row_id: &str, column: &str) -> Result<Vec<String>> {
    parse_json(s, row_id, column)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| SiteKbError::Storage(e.to_string()))
}

fn row_to_document(row: &libsql::Row) -> Result<DocumentRecord> {
    let id = get_string(row, 0)?;
    Ok(DocumentRecord {
        source_id: get_string(row, 1)?,
        url: get_string(row, 2)?,
        canonical_url: get_string(row, 3)?,
        url_hash: get_string(row, 4)?,
        path_segments: parse_list(&get_string(row, 5)?, &id, "path_segments")?,
        path_depth: get_i64(row, 6)? as usize,
        title: row.get::<String>(7).ok(),
        page_type: row.get::<String>(8).ok(),
        language: row.get::<String>(9).ok(),
        fetched_at: row
            .get::<String>(10)
            .ok()
            .map(|s| parse_time(&s))
            .transpose()?,
        status_code: row.get::<i64>(11).ok().map(|v| v as u16),
        content_len: row.get::<i64>(12).ok().map(|v| v as usize),
        content_hash: get_string(row, 13)?,
        metadata: parse_map(&get_string(row, 14)?, &id, "metadata")?,
        created_at: parse_time(&get_string(row, 15)?)?,
        updated_at: parse_time(&get_string(row, 16)?)?,
        id,
    })
}

fn row_to_chunk(row: &libsql::Row) -> Result<ChunkRecord> {
    let id = get_string(row, 0)?;
    Ok(ChunkRecord {
        doc_id: get_string(row, 1)?,
        chunk_index: get_i64(row, 2)? as usize,
        start_char: get_i64(row, 3)? as usize,
        end_char: get_i64(row, 4)? as usize,
        heading_path: parse_list(&get_string(row, 5)?, &id, "heading_path")?,
        anchor: row.get::<String>(6).ok(),
        text: get_string(row, 7)?,
        text_tokens: get_i64(row, 8)? as usize,
        is_boilerplate: get_i64(row, 9)? != 0,
        embedding_model: get_string(row, 10)?,
        embedding_dim: get_i64(row, 11)? as usize,
        embedding: blob_to_vec(&get_blob(row, 12)?),
        metadata: parse_map(&get_string(row, 13)?, &id, "metadata")?,
        id,
    })
}

/// Map the leading [`HIT_COLUMNS`] of a search row.
fn row_to_hit(row: &libsql::Row, score: f64, kind: MatchKind) -> Result<ChunkHit> {
    let chunk_id = get_string(row, 0)?;
    Ok(ChunkHit {
        doc_id: get_string(row, 1)?,
        chunk_index: get_i64(row, 2)? as usize,
        text: get_string(row, 3)?,
        heading_path: parse_list(&get_string(row, 4)?, &chunk_id, "heading_path")?,
        anchor: row.get::<String>(5).ok(),
        url: get_string(row, 6)?,
        title: row.get::<String>(7).ok(),
        score,
        kind,
        chunk_id,
    })
}
