//! Ingestion: markdown body to document row plus embedded chunk set.
//!
//! The real-time path (one page as it is crawled) and the batch path
//! (a folder of artifacts) share [`IngestionCoordinator::ingest_page`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use sitekb_markdown::{SplitterConfig, TextChunk};
use sitekb_shared::{
    ChunkingConfig, DedupPolicy, DocumentUpsert, IngestConfig, NewChunk, Result, canonicalize,
    content_hash, domain_of, page_type_for, path_segments, url_hash,
};
use sitekb_storage::Storage;

use crate::embedding::Embedder;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What an ingestion call did with the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestAction {
    Inserted,
    Updated,
    /// Stored content hash matched; nothing was written.
    Unchanged,
    /// The URL was already stored and the policy is ingest-once.
    SkippedExisting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub document_written: bool,
    pub chunk_count: usize,
    pub doc_id: String,
    pub action: IngestAction,
}

/// One page to ingest.
#[derive(Debug, Clone)]
pub struct PageInput<'a> {
    pub url: &'a str,
    pub title: Option<&'a str>,
    pub body: &'a str,
    pub fetched_at: Option<DateTime<Utc>>,
    pub status_code: Option<u16>,
}

/// Tally of a folder ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub files: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: usize,
    pub chunks: usize,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Splits, embeds, and stores documents. Calls for the same canonical URL
/// run one at a time; different URLs proceed concurrently.
pub struct IngestionCoordinator {
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
    splitter: SplitterConfig,
    config: IngestConfig,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IngestionCoordinator {
    pub fn new(
        storage: Arc<Storage>,
        embedder: Arc<dyn Embedder>,
        chunking: &ChunkingConfig,
        config: IngestConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            splitter: SplitterConfig {
                max_tokens: chunking.max_tokens,
                boilerplate_link_density: chunking.boilerplate_link_density,
            },
            config,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Policy used by the real-time path.
    pub fn dedup_policy(&self) -> DedupPolicy {
        self.config.dedup
    }

    /// Ingest one page body with the configured dedup policy.
    pub async fn ingest(&self, url: &str, title: &str, body: &str) -> Result<IngestOutcome> {
        let page = PageInput {
            url,
            title: Some(title),
            body,
            fetched_at: Some(Utc::now()),
            status_code: None,
        };
        self.ingest_page(&page, self.config.dedup).await
    }

    /// Ingest one page with an explicit dedup policy.
    #[instrument(skip_all, fields(url = %page.url, ?policy))]
    pub async fn ingest_page(&self, page: &PageInput<'_>, policy: DedupPolicy) -> Result<IngestOutcome> {
        let canonical = canonicalize(page.url)?;
        let hash = content_hash(page.body);

        let key_lock = self.key_lock(&canonical);
        let outcome = {
            let _guard = key_lock.lock().await;
            self.ingest_locked(page, &canonical, &hash, policy).await
        };
        self.release_key_lock(&canonical, &key_lock);
        outcome
    }

    async fn ingest_locked(
        &self,
        page: &PageInput<'_>,
        canonical: &str,
        hash: &str,
        policy: DedupPolicy,
    ) -> Result<IngestOutcome> {
        if let Some(existing) = self.storage.get_document_by_canonical_url(canonical).await? {
            let skip = match policy {
                DedupPolicy::SkipExisting => Some(IngestAction::SkippedExisting),
                DedupPolicy::ContentHash if existing.content_hash == hash => {
                    Some(IngestAction::Unchanged)
                }
                DedupPolicy::ContentHash => None,
            };
            if let Some(action) = skip {
                debug!(doc_id = %existing.id, ?action, "document not rewritten");
                return Ok(IngestOutcome {
                    document_written: false,
                    chunk_count: 0,
                    doc_id: existing.id,
                    action,
                });
            }
        }

        let pieces = sitekb_markdown::split(page.body, &self.splitter);
        let texts: Vec<String> = pieces.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_chunks(&texts).await;

        let model = self.embedder.model_name().to_string();
        let chunks: Vec<NewChunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, embedded)| new_chunk(piece, embedded, &model))
            .collect();

        let doc = self.document_upsert(page, canonical, hash)?;
        let write = self.storage.write_document(&doc, &chunks).await?;

        let action = if write.created {
            IngestAction::Inserted
        } else {
            IngestAction::Updated
        };
        info!(doc_id = %write.doc_id, chunks = write.chunk_count, ?action, "document ingested");

        Ok(IngestOutcome {
            document_written: true,
            chunk_count: write.chunk_count,
            doc_id: write.doc_id,
            action,
        })
    }

    fn document_upsert(&self, page: &PageInput<'_>, canonical: &str, hash: &str) -> Result<DocumentUpsert> {
        let segments = path_segments(canonical);
        let mut metadata = Map::new();
        metadata.insert("embedding_model".into(), Value::from(self.embedder.model_name()));

        Ok(DocumentUpsert {
            url: page.url.to_string(),
            canonical_url: canonical.to_string(),
            url_hash: url_hash(canonical),
            domain: domain_of(canonical)?,
            path_depth: segments.len(),
            page_type: page_type_for(&segments, &self.config.page_types),
            path_segments: segments,
            title: page
                .title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from),
            language: Some(self.config.language.clone()),
            fetched_at: page.fetched_at,
            status_code: page.status_code,
            content_len: Some(page.body.len()),
            content_hash: hash.to_string(),
            metadata,
        })
    }

    /// Embed chunk texts in one call, falling back to one call per text.
    /// Texts that still fail get a zero vector.
    async fn embed_chunks(&self, texts: &[String]) -> Vec<Embedded> {
        if texts.is_empty() {
            return Vec::new();
        }
        let dims = self.storage.embedding_dim();

        match self.embedder.embed(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                return vectors
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Embedded::checked(v, dims, i))
                    .collect();
            }
            Ok(vectors) => warn!(
                expected = texts.len(),
                got = vectors.len(),
                "batch embedding returned wrong count, embedding one by one"
            ),
            Err(e) => warn!(error = %e, "batch embedding failed, embedding one by one"),
        }

        let mut results = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let embedded = match self.embedder.embed(std::slice::from_ref(text)).await {
                Ok(mut vectors) if vectors.len() == 1 => {
                    Embedded::checked(vectors.remove(0), dims, i)
                }
                Ok(_) => {
                    warn!(chunk = i, "embedding returned no vector, storing zero vector");
                    Embedded::degraded(dims)
                }
                Err(e) => {
                    warn!(chunk = i, error = %e, "embedding failed, storing zero vector");
                    Embedded::degraded(dims)
                }
            };
            results.push(embedded);
        }
        results
    }

    // -----------------------------------------------------------------------
    // Batch
    // -----------------------------------------------------------------------

    /// Ingest every `*.md` artifact in `dir`, in file name order.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn ingest_folder(&self, dir: &Path) -> Result<BatchSummary> {
        let files = sitekb_artifacts::list_artifacts(dir)?;
        let mut summary = BatchSummary {
            files: files.len(),
            ..BatchSummary::default()
        };

        for path in &files {
            let artifact = match sitekb_artifacts::read_artifact(path) {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable artifact");
                    summary.errors += 1;
                    continue;
                }
            };
            let Some(url) = artifact.url.as_deref() else {
                warn!(path = %path.display(), "artifact has no url, skipping");
                summary.skipped += 1;
                continue;
            };

            let page = PageInput {
                url,
                title: artifact.title.as_deref(),
                body: &artifact.body,
                fetched_at: artifact.fetched_at,
                status_code: None,
            };
            match self.ingest_page(&page, DedupPolicy::ContentHash).await {
                Ok(outcome) => {
                    summary.chunks += outcome.chunk_count;
                    match outcome.action {
                        IngestAction::Inserted => summary.inserted += 1,
                        IngestAction::Updated => summary.updated += 1,
                        IngestAction::Unchanged => summary.unchanged += 1,
                        IngestAction::SkippedExisting => summary.skipped += 1,
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), %url, error = %e, "ingestion failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            files = summary.files,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            errors = summary.errors,
            chunks = summary.chunks,
            "folder ingested"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Per-URL locks
    // -----------------------------------------------------------------------

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drop the map entry once no other call holds or waits on it.
    fn release_key_lock(&self, key: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(lock) <= 2 {
            locks.remove(key);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Embedded {
    vector: Vec<f32>,
    degraded: bool,
}

impl Embedded {
    fn checked(vector: Vec<f32>, dims: usize, chunk: usize) -> Self {
        if vector.len() == dims {
            Self {
                vector,
                degraded: false,
            }
        } else {
            warn!(chunk, got = vector.len(), expected = dims, "wrong embedding length, storing zero vector");
            Self::degraded(dims)
        }
    }

    fn degraded(dims: usize) -> Self {
        Self {
            vector: vec![0.0; dims],
            degraded: true,
        }
    }
}

fn new_chunk(piece: TextChunk, embedded: Embedded, model: &str) -> NewChunk {
    let mut metadata = Map::new();
    if embedded.degraded {
        metadata.insert("embedding_degraded".into(), Value::Bool(true));
    }
    NewChunk {
        chunk_index: piece.index,
        start_char: piece.start,
        end_char: piece.end,
        heading_path: piece.heading_path,
        anchor: piece.anchor,
        text: piece.text,
        text_tokens: piece.tokens,
        is_boilerplate: piece.is_boilerplate,
        embedding_model: model.to_string(),
        embedding: embedded.vector,
        metadata,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sitekb_shared::SiteKbError;
    use sitekb_storage::is_zero_vector;
    use uuid::Uuid;

    pub(crate) const DIMS: usize = 4;

    /// Deterministic bag-of-letters embedder. Texts containing `FAIL` cannot
    /// be embedded; batches containing one fail as a whole.
    #[derive(Default)]
    pub(crate) struct FakeEmbedder {
        pub calls: AtomicUsize,
    }

    pub(crate) fn fake_vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; DIMS];
        for (slot, letters) in ["aeiou", "rstln", "cdpmq", "bfghjkvwxyz"].iter().enumerate() {
            v[slot] = lower.chars().filter(|c| letters.contains(*c)).count() as f32;
        }
        v
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake-embed"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("FAIL")) {
                return Err(SiteKbError::Embedding("provider rejected input".into()));
            }
            Ok(texts.iter().map(|t| fake_vector(t)).collect())
        }
    }

    pub(crate) fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("sitekb_test_{}.db", Uuid::now_v7()))
    }

    pub(crate) async fn setup() -> (IngestionCoordinator, Arc<Storage>, Arc<FakeEmbedder>) {
        let storage = Arc::new(Storage::open(&temp_db(), DIMS).await.unwrap());
        let embedder = Arc::new(FakeEmbedder::default());
        let coordinator = IngestionCoordinator::new(
            storage.clone(),
            embedder.clone(),
            &ChunkingConfig::default(),
            IngestConfig::default(),
        );
        (coordinator, storage, embedder)
    }

    const BODY: &str = "# Alumnos\n\n## Inscripción\n\nLos requisitos de inscripción son DNI y título.\n\n## Becas\n\nLas becas se solicitan en marzo.\n";

    #[tokio::test]
    async fn insert_then_unchanged_skips_embedding() {
        let (coordinator, storage, embedder) = setup().await;

        let first = coordinator
            .ingest("https://med.test/alumnos/", "Alumnos", BODY)
            .await
            .unwrap();
        assert_eq!(first.action, IngestAction::Inserted);
        assert!(first.document_written);
        assert!(first.chunk_count > 0);
        let calls = embedder.calls.load(Ordering::SeqCst);

        let second = coordinator
            .ingest("https://med.test/alumnos#top", "Alumnos", BODY)
            .await
            .unwrap();
        assert_eq!(second.action, IngestAction::Unchanged);
        assert!(!second.document_written);
        assert_eq!(second.doc_id, first.doc_id);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks as usize, first.chunk_count);
    }

    #[tokio::test]
    async fn changed_body_replaces_chunks() {
        let (coordinator, storage, _) = setup().await;
        let first = coordinator
            .ingest("https://med.test/alumnos", "Alumnos", BODY)
            .await
            .unwrap();

        let second = coordinator
            .ingest("https://med.test/alumnos", "Alumnos", "# Alumnos\n\nTexto nuevo.\n")
            .await
            .unwrap();
        assert_eq!(second.action, IngestAction::Updated);
        assert_eq!(second.doc_id, first.doc_id);

        let chunks = storage.list_chunks(&first.doc_id).await.unwrap();
        assert_eq!(chunks.len(), second.chunk_count);
        assert!(chunks.iter().any(|c| c.text.contains("Texto nuevo.")));
        assert!(!chunks.iter().any(|c| c.text.contains("becas")));
    }

    #[tokio::test]
    async fn document_fields_derived_from_url() {
        let (coordinator, storage, _) = setup().await;
        let outcome = coordinator
            .ingest("https://www.med.test/alumnos/becas/", "Becas", BODY)
            .await
            .unwrap();

        let doc = storage.get_document(&outcome.doc_id).await.unwrap().unwrap();
        assert_eq!(doc.canonical_url, "https://www.med.test/alumnos/becas");
        assert_eq!(doc.path_segments, vec!["alumnos", "becas"]);
        assert_eq!(doc.path_depth, 2);
        assert_eq!(doc.page_type.as_deref(), Some("alumnos"));
        assert_eq!(doc.language.as_deref(), Some("es"));
        assert_eq!(doc.content_len, Some(BODY.len()));
    }

    #[tokio::test]
    async fn skip_existing_ignores_changes() {
        let (coordinator, _, _) = setup().await;
        coordinator
            .ingest("https://med.test/a", "A", BODY)
            .await
            .unwrap();

        let page = PageInput {
            url: "https://med.test/a",
            title: Some("A"),
            body: "# A\n\nOtro contenido.\n",
            fetched_at: None,
            status_code: None,
        };
        let outcome = coordinator
            .ingest_page(&page, DedupPolicy::SkipExisting)
            .await
            .unwrap();
        assert_eq!(outcome.action, IngestAction::SkippedExisting);
        assert!(!outcome.document_written);
    }

    #[tokio::test]
    async fn failed_embeddings_degrade_to_zero_vectors() {
        let (coordinator, storage, _) = setup().await;
        let body = "# Doc\n\n## Uno\n\nEste texto se embebe bien.\n\n## Dos\n\nEste FAIL no se puede embeber.\n";
        let outcome = coordinator
            .ingest("https://med.test/doc", "Doc", body)
            .await
            .unwrap();
        assert!(outcome.document_written);

        let chunks = storage.list_chunks(&outcome.doc_id).await.unwrap();
        let (bad, good): (Vec<_>, Vec<_>) = chunks.iter().partition(|c| c.text.contains("FAIL"));
        assert_eq!(bad.len(), 1);
        assert!(is_zero_vector(&bad[0].embedding));
        assert_eq!(bad[0].metadata.get("embedding_degraded"), Some(&Value::Bool(true)));
        assert!(good.iter().all(|c| !is_zero_vector(&c.embedding)));
        assert!(good.iter().all(|c| c.metadata.get("embedding_degraded").is_none()));
    }

    #[tokio::test]
    async fn chunk_indices_contiguous_and_ordered() {
        let (coordinator, storage, _) = setup().await;
        let body: String = (0..40)
            .map(|i| format!("## Sección {i}\n\n{}\n\n", "Texto de relleno. ".repeat(30)))
            .collect();
        let outcome = coordinator
            .ingest("https://med.test/largo", "Largo", &body)
            .await
            .unwrap();

        let chunks = storage.list_chunks(&outcome.doc_id).await.unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
        for pair in chunks.windows(2) {
            assert!(pair[0].end_char <= pair[1].start_char);
        }
    }

    #[tokio::test]
    async fn concurrent_same_url_writes_once() {
        let (coordinator, storage, _) = setup().await;
        let coordinator = Arc::new(coordinator);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            tasks.spawn(async move {
                coordinator
                    .ingest("https://med.test/alumnos", "Alumnos", BODY)
                    .await
                    .unwrap()
                    .action
            });
        }

        let mut actions = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            actions.push(joined.unwrap());
        }
        assert_eq!(actions.iter().filter(|a| **a == IngestAction::Inserted).count(), 1);
        assert_eq!(actions.iter().filter(|a| **a == IngestAction::Unchanged).count(), 7);
        assert_eq!(storage.stats().await.unwrap().documents, 1);
        assert!(coordinator.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_url_rejected() {
        let (coordinator, _, _) = setup().await;
        assert!(coordinator.ingest("not a url", "x", BODY).await.is_err());
    }

    #[tokio::test]
    async fn folder_ingest_is_idempotent() {
        let (coordinator, storage, _) = setup().await;
        let dir = std::env::temp_dir().join(format!("sitekb_artifacts_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        sitekb_artifacts::write_artifact(&dir, "https://med.test/alumnos", "Alumnos", BODY).unwrap();
        sitekb_artifacts::write_artifact(&dir, "https://med.test/becas", "Becas", "# Becas\n\nMarzo.\n")
            .unwrap();
        std::fs::write(dir.join("zz-sin-url.md"), "---\ntitle: \"Sin url\"\n---\n\nCuerpo.\n").unwrap();
        std::fs::write(dir.join("zz-roto.md"), "---\ntitle: roto\n").unwrap();

        let first = coordinator.ingest_folder(&dir).await.unwrap();
        assert_eq!(first.files, 4);
        assert_eq!(first.inserted, 2);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.errors, 1);
        assert!(first.chunks >= 2);

        let stats_before = storage.stats().await.unwrap();
        let second = coordinator.ingest_folder(&dir).await.unwrap();
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.inserted + second.updated, 0);
        assert_eq!(second.chunks, 0);
        assert_eq!(storage.stats().await.unwrap(), stats_before);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
