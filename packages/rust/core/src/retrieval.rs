//! Hybrid retrieval: vector and full-text candidates, then document ranking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use sitekb_shared::{Result, RetrievalConfig, SiteKbError};
use sitekb_storage::{ChunkHit, Storage};

use crate::embedding::Embedder;

/// A ranked document expanded to its full text.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentContext {
    pub doc_id: String,
    pub url: String,
    pub title: Option<String>,
    /// Number of search hits that fell in this document.
    pub hits: usize,
    /// All chunk texts in order, joined by newlines.
    pub text: String,
}

pub struct RetrievalService {
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self {
            storage,
            embedder,
            config,
        }
    }

    /// Union of the top-`k` vector hits and the top-`k` keyword hits.
    ///
    /// Vector hits come first in similarity order, followed by keyword-only
    /// hits in bm25 order. When the query cannot be embedded, only keyword
    /// hits are returned.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ChunkHit>> {
        let vector = match self.vector_hits(query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector search unavailable, using keyword search only");
                Vec::new()
            }
        };
        let keyword = self.storage.keyword_search(query, k).await?;

        debug!(vector = vector.len(), keyword = keyword.len(), "candidates collected");
        Ok(union_hits(vector, keyword))
    }

    async fn vector_hits(&self, query: &str, k: usize) -> Result<Vec<ChunkHit>> {
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(SiteKbError::Embedding(format!(
                "expected 1 query embedding, got {}",
                vectors.len()
            )));
        }
        self.storage.vector_search(&vectors.remove(0), k).await
    }

    /// Group hits by document, rank by hit count (earliest first hit wins
    /// ties), and expand the top `top_n` to their full text.
    pub async fn rank_documents(&self, hits: &[ChunkHit], top_n: usize) -> Result<Vec<DocumentContext>> {
        let mut order: Vec<&ChunkHit> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for hit in hits {
            let count = counts.entry(hit.doc_id.as_str()).or_insert(0);
            if *count == 0 {
                order.push(hit);
            }
            *count += 1;
        }
        // Stable sort keeps first-hit order among equal counts.
        order.sort_by(|a, b| counts[b.doc_id.as_str()].cmp(&counts[a.doc_id.as_str()]));

        let mut docs = Vec::new();
        for first in order.into_iter().take(top_n) {
            let text = self.storage.full_document_text(&first.doc_id).await?;
            docs.push(DocumentContext {
                doc_id: first.doc_id.clone(),
                url: first.url.clone(),
                title: first.title.clone(),
                hits: counts[first.doc_id.as_str()],
                text,
            });
        }
        Ok(docs)
    }

    /// Search with the configured `top_k`, then rank `top_documents`.
    pub async fn context_for(&self, query: &str) -> Result<Vec<DocumentContext>> {
        let hits = self.search(query, self.config.top_k).await?;
        self.rank_documents(&hits, self.config.top_documents).await
    }
}

fn union_hits(vector: Vec<ChunkHit>, keyword: Vec<ChunkHit>) -> Vec<ChunkHit> {
    let mut seen = HashSet::new();
    vector
        .into_iter()
        .chain(keyword)
        .filter(|hit| seen.insert(hit.chunk_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sitekb_shared::{ChunkingConfig, IngestConfig};
    use sitekb_storage::MatchKind;

    use crate::ingest::IngestionCoordinator;
    use crate::ingest::tests::{DIMS, FakeEmbedder, temp_db};

    /// Maps texts to fixed topic vectors by phrase.
    struct TopicEmbedder;

    #[async_trait]
    impl Embedder for TopicEmbedder {
        fn model_name(&self) -> &str {
            "topic"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    if t.contains("requisitos de inscripción") {
                        vec![1.0, 0.0, 0.0, 0.0]
                    } else if t.contains("inscripción") {
                        vec![0.6, 0.8, 0.0, 0.0]
                    } else if t.contains("requisitos") {
                        vec![0.5, 0.0, 0.866, 0.0]
                    } else {
                        vec![0.0, 0.0, 0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        fn model_name(&self) -> &str {
            "down"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(SiteKbError::Embedding("service unavailable".into()))
        }
    }

    async fn seeded(embedder: Arc<dyn Embedder>) -> Arc<Storage> {
        let storage = Arc::new(Storage::open(&temp_db(), DIMS).await.unwrap());
        let coordinator = IngestionCoordinator::new(
            storage.clone(),
            embedder,
            &ChunkingConfig::default(),
            IngestConfig::default(),
        );
        for (url, body) in [
            (
                "https://med.test/ingreso",
                "# Ingreso\n\n## Requisitos\n\nLos requisitos de inscripción son DNI y título secundario.\n",
            ),
            (
                "https://med.test/calendario",
                "# Calendario\n\n## Fechas\n\nLa inscripción abre en febrero.\n",
            ),
            (
                "https://med.test/posgrado",
                "# Posgrado\n\n## Carreras\n\nLos requisitos varían según la carrera.\n",
            ),
            (
                "https://med.test/becas",
                "# Becas\n\n## Becas\n\nLas becas se solicitan en marzo.\n",
            ),
        ] {
            coordinator.ingest(url, "", body).await.unwrap();
        }
        storage
    }

    fn service(storage: Arc<Storage>, embedder: Arc<dyn Embedder>) -> RetrievalService {
        RetrievalService::new(storage, embedder, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn exact_phrase_ranked_first() {
        let embedder: Arc<dyn Embedder> = Arc::new(TopicEmbedder);
        let storage = seeded(embedder.clone()).await;
        let retrieval = service(storage, embedder);

        let hits = retrieval.search("requisitos de inscripción", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].text.contains("requisitos de inscripción"));
        assert_eq!(hits[0].kind, MatchKind::Vector);

        let ids: HashSet<_> = hits.iter().map(|h| h.chunk_id.clone()).collect();
        assert_eq!(ids.len(), hits.len());
    }

    #[tokio::test]
    async fn keyword_only_when_embedding_fails() {
        let storage = seeded(Arc::new(FakeEmbedder::default())).await;
        let retrieval = service(storage, Arc::new(DownEmbedder));

        let hits = retrieval.search("becas marzo", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.kind == MatchKind::Keyword));
        assert!(hits[0].url.ends_with("/becas"));
    }

    #[tokio::test]
    async fn keyword_search_ignores_accents() {
        let storage = seeded(Arc::new(FakeEmbedder::default())).await;
        let retrieval = service(storage, Arc::new(DownEmbedder));

        let hits = retrieval.search("inscripcion", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    fn synthetic(chunk_id: &str, doc_id: &str, url: &str, kind: MatchKind) -> ChunkHit {
        ChunkHit {
            chunk_id: chunk_id.into(),
            doc_id: doc_id.into(),
            chunk_index: 0,
            text: String::new(),
            heading_path: Vec::new(),
            anchor: None,
            url: url.into(),
            title: None,
            score: 0.0,
            kind,
        }
    }

    async fn doc_id(storage: &Storage, url: &str) -> String {
        storage
            .get_document_by_canonical_url(url)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[test]
    fn union_keeps_vector_order_then_keyword_only() {
        let hit = |id: &str, kind| synthetic(id, "d", "https://med.test/", kind);
        let merged = union_hits(
            vec![hit("a", MatchKind::Vector), hit("b", MatchKind::Vector)],
            vec![hit("b", MatchKind::Keyword), hit("c", MatchKind::Keyword)],
        );
        let ids: Vec<_> = merged.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[1].kind, MatchKind::Vector);
    }

    #[tokio::test]
    async fn documents_ranked_by_hit_count() {
        let embedder: Arc<dyn Embedder> = Arc::new(TopicEmbedder);
        let storage = seeded(embedder.clone()).await;
        let retrieval = service(storage.clone(), embedder);

        let ingreso = doc_id(&storage, "https://med.test/ingreso").await;
        let becas = doc_id(&storage, "https://med.test/becas").await;
        let hits = vec![
            synthetic("1", &ingreso, "https://med.test/ingreso", MatchKind::Vector),
            synthetic("2", &becas, "https://med.test/becas", MatchKind::Vector),
            synthetic("3", &becas, "https://med.test/becas", MatchKind::Keyword),
        ];

        let docs = retrieval.rank_documents(&hits, 3).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, becas);
        assert_eq!(docs[0].hits, 2);
        assert_eq!(docs[1].doc_id, ingreso);
        assert_eq!(docs[0].text, storage.full_document_text(&becas).await.unwrap());
        assert!(docs[0].text.contains("Las becas se solicitan en marzo."));

        let top_one = retrieval.rank_documents(&hits, 1).await.unwrap();
        assert_eq!(top_one.len(), 1);
        assert_eq!(top_one[0].doc_id, becas);
    }

    #[tokio::test]
    async fn ties_keep_first_hit_order() {
        let embedder: Arc<dyn Embedder> = Arc::new(TopicEmbedder);
        let storage = seeded(embedder.clone()).await;
        let retrieval = service(storage.clone(), embedder);

        let calendario = doc_id(&storage, "https://med.test/calendario").await;
        let becas = doc_id(&storage, "https://med.test/becas").await;
        let hits = vec![
            synthetic("1", &calendario, "https://med.test/calendario", MatchKind::Vector),
            synthetic("2", &becas, "https://med.test/becas", MatchKind::Vector),
        ];

        let docs = retrieval.rank_documents(&hits, 3).await.unwrap();
        let urls: Vec<_> = docs.iter().map(|d| d.url.as_str()).collect();
        assert_eq!(urls, vec!["https://med.test/calendario", "https://med.test/becas"]);
    }

    #[tokio::test]
    async fn context_uses_configured_limits() {
        let embedder: Arc<dyn Embedder> = Arc::new(TopicEmbedder);
        let storage = seeded(embedder.clone()).await;
        let retrieval = service(storage, embedder);

        let docs = retrieval.context_for("requisitos de inscripción").await.unwrap();
        assert!(!docs.is_empty());
        assert!(docs.len() <= RetrievalConfig::default().top_documents);
        assert!(docs.iter().any(|d| d.url.ends_with("/ingreso")));
    }
}
