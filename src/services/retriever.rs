use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::IndexError;
use crate::models::ScoredPassage;
use crate::services::llm::EmbeddingClient;
use crate::services::vector_store::{build_index, load_corpus, BuildStats, PassageIndex};

/// Shared, read-mostly handle over the active passage index.
///
/// Searches clone the current `Arc` and never block each other; a rebuild
/// persists a new artifact, then swaps the handle, so in-flight searches
/// finish against the index they started with.
pub struct PassageRetriever {
    embedder: Arc<dyn EmbeddingClient>,
    index_path: PathBuf,
    corpus_path: PathBuf,
    auto_build: bool,
    index: RwLock<Option<Arc<PassageIndex>>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RebuildOutcome {
    pub stats: BuildStats,
    pub dimension: usize,
    pub build_time_ms: u64,
}

impl PassageRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index_path: PathBuf,
        corpus_path: PathBuf,
        auto_build: bool,
    ) -> Self {
        Self {
            embedder,
            index_path,
            corpus_path,
            auto_build,
            index: RwLock::new(None),
        }
    }

    /// Load the persisted index, or build it from the corpus when auto-build
    /// is enabled. Called once at startup so a missing index prevents serving
    /// instead of failing per-request.
    pub async fn initialize(&self) -> Result<(), IndexError> {
        self.active_index().await.map(|_| ())
    }

    /// Embed the query and search the active index. An empty index yields an
    /// empty result; an embedding failure propagates as a retrieval error for
    /// the agent to contain as a tool error.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
        let index = self.active_index().await?;
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        index.search(&query_vector, k)
    }

    /// Rebuild the index wholesale from the corpus, persist it, and swap the
    /// active handle.
    pub async fn rebuild(&self) -> Result<RebuildOutcome, IndexError> {
        let start = Instant::now();
        let passages = load_corpus(&self.corpus_path)?;
        let (index, stats) = build_index(self.embedder.as_ref(), passages).await?;
        index.save(&self.index_path)?;

        let dimension = index.dimension;
        *self.index.write().await = Some(Arc::new(index));

        Ok(RebuildOutcome {
            stats,
            dimension,
            build_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn active_index(&self) -> Result<Arc<PassageIndex>, IndexError> {
        if let Some(index) = self.index.read().await.as_ref() {
            return Ok(Arc::clone(index));
        }

        let mut guard = self.index.write().await;
        // Another task may have loaded it while we waited for the lock.
        if let Some(index) = guard.as_ref() {
            return Ok(Arc::clone(index));
        }

        match PassageIndex::load(&self.index_path, self.embedder.model_id()) {
            Ok(index) => {
                let index = Arc::new(index);
                *guard = Some(Arc::clone(&index));
                Ok(index)
            }
            Err(IndexError::NotFound(path)) if self.auto_build => {
                warn!(
                    "no passage index at {}, auto-building from {} (INDEX_AUTO_BUILD=true)",
                    path,
                    self.corpus_path.display()
                );
                let passages = load_corpus(&self.corpus_path)?;
                let (index, stats) = build_index(self.embedder.as_ref(), passages).await?;
                index.save(&self.index_path)?;
                info!(
                    "auto-build complete: {} passages indexed, {} rejected",
                    stats.indexed, stats.rejected
                );
                let index = Arc::new(index);
                *guard = Some(Arc::clone(&index));
                Ok(index)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::vector_store::tests::{passage, StubEmbedder};
    use std::io::Write;

    fn write_corpus(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("passages.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        for p in [
            passage("curry shot fifty points against the kings"),
            passage("foul rules changed in the 2001 season"),
        ] {
            writeln!(f, "{}", serde_json::to_string(&p).unwrap()).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn test_missing_index_fails_without_auto_build() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = write_corpus(dir.path());
        let retriever = PassageRetriever::new(
            Arc::new(StubEmbedder::new()),
            dir.path().join("index.bin"),
            corpus,
            false,
        );
        let err = retriever.initialize().await.unwrap_err();
        assert!(matches!(err, IndexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_auto_build_creates_and_persists_index() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = write_corpus(dir.path());
        let index_path = dir.path().join("index.bin");
        let retriever = PassageRetriever::new(
            Arc::new(StubEmbedder::new()),
            index_path.clone(),
            corpus,
            true,
        );

        retriever.initialize().await.unwrap();
        assert!(index_path.exists());

        let results = retriever.search("curry highlights", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].passage.text.starts_with("curry"));
    }

    #[tokio::test]
    async fn test_rebuild_swaps_active_index() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = write_corpus(dir.path());
        let retriever = PassageRetriever::new(
            Arc::new(StubEmbedder::new()),
            dir.path().join("index.bin"),
            corpus,
            true,
        );

        retriever.initialize().await.unwrap();
        let outcome = retriever.rebuild().await.unwrap();
        assert_eq!(outcome.stats.indexed, 2);
        assert_eq!(outcome.dimension, 4);

        let results = retriever.search("foul rules", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_overlapping_rebuilds_leave_a_loadable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = write_corpus(dir.path());
        let index_path = dir.path().join("index.bin");
        let retriever = Arc::new(PassageRetriever::new(
            Arc::new(StubEmbedder::new()),
            index_path.clone(),
            corpus,
            true,
        ));

        let (a, b) = tokio::join!(retriever.rebuild(), retriever.rebuild());
        assert_eq!(a.unwrap().stats.indexed, 2);
        assert_eq!(b.unwrap().stats.indexed, 2);

        // Whichever save landed last, the persisted artifact must be whole.
        let reloaded = PassageIndex::load(&index_path, "stub-embed-4d").unwrap();
        assert_eq!(reloaded.len(), 2);
    }
}
