use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::IndexError;
use crate::models::{Passage, ScoredPassage};
use crate::services::llm::EmbeddingClient;

const FORMAT_VERSION: u32 = 1;

/// Passages sent to the embedding API per request.
const EMBED_BATCH_SIZE: usize = 32;

/// The searchable passage collection: metadata and vectors travel in one
/// artifact, so neither can be loaded without the other.
#[derive(Debug, Serialize, Deserialize)]
pub struct PassageIndex {
    version: u32,
    /// Identifier of the embedding model this index was built with. Queries
    /// embedded by a different model live in a different vector space, so
    /// `load` refuses a mismatched configuration.
    pub embedding_model: String,
    pub dimension: usize,
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Copy)]
pub struct BuildStats {
    pub indexed: usize,
    pub rejected: usize,
}

impl PassageIndex {
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Exhaustive cosine-similarity search. Returns at most `k` passages,
    /// sorted by non-increasing score. An empty index yields an empty result,
    /// not an error.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query_vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }

        let mut scored: Vec<ScoredPassage> = self
            .vectors
            .iter()
            .zip(self.passages.iter())
            .map(|(v, p)| ScoredPassage {
                passage: p.clone(),
                score: cosine_similarity(query_vector, v),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Persist the index atomically: write to a temporary sibling, then
    /// rename over the target so concurrent readers never see a
    /// partially-written artifact. Each writer gets its own temporary file,
    /// so overlapping saves cannot truncate each other's bytes mid-write;
    /// whichever rename lands last wins with a complete artifact.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let encoded = bincode::serialize(self)
            .map_err(|e| IndexError::Corrupt(format!("serialization failed: {e}")))?;

        let tmp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4().simple()));
        fs::write(&tmp_path, &encoded)?;
        fs::rename(&tmp_path, path)?;

        info!(
            "persisted passage index ({} passages, dim {}) to {}",
            self.len(),
            self.dimension,
            path.display()
        );
        Ok(())
    }

    /// Load a persisted index, refusing one built with a different embedding
    /// model than the one configured.
    pub fn load(path: &Path, configured_model: &str) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }

        let bytes = fs::read(path)?;
        let index: PassageIndex = bincode::deserialize(&bytes)
            .map_err(|e| IndexError::Corrupt(e.to_string()))?;

        if index.version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(index.version));
        }
        if index.embedding_model != configured_model {
            return Err(IndexError::ModelMismatch {
                built_with: index.embedding_model,
                configured: configured_model.to_string(),
            });
        }

        info!(
            "loaded passage index ({} passages, dim {}) from {}",
            index.len(),
            index.dimension,
            path.display()
        );
        Ok(index)
    }
}

/// Embed every passage and build an index over the vectors. Embedding runs in
/// batches; a failed batch falls back to per-item embedding so one bad item
/// cannot discard the successes around it. Vectors of the wrong dimension are
/// rejected at insert time.
pub async fn build_index(
    embedder: &dyn EmbeddingClient,
    passages: Vec<Passage>,
) -> Result<(PassageIndex, BuildStats), IndexError> {
    let dimension = embedder.dimension();
    let mut kept_passages = Vec::with_capacity(passages.len());
    let mut vectors = Vec::with_capacity(passages.len());
    let mut rejected = 0usize;

    for batch in passages.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        let embeddings = match embedder.embed_batch(&texts).await {
            Ok(embeddings) => embeddings.into_iter().map(Some).collect::<Vec<_>>(),
            Err(e) => {
                warn!("batch embedding failed, retrying items individually: {}", e);
                let mut singles = Vec::with_capacity(batch.len());
                for text in &texts {
                    match embedder.embed(text).await {
                        Ok(v) => singles.push(Some(v)),
                        Err(e) => {
                            warn!("skipping passage that failed to embed: {}", e);
                            singles.push(None);
                        }
                    }
                }
                singles
            }
        };

        for (passage, embedding) in batch.iter().zip(embeddings) {
            match embedding {
                Some(v) if v.len() == dimension => {
                    kept_passages.push(passage.clone());
                    vectors.push(v);
                }
                Some(v) => {
                    warn!(
                        "rejecting passage from '{}': embedding dimension {} != {}",
                        passage.source,
                        v.len(),
                        dimension
                    );
                    rejected += 1;
                }
                None => rejected += 1,
            }
        }
    }

    if kept_passages.is_empty() && rejected > 0 {
        return Err(IndexError::Embedding(
            "every passage failed to embed".to_string(),
        ));
    }

    let stats = BuildStats {
        indexed: kept_passages.len(),
        rejected,
    };
    let index = PassageIndex {
        version: FORMAT_VERSION,
        embedding_model: embedder.model_id().to_string(),
        dimension,
        passages: kept_passages,
        vectors,
    };

    info!(
        "built passage index: {} indexed, {} rejected, dim {}",
        stats.indexed, stats.rejected, dimension
    );
    Ok((index, stats))
}

/// Read a corpus of normalized passages from a JSONL file, one object per
/// line: `{"text", "source", "page", "category"}`. Records with empty text or
/// a page below 1 are rejected with a warning.
pub fn load_corpus(path: &Path) -> Result<Vec<Passage>, IndexError> {
    if !path.exists() {
        return Err(IndexError::Corpus(format!(
            "corpus file not found: {}",
            path.display()
        )));
    }

    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut passages = Vec::new();
    let mut rejected = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Passage>(&line) {
            Ok(p) if !p.text.trim().is_empty() && p.page >= 1 => passages.push(p),
            Ok(_) => {
                warn!("rejecting corpus line {}: empty text or page < 1", line_no + 1);
                rejected += 1;
            }
            Err(e) => {
                warn!("rejecting corpus line {}: {}", line_no + 1, e);
                rejected += 1;
            }
        }
    }

    if passages.is_empty() {
        return Err(IndexError::Corpus(format!(
            "no valid passages in {} ({} rejected)",
            path.display(),
            rejected
        )));
    }

    info!(
        "loaded {} passages from {} ({} rejected)",
        passages.len(),
        path.display(),
        rejected
    );
    Ok(passages)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
