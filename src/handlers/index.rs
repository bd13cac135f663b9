use std::sync::Arc;

use actix_web::{web, HttpResponse};
use tracing::{error, info};

use crate::error::{error_response, EngineError};
use crate::models::RebuildResponse;
use crate::services::retriever::PassageRetriever;

/// Admin endpoint: rebuild the passage index wholesale from the configured
/// corpus and swap it in atomically.
pub async fn rebuild_index(retriever: web::Data<Arc<PassageRetriever>>) -> HttpResponse {
    info!("index rebuild requested");

    match retriever.rebuild().await {
        Ok(outcome) => {
            info!(
                indexed = outcome.stats.indexed,
                rejected = outcome.stats.rejected,
                build_time_ms = outcome.build_time_ms,
                "index rebuild complete"
            );
            HttpResponse::Ok().json(RebuildResponse {
                passages_indexed: outcome.stats.indexed,
                passages_rejected: outcome.stats.rejected,
                dimension: outcome.dimension,
                build_time_ms: outcome.build_time_ms,
            })
        }
        Err(e) => {
            error!("index rebuild failed: {}", e);
            error_response(&EngineError::Index(e))
        }
    }
}
