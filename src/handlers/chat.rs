use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, HttpResponse};
use tracing::{error, info};

use crate::error::error_response;
use crate::models::{ChatRequest, ChatResponse};
use crate::services::agent::HybridAgent;

/// Main assistant endpoint: accepts a natural language query and returns an
/// answer plus how it was produced.
pub async fn chat(
    req: web::Json<ChatRequest>,
    agent: web::Data<Arc<HybridAgent>>,
) -> HttpResponse {
    let start = Instant::now();
    info!("received query: {}", req.query);

    match agent.resolve(&req.query).await {
        Ok(turn) => {
            let processing_time = start.elapsed().as_secs_f64();
            info!(
                mode = ?turn.mode,
                tools_used = turn.tool_calls.len(),
                "query processed in {:.2}s",
                processing_time
            );
            HttpResponse::Ok().json(ChatResponse {
                answer: turn.answer,
                processing_time,
                mode: turn.mode,
            })
        }
        Err(e) => {
            error!("query failed: {}", e);
            error_response(&e)
        }
    }
}
