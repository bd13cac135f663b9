use actix_web::HttpResponse;

use crate::models::HealthResponse;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "courtside".to_string(),
    })
}
