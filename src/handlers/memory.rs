use crate::error::{AppError, AppResult};
use crate::memory::ContextError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct SaveMessageRequest {
    pub content: String,
}

/// `POST /memory/messages`: append a note to the saved health conversation.
pub async fn save_message(
    state: web::Data<AppState>,
    body: web::Json<SaveMessageRequest>,
) -> AppResult<HttpResponse> {
    let content = body.into_inner().content;
    if content.trim().is_empty() {
        return Err(AppError::ValidationError("content must not be empty".to_string()));
    }

    state.memory.add_message(&content).await.map_err(|e| {
        warn!(error = %e, "Failed to save message to memory store");
        match e {
            ContextError::NotConfigured => AppError::Upstream("memory store is not configured".to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    })?;

    Ok(HttpResponse::Created().json(json!({
        "status": "saved",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_save_without_credentials_is_bad_gateway() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(AppConfig::default())))
                .route("/memory/messages", web::post().to(save_message)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/memory/messages")
            .set_json(json!({"content": "Glucose 5.4 this morning"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_GATEWAY);

        let req = test::TestRequest::post()
            .uri("/memory/messages")
            .set_json(json!({"content": "   "}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
