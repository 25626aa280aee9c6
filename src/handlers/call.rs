//! Call control: start, stop and inspect the voice session.

use crate::error::{AppError, AppResult};
use crate::session::instruction::Voice;
use crate::session::SessionSettings;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct StartCallRequest {
    /// Overrides the configured default voice for this call
    #[serde(default)]
    pub voice: Option<String>,
}

/// `POST /call/start`: accepted once the session is `Connecting`.
///
/// The body is optional; when present it must be a valid `StartCallRequest`.
/// The handshake finishes in the background; poll `/call/status` to see it
/// become active.
pub async fn start_call(state: web::Data<AppState>, body: web::Bytes) -> AppResult<HttpResponse> {
    let request: StartCallRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartCallRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };
    let voice = request
        .voice
        .as_deref()
        .map(str::parse::<Voice>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let settings = SessionSettings::from_config(&state.get_config(), voice);
    let chosen = settings.voice;
    let session_id = state.voice.start(settings).await?;
    info!(session_id = %session_id, voice = %chosen, "Call start accepted");

    Ok(HttpResponse::Accepted().json(json!({
        "session_id": session_id,
        "voice": chosen,
        "state": state.voice.state().as_str()
    })))
}

/// `POST /call/stop`: ends whatever is running and reports the final state.
pub async fn stop_call(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let final_state = state.voice.stop().await;

    Ok(HttpResponse::Ok().json(json!({
        "state": final_state.as_str(),
        "live": final_state.is_live()
    })))
}

/// `GET /call/status`
pub async fn call_status(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.voice.status().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::testing::MockCaptureDevice;
    use crate::audio::playback::testing::ManualOutputDevice;
    use crate::config::AppConfig;
    use crate::memory::testing::StaticContext;
    use crate::memory::MemoryClient;
    use crate::session::transport::testing::{ConnectBehavior, MockConnector};
    use crate::session::SessionDeps;
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn state_with(behavior: ConnectBehavior) -> web::Data<AppState> {
        let config = AppConfig::default();
        let deps = SessionDeps {
            context: Arc::new(StaticContext::Empty),
            connector: Arc::new(MockConnector::new(behavior)),
            capture: Arc::new(MockCaptureDevice::default()),
            output: Arc::new(ManualOutputDevice::default()),
        };
        let memory = Arc::new(MemoryClient::new(&config.memory));
        web::Data::new(AppState::with_session_deps(config, memory, deps))
    }

    macro_rules! call_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .route("/call/start", web::post().to(start_call))
                    .route("/call/stop", web::post().to(stop_call))
                    .route("/call/status", web::get().to(call_status)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_start_then_conflict_then_stop() {
        let state = state_with(ConnectBehavior::Hang);
        let app = call_app!(state);

        let req = test::TestRequest::post()
            .uri("/call/start")
            .set_json(json!({"voice": "puck"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["voice"], "Puck");
        assert_eq!(body["state"], "connecting");

        let req = test::TestRequest::post().uri("/call/start").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post().uri("/call/stop").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["state"], "closed");
        assert_eq!(body["live"], false);
    }

    #[actix_web::test]
    async fn test_unknown_voice_is_bad_request() {
        let state = state_with(ConnectBehavior::Hang);
        let app = call_app!(state);

        let req = test::TestRequest::post()
            .uri("/call/start")
            .set_json(json!({"voice": "Baritone"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert!(!state.voice.state().is_live());
    }

    #[actix_web::test]
    async fn test_malformed_body_is_bad_request() {
        let state = state_with(ConnectBehavior::Hang);
        let app = call_app!(state);

        let req = test::TestRequest::post()
            .uri("/call/start")
            .set_json(json!({"voice": 5}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/call/start")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert!(!state.voice.state().is_live());

        // No body at all still uses the configured voice
        let req = test::TestRequest::post().uri("/call/start").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["voice"], "Kore");
        state.voice.stop().await;
    }

    #[actix_web::test]
    async fn test_status_when_idle() {
        let state = state_with(ConnectBehavior::Hang);
        let app = call_app!(state);

        let req = test::TestRequest::get().uri("/call/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["state"], "idle");
        assert_eq!(body["live"], false);
        assert!(body["session_id"].is_null());
    }
}
