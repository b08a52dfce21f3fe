//! HTTP surface of the login service.
//!
//! One operation: `POST /login` exchanges a credential pair for an access
//! token. Classified failures map to 400 with the reason; anything
//! unclassified maps to 500 and should be read as a defect signal.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::credentials::Credentials;
use crate::login::LoginOutcome;
use crate::service::LoginExecutor;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: String,
    pub message: String,
    pub access_token: Option<String>,
}

impl LoginResponse {
    fn success(access_token: String) -> Self {
        Self {
            status: "success".to_string(),
            message: "login succeeded".to_string(),
            access_token: Some(access_token),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            access_token: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    commit: &'static str,
}

pub fn router(executor: Arc<dyn LoginExecutor>) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(executor)
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_HASH"),
    })
}

async fn login(
    State(executor): State<Arc<dyn LoginExecutor>>,
    Json(request): Json<LoginRequest>,
) -> (StatusCode, Json<LoginResponse>) {
    let credentials = Credentials::new(request.email, request.password);

    match executor.login(credentials).await {
        Ok(LoginOutcome::Success { access_token }) => {
            (StatusCode::OK, Json(LoginResponse::success(access_token)))
        }
        Ok(LoginOutcome::Failure { reason }) => {
            (StatusCode::BAD_REQUEST, Json(LoginResponse::error(reason)))
        }
        Err(err) => {
            let detail = format!("{err:#}");
            tracing::error!(error = %detail, "Login execution failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LoginResponse::error(detail)),
            )
        }
    }
}
