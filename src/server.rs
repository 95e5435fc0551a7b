//! HTTP server: JSON API plus a single-page dashboard.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/` | Dashboard (upload, pick a contract, ask, rate answers) |
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/contracts` | Registered contracts, newest first |
//! | `POST`   | `/contracts?filename=&ocr=` | Ingest the raw PDF request body |
//! | `GET`    | `/contracts/{id}` | Metadata and entities of one contract |
//! | `DELETE` | `/contracts/{id}` | Remove a contract and its vectors |
//! | `POST`   | `/contracts/{id}/ask` | Answer a question about one contract |
//! | `POST`   | `/feedback` | Record a rating for an answer |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `not_found` (404), `internal` (500).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::context::AppContext;
use crate::entities::Entity;
use crate::error::ContractError;
use crate::feedback::{self, FeedbackRecord};
use crate::ingest::{self, IngestOptions, IngestReport};
use crate::models::SearchHit;
use crate::qa;
use crate::registry::{validate_contract_id, ContractMeta, PdfSource};

const INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let body_limit = (ctx.config.limits.max_pdf_size_mb * 1024.0 * 1024.0) as usize + 64 * 1024;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/contracts", get(handle_list).post(handle_upload))
        .route("/contracts/{id}", get(handle_show).delete(handle_delete))
        .route("/contracts/{id}/ask", post(handle_ask))
        .route("/feedback", post(handle_feedback))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(AppState { ctx })
}

/// Serve until the process is terminated.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(Arc::new(ctx));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    eprintln!("Contract assistant listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<ContractError> for AppError {
    fn from(err: ContractError) -> Self {
        let message = err.to_string();
        match err {
            ContractError::Validation(_) => bad_request(message),
            ContractError::VectorStore(ref m) if m.contains("embedding provider") => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "embeddings_disabled".to_string(),
                message,
            },
            _ => {
                error!(error = %message, "request failed");
                internal(message)
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ContractError>() {
            Ok(domain) => domain.into(),
            Err(other) => {
                error!(error = %other, "request failed");
                internal(format!("{:#}", other))
            }
        }
    }
}

fn checked_id(id: &str) -> Result<(), AppError> {
    validate_contract_id(id).map_err(AppError::from)
}

// ============ GET / and /health ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /contracts ============

#[derive(Serialize)]
struct ContractListResponse {
    contracts: Vec<ContractMeta>,
}

async fn handle_list(State(state): State<AppState>) -> Json<ContractListResponse> {
    Json(ContractListResponse {
        contracts: state.ctx.registry.list_contracts(),
    })
}

#[derive(Deserialize)]
struct UploadQuery {
    filename: Option<String>,
    #[serde(default)]
    ocr: bool,
}

async fn handle_upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<IngestReport>, AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must contain a PDF"));
    }
    if !body.starts_with(b"%PDF") {
        return Err(bad_request("request body is not a PDF"));
    }
    let filename = query.filename.unwrap_or_else(|| "upload.pdf".to_string());
    let opts = IngestOptions {
        force_ocr: query.ocr,
        ..IngestOptions::default()
    };

    let report = ingest::ingest_pdf(&state.ctx, PdfSource::Bytes(&body), &filename, &opts).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct ContractDetail {
    meta: ContractMeta,
    entities: Vec<Entity>,
    chunks: usize,
}

async fn handle_show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContractDetail>, AppError> {
    checked_id(&id)?;
    let meta = state
        .ctx
        .registry
        .load_contract_meta(&id)
        .ok_or_else(|| not_found(format!("contract not found: {}", id)))?;
    Ok(Json(ContractDetail {
        meta,
        entities: state.ctx.registry.load_contract_entities(&id),
        chunks: state.ctx.store.count(Some(&id)).await?,
    }))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    checked_id(&id)?;
    let deleted = state
        .ctx
        .registry
        .delete_contract(&id, Some(&state.ctx.store))
        .await?;
    if !deleted {
        return Err(not_found(format!("contract not found: {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": true, "contract_id": id })))
}

// ============ POST /contracts/{id}/ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    message_id: String,
    answer: String,
    /// `entities` when answered from extracted entities, else `retrieval`.
    answered_from: &'static str,
    sources: Vec<SearchHit>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    checked_id(&id)?;
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if !state.ctx.registry.contract_exists(&id) {
        return Err(not_found(format!("contract not found: {}", id)));
    }

    let message_id = Uuid::new_v4().to_string();
    let entities = state.ctx.registry.load_contract_entities(&id);
    if let Some(answer) = qa::answer_from_entities(
        &req.question,
        &entities,
        state.ctx.config.retrieval.enable_entity_routing,
    ) {
        return Ok(Json(AskResponse {
            message_id,
            answer,
            answered_from: "entities",
            sources: Vec::new(),
        }));
    }

    let chat = state.ctx.chat().map_err(|e| internal(e.to_string()))?;
    let answer = qa::ask(
        &state.ctx.store,
        chat,
        &req.question,
        Some(&id),
        state.ctx.config.retrieval.k,
    )
    .await?;

    Ok(Json(AskResponse {
        message_id,
        answer: answer.answer,
        answered_from: "retrieval",
        sources: answer.sources,
    }))
}

// ============ POST /feedback ============

async fn handle_feedback(
    State(state): State<AppState>,
    Json(record): Json<FeedbackRecord>,
) -> Result<Json<serde_json::Value>, AppError> {
    feedback::log_feedback(&state.ctx.config.data.feedback_log(), &record)?;
    Ok(Json(serde_json::json!({ "status": "recorded" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_400() {
        let err: AppError = ContractError::Validation("bad".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
    }

    #[test]
    fn test_disabled_embeddings_have_own_code() {
        let err: AppError = ContractError::VectorStore(
            "similarity search requires an embedding provider".into(),
        )
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "embeddings_disabled");
    }

    #[test]
    fn test_wrapped_domain_errors_are_unwrapped() {
        let err: AppError =
            anyhow::Error::from(ContractError::Validation("too many pages".into())).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: AppError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "internal");
    }

    #[test]
    fn test_invalid_id_is_bad_request() {
        let err = checked_id("../../etc").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_dashboard_wires_api() {
        assert!(INDEX_HTML.contains("/contracts"));
        assert!(INDEX_HTML.contains("/feedback"));
    }

    mod routes {
        use super::*;
        use crate::config::Config;
        use axum::body::Body;
        use axum::http::Request;
        use tempfile::TempDir;
        use tower::ServiceExt;

        const UNKNOWN_ID: &str =
            "0000000000000000000000000000000000000000000000000000000000000000";

        /// One-page PDF whose text layer holds `text`.
        fn pdf_with_text(text: &str) -> Vec<u8> {
            let content = format!("BT /F1 10 Tf 40 700 Td ({}) Tj ET", text);
            let mut out = b"%PDF-1.4\n".to_vec();
            let mut offsets = Vec::new();
            let objects = [
                "1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n".to_string(),
                "2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n".to_string(),
                "3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n".to_string(),
                format!(
                    "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                    content.len(),
                    content
                ),
                "5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n"
                    .to_string(),
            ];
            for obj in &objects {
                offsets.push(out.len());
                out.extend_from_slice(obj.as_bytes());
            }
            let xref_start = out.len();
            out.extend_from_slice(b"xref\n0 6\n0000000000 65535 f \n");
            for offset in offsets {
                out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
            }
            out.extend_from_slice(
                format!(
                    "trailer << /Size 6 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                    xref_start
                )
                .as_bytes(),
            );
            out
        }

        async fn test_app(tmp: &TempDir) -> (Router, Arc<AppContext>) {
            let mut config = Config::minimal();
            config.data.root = tmp.path().join("data");
            config.extraction.strategy = "text".to_string();
            config.entities.mode = "regex".to_string();
            config.retrieval.enable_entity_routing = true;
            let ctx = Arc::new(AppContext::open(config).await.unwrap());
            (router(ctx.clone()), ctx)
        }

        async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
            (status, json)
        }

        fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        }

        async fn upload(app: &Router) -> String {
            let request = Request::builder()
                .method("POST")
                .uri("/contracts?filename=lease.pdf")
                .body(Body::from(pdf_with_text(
                    "This Lease Agreement is dated March 3, 2024 and the monthly rent of $5,000.00 is payable to the Landlord on the first day of each month.",
                )))
                .unwrap();
            let (status, json) = send(app, request).await;
            assert_eq!(status, StatusCode::OK, "upload failed: {}", json);
            json["contract_id"].as_str().unwrap().to_string()
        }

        #[tokio::test]
        async fn test_upload_rejects_non_pdf_body() {
            let tmp = TempDir::new().unwrap();
            let (app, _) = test_app(&tmp).await;
            let request = Request::builder()
                .method("POST")
                .uri("/contracts?filename=notes.pdf")
                .body(Body::from("hello"))
                .unwrap();
            let (status, json) = send(&app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"]["code"], "bad_request");
        }

        #[tokio::test]
        async fn test_upload_registers_contract() {
            let tmp = TempDir::new().unwrap();
            let (app, ctx) = test_app(&tmp).await;
            let id = upload(&app).await;

            assert!(ctx.registry.contract_exists(&id));
            let (status, json) = send(
                &app,
                Request::builder().uri("/contracts").body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["contracts"][0]["contract_id"], id.as_str());
            assert_eq!(json["contracts"][0]["original_filename"], "lease.pdf");

            let (status, json) = send(
                &app,
                Request::builder()
                    .uri(format!("/contracts/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["chunks"], 1);
            let labels: Vec<&str> = json["entities"]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(|e| e["label"].as_str())
                .collect();
            assert!(labels.contains(&"Date"));
            assert!(labels.contains(&"Monetary Value"));
        }

        #[tokio::test]
        async fn test_unknown_contract_is_404() {
            let tmp = TempDir::new().unwrap();
            let (app, _) = test_app(&tmp).await;

            let get = Request::builder()
                .uri(format!("/contracts/{}", UNKNOWN_ID))
                .body(Body::empty())
                .unwrap();
            let (status, json) = send(&app, get).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(json["error"]["code"], "not_found");

            let delete = Request::builder()
                .method("DELETE")
                .uri(format!("/contracts/{}", UNKNOWN_ID))
                .body(Body::empty())
                .unwrap();
            let (status, _) = send(&app, delete).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_delete_removes_contract() {
            let tmp = TempDir::new().unwrap();
            let (app, ctx) = test_app(&tmp).await;
            let id = upload(&app).await;

            let delete = Request::builder()
                .method("DELETE")
                .uri(format!("/contracts/{}", id))
                .body(Body::empty())
                .unwrap();
            let (status, json) = send(&app, delete).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["deleted"], true);
            assert!(!ctx.registry.contract_exists(&id));
            assert_eq!(ctx.store.count(Some(&id)).await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_date_question_answered_from_entities() {
            let tmp = TempDir::new().unwrap();
            let (app, _) = test_app(&tmp).await;
            let id = upload(&app).await;

            let (status, json) = send(
                &app,
                post_json(
                    &format!("/contracts/{}/ask", id),
                    serde_json::json!({ "question": "When was this signed?" }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{}", json);
            assert_eq!(json["answered_from"], "entities");
            assert!(!json["message_id"].as_str().unwrap().is_empty());
            assert!(json["answer"]
                .as_str()
                .unwrap()
                .contains("March 3, 2024 (found on page 1)"));
            assert_eq!(json["sources"].as_array().unwrap().len(), 0);
        }

        #[tokio::test]
        async fn test_blank_question_is_400() {
            let tmp = TempDir::new().unwrap();
            let (app, _) = test_app(&tmp).await;
            let id = upload(&app).await;

            let (status, json) = send(
                &app,
                post_json(
                    &format!("/contracts/{}/ask", id),
                    serde_json::json!({ "question": "   " }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"]["code"], "bad_request");
        }

        #[tokio::test]
        async fn test_feedback_appends_line() {
            let tmp = TempDir::new().unwrap();
            let (app, ctx) = test_app(&tmp).await;

            let (status, json) = send(
                &app,
                post_json(
                    "/feedback",
                    serde_json::json!({
                        "message_id": "m-42",
                        "type": "positive",
                        "question": "Who are the parties?",
                        "answer": "Acme and Globex",
                        "context": "[Page 1]\nAcme"
                    }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["status"], "recorded");

            let log = std::fs::read_to_string(ctx.config.data.feedback_log()).unwrap();
            let lines: Vec<serde_json::Value> = log
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect();
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0]["message_id"], "m-42");
            assert_eq!(lines[0]["type"], "positive");
        }
    }
}
