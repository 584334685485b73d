//! HTTP receiver (spec §4.4.2): `POST /logs` is the core ingest route; the
//! remaining routes are thin SELECT/registry wrappers, out of core scope but
//! wired up so the binary is runnable end-to-end (SPEC_FULL §4.4).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use logship_model::{LogRecord, PushType, RawFields};
use logship_registry::derive_id;
use logship_store::LogRow;

use crate::Services;

pub fn router(services: Arc<Services>) -> Router {
    Router::new()
        .route("/logs", post(post_log))
        .route("/schemas", post(create_schema).get(list_schemas))
        .route("/schemas/:name", get(schema_id))
        .route("/modules/:schema_id", get(list_modules))
        .route("/logs/:schema/:module", get(logs_by_module))
        .route("/logs/by-schema/:schema_id", get(logs_by_schema_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(services)
}

struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(err: impl std::fmt::Display) -> Self {
        Self(StatusCode::BAD_REQUEST, err.to_string())
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }

    fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, JsonResponse(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

#[derive(Deserialize)]
struct LogRequestBody {
    #[serde(default)]
    schema: String,
    #[serde(default)]
    module: String,
    #[serde(default)]
    output: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    error_info: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    client_ip: String,
    #[serde(default)]
    log_level: String,
    #[serde(default)]
    operator_id: String,
    #[serde(default)]
    operator: String,
    #[serde(default)]
    operator_ip: String,
    #[serde(default)]
    operator_equipment: String,
    #[serde(default)]
    operator_company: String,
    #[serde(default)]
    operator_project: String,
}

async fn post_log(
    State(services): State<Arc<Services>>,
    Json(body): Json<LogRequestBody>,
) -> Result<StatusCode, ApiError> {
    services
        .registry
        .get_or_create_schema(&body.schema)
        .await
        .map_err(ApiError::internal)?;

    let raw = RawFields {
        output: body.output,
        detail: body.detail,
        error_info: body.error_info,
        service: body.service,
        client_ip: body.client_ip,
        client_addr: String::new(),
        log_level: body.log_level,
        operator_id: body.operator_id,
        operator: body.operator,
        operator_ip: body.operator_ip,
        operator_equipment: body.operator_equipment,
        operator_company: body.operator_company,
        operator_project: body.operator_project,
    };

    let record = LogRecord::from_fields(raw, body.schema, body.module, PushType::Http, chrono::Utc::now())
        .map_err(ApiError::bad_request)?;

    services
        .store
        .insert_one(&record)
        .await
        .map_err(ApiError::internal)?;

    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct CreateSchemaBody {
    name: String,
}

#[derive(Serialize)]
struct SchemaIdResponse {
    id: String,
}

async fn create_schema(
    State(services): State<Arc<Services>>,
    Json(body): Json<CreateSchemaBody>,
) -> Result<JsonResponse<SchemaIdResponse>, ApiError> {
    let id = services
        .registry
        .get_or_create_schema(&body.name)
        .await
        .map_err(ApiError::internal)?;
    Ok(JsonResponse(SchemaIdResponse { id }))
}

/// Forward lookup can always be recomputed (spec §3/§4.1 rationale); this
/// does not require the schema to already exist.
async fn schema_id(Path(name): Path<String>) -> JsonResponse<SchemaIdResponse> {
    JsonResponse(SchemaIdResponse {
        id: derive_id(&name),
    })
}

async fn list_schemas(
    State(services): State<Arc<Services>>,
) -> Result<JsonResponse<Vec<String>>, ApiError> {
    let names = services.store.list_databases().await.map_err(ApiError::internal)?;
    Ok(JsonResponse(names))
}

async fn list_modules(
    State(services): State<Arc<Services>>,
    Path(schema_id): Path<String>,
) -> Result<JsonResponse<Vec<String>>, ApiError> {
    let name = resolve_id(&services, &schema_id).await?;
    let modules = services.store.list_modules(&name).await.map_err(ApiError::internal)?;
    Ok(JsonResponse(modules))
}

async fn logs_by_module(
    State(services): State<Arc<Services>>,
    Path((schema, module)): Path<(String, String)>,
) -> Result<JsonResponse<Vec<LogRow>>, ApiError> {
    let rows = services
        .store
        .fetch_logs(&schema, &module)
        .await
        .map_err(ApiError::internal)?;
    Ok(JsonResponse(rows))
}

async fn logs_by_schema_id(
    State(services): State<Arc<Services>>,
    Path(schema_id): Path<String>,
) -> Result<JsonResponse<Vec<LogRow>>, ApiError> {
    let name = resolve_id(&services, &schema_id).await?;
    let rows = services
        .store
        .fetch_logs_by_schema(&name)
        .await
        .map_err(ApiError::internal)?;
    Ok(JsonResponse(rows))
}

async fn resolve_id(services: &Services, schema_id: &str) -> Result<String, ApiError> {
    services
        .registry
        .rebuild_and_wait(schema_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("unknown schema id"))
}
