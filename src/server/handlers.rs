use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use crate::batch::{run_batch, BatchError, BatchOptions, BatchSummary, ColumnMapping, Table};
use crate::geocode::{GeocodeRequest, GeocodeResult, RawPinCode};
use crate::map;

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        let status = match e {
            BatchError::MissingColumn { .. } | BatchError::EmptyTable => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BatchError::Csv(_) => StatusCode::BAD_REQUEST,
            BatchError::Io(_) | BatchError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, e.to_string())
    }
}

fn not_found(name: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("No results for upload '{}'", name))
}

// ─── POST /api/uploads ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct UploadQuery {
    pub name: Option<String>,
    pub address_column: String,
    pub pin_column: String,
    pub state: Option<String>,
    pub max_records: Option<usize>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<String>,
    pub summary: BatchSummary,
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let start = Instant::now();
    let name = params
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("upload.csv")
        .to_string();

    let table = Table::from_reader(body.as_ref(), b',')?;
    let columns = ColumnMapping {
        address: params.address_column,
        pin_code: params.pin_column,
    };
    let options = BatchOptions {
        state: params.state,
        max_records: params.max_records,
    };

    let resolver = Arc::clone(&state.resolver);
    let upload_name = name.clone();
    let report = tokio::task::spawn_blocking(move || {
        let resolver = resolver.lock().unwrap_or_else(PoisonError::into_inner);
        run_batch(&resolver, &table, &columns, &options, |p| {
            log::info!(
                "[{}] {}/{}: {}",
                upload_name,
                p.index + 1,
                p.total,
                p.address.chars().take(50).collect::<String>()
            );
        })
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

    let summary = report.summary.clone();
    let (replaced, uploaded_at) = {
        let mut results = state.results();
        let replaced = results.store(&name, report);
        let uploaded_at = results.get(&name).map(|c| c.uploaded_at).unwrap_or_else(Utc::now);
        (replaced, uploaded_at)
    };

    log::info!(
        "POST /api/uploads name={} -> {}/{} geocoded ({:.1}ms)",
        name,
        summary.succeeded,
        summary.total,
        start.elapsed().as_secs_f64() * 1000.0,
    );

    Ok(Json(UploadResponse {
        name,
        uploaded_at,
        replaced,
        summary,
    }))
}

// ─── GET /api/uploads/{name} ─────────────────────────────────────

pub async fn get_upload(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let cached = state.results().get(&name).ok_or_else(|| not_found(&name))?;
    Ok(Json(cached.report.as_ref()).into_response())
}

// ─── GET /api/uploads/{name}/results.csv ─────────────────────────

pub async fn download_csv(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let cached = state.results().get(&name).ok_or_else(|| not_found(&name))?;
    let body = cached.report.to_csv_string()?;
    let disposition = format!("attachment; filename=\"geocoded_{}\"", csv_file_name(&name));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Upload name reduced to a safe `*.csv` file name.
fn csv_file_name(name: &str) -> String {
    let stem: String = name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}.csv", if stem.is_empty() { "results" } else { stem.as_str() })
}

// ─── GET /api/uploads/{name}/map.geojson ─────────────────────────

pub async fn map_layer(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let cached = state.results().get(&name).ok_or_else(|| not_found(&name))?;
    let layer = map::feature_collection(&cached.report, &state.providers);
    Ok((
        [(header::CONTENT_TYPE, "application/geo+json")],
        layer.to_string(),
    )
        .into_response())
}

// ─── DELETE /api/uploads/{name} ──────────────────────────────────

pub async fn delete_upload(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.results().invalidate(&name) {
        log::info!("DELETE /api/uploads/{}", name);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&name))
    }
}

// ─── GET /api/resolve ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub address: Option<String>,
    pub pin: Option<String>,
    pub state: Option<String>,
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResolveQuery>,
) -> Result<Json<GeocodeResult>, ApiError> {
    let start = Instant::now();
    let request = GeocodeRequest::new(
        params.address.unwrap_or_default(),
        RawPinCode::from(params.pin),
    )
    .with_state(params.state);

    let resolver = Arc::clone(&state.resolver);
    let query = request.clone();
    let result = tokio::task::spawn_blocking(move || {
        let resolver = resolver.lock().unwrap_or_else(PoisonError::into_inner);
        resolver.resolve(&query)
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    log::info!(
        "GET /api/resolve address={} -> {} via {} ({:.1}ms)",
        request.raw_address,
        result.outcome.status_label(),
        result.provider_name,
        start.elapsed().as_secs_f64() * 1000.0,
    );

    Ok(Json(result))
}
