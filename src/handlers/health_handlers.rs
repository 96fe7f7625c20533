//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and blob I/O

use crate::services::AppState;
use crate::store::{BlobStore, TMP_PREFIX, bytes_stream, collect_stream, join_key};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Performs a best-effort write/read/delete round trip through the blob
///    store under the staging namespace.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    // 1) SQLite check
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.meta.pool())
        .await
    {
        Ok(v) if v == 1 => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // 2) Blob round-trip check against a probe key
    let probe_key = join_key(TMP_PREFIX, &format!(".readyz-{}", Uuid::new_v4()));
    let blob_check = match state
        .blobs
        .put(&probe_key, None, bytes_stream(Bytes::from_static(b"readyz")))
        .await
    {
        Ok(_) => match state.blobs.get(&probe_key).await {
            Ok(got) => match collect_stream(got.stream, 1024).await {
                Ok(bytes) if bytes.as_ref() == b"readyz" => {
                    match state.blobs.delete(&probe_key).await {
                        Ok(_) => (true, None::<String>),
                        Err(e) => (true, Some(format!("could not remove probe object: {}", e))),
                    }
                }
                Ok(_) => {
                    let _ = state.blobs.delete(&probe_key).await;
                    (false, Some("probe content mismatch".to_string()))
                }
                Err(e) => {
                    let _ = state.blobs.delete(&probe_key).await;
                    (false, Some(format!("could not read probe object: {}", e)))
                }
            },
            Err(e) => {
                let _ = state.blobs.delete(&probe_key).await;
                (false, Some(format!("could not open probe object: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write probe object: {}", e))),
    };

    // Build response JSON
    let sqlite_ok = sqlite_check.0;
    let blob_ok = blob_check.0;
    let overall_ok = sqlite_ok && blob_ok;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_ok,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "blobs",
        CheckStatus {
            ok: blob_ok,
            error: blob_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
