//! Media service - fabric-facing upload and deletion surface.
//!
//! Multipart reads are suspension points; the image pipeline itself (NSFW
//! detection, EXIF stripping, thumbnails) runs behind the collaborator and
//! is out of scope here.

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{Value, json};

use amora_core::client::{Method, OutboundCall};
use amora_core::envelope::RequestEnvelope;
use amora_core::error::{ApiError, ApiResult};
use amora_core::metrics::metrics_handler;
use amora_core::middleware::{AuthMode, FabricState, standard_stack};

use crate::state::ServiceState;

pub const SERVICE_NAME: &str = "media-service";

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// `POST /media/upload` - multipart upload; metadata goes to the data
/// collaborator, bytes to storage behind it.
async fn upload(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let owner_id = envelope
        .principal
        .user_id()
        .ok_or(ApiError::AuthenticationRequired)?;

    let mut filename = None;
    let mut size = 0usize;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?;
        size = bytes.len();
        if size > MAX_UPLOAD_BYTES {
            return Err(ApiError::Validation("file exceeds upload limit".into()));
        }
    }

    let filename = filename.ok_or_else(|| ApiError::MissingField("file".into()))?;
    if size == 0 {
        return Err(ApiError::Validation("empty upload".into()));
    }

    let result = state
        .data()
        .post(
            "/data/media",
            json!({ "owner_id": owner_id, "filename": filename, "size": size }),
            &envelope,
        )
        .await?
        .into_result()?;

    Ok((StatusCode::CREATED, Json(result)).into_response())
}

/// `GET /media/{file_id}`
async fn get_media(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(file_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let path = format!("/data/media/{file_id}");
    Ok(Json(state.data().get(&path, &envelope).await?.into_result()?))
}

/// `DELETE /media/{file_id}`
async fn delete_media(
    State(state): State<ServiceState>,
    Extension(envelope): Extension<RequestEnvelope>,
    Path(file_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let owner_id = envelope
        .principal
        .user_id()
        .ok_or(ApiError::AuthenticationRequired)?;
    let path = format!("/data/media/{file_id}");
    let call = OutboundCall {
        method: Method::DELETE,
        path: &path,
        query: vec![("owner_id".to_string(), owner_id.to_string())],
        body: None,
        bearer: None,
    };
    state.data().call(call, &envelope).await?.into_result()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

pub fn app(state: ServiceState, fabric: FabricState) -> Router {
    let router = Router::new()
        .route("/media/upload", axum::routing::post(upload))
        .route("/media/{file_id}", get(get_media).delete(delete_media))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
        .with_state(state);

    standard_stack(router, fabric, AuthMode::User, true)
}
