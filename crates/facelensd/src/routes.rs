use crate::engine::EngineHandle;
use crate::error::{ApiError, Result};
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use facelens_core::gallery::display_name;
use facelens_core::{enroll_face, imageio, Analysis, Gallery};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Multipart field carrying the upload for `/analyze_image`.
const IMAGE_FIELD: &str = "image_file";

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub gallery: Gallery,
    /// Model names reported by `/status`.
    pub models: Vec<String>,
}

/// Every endpoint, served both at the root and under `/api`.
pub fn routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/analyze_image", post(handler_analyze_image))
        .route("/analyze_image_stream", post(handler_analyze_image_stream))
        .route("/add_face", post(handler_add_face))
        .route("/recognize_faces", post(handler_recognize_faces))
        .route("/identities", get(handler_identities))
        .route("/status", get(handler_status));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .with_state(state)
}

/// Routes plus the body limit, CORS and request tracing layers.
pub fn app(state: AppState, max_body_bytes: usize) -> Router {
    routes(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

async fn handler_analyze_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some(IMAGE_FIELD) {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("cannot read {IMAGE_FIELD}: {e}")))?;
            image = Some(data);
            break;
        }
    }

    match image {
        Some(data) if !data.is_empty() => analyze(&state, data).await,
        Some(_) => Err(ApiError::bad_request("Uploaded image file is empty.")),
        None => Err(ApiError::bad_request("No image file provided.")),
    }
}

async fn handler_analyze_image_stream(
    State(state): State<AppState>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<Value>> {
    let body = body.map_err(|e| ApiError::Rejected(e.status(), e.body_text()))?;
    if body.is_empty() {
        return Err(ApiError::bad_request("No image data in request body."));
    }
    analyze(&state, body).await
}

async fn analyze(state: &AppState, image: Bytes) -> Result<Json<Value>> {
    let Analysis {
        faces,
        processed_image,
    } = state.engine.analyze(image.to_vec()).await?;

    Ok(Json(json!({
        "faces": faces,
        "processed_image": imageio::encode_base64(&processed_image),
        "original_image_b64": imageio::encode_base64(&image),
    })))
}

#[derive(Deserialize)]
struct AddFaceRequest {
    name: Option<String>,
    location: Option<Vec<f64>>,
    original_image_b64: Option<String>,
}

async fn handler_add_face(
    State(state): State<AppState>,
    body: std::result::Result<Json<AddFaceRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    const MISSING: &str = "Missing data (name, location, original_image_b64 required).";

    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let (Some(name), Some(location), Some(image_b64)) = (req.name, req.location, req.original_image_b64)
    else {
        return Err(ApiError::bad_request(MISSING));
    };
    let name = name.trim().to_string();
    let location: [i32; 4] = match location.as_slice() {
        [top, right, bottom, left] => [*top, *right, *bottom, *left].map(|v| v.round() as i32),
        _ => return Err(ApiError::bad_request("location must be [top, right, bottom, left].")),
    };
    if name.is_empty() || image_b64.is_empty() {
        return Err(ApiError::bad_request(MISSING));
    }

    let gallery = state.gallery.clone();
    let stored_name = name.clone();
    tokio::task::spawn_blocking(move || -> std::result::Result<(), facelens_core::EnrollError> {
        let bytes = imageio::decode_base64(&image_b64)?;
        enroll_face(&gallery, &stored_name, &bytes, Some(location))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(json!({ "message": format!("Saved '{name}' successfully.") })))
}

async fn handler_recognize_faces(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    const MALFORMED: &str = "Request must be JSON with a \"faces\" array.";

    let Json(body) = body.map_err(|_| ApiError::bad_request(MALFORMED))?;
    let faces: Vec<String> = body
        .get("faces")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::bad_request(MALFORMED))?
        .iter()
        // Non-string entries fail to decode and come back unknown.
        .map(|v| v.as_str().unwrap_or_default().to_string())
        .collect();

    let records = state.engine.recognize_batch(faces).await?;
    Ok(Json(json!({ "faces": records })))
}

async fn handler_identities(State(state): State<AppState>) -> Result<Json<Value>> {
    let gallery = state.gallery.clone();
    let identities = tokio::task::spawn_blocking(move || gallery.identities())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let identities: Vec<Value> = identities
        .iter()
        .map(|identity| {
            json!({
                "name": identity.name,
                "display_name": display_name(&identity.name),
                "references": identity.references.len(),
            })
        })
        .collect();
    Ok(Json(json!({ "identities": identities })))
}

async fn handler_status(State(state): State<AppState>) -> Result<Json<Value>> {
    let gallery = state.gallery.clone();
    let populated = tokio::task::spawn_blocking(move || gallery.is_populated())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "models": state.models,
        "workers": state.engine.workers(),
        "gallery_populated": populated,
    })))
}
