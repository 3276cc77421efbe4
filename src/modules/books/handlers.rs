use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, FromRef,
        FromRequest, Multipart, Path, Request, State,
    },
    http::{header::CONTENT_TYPE, StatusCode},
    routing::{get, post},
    Json, Router,
};
use libris_authz::jwt::JwtKeys;
use libris_http::{AppError, AppResult, AuthUser};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};

use super::models::{BookPatch, BookView, NewBook};
use super::service::CatalogService;
use crate::images::ImageUpload;

/// Room for multipart boundaries and the text fields next to the image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone, FromRef)]
pub struct BooksState {
    pub catalog: Arc<CatalogService>,
    pub jwt: Arc<JwtKeys>,
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub rating: i64,
}

pub fn router(state: BooksState, max_image_bytes: usize) -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/bestrating", get(best_rated))
        .route(
            "/{id}",
            get(get_book).put(update_book).delete(delete_book),
        )
        .route("/{id}/rating", post(rate_book))
        .layer(DefaultBodyLimit::max(
            max_image_bytes.saturating_add(FORM_OVERHEAD_BYTES),
        ))
        .with_state(state)
}

async fn list_books(State(catalog): State<Arc<CatalogService>>) -> AppResult<Json<Vec<BookView>>> {
    Ok(Json(catalog.list_all().await?))
}

async fn best_rated(State(catalog): State<Arc<CatalogService>>) -> AppResult<Json<Vec<BookView>>> {
    let limit = catalog.top_rated_limit();
    Ok(Json(catalog.get_top_rated(limit).await?))
}

async fn get_book(
    State(catalog): State<Arc<CatalogService>>,
    Path(id): Path<String>,
) -> AppResult<Json<BookView>> {
    Ok(Json(catalog.get_by_id(&id).await?))
}

async fn create_book(
    State(catalog): State<Arc<CatalogService>>,
    user: AuthUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<BookView>)> {
    let form = read_form::<NewBook>(multipart).await?;

    let image = match form.image {
        Some(upload) => Some(catalog.store_image(upload).await?),
        None => None,
    };

    let book = catalog.create(&user.user_id, form.fields, image).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

/// Accepts either a multipart form (optional `image` plus book fields) or a
/// plain JSON patch.
async fn update_book(
    State(catalog): State<Arc<CatalogService>>,
    user: AuthUser,
    Path(id): Path<String>,
    request: Request,
) -> AppResult<Json<BookView>> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let (patch, upload) = if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        let form = read_form::<BookPatch>(multipart).await?;
        (form.fields, form.image)
    } else {
        let Json(patch) = Json::<BookPatch>::from_request(request, &())
            .await
            .map_err(json_rejection)?;
        (patch, None)
    };

    let image = match upload {
        Some(upload) => Some(catalog.store_image(upload).await?),
        None => None,
    };

    Ok(Json(catalog.update(&id, &user.user_id, patch, image).await?))
}

async fn delete_book(
    State(catalog): State<Arc<CatalogService>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    catalog.delete(&id, &user.user_id).await?;
    Ok(Json(json!({ "message": "Book deleted" })))
}

async fn rate_book(
    State(catalog): State<Arc<CatalogService>>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Result<Json<RateRequest>, JsonRejection>,
) -> AppResult<Json<BookView>> {
    let Json(body) = body.map_err(json_rejection)?;
    Ok(Json(catalog.rate(&id, &user.user_id, body.rating).await?))
}

struct BookForm<T> {
    fields: T,
    image: Option<ImageUpload>,
}

/// Read a book form: an `image` file plus either a `book` field holding the
/// JSON document or one text field per attribute.
async fn read_form<T: DeserializeOwned>(mut multipart: Multipart) -> AppResult<BookForm<T>> {
    let mut book_json = None;
    let mut flat = Map::new();
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or("cover").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if !bytes.is_empty() {
                    image = Some(ImageUpload {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
            }
            "book" => book_json = Some(field.text().await.map_err(multipart_error)?),
            _ => {
                let value = field.text().await.map_err(multipart_error)?;
                flat.insert(name, Value::String(value));
            }
        }
    }

    let fields = match book_json {
        Some(json) => serde_json::from_str(&json),
        None => serde_json::from_value(Value::Object(flat)),
    }
    .map_err(payload_error)?;

    Ok(BookForm { fields, image })
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large(err.body_text())
    } else {
        AppError::bad_request(err.body_text())
    }
}

fn payload_error(err: serde_json::Error) -> AppError {
    if err.is_data() {
        AppError::validation(
            vec![json!({ "field": "book", "message": err.to_string() })],
            "invalid book payload",
        )
    } else {
        AppError::bad_request(format!("book must be a JSON object: {err}"))
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::JsonDataError(e) => AppError::validation(
            vec![json!({ "message": e.body_text() })],
            "invalid request body",
        ),
        other if other.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            AppError::payload_too_large(other.body_text())
        }
        other => AppError::bad_request(other.body_text()),
    }
}
