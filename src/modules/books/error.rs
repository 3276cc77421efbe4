use libris_authz::Forbidden;
use libris_db::DbError;
use libris_http::AppError;
use thiserror::Error;

use super::models::FieldError;
use super::rating::RatingError;
use crate::images::ImageError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid book")]
    Validation(Vec<FieldError>),

    #[error("book '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Forbidden(#[from] Forbidden),

    #[error("user '{0}' has already rated this book")]
    DuplicateRating(String),

    #[error("grade must be between 1 and 5, got {0}")]
    InvalidGrade(i64),

    #[error("a cover image is required")]
    MissingImage,

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("book storage failed: {0}")]
    Storage(#[from] DbError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

impl From<RatingError> for CatalogError {
    fn from(err: RatingError) -> Self {
        match err {
            RatingError::InvalidGrade(grade) => CatalogError::InvalidGrade(grade),
            RatingError::DuplicateRating(user_id) => CatalogError::DuplicateRating(user_id),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(fields) => {
                let details = fields
                    .iter()
                    .map(|f| serde_json::json!({ "field": f.field, "message": f.message }))
                    .collect();
                AppError::validation(details, "invalid book")
            }
            CatalogError::InvalidGrade(grade) => AppError::validation(
                vec![serde_json::json!({ "field": "rating", "message": "must be between 1 and 5" })],
                format!("grade must be between 1 and 5, got {grade}"),
            ),
            CatalogError::NotFound(_) => AppError::not_found(err.to_string()),
            CatalogError::Forbidden(_) => {
                AppError::forbidden("only the owner of a book may change it")
            }
            CatalogError::DuplicateRating(_) => AppError::conflict(err.to_string()),
            CatalogError::MissingImage => AppError::bad_request(err.to_string()),
            CatalogError::Image(ImageError::TooLarge { .. }) => {
                AppError::payload_too_large(err.to_string())
            }
            CatalogError::Image(ref image) if image.is_client_error() => {
                AppError::bad_request(err.to_string())
            }
            CatalogError::Image(image) => AppError::Internal(image.into()),
            CatalogError::Storage(db) => AppError::Internal(db.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (
                CatalogError::Validation(vec![]),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (CatalogError::InvalidGrade(7), StatusCode::UNPROCESSABLE_ENTITY),
            (CatalogError::NotFound("b1".into()), StatusCode::NOT_FOUND),
            (
                CatalogError::Forbidden(Forbidden {
                    identity: "u2".into(),
                }),
                StatusCode::FORBIDDEN,
            ),
            (
                CatalogError::DuplicateRating("u1".into()),
                StatusCode::CONFLICT,
            ),
            (CatalogError::MissingImage, StatusCode::BAD_REQUEST),
            (
                CatalogError::Image(ImageError::UnsupportedType("image/gif".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                CatalogError::Image(ImageError::TooLarge { size: 10, limit: 5 }),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                CatalogError::Storage(DbError::DuplicateId("b1".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }
}
