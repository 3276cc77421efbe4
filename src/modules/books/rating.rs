//! Folding a new grade into a book's ratings.

use thiserror::Error;

use super::models::{Book, Rating};

pub const MIN_GRADE: i64 = 1;
pub const MAX_GRADE: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RatingError {
    #[error("grade must be between {MIN_GRADE} and {MAX_GRADE}, got {0}")]
    InvalidGrade(i64),

    #[error("user '{0}' has already rated this book")]
    DuplicateRating(String),
}

/// Append `rater_id`'s grade and recompute the average.
///
/// The grade is checked before the duplicate rule. On error `book` is left
/// untouched.
pub fn add_rating(book: &mut Book, rater_id: &str, grade: i64) -> Result<(), RatingError> {
    let grade = u8::try_from(grade)
        .ok()
        .filter(|g| (MIN_GRADE..=MAX_GRADE).contains(&i64::from(*g)))
        .ok_or(RatingError::InvalidGrade(grade))?;

    if book.ratings.iter().any(|r| r.user_id == rater_id) {
        return Err(RatingError::DuplicateRating(rater_id.to_string()));
    }

    book.ratings.push(Rating {
        user_id: rater_id.to_string(),
        grade,
    });
    book.average_rating = average(&book.ratings);
    Ok(())
}

/// Mean grade rounded half-up to two decimals, or 0 when there are no
/// ratings. Rounding is done on integer hundredths so exact halves go up.
pub fn average(ratings: &[Rating]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let sum: u64 = ratings.iter().map(|r| u64::from(r.grade)).sum();
    let count = ratings.len() as u64;
    let hundredths = (sum * 200 + count) / (2 * count);
    hundredths as f64 / 100.0
}

/// Two-decimal rounding for averages read back from storage.
pub fn round2(value: f64) -> f64 {
    ((value + f64::EPSILON) * 100.0).round() / 100.0
}
