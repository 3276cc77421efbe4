use libris_authz::Owned;
use libris_db::Document;
use serde::{Deserialize, Serialize};

/// One user's grade for a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub user_id: String,
    pub grade: u8,
}

/// Stored book record.
///
/// `image_locator` is whatever the image store returned (a file name for the
/// local store); it is turned into a URL only when the book is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub year: i32,
    pub image_locator: String,
    #[serde(default)]
    pub image_delete_handle: Option<String>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
    #[serde(default)]
    pub average_rating: f64,
}

impl Document for Book {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Owned for Book {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

/// Book as returned by every read endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub author: String,
    pub year: i32,
    pub genre: String,
    pub image_url: String,
    pub average_rating: f64,
    pub ratings: Vec<Rating>,
}

/// A rejected input field, reported in the `details` of a 422 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Multipart text fields arrive as strings, JSON bodies usually as numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum YearInput {
    Number(i64),
    Text(String),
}

impl YearInput {
    fn parse(&self) -> Result<i32, FieldError> {
        let value = match self {
            YearInput::Number(n) => Some(*n),
            YearInput::Text(s) => s.trim().parse::<i64>().ok(),
        };

        match value.and_then(|v| i32::try_from(v).ok()) {
            Some(year) if year > 0 => Ok(year),
            _ => Err(FieldError::new("year", "must be a positive integer")),
        }
    }
}

/// Client-side rating entry sent along with a new book. Only the creator's
/// own entry is used, as an initial rating.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingInput {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub grade: Option<i64>,
}

/// Body of a create request. Server-owned attributes a client may echo back
/// (`id`, `userId`, `averageRating`, `imageUrl`) are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub year: Option<YearInput>,
    #[serde(default)]
    pub ratings: Vec<RatingInput>,
}

/// Validated fields of a new book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookFields {
    pub title: String,
    pub author: String,
    pub genre: String,
    pub year: i32,
}

impl NewBook {
    /// Check every field and report all failures together.
    pub fn validate(&self) -> Result<BookFields, Vec<FieldError>> {
        let mut errors = Vec::new();

        let title = required_text("title", self.title.as_deref(), &mut errors);
        let author = required_text("author", self.author.as_deref(), &mut errors);
        let genre = required_text("genre", self.genre.as_deref(), &mut errors);
        let year = match &self.year {
            Some(year) => year.parse().map_err(|e| errors.push(e)).ok(),
            None => {
                errors.push(FieldError::new("year", "is required"));
                None
            }
        };

        match (title, author, genre, year) {
            (Some(title), Some(author), Some(genre), Some(year)) if errors.is_empty() => {
                Ok(BookFields {
                    title,
                    author,
                    genre,
                    year,
                })
            }
            _ => Err(errors),
        }
    }

    /// Grade the creator gave in the same request, if any. A grade of 0 is
    /// how clients say "not rated".
    pub fn initial_grade(&self, owner_id: &str) -> Option<i64> {
        self.ratings
            .iter()
            .find(|r| r.user_id.as_deref().map_or(true, |id| id == owner_id))
            .and_then(|r| r.grade)
            .filter(|grade| *grade != 0)
    }
}

/// Partial update. Absent fields are left untouched; unknown fields are
/// rejected when deserializing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BookPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub year: Option<YearInput>,
}

/// A patch whose provided fields have all been checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
}

impl BookPatch {
    pub fn validate(&self) -> Result<ValidPatch, Vec<FieldError>> {
        let mut errors = Vec::new();

        let patch = ValidPatch {
            title: optional_text("title", self.title.as_deref(), &mut errors),
            author: optional_text("author", self.author.as_deref(), &mut errors),
            genre: optional_text("genre", self.genre.as_deref(), &mut errors),
            year: self
                .year
                .as_ref()
                .and_then(|y| y.parse().map_err(|e| errors.push(e)).ok()),
        };

        if errors.is_empty() {
            Ok(patch)
        } else {
            Err(errors)
        }
    }
}

impl ValidPatch {
    pub fn apply(&self, book: &mut Book) {
        if let Some(title) = &self.title {
            book.title = title.clone();
        }
        if let Some(author) = &self.author {
            book.author = author.clone();
        }
        if let Some(genre) = &self.genre {
            book.genre = genre.clone();
        }
        if let Some(year) = self.year {
            book.year = year;
        }
    }
}

fn required_text(
    field: &'static str,
    value: Option<&str>,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        Some(_) => {
            errors.push(FieldError::new(field, "must not be blank"));
            None
        }
        None => {
            errors.push(FieldError::new(field, "is required"));
            None
        }
    }
}

fn optional_text(
    field: &'static str,
    value: Option<&str>,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        errors.push(FieldError::new(field, "must not be blank"));
        return None;
    }
    Some(value.to_string())
}
