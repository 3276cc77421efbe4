pub mod error;
pub mod handlers;
pub mod models;
pub mod rating;
pub mod service;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use libris_authz::jwt::JwtKeys;
use libris_kernel::{InitCtx, Module};
use serde_json::json;

pub use error::{CatalogError, CatalogResult};
pub use handlers::BooksState;
pub use service::CatalogService;

/// Book listings, covers and ratings, mounted at `/api/books`.
pub struct BooksModule {
    state: BooksState,
    max_image_bytes: usize,
}

impl BooksModule {
    pub fn new(catalog: Arc<CatalogService>, jwt: Arc<JwtKeys>, max_image_bytes: usize) -> Self {
        Self {
            state: BooksState { catalog, jwt },
            max_image_bytes,
        }
    }

    pub fn catalog(&self) -> &Arc<CatalogService> {
        &self.state.catalog
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let books = self.state.catalog.count().await;
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            books,
            top_rated_limit = self.state.catalog.top_rated_limit(),
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        handlers::router(self.state.clone(), self.max_image_bytes)
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi_fragment())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.state.catalog.flush_releases().await;
        tracing::info!(module = self.name(), "pending image releases drained");
        Ok(())
    }
}

fn error_response(description: &str) -> serde_json::Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    })
}

fn book_response(description: &str) -> serde_json::Value {
    json!({
        "description": description,
        "content": {
            "application/json": { "schema": { "$ref": "#/components/schemas/Book" } }
        }
    })
}

fn book_list_response(description: &str) -> serde_json::Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "type": "array", "items": { "$ref": "#/components/schemas/Book" } }
            }
        }
    })
}

fn openapi_fragment() -> serde_json::Value {
    let id_param = json!([{
        "name": "id",
        "in": "path",
        "required": true,
        "schema": { "type": "string" }
    }]);
    let book_form = json!({
        "multipart/form-data": {
            "schema": {
                "type": "object",
                "properties": {
                    "image": { "type": "string", "format": "binary" },
                    "book": {
                        "type": "string",
                        "description": "JSON document with title, author, genre and year"
                    }
                }
            }
        }
    });

    json!({
        "paths": {
            "/": {
                "get": {
                    "summary": "List every book",
                    "tags": ["Books"],
                    "responses": { "200": book_list_response("All books in insertion order") }
                },
                "post": {
                    "summary": "Create a book with its cover image",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "requestBody": { "required": true, "content": book_form },
                    "responses": {
                        "201": book_response("Created book"),
                        "400": error_response("Missing or unsupported image"),
                        "401": error_response("Missing or invalid token"),
                        "413": error_response("Image too large"),
                        "422": error_response("Invalid book fields")
                    }
                }
            },
            "/bestrating": {
                "get": {
                    "summary": "Best-rated books",
                    "tags": ["Books"],
                    "responses": { "200": book_list_response("Books by average rating, best first") }
                }
            },
            "/{id}": {
                "get": {
                    "summary": "Get a book",
                    "tags": ["Books"],
                    "parameters": id_param,
                    "responses": {
                        "200": book_response("The book"),
                        "404": error_response("Unknown book")
                    }
                },
                "put": {
                    "summary": "Update a book you own",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "parameters": id_param,
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": { "schema": { "$ref": "#/components/schemas/BookPatch" } },
                            "multipart/form-data": book_form["multipart/form-data"]
                        }
                    },
                    "responses": {
                        "200": book_response("Updated book"),
                        "403": error_response("Not the owner"),
                        "404": error_response("Unknown book"),
                        "422": error_response("Invalid book fields")
                    }
                },
                "delete": {
                    "summary": "Delete a book you own",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "parameters": id_param,
                    "responses": {
                        "200": { "description": "Deleted" },
                        "403": error_response("Not the owner"),
                        "404": error_response("Unknown book")
                    }
                }
            },
            "/{id}/rating": {
                "post": {
                    "summary": "Rate a book once",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "parameters": id_param,
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "properties": {
                                        "rating": { "type": "integer", "minimum": 1, "maximum": 5 }
                                    },
                                    "required": ["rating"]
                                }
                            }
                        }
                    },
                    "responses": {
                        "200": book_response("Book with the new rating"),
                        "404": error_response("Unknown book"),
                        "409": error_response("Already rated by this user"),
                        "422": error_response("Grade outside 1-5")
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "Rating": {
                    "type": "object",
                    "properties": {
                        "userId": { "type": "string" },
                        "grade": { "type": "integer", "minimum": 1, "maximum": 5 }
                    },
                    "required": ["userId", "grade"]
                },
                "Book": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "ownerId": { "type": "string" },
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "year": { "type": "integer" },
                        "genre": { "type": "string" },
                        "imageUrl": { "type": "string" },
                        "averageRating": { "type": "number" },
                        "ratings": { "type": "array", "items": { "$ref": "#/components/schemas/Rating" } }
                    },
                    "required": [
                        "id", "ownerId", "title", "author", "year", "genre",
                        "imageUrl", "averageRating", "ratings"
                    ]
                },
                "BookPatch": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "genre": { "type": "string" },
                        "year": { "type": "integer" }
                    }
                }
            }
        }
    })
}
