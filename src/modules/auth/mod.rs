pub mod handlers;
pub mod models;
pub mod service;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use libris_kernel::{InitCtx, Module};
use serde_json::json;

pub use service::{AccountError, AccountService};

/// Sign-up and log-in, mounted at `/api/auth`.
pub struct AuthModule {
    accounts: Arc<AccountService>,
}

impl AuthModule {
    pub fn new(accounts: Arc<AccountService>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl Module for AuthModule {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let users = self.accounts.count().await;
        tracing::info!(
            module = self.name(),
            users,
            token_ttl_hours = ctx.settings.auth.token_ttl_hours,
            "auth module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        handlers::router(Arc::clone(&self.accounts))
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let credentials = json!({
            "required": true,
            "content": {
                "application/json": { "schema": { "$ref": "#/components/schemas/Credentials" } }
            }
        });
        let error = |description: &str| {
            json!({
                "description": description,
                "content": {
                    "application/json": { "schema": { "$ref": "#/components/schemas/ErrorResponse" } }
                }
            })
        };

        Some(json!({
            "paths": {
                "/signup": {
                    "post": {
                        "summary": "Create an account",
                        "tags": ["Auth"],
                        "requestBody": credentials,
                        "responses": {
                            "201": { "description": "Account created" },
                            "409": error("Email already registered"),
                            "422": error("Malformed email or weak password")
                        }
                    }
                },
                "/login": {
                    "post": {
                        "summary": "Exchange credentials for a bearer token",
                        "tags": ["Auth"],
                        "requestBody": credentials,
                        "responses": {
                            "200": {
                                "description": "Token issued",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/LoginResponse" }
                                    }
                                }
                            },
                            "401": error("Unknown email or wrong password")
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Credentials": {
                        "type": "object",
                        "properties": {
                            "email": { "type": "string", "format": "email" },
                            "password": { "type": "string", "format": "password" }
                        },
                        "required": ["email", "password"]
                    },
                    "LoginResponse": {
                        "type": "object",
                        "properties": {
                            "userId": { "type": "string" },
                            "token": { "type": "string" }
                        },
                        "required": ["userId", "token"]
                    }
                }
            }
        }))
    }
}
