pub mod auth;
pub mod books;

use std::sync::Arc;

use anyhow::Context;
use libris_authz::jwt::JwtKeys;
use libris_db::DocumentStore;
use libris_kernel::{settings::Settings, ModuleRegistry};

use crate::images::{ImageStore, LocalImageStore};
use auth::{AccountService, AuthModule};
use books::{BooksModule, CatalogService};

/// Build the shared resources and register every module, auth first.
pub async fn register_all(registry: &mut ModuleRegistry, settings: &Settings) -> anyhow::Result<()> {
    let store = match &settings.database.data_dir {
        Some(dir) => DocumentStore::persistent(dir),
        None => DocumentStore::in_memory(),
    };
    let jwt = Arc::new(JwtKeys::new(
        &settings.auth.jwt_secret,
        settings.auth.token_ttl_hours,
    ));
    let images: Arc<dyn ImageStore> = Arc::new(LocalImageStore::from_settings(settings).await?);

    let users = store
        .collection("users")
        .await
        .context("failed to open users collection")?;
    let accounts = Arc::new(AccountService::new(users, Arc::clone(&jwt)));
    registry.register(Arc::new(AuthModule::new(accounts)))?;

    let books = store
        .collection("books")
        .await
        .context("failed to open books collection")?;
    let catalog = Arc::new(CatalogService::new(
        books,
        images,
        settings.catalog.top_rated_limit,
    ));
    registry.register(Arc::new(BooksModule::new(
        catalog,
        jwt,
        settings.images.max_bytes,
    )))?;

    Ok(())
}
