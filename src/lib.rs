//! Libris application library
//!
//! Book catalog modules (listings, cover images, ratings) and account
//! sign-up/log-in, wired onto the Libris kernel and HTTP facade.

pub mod images;
pub mod modules;

use anyhow::Context;
use libris_kernel::{settings::Settings, InitCtx, ModuleRegistry};

/// Registry with every application module registered but not yet initialized.
pub async fn build_registry(settings: &Settings) -> anyhow::Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry, settings)
        .await
        .context("failed to register modules")?;
    Ok(registry)
}

/// Initialize and start every module, serve HTTP until shutdown, then stop
/// the modules in reverse order.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let registry = build_registry(&settings).await?;
    let ctx = InitCtx {
        settings: &settings,
    };

    registry.init_all(&ctx).await?;
    registry.start_all(&ctx).await?;

    let served = libris_http::start_server(&registry, &settings).await;
    let stopped = registry.stop_all().await;

    served?;
    stopped
}
