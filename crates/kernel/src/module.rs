use async_trait::async_trait;
use axum::Router;

/// Context handed to modules during initialization and start-up
pub struct InitCtx<'a> {
    pub settings: &'a crate::settings::Settings,
}

/// A self-contained slice of the application: routes, docs, and lifecycle hooks
#[async_trait]
pub trait Module: Sync + Send {
    /// Unique name for this module, also used as its URL segment
    fn name(&self) -> &'static str;

    /// Called once during application start-up, before `start`
    async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Axum router for this module's routes.
    /// Routes are mounted under `/api/{module_name}`, so the router must
    /// already carry its own state.
    fn routes(&self) -> Router {
        Router::new()
    }

    /// OpenAPI fragment (`paths` + `components.schemas`) merged into the
    /// service-wide document
    fn openapi(&self) -> Option<serde_json::Value> {
        None
    }

    /// Start background work. Called after every module is initialized
    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release resources. Called during shutdown, in reverse registration order
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
