use anyhow::Context;
use libris_kernel::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load Libris settings")?;
    libris_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        port = settings.server.port,
        data_dir = ?settings.database.data_dir,
        images = %settings.images.dir.display(),
        "libris bootstrap starting"
    );

    libris_app::run(settings).await
}
