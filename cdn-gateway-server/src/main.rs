use blockscout_service_launcher::{database, launcher::ConfigSettings};
use cdn_gateway_server::Settings;
use migration::Migrator;

const SERVICE_NAME: &str = "cdn_gateway";

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let settings = Settings::build().expect("failed to read config");

    blockscout_service_launcher::tracing::init_logs(
        SERVICE_NAME,
        &settings.tracing,
        &settings.jaeger,
    )?;

    // Migrations run under an advisory lock so concurrently booting
    // processes apply the schema at most once; the launcher's own migration
    // pass stays disabled.
    let mut database_settings = settings.database.clone();
    database_settings.run_migrations = false;
    let db = database::initialize_postgres::<Migrator>(&database_settings).await?;
    migration::apply_with_lock(&db).await?;

    cdn_gateway_server::run_worker(settings, db).await
}
