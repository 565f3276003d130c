use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eventmap_api::{router, AppState};
use eventmap_common::Config;
use eventmap_store::{EventRepository, FilterComposer, MemoryEventRepository, PgEventRepository};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("eventmap=info".parse()?))
        .init();

    let config = Config::from_env()?;

    let repo: Arc<dyn EventRepository> = match (&config.database_url, &config.seed_path) {
        (Some(url), _) => {
            let pg = PgEventRepository::connect(url).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        (None, Some(path)) => Arc::new(MemoryEventRepository::from_json_file(path).await?),
        (None, None) => {
            warn!("Neither DATABASE_URL nor EVENTMAP_SEED_PATH is set, serving an empty store");
            Arc::new(MemoryEventRepository::new())
        }
    };

    let state = Arc::new(AppState {
        repo,
        composer: FilterComposer::from_utc_offset_hours(config.utc_offset_hours),
    });
    let app = router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Event map API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
