use actix_web::{middleware::Compress, web, App, HttpServer};
use actix_cors::Cors;
use utoipa_swagger_ui::SwaggerUi;

use anonboard::openapi::ApiDoc;
use anonboard::repo::StoreSlot;
use anonboard::secret::Argon2Hasher;
use anonboard::settings::Settings;
use anonboard::{config, AppState, BoardService, SecurityHeaders};
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use tracing_actix_web::TracingLogger;

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable at least one of the `inmem-store` / `postgres-store` features");

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping message board server");
    let settings = Settings::from_env();

    let hasher = Arc::new(Argon2Hasher::new(settings.hash_cost)?);
    let store = StoreSlot::empty();
    start_store(&settings, &store)?;
    let service = BoardService::new(store, hasher);

    let openapi = ApiDoc::openapi();
    let frontend_url = settings.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontends
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .max_age(3600);
            if let Some(front) = frontend_url.as_deref() {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .app_data(web::Data::new(AppState { service: service.clone() }))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((settings.bind_addr.as_str(), settings.port))?;

    info!("Listening on http://{}:{}", settings.bind_addr, settings.port);

    server.run().await?;
    Ok(())
}

/// Postgres connects in the background; until it is up every request is
/// answered with "database unreachable".
#[cfg(feature = "postgres-store")]
fn start_store(settings: &Settings, slot: &StoreSlot) -> anyhow::Result<()> {
    use anonboard::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;
    use tracing::error;

    let Some(db_url) = settings.database_url.clone() else {
        anyhow::bail!("DATABASE_URL must be set for postgres-store");
    };
    let slot = slot.clone();
    actix_web::rt::spawn(async move {
        let pool = match PgPoolOptions::new().max_connections(5).connect(&db_url).await {
            Ok(pool) => pool,
            Err(e) => {
                error!("could not connect to Postgres: {e}");
                return;
            }
        };
        let repo = PgRepo::new(pool);
        if let Err(e) = repo.ensure_schema().await {
            error!("could not prepare Postgres tables: {e}");
            return;
        }
        slot.fill(Arc::new(repo));
        info!("Using Postgres repository backend");
    });
    Ok(())
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
fn start_store(settings: &Settings, slot: &StoreSlot) -> anyhow::Result<()> {
    use anonboard::repo::inmem::InMemRepo;

    let repo = match settings.data_dir.as_deref() {
        Some(dir) => InMemRepo::open(dir),
        None => InMemRepo::new(),
    };
    slot.fill(Arc::new(repo));
    info!("Using in-memory repository backend");
    Ok(())
}
