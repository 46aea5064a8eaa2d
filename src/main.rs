use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use audit_ledger::api;
use audit_ledger::config::{AppConfig, EXPENSIVE_DIFFICULTY};
use audit_ledger::ledger;

// Build the one ledger instance for this process
fn initialize_ledger(config: &AppConfig) -> Result<ledger::Ledger, ledger::LedgerError> {
    if config.difficulty > EXPENSIVE_DIFFICULTY {
        warn!(
            "Difficulty {} needs about 16^{} hashes per append; expect slow writes",
            config.difficulty, config.difficulty
        );
    }

    match config.mining_timeout {
        Some(timeout) => info!("Mining timeout set to {:?}", timeout),
        None => info!("Mining is unbounded"),
    }

    let ledger = ledger::Ledger::with_difficulty(config.difficulty)?;
    Ok(ledger.with_mining_budget(config.mining_budget()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_info,
        api::handlers::get_chain,
        api::handlers::add_audit_log,
        api::handlers::get_audit_trail,
        api::handlers::verify_chain,
        api::handlers::add_data_hash,
        api::handlers::create_commitment,
        api::handlers::verify_commitment,
        api::handlers::add_encrypted_audit
    ),
    components(
        schemas(
            ledger::Block,
            ledger::ChainInfo,
            ledger::ChainFault,
            ledger::FaultKind,
            ledger::AuditEntry,
            ledger::IntegrityRecord,
            ledger::EncryptedAudit,
            ledger::HashCommitment,
            api::schema::ChainResponse,
            api::schema::BlockResponse,
            api::schema::AuditTrailResponse,
            api::schema::VerifyResponse,
            api::schema::CommitmentResponse,
            api::schema::VerifyCommitmentRequest,
            api::schema::VerifyCommitmentResponse
        )
    ),
    tags(
        (name = "ledger", description = "Audit ledger API endpoints")
    ),
    info(
        title = "Audit Ledger API",
        version = "1.0.0",
        description = "Tamper-evident audit logging on a hash-chained ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load()?;
    let ledger = web::Data::new(initialize_ledger(&config)?);

    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi())
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
