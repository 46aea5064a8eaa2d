use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// JSON bodies that fail to decode are answered with a 400 error body.
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/blockchain")
            .app_data(web::JsonConfig::default().error_handler(handlers::json_error_handler))
            .route("/info", web::get().to(handlers::get_info))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/audit", web::post().to(handlers::add_audit_log))
            .route("/audit-trail", web::get().to(handlers::get_audit_trail))
            .route("/verify", web::get().to(handlers::verify_chain))
            .route("/data-hash", web::post().to(handlers::add_data_hash))
            .route("/zk-proof", web::post().to(handlers::create_commitment))
            .route("/zk-proof/verify", web::post().to(handlers::verify_commitment))
            .route("/encrypted-audit", web::post().to(handlers::add_encrypted_audit))
    );
}
