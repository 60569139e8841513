use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/blocks", web::post().to(handlers::submit_block))
            .route("/blocks/{height}", web::get().to(handlers::get_block))
            .route("/blocks/hash/{hash}", web::get().to(handlers::get_block_by_hash))
            .route("/balance/{address}", web::get().to(handlers::get_balance))
            .route("/wallet/new", web::post().to(handlers::create_wallet))
            .route("/validate", web::get().to(handlers::validate_chain))
    );
}
