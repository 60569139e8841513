use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;

use config::NodeConfig;

// Open the ledger, creating genesis for a fresh data directory
fn initialize_blockchain(config: &NodeConfig) -> anyhow::Result<blockchain::Blockchain> {
    let receiver = match &config.genesis_receiver {
        Some(address) => address.clone(),
        None => genesis_wallet().address().clone(),
    };

    std::fs::create_dir_all(&config.data_dir).unwrap_or_else(|e| {
        warn!("Failed to create data directory: {}", e);
    });

    match blockchain::Blockchain::with_storage(&config.data_dir, &receiver, config.params) {
        Ok(chain) => {
            info!("Loaded ledger from storage at {}", config.data_dir.display());
            Ok(chain)
        }
        Err(err) => {
            warn!("Failed to load ledger from storage: {}", err);
            warn!("Creating in-memory ledger instead");

            blockchain::Blockchain::in_memory(&receiver, config.params)
                .context("Failed to create in-memory ledger")
        }
    }
}

// Create a wallet to receive the genesis reward when none is configured
fn genesis_wallet() -> blockchain::Wallet {
    let wallet = blockchain::Wallet::new();
    info!("Created genesis wallet with address: {}", wallet.address());
    info!("Genesis wallet private key: {}", hex::encode(wallet.export_secret_key()));
    info!("The genesis wallet is only funded if the ledger is new");
    wallet
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_block,
        api::handlers::get_block_by_hash,
        api::handlers::get_balance,
        api::handlers::create_wallet,
        api::handlers::submit_block,
        api::handlers::validate_chain
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            blockchain::ChainReport,
            blockchain::BlockReport,
            blockchain::CheckResult,
            blockchain::Check,
            api::handlers::ChainResponse,
            api::handlers::BalanceResponse,
            api::handlers::WalletResponse,
            api::handlers::TransferRequest,
            api::handlers::SubmitBlockRequest,
            api::handlers::SubmitBlockResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger API endpoints")
    ),
    info(
        title = "Snapshot Ledger API",
        version = "0.1.0",
        description = "A single-node hash-linked ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_env().context("Invalid node configuration")?;

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(config.log_level.as_str()));

    let blockchain = web::Data::new(Mutex::new(initialize_blockchain(&config)?));

    info!("Starting HTTP server at http://{}:{}", config.bind, config.port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.bind.as_str(), config.port))
    .with_context(|| format!("Failed to bind {}:{}", config.bind, config.port))?
    .run()
    .await
    .context("HTTP server failed")
}
