use std::sync::{Mutex, MutexGuard};

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::blockchain::storage::StorageError;
use crate::blockchain::{Address, Block, Blockchain, BlockchainError, ChainReport, Wallet};

/// Data structure for the ledger state
pub type BlockchainData = web::Data<Mutex<Blockchain>>;

/// Errors returned by the API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Chain(#[from] BlockchainError),

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Chain(err) => match err {
                BlockchainError::StorageError(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
                BlockchainError::StorageError(_)
                | BlockchainError::AlreadyInitialized
                | BlockchainError::NotInitialized => StatusCode::INTERNAL_SERVER_ERROR,
                BlockchainError::TransactionError(_)
                | BlockchainError::Rejected(_)
                | BlockchainError::InsufficientFunds { .. }
                | BlockchainError::BlockFull { .. } => StatusCode::BAD_REQUEST,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

fn lock(blockchain: &Mutex<Blockchain>) -> Result<MutexGuard<'_, Blockchain>, ApiError> {
    blockchain
        .lock()
        .map_err(|_| ApiError::Internal("Ledger lock poisoned".to_string()))
}

fn parse_address(address: &str) -> Result<Address, ApiError> {
    address
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid address {}: {}", address, e)))
}

fn parse_wallet(private_key: &str) -> Result<Wallet, ApiError> {
    Wallet::from_hex(private_key).map_err(|e| ApiError::BadRequest(format!("Invalid private key: {}", e)))
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The height of the tip
    pub height: u64,

    /// The blocks in the ledger
    pub chain: Vec<Block>,
}

/// Get the full ledger
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Ledger retrieved successfully", body = ChainResponse),
        (status = 500, description = "Storage failure")
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> Result<HttpResponse, ApiError> {
    let chain = lock(&blockchain)?;
    let blocks = chain.get_chain()?;

    Ok(HttpResponse::Ok().json(ChainResponse {
        height: blocks.len() as u64,
        chain: blocks,
    }))
}

/// Get one block by height
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{height}",
    params(("height" = u64, Path, description = "Block height, genesis is 1")),
    responses(
        (status = 200, description = "Block retrieved successfully", body = Block),
        (status = 404, description = "No block at this height")
    )
)]
pub async fn get_block(blockchain: BlockchainData, height: web::Path<u64>) -> Result<HttpResponse, ApiError> {
    let block = lock(&blockchain)?.get_block(height.into_inner())?;
    Ok(HttpResponse::Ok().json(block))
}

/// Get one block by hash
#[utoipa::path(
    get,
    path = "/api/v1/blocks/hash/{hash}",
    params(("hash" = String, Path, description = "Block hash, GENESIS-BLOCK for genesis")),
    responses(
        (status = 200, description = "Block retrieved successfully", body = Block),
        (status = 404, description = "No block with this hash")
    )
)]
pub async fn get_block_by_hash(blockchain: BlockchainData, hash: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let block = lock(&blockchain)?.get_block_by_hash(&hash)?;
    Ok(HttpResponse::Ok().json(block))
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,

    /// Height the balance was resolved at
    pub height: u64,
}

/// Get the balance of an address at the tip
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    params(("address" = String, Path, description = "Base58 address or STORAGE-CHAIN")),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "Invalid address")
    )
)]
pub async fn get_balance(blockchain: BlockchainData, address: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let address = parse_address(&address)?;
    let chain = lock(&blockchain)?;
    let height = chain.height()?;
    let balance = chain.balance_at(&address, height)?;

    Ok(HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
        height,
    }))
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Create a new wallet
///
/// The private key must be stored by the caller
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> HttpResponse {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        private_key: hex::encode(wallet.export_secret_key()),
    })
}

/// One transfer to include in a submitted block
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// The sender's private key (hex encoded)
    pub private_key: String,

    /// The receiver's address
    pub receiver: String,

    pub value: u64,

    /// Amount paid to the storage address
    pub fee: u64,
}

/// Request for the submit block endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitBlockRequest {
    /// The miner's private key (hex encoded), credited with the reward
    pub miner_private_key: String,

    pub transfers: Vec<TransferRequest>,
}

/// Response for the submit block endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SubmitBlockResponse {
    pub message: String,

    /// The committed block
    pub block: Block,
}

/// Build, mine and commit a block
///
/// Signs each transfer, assembles the candidate, adds the storage reward
/// and appends the block once it validates.
#[utoipa::path(
    post,
    path = "/api/v1/blocks",
    request_body = SubmitBlockRequest,
    responses(
        (status = 201, description = "Block committed", body = SubmitBlockResponse),
        (status = 400, description = "Block or transfer rejected"),
        (status = 500, description = "Storage failure")
    )
)]
pub async fn submit_block(
    blockchain: BlockchainData,
    request: web::Json<SubmitBlockRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();

    // Proof-of-work search runs off the async workers
    let block = web::block(move || build_and_submit(&blockchain, request))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(HttpResponse::Created().json(SubmitBlockResponse {
        message: format!("Block {} committed", block.height),
        block,
    }))
}

fn build_and_submit(blockchain: &Mutex<Blockchain>, request: SubmitBlockRequest) -> Result<Block, ApiError> {
    let miner = parse_wallet(&request.miner_private_key)?;
    let mut chain = lock(blockchain)?;

    let mut block = chain.new_block(miner.address().clone())?;
    for transfer in &request.transfers {
        let sender = parse_wallet(&transfer.private_key)?;
        let receiver = parse_address(&transfer.receiver)?;
        let tx = chain.new_transaction(&sender, receiver, transfer.value, transfer.fee)?;
        chain.add_transaction(&mut block, tx)?;
    }

    Ok(chain.submit(&miner, block)?)
}

/// Replay the ledger
///
/// Re-checks every block and reports each check's outcome
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Replay report", body = ChainReport),
        (status = 500, description = "Storage failure")
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> Result<HttpResponse, ApiError> {
    let report = lock(&blockchain)?.replay_and_report()?;

    let failures = report.failures();
    if !failures.is_empty() {
        warn!("Replay found {} failed checks: {:?}", failures.len(), failures);
    }

    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ChainParams;
    use actix_web::{test, App};

    fn test_data(receiver: &Wallet) -> BlockchainData {
        let params = ChainParams::default().with_difficulty(4);
        web::Data::new(Mutex::new(Blockchain::in_memory(receiver.address(), params).unwrap()))
    }

    #[actix_web::test]
    async fn test_submit_and_query() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let data = test_data(&alice);
        let app = test::init_service(App::new().app_data(data.clone()).configure(crate::api::configure_routes)).await;

        let request = SubmitBlockRequest {
            miner_private_key: hex::encode(bob.export_secret_key()),
            transfers: vec![TransferRequest {
                private_key: hex::encode(alice.export_secret_key()),
                receiver: bob.address().0.clone(),
                value: 10,
                fee: 1,
            }],
        };
        let req = test::TestRequest::post().uri("/api/v1/blocks").set_json(&request).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/balance/{}", bob.address()))
            .to_request();
        let body: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.height, 2);
        assert_eq!(body.balance, 11);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let report: ChainReport = test::call_and_read_body_json(&app, req).await;
        assert!(report.is_valid());

        let tip = data.lock().unwrap().last_hash().unwrap();
        let req = test::TestRequest::get().uri(&format!("/api/v1/blocks/hash/{}", tip)).to_request();
        let block: Block = test::call_and_read_body_json(&app, req).await;
        assert_eq!(block.height, 2);
    }

    #[actix_web::test]
    async fn test_rejections_map_to_status_codes() {
        let alice = Wallet::new();
        let data = test_data(&alice);
        let app = test::init_service(App::new().app_data(data.clone()).configure(crate::api::configure_routes)).await;

        let request = SubmitBlockRequest {
            miner_private_key: hex::encode(alice.export_secret_key()),
            transfers: Vec::new(),
        };
        let req = test::TestRequest::post().uri("/api/v1/blocks").set_json(&request).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/v1/blocks/9").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/v1/balance/0OIl").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert_eq!(data.lock().unwrap().height().unwrap(), 1);
    }
}
