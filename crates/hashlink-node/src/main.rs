mod constants;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, ValueEnum};
use constants::{DEFAULT_DATA_DIR, DEFAULT_LISTEN, SLED_DIR, SNAPSHOT_FILE};
use hashlink_core::{
    constants::POW_TARGET_DIFFICULTY, Amount, Balance, Block, Ledger, LedgerConfig, MineError,
    RejectReason, SnapshotStore, Transaction,
};
use hashlink_storage::{FileStore, SledStore};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// Newline-separated JSON snapshot file
    File,
    /// sled database
    Sled,
}

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Directory holding the snapshot
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Snapshot backend
    #[arg(long, value_enum, default_value_t = Backend::File)]
    backend: Backend,

    /// Identity credited with mining rewards; mining is disabled without one
    #[arg(long)]
    hosting_id: Option<String>,

    /// Leading zero bits required of a proof
    #[arg(long, default_value_t = POW_TARGET_DIFFICULTY)]
    difficulty: u32,

    /// Search proofs on all cores
    #[arg(long)]
    parallel: bool,
}

type SharedLedger = Arc<Ledger<dyn SnapshotStore>>;

#[derive(Clone)]
struct AppState {
    ledger: SharedLedger,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct ChainView {
    length: usize,
    chain: Vec<Block>,
}

#[derive(Serialize)]
struct Verified {
    valid: bool,
}

#[derive(Serialize)]
struct BalanceView {
    identity: String,
    balance: Balance,
}

#[derive(Deserialize)]
struct TxIn {
    sender: String,
    recipient: String,
    signature: String,
    amount: Amount,
}

#[derive(Serialize)]
struct Accepted<T> {
    #[serde(flatten)]
    value: T,
    saved: bool,
}

#[derive(Serialize)]
struct TxAccepted {
    transaction: Transaction,
}

#[derive(Serialize)]
struct BlockMined {
    block: Block,
}

enum ApiError {
    Rejected(RejectReason),
    Mine(MineError),
    NoHostingIdentity,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Rejected(reason) => (StatusCode::BAD_REQUEST, reason.to_string()),
            ApiError::Mine(err @ (MineError::NoHostingIdentity | MineError::Cancelled)) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::Mine(err @ MineError::Exhausted) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Mine(err) => (StatusCode::CONFLICT, err.to_string()),
            ApiError::NoHostingIdentity => (
                StatusCode::NOT_FOUND,
                "no hosting identity configured".to_string(),
            ),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn chain(State(state): State<AppState>) -> Json<ChainView> {
    let chain = state.ledger.chain();
    Json(ChainView {
        length: chain.len(),
        chain,
    })
}

async fn verify_chain(State(state): State<AppState>) -> Json<Verified> {
    Json(Verified {
        valid: state.ledger.verify(),
    })
}

async fn pending(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.ledger.pending_transactions())
}

async fn add_transaction(
    State(state): State<AppState>,
    Json(tx): Json<TxIn>,
) -> Result<(StatusCode, Json<Accepted<TxAccepted>>), ApiError> {
    // Admission waits on the writer lock, which a running mine holds.
    let ledger = state.ledger.clone();
    let committed = tokio::task::spawn_blocking(move || {
        ledger.add_transaction(&tx.sender, &tx.recipient, &tx.signature, tx.amount)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(ApiError::Rejected)?;
    let saved = committed.is_saved();
    Ok((
        StatusCode::CREATED,
        Json(Accepted {
            value: TxAccepted {
                transaction: committed.value,
            },
            saved,
        }),
    ))
}

async fn mine(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Accepted<BlockMined>>), ApiError> {
    let ledger = state.ledger.clone();
    let committed = tokio::task::spawn_blocking(move || ledger.mine_block())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::Mine)?;
    let saved = committed.is_saved();
    Ok((
        StatusCode::CREATED,
        Json(Accepted {
            value: BlockMined {
                block: committed.value,
            },
            saved,
        }),
    ))
}

async fn save(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let ledger = state.ledger.clone();
    tokio::task::spawn_blocking(move || ledger.save())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn host_balance(State(state): State<AppState>) -> Result<Json<BalanceView>, ApiError> {
    let identity = state
        .ledger
        .hosting_identity()
        .ok_or(ApiError::NoHostingIdentity)?
        .to_string();
    let balance = state.ledger.get_balance(&identity);
    Ok(Json(BalanceView { identity, balance }))
}

async fn balance(State(state): State<AppState>, Path(identity): Path<String>) -> Json<BalanceView> {
    let balance = state.ledger.get_balance(&identity);
    Json(BalanceView { identity, balance })
}

fn open_store(args: &Args) -> anyhow::Result<Arc<dyn SnapshotStore>> {
    let store: Arc<dyn SnapshotStore> = match args.backend {
        Backend::File => Arc::new(FileStore::new(args.data_dir.join(SNAPSHOT_FILE))),
        Backend::Sled => Arc::new(SledStore::open(args.data_dir.join(SLED_DIR))?),
    };
    Ok(store)
}

async fn shutdown_signal(ledger: SharedLedger) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
        return;
    }
    info!("shutting down, cancelling any in-flight mining");
    ledger.cancel_mining();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = LedgerConfig {
        difficulty: args.difficulty,
        hosting_identity: args.hosting_id.clone(),
        parallel_mining: args.parallel,
        ..LedgerConfig::default()
    };
    if config.hosting_identity.is_none() {
        warn!("no --hosting-id given, mining is disabled");
    }

    let store = open_store(&args)?;
    let ledger: SharedLedger = Arc::new(Ledger::open(config, store));
    info!(blocks = ledger.block_count(), "ledger ready");

    let state = AppState {
        ledger: ledger.clone(),
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/chain", get(chain))
        .route("/chain/verify", get(verify_chain))
        .route("/transactions", get(pending))
        .route("/transaction", post(add_transaction))
        .route("/mine", post(mine))
        .route("/save", post(save))
        .route("/balance", get(host_balance))
        .route("/balance/{identity}", get(balance))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = args.listen.parse()?;
    info!("hashlink-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(ledger))
        .await?;
    Ok(())
}
