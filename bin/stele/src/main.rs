//! The stele execution-layer client binary.
//!
//! Wires the store, staged sync pipeline, engine surface and JSON-RPC
//! routing together. Block input comes from immutable segment files or from
//! engine payloads over the stdio JSON-RPC loop; the P2P network is an
//! external collaborator this binary does not speak to directly.

use alloy_rlp::Decodable;
use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stele_executor::NoopEvm;
use stele_kv::{MemStore, Store};
use stele_primitives::{Block, ChainSpec, Genesis};
use stele_stages::{
    init_genesis, BlockHashStage, BodyStage, Context, ExecutionStage, FinishStage, HeaderStage,
    Pipeline, SenderStage, SnapshotStage, StageId, TxLookupStage,
};
use stele_trie::CommitmentMode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

mod engine;
mod rpc;

use engine::{EngineApi, PayloadBuffer, PayloadStatus};
use rpc::EthApi;

#[derive(Debug, Parser)]
#[command(name = "stele", about = "An Ethereum execution-layer client", version)]
struct Cli {
    /// Data directory for segment files.
    #[arg(long, global = true, default_value = "stele-data")]
    datadir: PathBuf,

    /// Genesis description. The built-in dev genesis applies when omitted.
    #[arg(long, global = true)]
    genesis: Option<PathBuf>,

    /// Chain id for the dev genesis.
    #[arg(long, global = true, default_value_t = 1337)]
    chain_id: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialise the genesis state and print the genesis hash.
    Init,
    /// Sync from segment files, then serve JSON-RPC and engine requests
    /// over stdio, one JSON object per line.
    Node {
        /// Stop syncing at this block instead of the segment tip.
        #[arg(long)]
        target: Option<u64>,
        /// Keep only this many blocks of changesets and receipts.
        #[arg(long)]
        prune_distance: Option<u64>,
        /// Skip the commitment for every block (tests only).
        #[arg(long)]
        no_commitment: bool,
        /// Exit after syncing instead of serving requests.
        #[arg(long)]
        exit_after_sync: bool,
        /// Export the synced chain as segment files on shutdown.
        #[arg(long)]
        export_on_exit: bool,
    },
    /// Unwind all stages to the given block.
    Unwind {
        /// The block to unwind to.
        to: u64,
    },
}

fn load_genesis(cli: &Cli) -> Result<(ChainSpec, Genesis)> {
    let spec = ChainSpec::dev(cli.chain_id);
    let genesis = match &cli.genesis {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading genesis file {}", path.display()))?;
            serde_json::from_str(&raw).context("parsing genesis file")?
        }
        None => Genesis { gas_limit: 30_000_000, base_fee_per_gas: Some(7), ..Default::default() },
    };
    Ok((spec, genesis))
}

fn build_pipeline(
    store: MemStore,
    spec: ChainSpec,
    buffer: PayloadBuffer,
    segments: PathBuf,
    prune_distance: Option<u64>,
    mode: CommitmentMode,
) -> Pipeline<MemStore> {
    let finish = match prune_distance {
        Some(distance) => FinishStage::with_prune_distance(distance),
        None => FinishStage::new(),
    };
    Pipeline::new(store)
        .push(SnapshotStage::new(segments))
        .push(HeaderStage::new(buffer.clone()))
        .push(BlockHashStage::new())
        .push(BodyStage::new(buffer))
        .push(SenderStage::new())
        .push(ExecutionStage::new(spec, NoopEvm, mode))
        .push(TxLookupStage::new())
        .push(finish)
}

/// The highest block covered by the header segments in `dir`, zero when
/// none are present.
fn segment_tip(dir: &std::path::Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let range = stele_kv::segment::SegmentRange::parse_file_name(name.to_str()?)?;
            (range.kind == stele_kv::segment::SegmentKind::Headers).then_some(range.to - 1)
        })
        .max()
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let cli = Cli::parse();
    let (spec, genesis) = load_genesis(&cli)?;
    let store = MemStore::open(&cli.datadir)?;
    let segments = store.segments_dir().expect("store opened at a path");

    match cli.command {
        Command::Init => {
            let sealed = init_genesis(&store, &spec, &genesis, CommitmentMode::FullTrie)?;
            println!("{}", sealed.hash());
        }
        Command::Node { target, prune_distance, no_commitment, exit_after_sync, export_on_exit } => {
            let mode =
                if no_commitment { CommitmentMode::Disabled } else { CommitmentMode::FullTrie };
            init_genesis(&store, &spec, &genesis, mode)?;

            let ctx = Context::new();
            let buffer = PayloadBuffer::new();
            let mut pipeline = build_pipeline(
                store.clone(),
                spec.clone(),
                buffer.clone(),
                segments.clone(),
                prune_distance,
                mode,
            );

            let sync_target = target.unwrap_or_else(|| segment_tip(&segments));
            if sync_target > 0 {
                pipeline.run_to(&ctx, sync_target).await.map_err(|err| anyhow!("{err}"))?;
            }
            let head = pipeline.progress(StageId::FINISH)?;
            info!(target: "node", head, "Sync complete");

            if !exit_after_sync {
                serve(EngineApi::new(pipeline, buffer, ctx), EthApi::new(store.clone(), spec))
                    .await?;
            }
            if export_on_exit {
                let tx = store.tx()?;
                let head = stele_stages::read_progress(&tx, StageId::FINISH)
                    .map_err(|err| anyhow!("{err}"))?;
                stele_stages::export_segments(&tx, &segments, 0, head)
                    .map_err(|err| anyhow!("{err}"))?;
                info!(target: "node", head, "Segments exported");
            }
        }
        Command::Unwind { to } => {
            let ctx = Context::new();
            let buffer = PayloadBuffer::new();
            let mut pipeline = build_pipeline(
                store,
                spec,
                buffer,
                segments,
                None,
                CommitmentMode::FullTrie,
            );
            pipeline.unwind(&ctx, to).await.map_err(|err| anyhow!("{err}"))?;
            println!("unwound to {to}");
        }
    }
    Ok(())
}

/// Serves line-delimited JSON-RPC over stdio: `eth_*` queries route through
/// [EthApi], `engine_*` calls through [EngineApi].
async fn serve(mut engine: EngineApi<MemStore>, eth: EthApi<MemStore>) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();
    info!(target: "node", "Serving JSON-RPC on stdio");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_request(&mut engine, &eth, &line).await;
        stdout.write_all(response.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn handle_request(
    engine: &mut EngineApi<MemStore>,
    eth: &EthApi<MemStore>,
    line: &str,
) -> serde_json::Value {
    let request: serde_json::Value = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => return error_response(serde_json::Value::Null, -32700, &err.to_string()),
    };
    let id = request.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let Some(method) = request.get("method").and_then(serde_json::Value::as_str) else {
        return error_response(id, -32600, "missing method");
    };
    let empty_params = serde_json::json!([]);
    let params = request.get("params").unwrap_or(&empty_params);

    let result = match method {
        "engine_newPayload" => new_payload(engine, params).await,
        "engine_forkchoiceUpdated" => forkchoice_updated(engine, params).await,
        // Block production needs the transaction pool collaborator, which
        // this binary does not carry.
        "engine_getPayload" => Err("payload building is not supported".to_string()),
        _ => eth.dispatch(method, params).map_err(|err| err.to_string()),
    };
    match result {
        Ok(result) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(message) => error_response(id, -32000, &message),
    }
}

async fn new_payload(
    engine: &mut EngineApi<MemStore>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, String> {
    let raw = params
        .get(0)
        .and_then(serde_json::Value::as_str)
        .ok_or("expected RLP-encoded block parameter")?;
    let bytes = alloy_primitives::hex::decode(raw.trim_start_matches("0x"))
        .map_err(|err| err.to_string())?;
    let block = Block::decode(&mut bytes.as_slice()).map_err(|err| err.to_string())?;
    let status = engine.new_payload(block).await.map_err(|err| err.to_string())?;
    Ok(payload_status_json(&status))
}

async fn forkchoice_updated(
    engine: &mut EngineApi<MemStore>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, String> {
    let head = params
        .get(0)
        .and_then(|state| state.get("headBlockHash"))
        .and_then(serde_json::Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .ok_or("expected forkchoice state with headBlockHash")?;
    let status = engine.forkchoice_updated(head).await.map_err(|err| err.to_string())?;
    Ok(serde_json::json!({ "payloadStatus": payload_status_json(&status) }))
}

fn payload_status_json(status: &PayloadStatus) -> serde_json::Value {
    match status {
        PayloadStatus::Valid { latest_valid_hash } => serde_json::json!({
            "status": "VALID",
            "latestValidHash": format!("{latest_valid_hash}"),
        }),
        PayloadStatus::Invalid { validation_error } => serde_json::json!({
            "status": "INVALID",
            "validationError": validation_error,
        }),
        PayloadStatus::Syncing => serde_json::json!({ "status": "SYNCING" }),
    }
}

fn error_response(id: serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}
