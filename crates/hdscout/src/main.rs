mod cli;

use std::path::Path;
use std::sync::Arc;

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::secp256k1::Secp256k1;
use clap::Parser;
use eyre::{eyre, WrapErr};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use hdscout_core::backend::{Blockchain, HttpBackend};
use hdscout_core::database::TxDatabase;
use hdscout_core::types::HDNodeProjection;
use hdscout_core::{ChainDiscovery, ChainEvent, ChainState, CoreError, DiscoveryStatus, Engine};

/// On-disk account snapshot: the shared transaction registry plus one
/// discovery state per chain.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountState {
    database: Vec<hdscout_core::types::TxInfo>,
    external: ChainState,
    change: ChainState,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let xpub: Xpub = args
        .xpub
        .parse()
        .map_err(|err| eyre!("invalid xpub: {err}"))?;

    // Connect to the backend and verify it answers before deriving anything.
    let backend = Arc::new(
        HttpBackend::connect(
            &args.backend_url,
            args.backend_user.as_deref(),
            args.backend_pass.as_deref(),
            args.requests_per_second,
        )
        .context("build backend client")?,
    );

    let tip_hash = backend.lookup_best_block_hash().await.map_err(|err| {
        eyre!(format_connect_error(&args.backend_url, &err.to_string()))
            .wrap_err("while attempting to connect to the backend")
    })?;
    let tip = backend
        .lookup_block_index(&tip_hash)
        .await
        .context("resolve chain tip")?;
    tracing::info!(height = %tip.height, hash = %tip.hash, "connected to backend");

    // Restore persisted state, discarding inconsistent blobs.
    let restored = load_state(args.state_file.as_deref());
    let (database, external_state, change_state) = match restored {
        Some(state) => match TxDatabase::restore(state.database) {
            Ok(database) => (database, Some(state.external), Some(state.change)),
            Err(err) => {
                tracing::warn!(error = %err, "inconsistent database blob; starting cold");
                (TxDatabase::new(), None, None)
            }
        },
        None => (TxDatabase::new(), None, None),
    };
    let database = Arc::new(Mutex::new(database));

    let engine = Engine::new(Arc::clone(&backend) as Arc<dyn Blockchain>)
        .with_gap_length(args.gap_length)
        .with_chunk_size(args.chunk_size);

    // Chain nodes under the account key: m/0 external, m/1 change.
    let secp = Secp256k1::verification_only();
    let external_node =
        HDNodeProjection::from_xpub(&xpub.derive_pub(&secp, &[ChildNumber::from_normal_idx(0)?])?);
    let change_node =
        HDNodeProjection::from_xpub(&xpub.derive_pub(&secp, &[ChildNumber::from_normal_idx(1)?])?);

    let (mut external, external_events) = discover(
        &engine,
        &external_node,
        args.address_version,
        Arc::clone(&database),
        external_state,
        "external",
    )
    .await?;
    let (mut change, change_events) = discover(
        &engine,
        &change_node,
        args.address_version,
        Arc::clone(&database),
        change_state,
        "change",
    )
    .await?;

    let _external_printer = spawn_printer("external", external_events);
    let _change_printer = spawn_printer("change", change_events);

    if args.watch {
        tokio::select! {
            _ = async { tokio::join!(external.run(), change.run()); } => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; persisting state");
            }
        }
    } else {
        tokio::join!(external.run_until_settled(), change.run_until_settled());
    }

    if let Some(path) = &args.state_file {
        let state = AccountState {
            database: database.lock().await.store(),
            external: external.store(),
            change: change.store(),
        };
        let encoded = serde_json::to_vec_pretty(&state).context("encode state")?;
        std::fs::write(path, encoded).context("write state file")?;
        tracing::info!(path = %path.display(), "state persisted");
    }

    if external.status() == DiscoveryStatus::Failed || change.status() == DiscoveryStatus::Failed {
        return Err(eyre!("discovery failed; see error events above"));
    }
    Ok(())
}

/// Build one chain's discovery, falling back to a cold start when the
/// restored blobs turn out inconsistent.
async fn discover(
    engine: &Engine,
    node: &HDNodeProjection,
    version: u32,
    database: Arc<Mutex<TxDatabase>>,
    restored: Option<ChainState>,
    label: &'static str,
) -> eyre::Result<(ChainDiscovery, mpsc::UnboundedReceiver<ChainEvent>)> {
    match engine
        .discover_chain(node, version, Arc::clone(&database), restored)
        .await
    {
        Ok(pair) => Ok(pair),
        Err(CoreError::Serialization(err)) => {
            tracing::warn!(chain = label, error = %err, "inconsistent chain blobs; starting cold");
            engine
                .discover_chain(node, version, database, None)
                .await
                .map_err(|err| eyre!("build {label} discovery: {err}"))
        }
        Err(err) => Err(eyre!("build {label} discovery: {err}")),
    }
}

fn spawn_printer(
    label: &'static str,
    mut events: mpsc::UnboundedReceiver<ChainEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ChainEvent::Transaction(info) => {
                    tracing::info!(
                        chain = label,
                        id = %info.id,
                        height = info.block_height.map(|h| *h),
                        "transaction"
                    );
                }
                ChainEvent::History(history) => {
                    tracing::info!(
                        chain = label,
                        next_index = history.next_index(),
                        "history settled"
                    );
                }
                ChainEvent::Error(err) => {
                    tracing::error!(chain = label, error = %err, "discovery failed");
                }
            }
        }
    })
}

fn load_state(path: Option<&Path>) -> Option<AccountState> {
    let path = path?;
    if !path.exists() {
        return None;
    }
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "state file unreadable; starting cold");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(state) => {
            tracing::info!(path = %path.display(), "state restored");
            Some(state)
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "state file malformed; starting cold");
            None
        }
    }
}

fn format_connect_error(url: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("could not reach backend endpoint `{url}`"),
        format!("backend error: {source_error}"),
    ];

    if source_error.contains("Could not resolve host") || source_error.contains("dns error") {
        lines.push(
            "hint: hostname resolution failed; verify the endpoint hostname and your DNS/network"
                .into(),
        );
    } else if source_error.contains("tls")
        || source_error.contains("certificate")
        || source_error.contains("SSL")
    {
        lines.push(
            "hint: TLS handshake failed; verify certificate trust and that the endpoint uses HTTPS"
                .into(),
        );
    } else if source_error.contains("401") || source_error.contains("403") {
        lines.push("hint: authentication failed; verify --backend-user/--backend-pass".into());
    } else if source_error.contains("error sending request for url") {
        lines.push(
            "hint: request could not be sent; verify URL format, network access, and endpoint reachability"
                .into(),
        );
    }

    lines.join("\n")
}
