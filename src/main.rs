use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pilgrim_mesh::bridge::{Bridge, BridgeConfig};
use pilgrim_mesh::ledger::{Account, LedgerHooks, MemoryLedger, Transaction};
use pilgrim_mesh::peer::PeerId;
use pilgrim_mesh::protocol::Payload;
use pilgrim_mesh::storage::LedgerStore;
use pilgrim_mesh::transport::{MemoryHub, TcpServer, TcpTransportConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "mesh-node")]
#[command(version, about = "Peer-sync bridge for the mainBank, investment and customer ledgers")]
struct Cli {
    /// Log filter (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one node over TCP until Ctrl-C
    Serve {
        /// Which node this is (mainBank, investment, customer)
        #[arg(short, long)]
        node: PeerId,

        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep the ledger in a sled database here instead of in memory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Listen address (default: this node's configured endpoint)
        #[arg(short, long)]
        bind: Option<String>,

        /// Override syncIntervalMs
        #[arg(long)]
        sync_interval_ms: Option<u64>,

        /// Override adapterTimeoutMs
        #[arg(long)]
        adapter_timeout_ms: Option<u64>,
    },

    /// Run all three nodes in-process and walk through an offline send and
    /// a conflicting balance edit
    Simulate,
}

fn setup_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match cli.command {
        Commands::Serve {
            node,
            config,
            data_dir,
            bind,
            sync_interval_ms,
            adapter_timeout_ms,
        } => {
            let mut config = match config {
                Some(path) => BridgeConfig::load(&path)?,
                None => BridgeConfig::default(),
            };
            if let Some(ms) = sync_interval_ms {
                config.sync_interval_ms = ms;
            }
            if let Some(ms) = adapter_timeout_ms {
                config.adapter_timeout_ms = ms;
            }
            serve(node, config, data_dir, bind).await
        }
        Commands::Simulate => simulate().await,
    }
}

async fn serve(
    node: PeerId,
    config: BridgeConfig,
    data_dir: Option<PathBuf>,
    bind: Option<String>,
) -> Result<()> {
    let store = match &data_dir {
        Some(dir) => Some(Arc::new(
            LedgerStore::open(dir).with_context(|| format!("opening {}", dir.display()))?,
        )),
        None => None,
    };
    let hooks: Arc<dyn LedgerHooks> = match &store {
        Some(store) => store.clone(),
        None => Arc::new(MemoryLedger::new()),
    };

    let bind = match bind {
        Some(addr) => addr,
        None => config
            .endpoint(node)
            .socket_addr()
            .context("this node's endpoint is not a TCP address; pass --bind")?,
    };

    let bridge = Bridge::builder(node)
        .with_config(config)
        .with_hooks(hooks)
        .with_tcp()
        .build()?;
    bridge.subscribe(|event| info!(event = event.name(), detail = ?event, "Bridge event"));

    let server = TcpServer::bind(
        &bind,
        bridge.handler(),
        TcpTransportConfig::default().max_frame_bytes,
    )
    .await?;
    info!(node = %node, addr = %server.local_addr(), "Serving");

    let connected = bridge.init().await;
    info!(node = %node, connected = ?connected, "Initial probe done");

    tokio::signal::ctrl_c().await?;
    info!(node = %node, "Shutting down");

    bridge.shutdown();
    server.shutdown();
    if let Some(store) = store {
        store.flush()?;
    }
    println!("{}", serde_json::to_string_pretty(&bridge.status())?);
    Ok(())
}

async fn simulate() -> Result<()> {
    let hub = MemoryHub::new();
    let config = BridgeConfig::in_process()
        .with_adapter_timeout_ms(500)
        .with_retry_base_delay_ms(200)
        .with_sync_interval_ms(1000);

    let mut nodes = Vec::new();
    for peer in PeerId::ALL {
        let ledger = Arc::new(MemoryLedger::new());
        let bridge = Bridge::builder(peer)
            .with_config(config.clone())
            .with_hooks(ledger.clone())
            .with_hub(hub.clone())
            .build()?;
        nodes.push((bridge, ledger));
    }
    let (main_bank, main_ledger) = &nodes[0];
    let (investment, investment_ledger) = &nodes[1];
    let (customer, customer_ledger) = &nodes[2];

    // Offline send: customer is unreachable, the transaction waits in the queue
    hub.set_reachable(PeerId::Customer, false);
    main_bank.connect_all().await;

    let tx = Transaction::new("42")
        .with_field("from", "alice")
        .with_field("to", "bob")
        .with_field("amount", 250);
    let response = main_bank
        .send_message(PeerId::Customer, Payload::Transaction(tx))
        .await;
    println!(
        "send to offline customer -> response: {}, queued: {}",
        response.is_some(),
        main_bank.queue_len(PeerId::Customer)
    );

    hub.set_reachable(PeerId::Customer, true);
    main_bank.connect_peer(PeerId::Customer).await;
    println!(
        "customer back -> queued: {}, customer has tx 42: {}",
        main_bank.queue_len(PeerId::Customer),
        customer_ledger.transaction("42").is_some()
    );

    // Conflicting edits: the value that arrives last by sync response wins
    main_ledger.put_account(Account::new("alice").with_field("coinBalance", 10.0));
    investment_ledger.put_account(Account::new("alice").with_field("coinBalance", 20.0));

    main_bank.connect_peer(PeerId::Investment).await;
    investment.connect_peer(PeerId::MainBank).await;
    println!(
        "alice after sync -> mainBank: {:?}, investment: {:?}",
        main_ledger.account("alice").and_then(|a| a.coin_balance()),
        investment_ledger.account("alice").and_then(|a| a.coin_balance())
    );

    customer.connect_all().await;
    for (bridge, _) in &nodes {
        println!("{}", serde_json::to_string_pretty(&bridge.status())?);
        bridge.shutdown();
    }
    Ok(())
}
