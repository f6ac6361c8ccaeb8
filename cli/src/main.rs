//! `blobdvm`: list servers, upload, download, or run a server, all over the
//! BlobDVM Nostr wire protocol.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dvm_core::relay::nostr_adapter::NostrRelayClient;
use dvm_core::relay::RelayClient;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "blobdvm")]
#[command(about = "Content-addressed blob storage over Nostr", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List BlobDVM servers discoverable on the configured relays
    ListServers,
    /// Store a file and print its content hash
    Upload {
        /// Path to the file to upload
        path: PathBuf,
        /// Server public key (hex); if omitted, the first discovered server is used
        #[arg(long)]
        server: Option<String>,
    },
    /// Retrieve a file by its content hash
    Download {
        /// 64-character lowercase hex SHA-256 content hash
        hash: String,
        /// Output path; defaults to the hash itself in the current directory
        #[arg(long)]
        output: Option<PathBuf>,
        /// Server public key (hex); if omitted, the first discovered server is used
        #[arg(long)]
        server: Option<String>,
    },
    /// Run a BlobDVM server
    Serve {
        /// Private key (hex or bech32 nsec) this server signs events with
        #[arg(long, env = "BLOBDVM_PRIVATE_KEY")]
        private_key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "blobdvm=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let result = match cli.command {
        Commands::ListServers => list_servers(&config).await,
        Commands::Upload { path, server } => upload(&config, &path, server).await,
        Commands::Download { hash, output, server } => download(&config, &hash, output, server).await,
        Commands::Serve { private_key } => serve(&config, &private_key).await,
    };

    if let Err(err) = result {
        if let Some(dvm_err) = err.downcast_ref::<dvm_core::error::DvmError>() {
            eprintln!("{}: {dvm_err}", dvm_err.code());
        } else {
            eprintln!("error: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn connected_relay(config: &Config, keys: nostr_sdk::Keys) -> anyhow::Result<Arc<NostrRelayClient>> {
    let client = NostrRelayClient::new(keys);
    client.connect(&config.relays).await?;
    Ok(client)
}

async fn list_servers(config: &Config) -> anyhow::Result<()> {
    let relay = connected_relay(config, config::ephemeral_keys()).await?;
    let servers = dvm_client::discover_servers(relay.as_ref()).await?;

    if servers.is_empty() {
        println!("no servers found");
        return Ok(());
    }

    for server in servers {
        println!(
            "{}  {}  max_file_size={} chunk_size={} retention_hours={}",
            server.pubkey, server.name, server.params.max_file_size, server.params.chunk_size, server.params.retention_hours
        );
    }
    Ok(())
}

async fn resolve_server(relay: &dyn RelayClient, server: Option<String>) -> anyhow::Result<String> {
    if let Some(pubkey) = server {
        return Ok(pubkey);
    }
    let servers = dvm_client::discover_servers(relay).await?;
    servers
        .into_iter()
        .next()
        .map(|s| s.pubkey)
        .ok_or_else(|| anyhow::anyhow!("no BlobDVM servers found on the configured relays"))
}

async fn upload(config: &Config, path: &PathBuf, server: Option<String>) -> anyhow::Result<()> {
    let relay = connected_relay(config, config::ephemeral_keys()).await?;
    let server_pubkey = resolve_server(relay.as_ref(), server).await?;

    let bytes = std::fs::read(path)?;
    let filename = path.file_name().map(|n| n.to_string_lossy().into_owned());

    let response = dvm_client::upload::upload_with_timeout(
        relay.as_ref(),
        &server_pubkey,
        &config.relays,
        &bytes,
        filename,
        std::time::Duration::from_secs(config.response_timeout_secs),
    )
    .await?;
    println!("{}", response.hash);
    Ok(())
}

async fn download(
    config: &Config,
    hash: &str,
    output: Option<PathBuf>,
    server: Option<String>,
) -> anyhow::Result<()> {
    let relay = connected_relay(config, config::ephemeral_keys()).await?;
    let server_pubkey = resolve_server(relay.as_ref(), server).await?;

    let bytes = dvm_client::download::download_with_timeouts(
        relay.as_ref(),
        &server_pubkey,
        &config.relays,
        hash,
        std::time::Duration::from_secs(config.response_timeout_secs),
        dvm_client::download::DEFAULT_CHUNK_TIMEOUT,
    )
    .await?;

    let output = output.unwrap_or_else(|| PathBuf::from(hash));
    std::fs::write(&output, &bytes)?;
    println!("wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

async fn serve(config: &Config, private_key: &str) -> anyhow::Result<()> {
    let keys = config::load_keys(private_key)?;
    let relay = NostrRelayClient::new(keys);
    let pubkey = relay.public_key();

    let engine = Arc::new(dvm_server::ServerEngine::new(
        relay,
        dvm_server::ServerConfig {
            relays: config.relays.clone(),
            retention_secs: config.retention_secs,
            max_file_size: config.max_file_size,
            ..Default::default()
        },
    ));

    tracing::info!(pubkey, "starting BlobDVM server");
    engine.run().await?;
    Ok(())
}
