//! Protocol Sniffer Command Line Tool
//!
//! Listens on the configured addresses and logs what every client speaks.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;

// Import our library
use protocol_sniffer::{MultiListener, MatcherChain, VERSION, APP_NAME};
use protocol_sniffer::common::{init_logger, parse_listen_url, Result};
use protocol_sniffer::config::SniffConfig;
use protocol_sniffer::listener::Conn;

/// Protocol Sniffer: identify the protocol of every incoming connection
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Listen URL, network://address (repeatable)
    #[clap(short, long)]
    listen: Vec<String>,

    /// Load configuration from a JSON file
    #[clap(long)]
    config_file: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long)]
    log_level: Option<String>,

    /// Per matcher read deadline in milliseconds
    #[clap(long)]
    match_timeout_ms: Option<u64>,

    /// Print the effective configuration as JSON and exit
    #[clap(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration: defaults < file < environment < command line
    let mut config = SniffConfig::load(args.config_file.as_deref())?;
    if !args.listen.is_empty() {
        config.listen = args.listen.clone();
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(ms) = args.match_timeout_ms {
        config.match_timeout_ms = ms;
    }
    config.validate()?;

    if args.print_config {
        let json = serde_json::to_string_pretty(&config)
            .map_err(|e| protocol_sniffer::SniffError::Config(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    // Initialize logger
    init_logger(&config.log_level);

    info!("Starting {} v{}", APP_NAME, VERSION);

    if config.listen.is_empty() {
        warn!("No listen address configured, use --listen tcp://0.0.0.0:8080");
        return Ok(());
    }

    let config = Arc::new(config);
    let listener = Arc::new(MultiListener::with_config(Arc::clone(&config)));
    for url in &config.listen {
        let (network, addr) = parse_listen_url(url)?;
        let chain = MatcherChain::default_chain(&config);
        let local = listener.add_listen(&network, &addr, chain).await?;
        info!("Sniffing {}://{}", network, local);
    }

    info!("Protocol sniffer ready, press Ctrl+C to stop");

    let accept_loop = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            while let Some(result) = listener.accept().await {
                match result {
                    Ok(conn) => report(conn).await,
                    Err(e) => error!("{}", e),
                }
            }
        })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    listener.close().await?;
    if let Err(e) = accept_loop.await {
        error!("Accept loop failed: {}", e);
    }

    Ok(())
}

/// Log what was found and close the connection
async fn report(mut conn: Conn) {
    let info = conn.sniffed_info();
    let protocols = if info.is_identified() {
        info.protocol_names().join(",")
    } else {
        "unknown".to_string()
    };

    info!(
        "{}://{} peer={} usage={} ext={:?} protocols={}",
        info.network,
        info.addr,
        info.peer.as_deref().unwrap_or("-"),
        info.usage.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string()),
        info.usage_ext,
        protocols
    );
    if let Some(request) = &info.http1_request {
        info!("  http1 {} {} {:?}", request.method(), request.uri(), request.version());
    }
    for (name, value) in &info.http2_fields {
        info!("  http2 {}: {}", name, value);
    }
    for (matcher, reason) in &info.reasons {
        info!("  {} did not match: {}", matcher, reason);
    }

    if let Err(e) = conn.shutdown().await {
        let info = conn.sniffed_info();
        debug!("Failed to shut down connection from {}://{}: {}", info.network, info.addr, e);
    }
}
