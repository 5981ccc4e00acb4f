//! Run the bridge and report what the browser can do.
//!
//! Demonstrates:
//! - Loading a TOML config or falling back to defaults
//! - Starting the bridge on the first free port
//! - Printing the capability report
//! - Navigating through the fallback chain once a tab connects
//!
//! Usage:
//!   cargo run --example serve
//!   cargo run --example serve -- --debug
//!   cargo run --example serve -- --config bridge.toml
//!   cargo run --example serve -- --navigate https://example.com

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use browser_bridge::{Bridge, BridgeConfig, Result};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
struct Args {
    debug: bool,
    config: Option<String>,
    navigate: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = Self::default();
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--debug" => args.debug = true,
                "--config" => args.config = iter.next(),
                "--navigate" => args.navigate = iter.next(),
                _ => {}
            }
        }
        args
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "browser_bridge=debug"
    } else {
        "browser_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<()> {
    println!("=== Browser Bridge ===\n");

    let config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };

    let bridge = Bridge::new(config)?;
    let port = bridge.start().await?;
    println!("[Server] Listening on ws://127.0.0.1:{port}");

    let report = bridge.controller().capability_report().await;
    println!("[Capabilities] {}", report.summary);
    for (method, info) in &report.methods {
        let mark = if info.available { "✓" } else { "✗" };
        println!("        {mark} {method}: {}", info.description);
    }

    if let Some(url) = &args.navigate {
        println!("\n[Navigate] Waiting for a tab to connect...");
        while bridge.service().registry().active_count() == 0 {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        let result = bridge.controller().navigate(url.as_str(), Some(port)).await;
        match result.error {
            None => println!("        ✓ {url} via {}", result.method),
            Some(error) => println!("        ✗ {error}"),
        }
    }

    println!("\nPress Ctrl+C to exit...");
    tokio::signal::ctrl_c().await.ok();

    println!("\n[Shutdown] Flushing and closing connections...");
    bridge.stop().await;

    let stats = bridge.stats();
    println!(
        "        ✓ {} connection(s), {} message(s) seen",
        stats.registry.total_connections, stats.registry.total_messages
    );

    Ok(())
}
