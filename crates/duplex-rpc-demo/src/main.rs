//! # Duplex-RPC Demo
//!
//! Runs an acceptor and an initiator in one process:
//!
//! ```text
//! Initiator                                   Acceptor
//!    │ ── Hello1("Brian") ───────────────────►  "hello Brian"
//!    │ ── Hello2() ──────────────────────────►
//!    │ ◄──────────────────────── GetName() ──   (callback)
//!    │ ── "Rohan" ───────────────────────────►  "hello Rohan"
//!    │ ── Add(10, 301) ──────────────────────►  311
//!    │ ── Test({"Member":"HELP"}) ───────────►  "help"
//!    │ ── Missing() ─────────────────────────►  Unknown method 'Missing'
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use duplex_rpc::{Acceptor, Initiator, RpcConfig, RpcProcessor};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "duplex-rpc-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the acceptor binds to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port the acceptor binds to
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Call timeout in milliseconds
    #[arg(long, default_value = "5000")]
    call_timeout: u64,

    /// Propagate full error diagnostics to the caller
    #[arg(long)]
    verbose_errors: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct TestClass {
    #[serde(rename = "Member")]
    member: String,
}

/// Handlers every accepted session exposes
fn register_server_methods(session: &RpcProcessor) -> Result<(), duplex_rpc::RpcError> {
    session.on("Hello1", |name: String| async move {
        Ok::<_, anyhow::Error>(format!("hello {name}"))
    })?;

    let conn = session.clone();
    session.on("Hello2", move || {
        let conn = conn.clone();
        async move {
            let name: String = conn.call("GetName", ()).await?;
            Ok::<_, anyhow::Error>(format!("hello {name}"))
        }
    })?;

    session.on_sync("Add", |num1: i32, num2: i32| Ok::<_, anyhow::Error>(num1 + num2))?;

    session.on_sync("Test", |o: TestClass| {
        Ok::<_, anyhow::Error>(o.member.to_lowercase())
    })?;

    Ok(())
}

async fn run(args: &Args) -> Result<()> {
    let config = RpcConfig::default()
        .with_call_timeout(Duration::from_millis(args.call_timeout))
        .with_verbose_errors(args.verbose_errors);

    let acceptor = Acceptor::bind(
        (args.host.as_str(), args.port),
        config.clone(),
        |session| {
            if let Err(e) = register_server_methods(session) {
                tracing::error!(error = %e, "Failed to register demo methods");
            }
        },
    )
    .await
    .context("failed to start acceptor")?;

    let client = Initiator::new(config);
    client
        .processor()
        .on_sync("GetName", || Ok::<_, anyhow::Error>("Rohan"))?;
    client.processor().on_error(|e| tracing::warn!(error = %e, "Client session error"));

    client
        .connect(&acceptor.url())
        .await
        .context("failed to connect to acceptor")?;

    let rpc = client.processor();

    let hello1: String = rpc.call("Hello1", ("Brian",)).await?;
    println!("Hello1: {hello1}");

    let hello2: String = rpc.call("Hello2", ()).await?;
    println!("Hello2: {hello2}");

    let sum: i32 = rpc.call("Add", (10, 301)).await?;
    println!("Add: {sum}");

    let test: String = rpc
        .call(
            "Test",
            (TestClass {
                member: "HELP".to_string(),
            },),
        )
        .await?;
    println!("Test: {test}");

    match rpc.call::<_, ()>("Missing", ()).await {
        Ok(()) => println!("Missing: unexpected success"),
        Err(e) => println!("Missing: {e}"),
    }

    client.close(Some("demo finished")).await;
    acceptor.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(host = %args.host, port = args.port, "Starting duplex-rpc demo");
    run(&args).await?;
    info!("Demo finished");
    Ok(())
}
