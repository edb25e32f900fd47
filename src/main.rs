// hookrelay: local webhook capture, relay and replay tool.
//
// Subcommands: `listen` (capture server with optional save/forward),
// `replay` (re-deliver a recorded NDJSON stream), `mock` (scripted
// responses from a spec file).

use clap::{Parser, Subcommand};
use hookrelay::config::{
    DEFAULT_FORWARD_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RPS, ForwardConfig, ReplayConfig,
};
use hookrelay::forward::ForwardWorker;
use hookrelay::mock::MockServer;
use hookrelay::recorder::Recorder;
use hookrelay::replay::ReplayEngine;
use hookrelay::server::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "hookrelay",
    version,
    about = "Local webhook capture, relay and replay tool"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the webhook listener on PORT
    Listen {
        port: u16,
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Save captured events to an NDJSON file
        #[arg(long)]
        save: Option<PathBuf>,
        /// Forward captured requests to this URL
        #[arg(long)]
        forward: Option<String>,
        /// Total delivery attempts per forwarded event
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        forward_retries: u32,
        /// Max concurrent forward deliveries
        #[arg(long, default_value_t = DEFAULT_FORWARD_CONCURRENCY)]
        forward_concurrency: usize,
        /// Pretty-print JSON bodies on the console
        #[arg(long)]
        pretty: bool,
        /// Suppress console output except errors
        #[arg(long)]
        quiet: bool,
        /// Exit after N captured events (useful for CI)
        #[arg(long)]
        exit_after: Option<usize>,
    },
    /// Replay saved webhook events
    Replay {
        events_file: PathBuf,
        /// Playback rate multiplier for --once (1.0 = real-time)
        #[arg(long, default_value_t = 1.0)]
        rate: f64,
        /// Preserve the original inter-event timing
        #[arg(long)]
        once: bool,
        /// Target base URL; omit for a dry run
        #[arg(long)]
        target: Option<String>,
        /// Fixed delay between events, in seconds
        #[arg(long, default_value_t = 0.0)]
        delay: f64,
        /// Maximum requests per second
        #[arg(long, default_value_t = DEFAULT_MAX_RPS)]
        max_rps: f64,
    },
    /// Start a mock webhook server with scripted responses
    Mock {
        port: u16,
        /// Mock response specification file (JSON)
        #[arg(long)]
        spec: PathBuf,
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Suppress console output except errors
        #[arg(long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let quiet = matches!(
        &cli.command,
        Command::Listen { quiet: true, .. } | Command::Mock { quiet: true, .. }
    );
    init_tracing(quiet);

    match cli.command {
        Command::Listen {
            port,
            host,
            save,
            forward,
            forward_retries,
            forward_concurrency,
            pretty,
            quiet,
            exit_after,
        } => {
            run_listen(ListenArgs {
                port,
                host,
                save,
                forward,
                forward_retries,
                forward_concurrency,
                pretty,
                quiet,
                exit_after,
            })
            .await;
        }
        Command::Replay {
            events_file,
            rate,
            once,
            target,
            delay,
            max_rps,
        } => {
            run_replay(events_file, rate, once, target, delay, max_rps).await;
        }
        Command::Mock {
            port,
            spec,
            host,
            quiet: _,
        } => {
            run_mock(port, &host, &spec).await;
        }
    }
}

fn init_tracing(quiet: bool) {
    let default_filter = if quiet { "error" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

// ---------------------------------------------------------------------------
// listen
// ---------------------------------------------------------------------------

struct ListenArgs {
    port: u16,
    host: String,
    save: Option<PathBuf>,
    forward: Option<String>,
    forward_retries: u32,
    forward_concurrency: usize,
    pretty: bool,
    quiet: bool,
    exit_after: Option<usize>,
}

async fn run_listen(args: ListenArgs) {
    if args.port == 0 {
        eprintln!("FATAL: port must be between 1 and 65535");
        std::process::exit(1);
    }

    if let Some(save) = &args.save {
        let parent = save.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            if !parent.exists() {
                eprintln!("FATAL: directory does not exist: {}", parent.display());
                std::process::exit(1);
            }
        }
    }

    // Reject bad forwarding parameters before anything is started.
    let forward_config = match &args.forward {
        Some(url) => {
            match ForwardConfig::new(url.clone(), args.forward_retries, args.forward_concurrency) {
                Ok(cfg) => Some(cfg),
                Err(e) => {
                    eprintln!("FATAL: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => None,
    };

    let recorder = Recorder::new(args.save.clone(), args.pretty, args.quiet);

    let mut worker = forward_config.as_ref().map(ForwardWorker::new);
    let forward_handle = worker.as_ref().map(ForwardWorker::handle);
    if let Some(worker) = &mut worker {
        worker.start();
    }

    let (state, exit_rx) = AppState::new(recorder, forward_handle, args.exit_after);
    let router = hookrelay::server::build_router(state);

    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };

    info!(addr = %bind_addr, "hookrelay listening");
    if let Some(save) = &args.save {
        info!(path = %save.display(), "saving events");
    }
    if let Some(cfg) = &forward_config {
        info!(
            url = %cfg.url,
            retries = cfg.max_retries,
            concurrency = cfg.concurrency,
            "forwarding enabled"
        );
    }
    if let Some(n) = args.exit_after {
        info!(events = n, "will exit after capture threshold");
    }

    let serve_result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(exit_rx))
    .await;

    if let Err(e) = serve_result {
        error!(error = %e, "server exited with error");
    }

    // Stop the forward worker; the stop itself is bounded at five seconds.
    if let Some(worker) = &mut worker {
        worker.stop().await;
    }

    info!("shutdown complete");
}

/// Resolves on Ctrl-C, SIGTERM, or the exit-after threshold.
async fn shutdown_signal(mut exit_rx: watch::Receiver<bool>) {
    let exit_after = async move {
        loop {
            if *exit_rx.borrow() {
                return;
            }
            if exit_rx.changed().await.is_err() {
                // Sender dropped; exit-after can no longer fire.
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("shutdown: SIGINT received"),
                    () = exit_after => {}
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown: SIGINT received"),
            _ = sigterm.recv() => info!("shutdown: SIGTERM received"),
            () = exit_after => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown: Ctrl-C received"),
            () = exit_after => {}
        }
    }
}

// ---------------------------------------------------------------------------
// replay
// ---------------------------------------------------------------------------

async fn run_replay(
    events_file: PathBuf,
    rate: f64,
    once: bool,
    target: Option<String>,
    delay: f64,
    max_rps: f64,
) {
    let config = match ReplayConfig::new(events_file, target, rate, delay, once, max_rps) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    let engine = ReplayEngine::new(config);
    match engine.replay().await {
        Ok(summary) => {
            println!(
                "Replay complete: {} events processed ({} delivered, {} failed)",
                summary.total, summary.delivered, summary.failed
            );
        }
        Err(e) => {
            eprintln!("FATAL: replay failed: {e}");
            std::process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// mock
// ---------------------------------------------------------------------------

async fn run_mock(port: u16, host: &str, spec: &std::path::Path) {
    if port == 0 {
        eprintln!("FATAL: port must be between 1 and 65535");
        std::process::exit(1);
    }

    let server = match MockServer::from_file(spec) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("FATAL: failed to load mock spec: {e}");
            std::process::exit(1);
        }
    };

    let bind_addr = format!("{host}:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };

    info!(addr = %bind_addr, spec = %spec.display(), "mock server listening");

    let (_noop_tx, noop_rx) = watch::channel(false);
    let serve_result = axum::serve(listener, server.router())
        .with_graceful_shutdown(shutdown_signal(noop_rx))
        .await;

    if let Err(e) = serve_result {
        error!(error = %e, "mock server exited with error");
    }
    info!("shutdown complete");
}
