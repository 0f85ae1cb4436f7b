//! Binary wrapper: picks a transport from `SERVER_TRANSPORT`, wires up the
//! pipeline with the built-in tool catalog, and runs until shutdown.
//!
//! Exit codes (spec §6): 0 on clean shutdown, non-zero on fatal
//! initialization failure.

use pentool_runtime::config::{Config, Transport};
use pentool_runtime::{tools, Pipeline};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Arc::new(Config::from_env());

    // Stdio reserves stdout for the MCP wire protocol; logs must go to
    // stderr in that mode, matching the teacher's `start_mcp_server` setup.
    let writer_is_stderr = matches!(config.server_transport, Transport::Stdio);
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);
    if writer_is_stderr {
        subscriber.with_writer(std::io::stderr).init();
    } else {
        subscriber.init();
    }

    let pipeline = Arc::new(Pipeline::new(config.clone()));
    for def in tools::builtin_tools() {
        pipeline.register_tool(def);
    }

    let exit_code = match config.server_transport {
        Transport::Stdio => run_stdio(pipeline).await,
        Transport::Http => run_http(pipeline, &config).await,
    };

    std::process::exit(exit_code);
}

#[cfg(feature = "mcp-stdio")]
async fn run_stdio(pipeline: Arc<Pipeline>) -> i32 {
    match pentool_runtime::transport::stdio::serve(pipeline).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "stdio transport failed");
            1
        }
    }
}

#[cfg(not(feature = "mcp-stdio"))]
async fn run_stdio(_pipeline: Arc<Pipeline>) -> i32 {
    tracing::error!("stdio transport requested but mcp-stdio feature is not compiled in");
    1
}

#[cfg(feature = "http-api")]
async fn run_http(pipeline: Arc<Pipeline>, config: &Config) -> i32 {
    let app = pentool_runtime::transport::http::router(pipeline);
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr, "failed to bind HTTP listener");
            return 1;
        }
    };

    tracing::info!(addr, "listening");

    let grace = config.shutdown_grace_period;
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(?grace, "shutdown signal received, draining in-flight executions");
    };

    match axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "HTTP server failed");
            1
        }
    }
}

#[cfg(not(feature = "http-api"))]
async fn run_http(_pipeline: Arc<Pipeline>, _config: &Config) -> i32 {
    tracing::error!("http transport requested but http-api feature is not compiled in");
    1
}
