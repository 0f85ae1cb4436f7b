//! Thin transport adapters (spec §6). Each adapter depends only on the
//! core's public contract (`Pipeline::execute`, `list_tools`, `enable`,
//! `disable`, `get_health`, `get_metrics_snapshot`) — neither reaches into
//! orchestrator internals.

#[cfg(feature = "http-api")]
pub mod http;

#[cfg(feature = "mcp-stdio")]
pub mod stdio;
