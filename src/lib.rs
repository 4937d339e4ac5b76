pub mod analysis;
pub mod commands;
pub mod errors;
pub mod models;

use commands::{
    db::{get_ecosystem_snapshots, get_server},
    pipeline::run_snapshot,
};
use errors::{PipelineError, PipelineResult};

/// Entry point for the `mcp-pulse` binary.
///
/// `mcp-pulse [snapshot] [WORKSPACE]` builds and stores a snapshot and prints
/// it as JSON. `mcp-pulse history [WORKSPACE]` prints the stored history and
/// `mcp-pulse show SERVER_ID [WORKSPACE]` prints one stored server.
pub fn run() -> PipelineResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let command = match args.first().map(String::as_str) {
        Some("snapshot") | Some("history") | Some("show") => args.remove(0),
        _ => "snapshot".to_string(),
    };
    let server_id = if command == "show" {
        if args.is_empty() {
            return Err(PipelineError::Usage("mcp-pulse show SERVER_ID [WORKSPACE]".to_string()));
        }
        Some(args.remove(0))
    } else {
        None
    };
    let workspace = args.first().cloned().unwrap_or_else(|| ".".to_string());

    let output = match (command.as_str(), server_id) {
        ("history", _) => serde_json::to_string_pretty(&get_ecosystem_snapshots(&workspace)?)?,
        ("show", Some(id)) => serde_json::to_string_pretty(&get_server(&workspace, &id)?)?,
        _ => {
            let result = run_snapshot(&workspace)?;
            log::info!(
                "Processed {} items: {} normalized, {} dropped",
                result.report.total_fetched(),
                result.report.total_normalized(),
                result.report.total_dropped()
            );
            serde_json::to_string_pretty(&serde_json::json!({
                "snapshot": result.snapshot,
                "report": result.report,
            }))?
        }
    };

    println!("{output}");
    Ok(())
}
