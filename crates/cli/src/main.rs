//! qbscript - run a script file from the command line
//!
//! ```text
//! qbscript <script-file> [--chart <name>=<json-file>]... [--config <file>]
//!          [--event <name>] [--arg <json>]...
//! ```
//!
//! Prints the run result (value, announcements, log lines, signals, error)
//! as JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use qbscript_config::EngineConfig;
use qbscript_core::{Chart, EntityType, Script};
use qbscript_events::{EngineRunner, ScriptRunRequest};
use qbscript_scripting::ScriptEngine;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Ruleset id given to everything loaded from the command line
const CLI_RULESET: &str = "cli";

#[derive(Debug, Parser)]
#[command(name = "qbscript")]
#[command(about = "Run a qbscript file and print the result as JSON")]
#[command(version)]
struct Args {
    /// Script file to run
    script: PathBuf,

    /// Chart available to the script, as <name>=<json-file> (repeatable)
    #[arg(long = "chart", value_name = "NAME=FILE", value_parser = parse_chart)]
    charts: Vec<(String, PathBuf)>,

    /// Engine configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Handler function to call after the top level has run
    #[arg(long, value_name = "NAME")]
    event: Option<String>,

    /// JSON argument passed to the handler (repeatable)
    #[arg(long = "arg", value_name = "JSON", value_parser = parse_json)]
    args: Vec<serde_json::Value>,
}

fn parse_chart(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected <name>=<json-file>, got '{}'", raw)),
    }
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("not JSON: {}", e))
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::load_default()),
    }
}

fn load_charts(charts: &[(String, PathBuf)]) -> Result<Vec<Chart>> {
    charts
        .iter()
        .enumerate()
        .map(|(index, (name, path))| {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read chart '{}' from {}", name, path.display()))?;
            Ok(Chart {
                id: format!("chart-{}", index + 1),
                ruleset_id: CLI_RULESET.into(),
                title: name.clone(),
                data,
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config.display();

    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read script {}", args.script.display()))?;
    let charts = load_charts(&args.charts)?;
    info!("Loaded {} chart(s)", charts.len());

    let script_id = args.script.display().to_string();
    let script = Script::new(script_id, CLI_RULESET, EntityType::Global, None, source);

    let runner = Arc::new(EngineRunner::new(Arc::new(ScriptEngine::new(config))));
    let run = runner.into_fn();
    let result = run(ScriptRunRequest {
        script,
        event: args.event,
        character_id: None,
        args: args.args,
        charts,
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    match &result.error {
        Some(e) => {
            error!("Script failed at line {}: {}", e.line.map_or_else(|| "?".to_string(), |l| l.to_string()), e.message);
            Ok(ExitCode::FAILURE)
        }
        None => {
            debug!("Script finished");
            Ok(ExitCode::SUCCESS)
        }
    }
}
