//! Parameter override CLI entry point.
//!
//! Validates, formats and applies persisted parameter overrides.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use param_override::codec::{self, parse_loose, ParamOverride};
use param_override::{
    validate, HeaderMap, OverrideAgent, OverrideContext, RequestParts, Settings,
};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "param-override")]
#[command(
    author,
    version,
    about = "Declarative parameter overrides for outbound API requests"
)]
struct Args {
    /// Engine settings file (YAML or JSON)
    #[arg(short, long, global = true, env = "PARAM_OVERRIDE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate an override file and report every problem.
    Validate {
        /// Override file
        file: PathBuf,
    },

    /// Print the canonical encoding of an override file.
    Format {
        /// Override file
        file: PathBuf,

        /// Print the compact storage form instead of the indented one
        #[arg(long)]
        compact: bool,
    },

    /// Apply an override to a request body and print the result.
    Apply {
        /// Override file
        file: PathBuf,

        /// JSON request body
        #[arg(long)]
        body: PathBuf,

        /// JSON object of request headers
        #[arg(long)]
        headers: Option<PathBuf>,

        /// JSON object of context facts (model, retry, last_error, ...)
        #[arg(long)]
        context: Option<PathBuf>,

        /// Extra context fact; the value is read as JSON when it parses
        #[arg(long = "set", value_name = "PATH=VALUE")]
        facts: Vec<String>,
    },

    /// Print an example override and exit.
    Example,
}

const EXAMPLE: &str = r#"{
  "operations": [
    {
      "mode": "set",
      "path": "temperature",
      "value": 0.7,
      "conditions": [
        {"path": "model", "mode": "prefix", "value": "gpt"},
        {"path": "retry.is_retry", "mode": "full", "value": false}
      ],
      "logic": "AND"
    },
    {
      "mode": "move",
      "from": "max_tokens",
      "to": "max_completion_tokens",
      "conditions": {"model": "o3-mini"}
    },
    {
      "mode": "ensure_prefix",
      "path": "model",
      "value": "openai/"
    },
    {
      "mode": "prune_objects",
      "path": "messages.-1.content",
      "value": {"type": "thinking"}
    },
    {
      "mode": "sync_fields",
      "from": "header:session_id",
      "to": "json:prompt_cache_key"
    },
    {
      "mode": "set_header",
      "path": "X-Debug-Mode",
      "value": "on",
      "keep_origin": true
    },
    {
      "mode": "return_error",
      "value": {"message": "this model is disabled", "status_code": 403},
      "conditions": [{"path": "model", "mode": "contains", "value": "preview"}]
    }
  ]
}"#;

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let settings = match &args.settings {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    debug!(?settings, "Loaded settings");

    match args.command {
        Command::Example => {
            println!("{EXAMPLE}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { file } => {
            let config = read_override(&file)?;
            let ParamOverride::Rules(rules) = &config else {
                info!(file = %file.display(), "Legacy override is valid");
                return Ok(ExitCode::SUCCESS);
            };

            match validate(rules, &settings) {
                Ok(()) => {
                    info!(
                        file = %file.display(),
                        operations = rules.authored().count(),
                        "Override is valid"
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(errors) => {
                    for error in errors.iter() {
                        eprintln!("{error}");
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Format { file, compact } => {
            let config = read_override(&file)?;
            let text = if compact {
                codec::encode(&config)?
            } else {
                codec::encode_pretty(&config)?
            };
            println!("{text}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply {
            file,
            body,
            headers,
            context,
            facts,
        } => {
            let agent = OverrideAgent::new(read_override(&file)?, settings)?;

            let body: JsonValue = read_json(&body)?;
            let headers: HeaderMap = match &headers {
                Some(path) => read_json(path)?,
                None => HeaderMap::new(),
            };
            let mut ctx = match &context {
                Some(path) => OverrideContext::from_value(read_json(path)?),
                None => OverrideContext::new(),
            };
            for fact in &facts {
                let Some((path, value)) = fact.split_once('=') else {
                    bail!("Invalid --set `{fact}`, expected PATH=VALUE");
                };
                ctx = ctx.with_value(path.trim(), parse_loose(value));
            }

            let mut parts = RequestParts::new(body, headers);
            match agent.process(&mut parts, &ctx) {
                Ok(report) => {
                    let output = json!({
                        "body": parts.body,
                        "headers": parts.headers,
                        "report": report,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(halt) => {
                    let output = json!({
                        "error": {
                            "message": halt.message,
                            "code": halt.code,
                            "status_code": halt.status_code,
                            "skip_retry": halt.skip_retry,
                        }
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    Ok(ExitCode::from(2))
                }
            }
        }
    }
}

fn read_override(path: &Path) -> Result<ParamOverride> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read override file: {}", path.display()))?;
    codec::decode(&text).with_context(|| format!("Failed to decode {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    let settings = if path
        .extension()
        .is_some_and(|e| e == "yaml" || e == "yml")
    {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(settings)
}
