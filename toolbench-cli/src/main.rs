// toolbench-cli/src/main.rs
mod canned;
mod inputs;
mod models;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use time::macros::format_description;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use toolbench_core::config::EndpointConfig;
use toolbench_core::episode::ToolExecution;
use toolbench_core::{
    CONFIG_FILE_NAME, ChatMessage, Handler, HarnessConfig, QueryResult, Role, Transcript,
    run_episode,
};

use crate::canned::CannedToolExecutor;
use crate::models::cli::{Cli, Commands};

const LOG_FILE_NAME: &str = "toolbench.log";
/// Key sent to OpenAI-compatible local servers that ignore authentication.
const PLACEHOLDER_API_KEY: &str = "EMPTY";

fn find_config_upwards(start: &Path) -> Result<PathBuf> {
    let mut current = start;
    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            return Ok(config_path);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => {
                return Err(anyhow!(
                    "Could not find '{}' in {:?} or any parent directory.",
                    CONFIG_FILE_NAME,
                    start
                ));
            }
        }
    }
}

fn load_cli_config(explicit: Option<&Path>) -> Result<(HarnessConfig, PathBuf)> {
    let config_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let current_dir = env::current_dir().context("Failed to get current directory")?;
            find_config_upwards(&current_dir)?
        }
    };
    info!("Using configuration file at: {:?}", config_path);
    let config = HarnessConfig::load(&config_path)?;
    Ok((config, config_path))
}

fn resolve_api_key(endpoint: &EndpointConfig) -> String {
    let Some(var) = endpoint.api_key_env_var.as_deref() else {
        debug!("No api_key_env_var configured, using placeholder key");
        return PLACEHOLDER_API_KEY.to_string();
    };
    match env::var(var) {
        Ok(key) if !key.trim().is_empty() => key,
        Ok(_) | Err(_) => {
            warn!(env_var = %var, "API key environment variable not set, using placeholder key");
            PLACEHOLDER_API_KEY.to_string()
        }
    }
}

/// Validates the message file as a transcript, prepending the configured
/// system prompt when the file has none.
fn seed_transcript(config: &HarnessConfig, mut messages: Vec<ChatMessage>) -> Result<Transcript> {
    let has_system = messages.first().is_some_and(|m| m.role == Role::System);
    if let (Some(prompt), false) = (config.system_prompt.as_ref(), has_system) {
        messages.insert(0, ChatMessage::system(prompt.clone()));
    }
    Transcript::from_messages(messages).context("Message file is not a valid transcript")
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "-"]),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

#[derive(Serialize)]
struct QueryReport<'a> {
    result: &'a QueryResult,
    /// Calls in `name(key=value)` form, when the model requested any.
    #[serde(skip_serializing_if = "Option::is_none")]
    execute: Option<Vec<String>>,
    latency_ms: u64,
    attempts: u32,
}

#[derive(Serialize)]
struct EpisodeReport<'a> {
    episode_id: String,
    steps: usize,
    hit_step_limit: bool,
    input_tokens: u64,
    output_tokens: u64,
    latency_ms: u64,
    final_response: Option<&'a str>,
    executions: &'a [ToolExecution],
    messages: &'a [ChatMessage],
}

async fn handle_query(
    config: &HarnessConfig,
    messages: &Path,
    tools: Option<&Path>,
    prompting: bool,
) -> Result<()> {
    let transcript = seed_transcript(config, inputs::load_messages(messages)?)?;
    let tools = inputs::load_tools(tools)?;
    let handler = Handler::new(config.handler_config(resolve_api_key(&config.endpoint))?)?;
    info!(messages = transcript.len(), tools = tools.len(), prompting, "Running single query");

    let pb = spinner("Querying model...")?;
    let outcome = handler.query(&transcript, &tools, !prompting).await;
    pb.finish_and_clear();
    let outcome = outcome?;

    if let Some(reason) = outcome.result.degraded {
        eprintln!("{} {}", "Warning: degraded response:".yellow(), reason);
    }
    let execute = if outcome.result.has_tool_calls() {
        match outcome.result.decode_execute() {
            Ok(calls) => Some(calls),
            Err(e) => {
                warn!(error = %e, "Could not render tool calls in executable form");
                None
            }
        }
    } else {
        None
    };
    let report = QueryReport {
        result: &outcome.result,
        execute,
        latency_ms: outcome.latency.as_millis() as u64,
        attempts: outcome.attempts,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn handle_episode(
    config: &HarnessConfig,
    messages: &Path,
    tools: Option<&Path>,
    outputs: Option<&Path>,
    max_steps: usize,
) -> Result<()> {
    let transcript = seed_transcript(config, inputs::load_messages(messages)?)?;
    let tools = inputs::load_tools(tools)?;
    let executor = match outputs {
        Some(path) => CannedToolExecutor::load(path)?,
        None => CannedToolExecutor::empty(),
    };
    let handler = Handler::new(config.handler_config(resolve_api_key(&config.endpoint))?)?;

    let pb = spinner("Running episode...")?;
    let outcome = run_episode(&handler, transcript, &tools, &executor, max_steps).await;
    pb.finish_and_clear();
    let outcome = outcome?;

    if outcome.hit_step_limit {
        eprintln!(
            "{} episode stopped after {} steps",
            "Warning:".yellow(),
            outcome.steps
        );
    }
    let report = EpisodeReport {
        episode_id: outcome.episode_id.to_string(),
        steps: outcome.steps,
        hit_step_limit: outcome.hit_step_limit,
        input_tokens: outcome.input_tokens,
        output_tokens: outcome.output_tokens,
        latency_ms: outcome.latency.as_millis() as u64,
        final_response: outcome.final_response(),
        executions: &outcome.executions,
        messages: outcome.transcript.messages(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_check_config(config: &HarnessConfig, config_path: &Path) -> Result<()> {
    let handler_config = config.handler_config(resolve_api_key(&config.endpoint))?;
    let capabilities = handler_config.capabilities;
    println!("{} {}", "Config OK:".green().bold(), config_path.display());
    println!("  {:<22} {}", "base_url", handler_config.base_url);
    println!("  {:<22} {}", "model", handler_config.served_model_name());
    println!("  {:<22} {}", "profile", handler_config.profile);
    println!(
        "  {:<22} {}",
        "temperature",
        handler_config
            .temperature
            .map_or_else(|| "server default".to_string(), |t| t.to_string())
    );
    println!("  {:<22} {}", "structured_tool_calls", capabilities.structured_tool_calls);
    println!("  {:<22} {}", "structured_reasoning", capabilities.structured_reasoning);
    println!("  {:<22} {}", "streaming_with_tools", capabilities.streaming_with_tools);
    println!("  {:<22} {}", "stream", handler_config.stream);
    println!(
        "  {:<22} {} attempts, {:?} base, x{}, {:?} max",
        "retry",
        handler_config.retry.max_attempts,
        handler_config.retry.base_delay,
        handler_config.retry.multiplier,
        handler_config.retry.max_delay
    );
    if !handler_config.extra_body.is_empty() {
        println!(
            "  {:<22} {}",
            "extra_body",
            serde_json::Value::Object(handler_config.extra_body.clone())
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    colored::control::set_override(true);

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // --- Logging Setup ---
    let default_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));

    let log_dir = match dirs::cache_dir()
        .or_else(dirs::runtime_dir)
        .or_else(|| Some(env::temp_dir()))
        .map(|d| d.join("toolbench"))
    {
        Some(dir) => dir,
        None => {
            eprintln!("{}", "Error: Could not determine a suitable directory for log files.".red());
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("{} Failed to create log directory {}: {}", "Error:".red(), log_dir.display(), e);
        return ExitCode::FAILURE;
    }
    let log_path = log_dir.join(LOG_FILE_NAME);

    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME);
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let local_timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));
    let file_layer = fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_timer(local_timer.clone());
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(local_timer)
        .with_target(false)
        .with_level(true);

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("{} Failed to initialize logging: {}", "Error:".red(), e);
        return ExitCode::FAILURE;
    }
    colored::control::unset_override();

    info!(
        "Logging initialized (default level {}). Logging to stderr and {}",
        default_level,
        log_path.display()
    );
    // --- End Logging Setup ---

    let (config, config_path) = match load_cli_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            eprintln!("{} {:#}", "Error:".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Commands::Query {
            messages,
            tools,
            prompting,
        } => handle_query(&config, messages, tools.as_deref(), *prompting).await,
        Commands::Episode {
            messages,
            tools,
            outputs,
            max_steps,
        } => {
            handle_episode(
                &config,
                messages,
                tools.as_deref(),
                outputs.as_deref(),
                *max_steps,
            )
            .await
        }
        Commands::CheckConfig => handle_check_config(&config, &config_path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{} {:#}", "Error:".red(), e);
            ExitCode::FAILURE
        }
    }
}
