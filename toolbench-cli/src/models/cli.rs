use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Toolbench: drive function-calling models through an OpenAI-compatible API
/// and print normalized results.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase message verbosity.
    ///
    /// Specify multiple times for more verbose output:
    ///  -v:  INFO level
    ///  -vv: DEBUG level
    ///  -vvv: TRACE level (most verbose)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the config file. Defaults to the nearest Toolbench.toml in the
    /// current directory or its parents.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one request and print the normalized result as JSON.
    Query {
        /// JSON file holding the message list.
        #[arg(short, long)]
        messages: PathBuf,
        /// JSON file holding the tool definitions.
        #[arg(short, long)]
        tools: Option<PathBuf>,
        /// Prompting mode: do not attach tools or extract tool calls.
        #[arg(long)]
        prompting: bool,
    },
    /// Run a full episode, answering tool calls from canned outputs.
    Episode {
        #[arg(short, long)]
        messages: PathBuf,
        #[arg(short, long)]
        tools: Option<PathBuf>,
        /// JSON object mapping tool names to an output string or a list of
        /// outputs consumed in order.
        #[arg(short, long)]
        outputs: Option<PathBuf>,
        #[arg(long, default_value_t = toolbench_core::DEFAULT_MAX_STEPS)]
        max_steps: usize,
    },
    /// Validate the config file and print the effective settings.
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_episode_flags() {
        let cli = Cli::try_parse_from([
            "toolbench", "-vv", "episode", "-m", "msgs.json", "--max-steps", "4",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Episode {
                messages,
                max_steps,
                tools,
                ..
            } => {
                assert_eq!(messages, PathBuf::from("msgs.json"));
                assert_eq!(max_steps, 4);
                assert!(tools.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
