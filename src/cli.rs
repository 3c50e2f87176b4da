use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "reqrelay")]
#[command(
    about = "Replays HTTP requests an agent asks for and reports the responses back",
    long_about = None
)]
#[command(version)]
pub(crate) struct Cli {
    /// Config file (JSON). Default: ./reqrelay.json
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Join a chat and relay requests until `/quit` or ctrl-c.
    Connect {
        /// Agent server, e.g. http://localhost:8000
        #[arg(long)]
        server: Option<String>,
        /// Reuse a chat id instead of asking the server for one.
        #[arg(long)]
        chat_id: Option<String>,
        /// JSON array of known requests, offered when the agent asks for samples.
        #[arg(long)]
        requests: Option<PathBuf>,
        /// Append the transcript to this JSONL file.
        #[arg(long)]
        transcript_log: Option<PathBuf>,
        /// Base for descriptor urls that start with `/`.
        #[arg(long)]
        base_url: Option<String>,
        /// Per-request timeout (ms). Default: none
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Send batches as {"batch": n, "records": [...]}
        #[arg(long)]
        envelope: bool,
        /// Send drafted replies without waiting for the operator.
        #[arg(long)]
        auto_send_drafts: bool,
        /// Seconds a stop waits for undelivered captures.
        #[arg(long)]
        drain_timeout_secs: Option<u64>,
    },

    /// Parse request descriptors out of a message and print them as JSON.
    Extract {
        /// Message file. Reads stdin when omitted.
        file: Option<PathBuf>,
        #[arg(long)]
        directive_key: Option<String>,
    },

    /// Execute a descriptor list and print the capture batch.
    Replay {
        file: PathBuf,
        #[arg(long)]
        envelope: bool,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Inspect or create the config file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigCommand {
    /// Write a config file with default values.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config (file + environment).
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_flags_parse() {
        let cli = Cli::parse_from([
            "reqrelay",
            "connect",
            "--server",
            "http://agent:9000",
            "--chat-id",
            "c1",
            "--envelope",
            "--drain-timeout-secs",
            "5",
            "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Connect {
                server,
                chat_id,
                envelope,
                auto_send_drafts,
                drain_timeout_secs,
                ..
            } => {
                assert_eq!(server.as_deref(), Some("http://agent:9000"));
                assert_eq!(chat_id.as_deref(), Some("c1"));
                assert!(envelope);
                assert!(!auto_send_drafts);
                assert_eq!(drain_timeout_secs, Some(5));
            }
            _ => panic!("expected connect"),
        }
    }

    #[test]
    fn extract_file_is_optional() {
        let cli = Cli::parse_from(["reqrelay", "extract"]);
        assert!(matches!(cli.command, Command::Extract { file: None, .. }));
    }

    #[test]
    fn config_subcommands() {
        let cli = Cli::parse_from(["reqrelay", "--config", "x.json", "config", "init", "--force"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.json")));
        assert!(matches!(
            cli.command,
            Command::Config {
                command: ConfigCommand::Init { force: true }
            }
        ));
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
