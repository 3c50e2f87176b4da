// Module declarations
mod aggregator;
mod catalog;
mod channel;
mod cli;
mod config;
mod error;
mod executor;
mod extract;
mod identity;
mod logging;
mod repair;
mod runtime;
mod session;
mod transcript;
mod types;

// Re-export all module items at crate root so modules can refer to each
// other as `crate::Name`.
#[allow(unused_imports)]
pub(crate) use aggregator::*;
#[allow(unused_imports)]
pub(crate) use catalog::*;
#[allow(unused_imports)]
pub(crate) use channel::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use error::*;
#[allow(unused_imports)]
pub(crate) use executor::*;
#[allow(unused_imports)]
pub(crate) use extract::*;
#[allow(unused_imports)]
pub(crate) use identity::*;
#[allow(unused_imports)]
pub(crate) use logging::*;
#[allow(unused_imports)]
pub(crate) use repair::*;
#[allow(unused_imports)]
pub(crate) use runtime::*;
#[allow(unused_imports)]
pub(crate) use session::*;
#[allow(unused_imports)]
pub(crate) use transcript::*;
#[allow(unused_imports)]
pub(crate) use types::*;

use std::io::Read;
use std::path::Path;

use clap::Parser;

fn read_input(file: Option<&Path>) -> std::io::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path)?;
    config.apply_env()?;

    match cli.command {
        Command::Connect {
            server,
            chat_id,
            requests,
            transcript_log,
            base_url,
            timeout_ms,
            envelope,
            auto_send_drafts,
            drain_timeout_secs,
        } => {
            if let Some(server) = server {
                config.server = server;
            }
            if chat_id.is_some() {
                config.chat_id = chat_id;
            }
            if requests.is_some() {
                config.requests_file = requests;
            }
            if transcript_log.is_some() {
                config.transcript_log = transcript_log;
            }
            if base_url.is_some() {
                config.base_url = base_url;
            }
            if timeout_ms.is_some() {
                config.request_timeout_ms = timeout_ms;
            }
            if envelope {
                config.wire_format = WireFormat::Envelope;
            }
            if auto_send_drafts {
                config.auto_send_drafts = true;
            }
            if let Some(secs) = drain_timeout_secs {
                config.drain_timeout_secs = secs;
            }
            if let Err(err) = run_connect(&mut config, &config_path).await {
                tracing::error!(error = %err, "relay could not start");
                return Err(err.into());
            }
            Ok(())
        }

        Command::Extract {
            file,
            directive_key,
        } => {
            let text = read_input(file.as_deref())?;
            let key = directive_key.unwrap_or_else(|| config.directive_key.clone());
            let parser = DescriptorParser::new(&key)?;
            match parser.extract_descriptors(&text) {
                Ok(descriptors) => {
                    println!("{}", serde_json::to_string_pretty(&descriptors)?);
                    Ok(())
                }
                Err(err) => {
                    eprintln!("{err}");
                    if let ParseFailure::Malformed { snippet, .. } = &err {
                        eprintln!("--- payload ---\n{snippet}");
                    }
                    std::process::exit(1);
                }
            }
        }

        Command::Replay {
            file,
            envelope,
            base_url,
            timeout_ms,
        } => {
            if base_url.is_some() {
                config.base_url = base_url;
            }
            if timeout_ms.is_some() {
                config.request_timeout_ms = timeout_ms;
            }
            if envelope {
                config.wire_format = WireFormat::Envelope;
            }
            let descriptors = load_descriptors(&file)?;
            let transport = ReqwestTransport::new(config.request_timeout(), config.base_url()?)?;
            let batch = CaptureBatch {
                seq: 1,
                records: execute_all(&transport, &descriptors).await,
            };
            println!("{}", batch.to_wire(config.wire_format)?);
            Ok(())
        }

        Command::Config { command } => match command {
            ConfigCommand::Init { force } => {
                if config_path.exists() && !force {
                    eprintln!(
                        "Refusing to overwrite existing file: {} (use --force)",
                        config_path.display()
                    );
                    std::process::exit(2);
                }
                save_config(&config_path, &RelayConfig::default())?;
                println!("Wrote {}", config_path.display());
                Ok(())
            }
            ConfigCommand::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        },
    }
}
