mod config;
mod server;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use config::*;
use server::Server;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// A special mode dedicated to developers, NOT INTENDED FOR PRODUCTION
    #[clap(long)]
    dev: bool,

    #[clap(
        short,
        long,
        env = "SMTP_TRANSLATOR_CONFIG",
        default_value = "smtp-translator.toml"
    )]
    /// Path to the main smtp-translator configuration file
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the LMTP and SASL services and forwards notifications
    Daemon,

    #[clap(subcommand)]
    /// Specific tooling, should not be part of a normal workflow, for debug & experimentation only
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Compute the answer a client sends to a CRAM-MD5 challenge
    CramDigest {
        #[clap(short, long)]
        challenge: String,

        #[clap(env = "SMTP_TRANSLATOR_PASSWORD")]
        maybe_password: Option<String>,
    },
}

fn tracer() {
    tracing_subscriber::fmt::init();
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var(
            "RUST_LOG",
            "main=info,smtp_translator=info,translator_core=info,translator_proto=info",
        )
    }

    // Abort on panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{}", panic_info);
        eprintln!("{:?}", backtrace::Backtrace::new());
        std::process::abort();
    }));

    tracer();

    let args = Args::parse();

    match &args.command {
        Command::Daemon => {
            let config = if args.dev {
                dev_config()
            } else {
                read_config(args.config_file.clone()).with_context(|| {
                    format!("unable to load configuration from {:?}", args.config_file)
                })?
            };
            let config = token_from_env(config)?;
            let server = Server::from_config(config)?;
            server.run().await?;
        }
        Command::Tools(subcommand) => match subcommand {
            ToolsCommand::CramDigest {
                challenge,
                maybe_password,
            } => {
                let password = match maybe_password {
                    Some(pwd) => pwd.clone(),
                    None => rpassword::prompt_password("Enter password: ")?,
                };
                println!(
                    "{}",
                    translator_core::auth::cram_md5_digest(&password, challenge.as_bytes())
                );
            }
        },
    }

    Ok(())
}

fn dev_config() -> Config {
    use std::net::*;
    Config {
        credentials: None,
        lmtp: LmtpConfig {
            bind_addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1)), 1025),
            hostname: "example.tld".to_string(),
        },
        auth: Some(AuthConfig {
            bind_addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1)), 12345),
        }),
        pushover: PushoverConfig::default(),
        dispatch: DispatchConfig::default(),
    }
}

/// `PUSHOVER_TOKEN` wins over the configuration file.
fn token_from_env(mut config: Config) -> Result<Config> {
    match std::env::var("PUSHOVER_TOKEN") {
        Ok(token) if token.is_empty() => bail!("PUSHOVER_TOKEN is set but empty"),
        Ok(token) => config.pushover.app_token = Some(token),
        Err(std::env::VarError::NotPresent) => (),
        Err(e) => return Err(e).context("PUSHOVER_TOKEN can not be read"),
    }
    Ok(config)
}
