use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use netconsole::config::{Config, ConsoleConfig, Overrides};
use netconsole::host::Account;
use netconsole::worker::{BatchOptions, run_batch};

/// Run command batches on network devices over ssh/telnet.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML config.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Concurrent host sessions.
    #[arg(short = 'w', long = "workers", default_value_t = 1)]
    workers: usize,

    /// Store output to <dir>/<host>.log instead of stdout.
    #[arg(short = 'l', long = "log-dir")]
    log_dir: Option<PathBuf>,

    /// Ask for username and password on the terminal.
    #[arg(short = 'a', long = "ask")]
    ask: bool,

    /// Also ask for an enable password. Works together with -a.
    #[arg(short = 'A', long = "ask-enable")]
    ask_enable: bool,

    /// Dummy transport scenario file; forces every host onto it.
    #[arg(short = 'd', long = "dummy")]
    dummy: Option<PathBuf>,

    /// Commands to execute, overriding the config. Repeatable.
    #[arg(short = 'e', long = "execute")]
    commands: Vec<String>,

    /// Print the default console config as YAML and exit.
    #[arg(short = 'p', long = "print-config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", serde_yaml::to_string(&ConsoleConfig::default())?);
        return Ok(());
    }

    init_tracing();

    let Some(config_path) = &cli.config else {
        bail!("no config given, see --help");
    };

    let mut overrides = Overrides {
        commands: cli.commands.clone(),
        account: None,
        dummy_scenario: cli.dummy.clone(),
    };
    if cli.ask {
        overrides.account = Some(ask_account(cli.ask_enable)?);
    }

    let config = Config::load(config_path)?;
    let jobs = config.resolve(&overrides)?;
    tracing::info!(hosts = jobs.len(), workers = cli.workers, "starting batch");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after in-flight hosts");
            signal_cancel.cancel();
        }
    });

    run_batch(
        jobs,
        BatchOptions {
            workers: cli.workers,
            log_dir: cli.log_dir.clone(),
        },
        cancel,
    )
    .await?;

    Ok(())
}

/// Interactive account entry for the -a/-A flags. The username defaults to
/// $USER when the entry is left empty.
fn ask_account(ask_enable: bool) -> anyhow::Result<Account> {
    let env_user = std::env::var("USER").unwrap_or_default();
    if env_user.is_empty() {
        print!("Username: ");
    } else {
        print!("Username (default: {env_user}): ");
    }
    std::io::stdout().flush()?;

    let mut entered = String::new();
    std::io::stdin()
        .read_line(&mut entered)
        .context("cannot read username")?;
    let mut username = entered.trim().to_string();
    if username.is_empty() {
        username = env_user;
    }
    if username.is_empty() {
        bail!("no username defined");
    }

    let password = rpassword::prompt_password("Enter Password: ")
        .context("cannot read password")?
        .trim()
        .to_string();

    let enable_password = if ask_enable {
        rpassword::prompt_password("Enter enable Password: ")
            .context("cannot read enable password")?
            .trim()
            .to_string()
    } else {
        String::new()
    };

    Ok(Account {
        username,
        password,
        enable_password,
    })
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, prelude::*};

    color_eyre::install().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("netconsole=info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();
}
