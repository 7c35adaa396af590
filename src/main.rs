use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, process::ExitCode};
use tracing_subscriber::EnvFilter;

use execfda::{
    config::{ConfigDocument, ConfigStore},
    gate,
    identity::InvokingUser,
    manage,
};

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "EXECFDA_LOG";

#[derive(Parser)]
#[command(
    name = "execfda",
    about = "execfda: execute command with full disk access",
    long_about = "execfda executes configured commands with full disk access",
    version
)]
struct Cli {
    /// Config file (defaults to /private/etc/execfda/config.yml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log more (-v info, -vv debug). EXECFDA_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Execute an allowed command
    Exec {
        /// Command and arguments, matched exactly against the allowlist
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },

    /// Configure available commands
    #[command(subcommand)]
    Config(ConfigCmd),
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Create an empty config (or re-secure an existing one)
    Create,

    /// Add a command to the allowed list
    Add {
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },

    /// Delete a command from the allowed list
    Delete {
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },

    /// Print the config
    Get {
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Yaml,
    Json,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            eprint!("{err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("execfda: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let store = cli.config.map(ConfigStore::new).unwrap_or_default();
    match cli.cmd {
        Cmd::Exec { command } => match gate::run(&store, &command)? {},
        Cmd::Config(cmd) => run_config(&store, cmd),
    }
}

fn run_config(store: &ConfigStore, cmd: ConfigCmd) -> Result<()> {
    let who = InvokingUser::current();
    match cmd {
        ConfigCmd::Create => {
            manage::create(store, &who)?;
            println!("✓ config: {}", store.path().display());
        }
        ConfigCmd::Add { command } => {
            let entry = manage::add(store, &who, &command)?;
            println!("✓ allowed: {entry}");
        }
        ConfigCmd::Delete { command } => {
            let removed = manage::delete(store, &who, &command)?;
            println!(
                "✓ removed {removed} {}",
                if removed == 1 { "entry" } else { "entries" }
            );
        }
        ConfigCmd::Get { format } => {
            let doc = manage::get(store)?;
            print!("{}", render(&doc, format)?);
        }
    }
    Ok(())
}

fn render(doc: &ConfigDocument, format: Format) -> Result<String> {
    Ok(match format {
        Format::Yaml => serde_yaml::to_string(doc)?,
        Format::Json => {
            let mut out = serde_json::to_string_pretty(doc)?;
            out.push('\n');
            out
        }
    })
}
