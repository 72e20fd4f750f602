use std::{path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nubo::{config::Config, engine::Engine, Error};

#[derive(Debug, Parser)]
#[command(name = "nubo", version, about = "Run nubo scripts")]
struct Cli {
    /// Disable colored error output.
    #[arg(long, global = true)]
    nocolor: bool,

    /// Development mode: verbose logging.
    #[arg(short, long, global = true)]
    dev: bool,

    /// Log filter, e.g. `info` or `nubo::events=trace`.
    #[arg(long, global = true)]
    loglevel: Option<String>,

    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a script.
    Run(RunArgs),
    /// Write prepared sidecars for every script below a directory.
    Prepare(PrepareArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Args)]
struct RunArgs {
    file: PathBuf,
}

#[derive(Debug, Args)]
struct PrepareArgs {
    #[arg(default_value = ".")]
    dir: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let color = !cli.nocolor;
    if !color {
        colored::control::set_override(false);
    }

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => return fail(&err.into(), color),
        },
        None => Config::default(),
    };
    init_logging(&cli, &config);

    let result = match &cli.command {
        Command::Run(args) => run_command(config, args),
        Command::Prepare(args) => prepare_command(config, args),
        Command::Config => config_command(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(&err, color),
    }
}

/// `--loglevel`, then `NUBO_LOG`, then dev mode, then the config.
fn init_logging(cli: &Cli, config: &Config) {
    let dev = cli.dev
        || std::env::var("NUBO_DEV")
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
    let filter = cli
        .loglevel
        .clone()
        .or_else(|| std::env::var("NUBO_LOG").ok())
        .unwrap_or_else(|| {
            if dev {
                "debug".to_string()
            } else {
                config.logging.level.clone()
            }
        });

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_command(config: Config, args: &RunArgs) -> Result<(), Error> {
    let engine = Engine::new(config);
    let result = engine.run_file(&args.file);
    engine.shutdown();
    if let Some(value) = result? {
        println!("{value}");
    }
    Ok(())
}

fn prepare_command(config: Config, args: &PrepareArgs) -> Result<(), Error> {
    let engine = Engine::new(config);
    let written = engine.prepare_dir(&args.dir)?;
    println!("prepared {} file(s)", written.len());
    Ok(())
}

fn config_command(config: &Config) -> Result<(), Error> {
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn fail(err: &Error, color: bool) -> ExitCode {
    eprintln!("{}", err.render(color));
    ExitCode::FAILURE
}
