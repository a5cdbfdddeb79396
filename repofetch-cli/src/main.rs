//! repofetch CLI - clone remote repositories into disposable scratch directories

mod commands;

use clap::{Parser, Subcommand};
use repofetch_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{CloneArgs, ResolveArgs, ValidateArgs};

/// repofetch: clone remote repositories for analysis
#[derive(Parser, Debug)]
#[command(name = "repofetch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to git executable (overrides config and env)
    #[arg(long, global = true, env = "REPOFETCH_GIT_PATH")]
    git_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Clone a repository into a scratch directory
    #[command(visible_alias = "c")]
    Clone(CloneArgs),

    /// Check that a repository exists and is readable
    Validate(ValidateArgs),

    /// Resolve a branch, tag, or HEAD to a commit SHA
    Resolve(ResolveArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = Config::load_with_overrides(cli.git_path.clone())?;

    if cli.verbose {
        tracing::debug!(
            git = %config.git.program,
            timeout = ?config.clone.timeout,
            max_retries = config.clone.max_retries,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("repofetch {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Clone(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Validate(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Resolve(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Config) => {
            println!("repofetch Configuration");
            println!("=======================");
            println!();
            println!("Clone Settings:");
            println!("  timeout: {:?}", config.clone.timeout);
            println!("  max_retries: {}", config.clone.max_retries);
            println!("  partial_clone: {}", config.clone.partial_clone);
            println!("  keep_directory: {}", config.clone.keep_directory);
            match config.clone.depth {
                Some(depth) => println!("  depth: {}", depth),
                None => println!("  depth: (full history)"),
            }
            if !config.clone.sparse_patterns.is_empty() {
                println!("  sparse_patterns: {}", config.clone.sparse_patterns.join(", "));
            }
            println!();
            println!("Retry Settings:");
            println!("  base_delay: {:?}", config.retry.base_delay);
            println!("  multiplier: {}", config.retry.multiplier);
            println!("  max_delay: {:?}", config.retry.max_delay);
            println!("  retryable_errors: {}", config.retry.retryable_errors.len());
            println!();
            println!("Git: {}", config.git.program);
            println!("Scratch root: {}", config.scratch.root_dir().display());
            println!();
            if let Some(path) = Config::default_config_path() {
                println!("Config file: {}", path.display());
                if path.exists() {
                    println!("  (exists)");
                } else {
                    println!("  (not found - using defaults)");
                }
            }
        }
        None => {
            println!("repofetch - clone remote repositories into disposable scratch directories");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
