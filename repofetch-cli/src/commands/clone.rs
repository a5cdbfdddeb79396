//! Clone command - fetch a repository into a scratch directory

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use repofetch_core::{
    CloneRequest, CloneResult, Config, ProgressUpdate, RemoteRepositoryService, Secrets,
    SignalRegistrar,
};

/// Parse durations like `90s` or `5m`
fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Clone a remote repository
#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Repository URL or owner/repo shorthand
    pub url: String,

    /// Branch, tag, or commit to check out
    #[arg(short = 'r', long = "ref")]
    pub reference: Option<String>,

    /// Sparse checkout pattern (repeatable)
    #[arg(short, long = "sparse")]
    pub sparse: Vec<String>,

    /// Initialize submodules
    #[arg(long)]
    pub submodules: bool,

    /// Blobless clone (--filter=blob:none)
    #[arg(long)]
    pub partial: bool,

    /// Shallow clone depth
    #[arg(long)]
    pub depth: Option<u32>,

    /// Keep the scratch directory if the clone fails
    #[arg(long)]
    pub keep: bool,

    /// Remove the clone after printing its metadata
    #[arg(long)]
    pub discard: bool,

    /// Per-command timeout (e.g. 90s, 5m)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Maximum clone attempts
    #[arg(long)]
    pub retries: Option<u32>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

impl CloneArgs {
    fn request(&self) -> CloneRequest {
        let mut request = CloneRequest::new(&self.url).with_submodules(self.submodules);
        if let Some(reference) = &self.reference {
            request = request.with_reference(reference);
        }
        if !self.sparse.is_empty() {
            request = request.with_sparse_checkout(self.sparse.iter().cloned());
        }
        if self.partial {
            request = request.with_partial_clone(true);
        }
        if let Some(depth) = self.depth {
            request = request.with_depth(depth);
        }
        if self.keep {
            request = request.with_keep_directory(true);
        }
        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }
        if let Some(retries) = self.retries {
            request = request.with_max_retries(retries);
        }
        if !self.quiet {
            request = request.with_progress(Arc::new(|update: &ProgressUpdate| {
                match &update.detail {
                    Some(detail) => eprintln!(
                        "[{:>3}%] {:<14} {} ({})",
                        update.percent, update.phase, update.message, detail
                    ),
                    None => eprintln!(
                        "[{:>3}%] {:<14} {}",
                        update.percent, update.phase, update.message
                    ),
                }
            }));
        }
        request
    }

    /// Execute the clone command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let secrets = Secrets::load_with_overrides()?;
        let service = RemoteRepositoryService::new(config.clone(), secrets);
        service.install_shutdown_hooks(&SignalRegistrar);

        let outcome = service.clone_repository(self.request()).await;
        let printed = match outcome {
            Ok(result) => {
                if self.discard {
                    print_result(&result, self.json)?;
                    service.cleanup(&result.local_path).await?;
                } else {
                    // The CLI hands the clone to the user, so it must outlive the process
                    service.scratch().retain(&result.local_path);
                    print_result(&result, self.json)?;
                }
                Ok(())
            }
            Err(e) => {
                for warning in e.warnings() {
                    eprintln!("warning: {}", warning);
                }
                Err(anyhow::Error::new(e).context("Clone failed"))
            }
        };

        service.shutdown().await;
        printed
    }
}

fn print_result(result: &CloneResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let metadata = &result.metadata;
    let stats = &result.statistics;
    println!("Cloned {}", metadata.url);
    println!("  path:      {}", result.local_path.display());
    println!("  commit:    {}", metadata.commit);
    if let Some(reference) = &metadata.reference {
        println!("  ref:       {}", reference);
    }
    if let Some(last) = &metadata.last_commit {
        println!("  last:      {} <{}> {}", last.author, last.email, last.message);
    }
    println!(
        "  files:     {} ({} bytes)",
        metadata.file_count, metadata.size_bytes
    );
    if !metadata.submodules.is_empty() {
        println!("  submodules:");
        for module in &metadata.submodules {
            println!(
                "    {} -> {}",
                module.path,
                module.commit.as_deref().unwrap_or("(unknown)")
            );
        }
    }
    println!("  auth:      {}", result.auth_method);
    println!(
        "  attempts:  {} ({} retries) in {:.1}s",
        stats.attempts,
        stats.retries_performed,
        stats.duration.as_secs_f64()
    );
    if stats.partial_clone || stats.sparse_checkout {
        println!(
            "  mode:      {}{}",
            if stats.partial_clone { "partial " } else { "" },
            if stats.sparse_checkout { "sparse" } else { "" }
        );
    }
    for warning in &result.warnings {
        println!("  warning:   {}", warning);
    }
    Ok(())
}
