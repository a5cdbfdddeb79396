//! Validate and resolve commands - read-only remote probes

use clap::Args;
use repofetch_core::{Config, RemoteRepositoryService, Secrets};

/// Check that a remote exists and is readable
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Repository URL or owner/repo shorthand
    pub url: String,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl ValidateArgs {
    /// Execute the validate command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let service = RemoteRepositoryService::new(config.clone(), Secrets::load_with_overrides()?);
        let validation = service.validate_repository(&self.url).await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&validation)?);
        } else if validation.valid {
            println!("{} is accessible", validation.url);
            if let Some(branch) = &validation.default_branch {
                println!("  default branch: {}", branch);
            }
            println!("  branches: {}", validation.branches().count());
            println!("  tags:     {}", validation.tags().count());
        } else {
            println!("{} is not accessible", validation.url);
            if validation.requires_authentication {
                println!("  authentication required (set REPOFETCH_GIT_TOKEN or add a token to secrets.toml)");
            }
            if let Some(error) = &validation.error {
                println!("  {}", error);
            }
        }

        if !validation.valid {
            anyhow::bail!("validation failed for {}", validation.url);
        }
        Ok(())
    }
}

/// Resolve a ref on a remote to a commit SHA
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Repository URL or owner/repo shorthand
    pub url: String,

    /// Branch, tag, or commit (defaults to HEAD)
    pub reference: Option<String>,
}

impl ResolveArgs {
    /// Execute the resolve command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let service = RemoteRepositoryService::new(config.clone(), Secrets::load_with_overrides()?);
        let sha = service
            .resolve_ref(&self.url, self.reference.as_deref())
            .await?;
        println!("{}", sha);
        Ok(())
    }
}
