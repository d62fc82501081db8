use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sandbox_env::config::Config;
use sandbox_env::metadata::MetadataTemplate;
use sandbox_env::tools::ProcessRunner;
use sandbox_env::{RegistryStore, SandboxConfig, SandboxInfo, SandboxManager};

#[derive(Parser)]
#[command(
    name = "sandbox-env",
    about = "Manage isolated sandbox environments",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file [default: <config dir>/sandbox-env/config.toml]
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Show debug output, including every external command
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new sandbox
    Create {
        /// Sandbox name (letters, digits, hyphens, underscores)
        name: String,

        /// Git URL of your project repository
        git_url: String,

        /// Custom sandbox directory (its parent becomes the workspace root)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Workspace root directory
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Base repository URL
        #[arg(long)]
        repo_url: Option<String>,
    },

    /// Remove a sandbox
    Remove {
        /// Sandbox name
        name: String,

        /// Skip confirmation
        #[arg(long)]
        force: bool,

        /// Workspace root directory
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Show information about a sandbox
    Info {
        /// Sandbox name
        name: String,

        /// Workspace root directory
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// List all sandboxes
    List {
        /// Workspace root directory
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .unwrap_or_else(|| Config::default_path().to_string_lossy().into_owned());
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Create {
            name,
            git_url,
            path,
            workspace,
            repo_url,
        } => {
            // A custom path decides where the registry lives too.
            let workspace_root = match &path {
                Some(path) => path
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(".")),
                None => workspace.unwrap_or_else(|| config.workspace_root()),
            };
            let request = SandboxConfig {
                name,
                git_url,
                base_repo_url: repo_url.unwrap_or_else(|| config.repository.base_url.clone()),
                workspace_root: workspace_root.clone(),
                custom_path: path,
            };
            create_sandbox(&manager(&config, workspace_root), &request)
        }
        Commands::Remove {
            name,
            force,
            workspace,
        } => {
            let root = workspace.unwrap_or_else(|| config.workspace_root());
            remove_sandbox(&manager(&config, root), &name, force)
        }
        Commands::Info { name, workspace } => {
            let root = workspace.unwrap_or_else(|| config.workspace_root());
            show_info(&manager(&config, root), &name)
        }
        Commands::List { workspace } => {
            let root = workspace.unwrap_or_else(|| config.workspace_root());
            list_sandboxes(&manager(&config, root))
        }
    }
}

fn manager(config: &Config, workspace_root: PathBuf) -> SandboxManager {
    let tools = Arc::new(ProcessRunner::new(&config.tools));
    SandboxManager::new(RegistryStore::new(workspace_root), tools)
        .with_template(MetadataTemplate::from_config(&config.metadata))
}

fn create_sandbox(manager: &SandboxManager, request: &SandboxConfig) -> Result<()> {
    let info = manager.create_sandbox(request)?;

    println!("✓ Sandbox '{}' created successfully!", info.name);
    println!("  Location: {}", info.sandbox_path.display());
    println!("  Project: {}", info.project_name);
    println!("  Branch: {}", info.branch_name);
    println!("  Base commit: {}", info.short_commit());
    println!();
    println!("Next steps:");
    println!("  1. cd {}", info.sandbox_path.display());
    println!("  2. Start working on your feature!");
    Ok(())
}

fn remove_sandbox(manager: &SandboxManager, name: &str, force: bool) -> Result<()> {
    if !force && !confirm(&format!("Remove sandbox '{}'?", name))? {
        println!("Cancelled.");
        return Ok(());
    }

    manager.remove_sandbox(name)?;
    println!("✓ Sandbox '{}' removed successfully!", name);
    Ok(())
}

fn show_info(manager: &SandboxManager, name: &str) -> Result<()> {
    let info = manager.get_sandbox_info(name)?;

    println!("Sandbox: {}", info.name);
    println!("  Created: {}", info.created.to_rfc3339());
    println!("  Project: {}", info.project_name);
    println!("  Git URL: {}", info.git_url);
    println!("  Branch: {}", info.branch_name);
    println!(
        "  Sandbox path: {}{}",
        info.sandbox_path.display(),
        missing_marker(&info)
    );
    println!("  Base commit: {}", info.short_commit());
    Ok(())
}

fn list_sandboxes(manager: &SandboxManager) -> Result<()> {
    let sandboxes = manager.list_sandboxes()?;

    if sandboxes.is_empty() {
        println!("No sandboxes found.");
        return Ok(());
    }

    println!("Found {} sandbox(es):\n", sandboxes.len());
    for info in sandboxes {
        println!("  {}{}", info.name, missing_marker(&info));
        println!("    Project: {}", info.project_name);
        println!("    Branch: {}", info.branch_name);
        println!("    Created: {}", info.created.format("%Y-%m-%d %H:%M"));
        println!();
    }
    Ok(())
}

fn missing_marker(info: &SandboxInfo) -> &'static str {
    if info.is_present() {
        ""
    } else {
        " (missing)"
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
