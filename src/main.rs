use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cubby::config::Config;
use cubby::sandbox::{CreateOptions, ExecRequest, SandboxManager};

#[derive(Parser)]
#[command(name = "cubby")]
#[command(
    author,
    version,
    about = "Ephemeral sandboxes - run commands in confined, throwaway roots"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command inside a fresh sandbox
    Run {
        /// Directory under which the sandbox root is created
        #[arg(long, env = "CUBBY_ROOT")]
        root: Option<PathBuf>,

        /// Timeout in milliseconds (0 disables)
        #[arg(long)]
        timeout_ms: Option<i64>,

        /// Environment overlay entries, KEY=VALUE
        #[arg(short, long)]
        env: Vec<String>,

        /// Run through `sh -c` instead of spawning directly
        #[arg(long)]
        shell: bool,

        /// Keep the sandbox directory instead of destroying it
        #[arg(long)]
        keep: bool,

        /// TTL in seconds recorded on the sandbox (with --keep)
        #[arg(long)]
        ttl: Option<f64>,

        /// Command and arguments to execute
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Remove leftover sandbox directories under the root
    Clean {
        /// Directory holding sandbox roots
        #[arg(long, env = "CUBBY_ROOT")]
        root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("cubby=debug")
    } else {
        EnvFilter::new("cubby=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            root,
            timeout_ms,
            env,
            shell,
            keep,
            ttl,
            command,
        } => {
            let code = run(root, timeout_ms, env, shell, keep, ttl, command).await?;
            std::process::exit(code);
        }
        Commands::Clean { root } => {
            clean(root).await?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run(
    root: Option<PathBuf>,
    timeout_ms: Option<i64>,
    env: Vec<String>,
    shell: bool,
    keep: bool,
    ttl: Option<f64>,
    command: Vec<String>,
) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd)?;
    let root_dir = root.unwrap_or_else(|| config.local.effective_root_dir());

    let manager = SandboxManager::local(&root_dir);
    let sandbox = manager
        .create(CreateOptions {
            ttl_seconds: ttl.or(config.local.default_ttl_seconds),
            ..CreateOptions::default()
        })
        .await
        .context("Failed to create sandbox")?;

    let request = build_request(command, env, shell, timeout_ms)?;
    let outcome = sandbox.exec(&request).await;

    if keep {
        if let Some(path) = sandbox.root() {
            eprintln!("{} sandbox kept at {}", "→".cyan(), path.display());
        }
    } else {
        manager
            .delete(&sandbox.id().to_string())
            .await
            .context("Failed to destroy sandbox")?;
    }

    let result = outcome.context("Command execution failed")?;
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);

    if result.timed_out {
        eprintln!(
            "{} command timed out after {}ms",
            "✗".red(),
            result.duration_ms
        );
        return Ok(124);
    }

    Ok(result.exit_code.unwrap_or(1))
}

fn build_request(
    command: Vec<String>,
    env: Vec<String>,
    shell: bool,
    timeout_ms: Option<i64>,
) -> Result<ExecRequest> {
    let mut overlay = BTreeMap::new();
    for entry in env {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("Invalid env entry '{entry}', expected KEY=VALUE"))?;
        overlay.insert(key.to_string(), value.to_string());
    }

    let (command, args) = if shell {
        (command.join(" "), Vec::new())
    } else {
        let mut words = command.into_iter();
        let head = words.next().context("A command is required")?;
        (head, words.collect())
    };

    Ok(ExecRequest {
        command,
        args,
        stdin: None,
        env: overlay,
        use_shell: shell,
        timeout_ms,
    })
}

async fn clean(root: Option<PathBuf>) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd)?;
    let root_dir = root.unwrap_or_else(|| config.local.effective_root_dir());

    if !root_dir.exists() {
        println!("{} Nothing to clean at {}", "ℹ".blue(), root_dir.display());
        return Ok(());
    }

    let mut removed = 0u32;
    let mut reader = tokio::fs::read_dir(&root_dir)
        .await
        .with_context(|| format!("Failed to read {}", root_dir.display()))?;
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            tokio::fs::remove_dir_all(&path)
                .await
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            removed += 1;
        }
    }

    println!(
        "{} Removed {} sandbox director{} under {}",
        "✓".green(),
        removed,
        if removed == 1 { "y" } else { "ies" },
        root_dir.display()
    );
    Ok(())
}
