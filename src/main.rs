use clap::{Args, Parser, Subcommand};
use secret_sync::backend::{self, KeyPolicy};
use secret_sync::config::Config;
use secret_sync::mask::Masker;
use secret_sync::model::{DiffStatus, Direction};
use secret_sync::render::{OutputFormat, RenderOptions, render};
use secret_sync::sync::{SecretSync, SyncOptions, plan};
use std::io::{BufRead, Write};
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
  name = "secret-sync",
  about = "Sync a local env file with AWS Secrets Manager or Parameter Store",
  version,
  author
)]
struct Cli {
  #[command(subcommand)]
  command: Command,

  /// Verbose output (-v for verbose, -vv for very verbose)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,
}

#[derive(Subcommand)]
enum Command {
  /// Push local env file changes to the remote backend
  Push(SyncArgs),
  /// Pull remote secrets into the local env file
  Pull(SyncArgs),
  /// Show differences between the local env file and the remote backend
  Diff(CommonArgs),
  /// Alias for diff
  Status(CommonArgs),
}

#[derive(Args)]
struct CommonArgs {
  /// Path to the local .env file
  #[arg(long, value_name = "FILE", default_value = ".env")]
  env_file: PathBuf,

  /// Path to the config file [default: .secretsync.toml]
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Output format: table or json
  #[arg(long, default_value = "table")]
  format: OutputFormat,

  /// Show sensitive values in plaintext
  #[arg(long)]
  no_mask: bool,

  /// Fail instead of skipping remote keys that are not valid identifiers
  #[arg(long)]
  strict: bool,
}

#[derive(Args)]
struct SyncArgs {
  #[command(flatten)]
  common: CommonArgs,

  /// Preview changes without writing anything
  #[arg(long)]
  dry_run: bool,

  /// Skip confirmation prompts (suitable for CI)
  #[arg(long)]
  force: bool,

  /// Delete target keys absent from the source of truth
  #[arg(long)]
  prune: bool,
}

fn setup_tracing(verbose: u8) {
  use tracing_subscriber::fmt;
  use tracing_subscriber::prelude::*;

  let log_level = match verbose {
    1 => "debug",
    2 => "trace",
    _ => "info",
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(tracing_subscriber::EnvFilter::new(
      std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
    ))
    .init();
}

fn warn_on_traversal(env_file: &Path) {
  if env_file.components().any(|c| c == Component::ParentDir) {
    let resolved = std::path::absolute(env_file).unwrap_or_else(|_| env_file.to_path_buf());
    eprintln!(
      "Warning: --env-file target '{}' contains path traversal (resolves to {}).",
      env_file.display(),
      resolved.display()
    );
  }
}

/// Asks on stderr, reads the answer from stdin. Anything but yes declines.
fn confirm(question: &str) -> std::io::Result<bool> {
  eprint!("{} [y/N] ", question);
  std::io::stderr().flush()?;

  let mut answer = String::new();
  std::io::stdin().lock().read_line(&mut answer)?;
  Ok(matches!(
    answer.trim().to_ascii_lowercase().as_str(),
    "y" | "yes"
  ))
}

async fn run(command: Command) -> Result<ExitCode, Box<dyn std::error::Error>> {
  let (common, sync_args, direction) = match command {
    Command::Push(args) => (
      args.common,
      Some((args.dry_run, args.force, args.prune)),
      Direction::Push,
    ),
    Command::Pull(args) => (
      args.common,
      Some((args.dry_run, args.force, args.prune)),
      Direction::Pull,
    ),
    Command::Diff(common) | Command::Status(common) => (common, None, Direction::Push),
  };

  warn_on_traversal(&common.env_file);

  let config = Config::load(common.config.as_deref())?.with_process_env()?;
  let policy = if common.strict {
    KeyPolicy::Strict
  } else {
    KeyPolicy::Lenient
  };
  let backend = backend::from_config(&config, policy).await?;
  let masker = Masker::default().with_fragments(&config.sensitive_fragments);
  let sync = SecretSync::new(backend.as_ref(), &common.env_file).with_masker(masker);

  let report = sync.prepare(direction).await?;
  let dry_run = sync_args.is_some_and(|(dry_run, _, _)| dry_run);
  let rendered = render(
    &report,
    &RenderOptions {
      format: common.format,
      unmask: common.no_mask,
      dry_run,
      backend: Some(backend.describe()),
    },
  )?;
  if let Some(warning) = &rendered.warning {
    eprintln!("{}", warning);
  }
  print!("{}", rendered.body);

  let Some((dry_run, force, prune)) = sync_args else {
    if !report.has_changes() {
      eprintln!("No differences found.");
    }
    return Ok(ExitCode::SUCCESS);
  };

  let preview = plan(&report, prune, dry_run)?;
  if !prune && report.entries_with(DiffStatus::Removed).next().is_some() {
    eprintln!(
      "Note: the {} has keys the {} lacks. Use --prune to delete them.",
      match direction {
        Direction::Push => "remote",
        Direction::Pull => "local file",
      },
      match direction {
        Direction::Push => "local file",
        Direction::Pull => "remote",
      },
    );
  }
  if preview.is_empty() {
    eprintln!("Nothing to {}: already in sync.", direction);
  }
  if dry_run {
    return Ok(ExitCode::SUCCESS);
  }

  let mut confirmed = false;
  if !preview.is_empty() && !force {
    let target = match direction {
      Direction::Push => backend.describe(),
      Direction::Pull => common.env_file.display().to_string(),
    };
    let changes = preview.writes().len() + preview.deletes().len();
    confirmed = confirm(&format!("Apply {} change(s) to {}?", changes, target))?;
    if !confirmed {
      eprintln!("Aborted.");
      return Ok(ExitCode::SUCCESS);
    }
  }

  let outcome = sync
    .execute(
      &report,
      &SyncOptions {
        prune,
        dry_run,
        confirmed,
        force,
      },
    )
    .await?;

  let applied = outcome.report.unwrap_or_default();
  match direction {
    Direction::Push => eprintln!(
      "Push complete: {} written, {} deleted.",
      applied.written.len(),
      applied.deleted.len()
    ),
    Direction::Pull => eprintln!("Pull complete: {}", common.env_file.display()),
  }

  Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  setup_tracing(cli.verbose);

  match run(cli.command).await {
    Ok(code) => code,
    Err(err) => {
      eprintln!("Error: {}", err);
      ExitCode::FAILURE
    }
  }
}
