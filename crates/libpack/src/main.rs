use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::error;

use libpack::config::ConfigLoader;
use libpack::file_system::os_file_system::OsFileSystem;
use libpack::file_system::FileSystemRef;
use libpack::stages::StageRegistry;
use libpack::{BuildReport, Libpack};
use libpack_core::cache::{CacheRef, FsCache, InMemoryCache};
use libpack_core::error::ConfigError;
use libpack_monitoring::{MonitoringOptions, TracerMode};

#[derive(Parser)]
#[command(name = "libpack", version, about = "Packages a library into its distributable variants")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Build every target of the configuration, or only the selected ones
  Build(BuildArgs),
}

#[derive(Args)]
struct BuildArgs {
  /// Defaults to libpack.config.json5 in the working directory
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Only build the named targets
  #[arg(short, long = "target")]
  targets: Vec<String>,

  /// Run every stage, without reading or writing the stage cache
  #[arg(long, conflicts_with = "cache_dir")]
  no_cache: bool,

  /// Keep the stage cache on disk across runs
  #[arg(long)]
  cache_dir: Option<PathBuf>,
}

const EXIT_TARGET_FAILED: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;

fn main() -> ExitCode {
  initialize_tracing();

  if let Err(error) = rayon::ThreadPoolBuilder::new()
    .thread_name(|i| format!("libpack-rayon-{i}"))
    .build_global()
  {
    error!("Failed to configure the thread pool: {}", error);
  }

  let cli = Cli::parse();
  let Command::Build(args) = cli.command;

  match build(args) {
    Ok(report) => {
      print_report(&report);
      if report.is_success() {
        ExitCode::SUCCESS
      } else {
        ExitCode::from(EXIT_TARGET_FAILED)
      }
    }
    Err(error) => {
      eprintln!("{:#}", error);
      if error.downcast_ref::<ConfigError>().is_some() {
        ExitCode::from(EXIT_CONFIG_ERROR)
      } else {
        ExitCode::from(EXIT_TARGET_FAILED)
      }
    }
  }
}

fn build(args: BuildArgs) -> anyhow::Result<BuildReport> {
  let fs: FileSystemRef = Arc::new(OsFileSystem);
  let registry = StageRegistry::default();

  let loader = ConfigLoader::new(fs.clone());
  let config_path = loader.config_path(args.config.as_deref())?;
  let config = loader
    .load(&config_path, &registry.names())?
    .select_targets(&args.targets)?;

  let cache: Option<CacheRef> = match (args.no_cache, args.cache_dir) {
    (true, _) => None,
    (false, Some(cache_dir)) => {
      let cache_dir = fs.canonicalize_base(&cache_dir)?;
      Some(Arc::new(FsCache::new(fs.clone(), cache_dir)))
    }
    (false, None) => Some(Arc::new(InMemoryCache::default())),
  };

  let libpack = Libpack::new(fs, cache).with_registry(registry);
  Ok(libpack.build(&config)?)
}

fn print_report(report: &BuildReport) {
  for target in &report.targets {
    match &target.error {
      None => println!(
        "{} {} ({} files, {:.2?})",
        target.state,
        target.name,
        target.outputs.len(),
        target.duration
      ),
      Some(error) => println!("{} {}: {}", target.state, target.name, error),
    }
  }
}

fn initialize_tracing() {
  if std::env::var("RUST_LOG").is_err() {
    std::env::set_var("RUST_LOG", "warn,libpack=info");
  }

  let mut options = match MonitoringOptions::from_env() {
    Ok(options) => options,
    Err(error) => {
      eprintln!("Ignoring invalid monitoring options: {}", error);
      MonitoringOptions::default()
    }
  };

  if options.tracing_options.is_empty() {
    options.tracing_options.push(TracerMode::Stdout);
  }

  if let Err(error) = libpack_monitoring::initialize_monitoring(options) {
    eprintln!("Failed to initialize tracing: {:#}", error);
  }
}
