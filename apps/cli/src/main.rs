//! vfs-sync CLI
//!
//! Installs and removes the VFS files of an extracted package.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use vfs_installer::{
    ExtractedPackage, JsonInstallDatabase, ManifestFile, ManifestHandle, PackageContext, PathMappings,
    SharedFiles, SyncConfig, VfsReconciler,
};

const CONFIG_ENV: &str = "VFS_SYNC_CONFIG";
const DATABASE_ENV: &str = "VFS_SYNC_DATABASE";

#[derive(Parser)]
#[command(name = "vfs-sync")]
#[command(version)]
#[command(about = "Copy package VFS files to their real locations and remove them again", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a package's VFS files where the overwrite rules allow it
    Add {
        #[command(flatten)]
        target: PackageArgs,
    },

    /// Delete a package's VFS files and its package directory
    Remove {
        #[command(flatten)]
        target: PackageArgs,
    },
}

#[derive(Args)]
struct PackageArgs {
    /// Directory the package was extracted into
    #[arg(long)]
    package_dir: PathBuf,

    /// Package full name (default: the package directory name)
    #[arg(long)]
    package: Option<String>,

    /// Mapping table and settings as JSON (default: $VFS_SYNC_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Add the standard known-folder mappings to the table
    #[arg(long)]
    known_folders: bool,

    /// Install database shared by all users (default: $VFS_SYNC_DATABASE)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Principal the package is installed for (default: $USERNAME or $USER)
    #[arg(long)]
    user: Option<String>,
}

/// Manifest stand-in for packages whose manifest could not be opened
struct NoManifest;

impl ManifestHandle for NoManifest {
    fn release_manifest(&mut self) {}
}

fn main() {
    if dotenv::dotenv().is_ok() {
        eprintln!("Loaded environment variables from .env file");
    }

    let cli = Cli::parse();
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let result = match cli.command {
        Commands::Add { target } => run_add(&target),
        Commands::Remove { target } => run_remove(&target),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_add(args: &PackageArgs) -> Result<()> {
    let config = load_config(args)?;
    let mappings = build_mappings(&config, args)?;
    let package = package_context(args)?;
    let reconciler = VfsReconciler::with_config(&mappings, config.reconciler);

    let report = reconciler
        .execute_add(&package, &ExtractedPackage::new(&package.directory))
        .with_context(|| format!("Failed to install VFS files for {}", package.full_name))?;

    if let Some(database) = open_database(args)? {
        database
            .register(&package.full_name)
            .with_context(|| format!("Failed to record install in {}", database.path().display()))?;
    }

    println!(
        "{}: {} copied, {} kept, {} unmapped, {} failed",
        package.full_name,
        report.copied(),
        report.skipped(),
        report.unresolved(),
        report.failed()
    );
    Ok(())
}

fn run_remove(args: &PackageArgs) -> Result<()> {
    let config = load_config(args)?;
    let mappings = build_mappings(&config, args)?;
    let package = package_context(args)?;
    let database =
        open_database(args)?.ok_or_else(|| anyhow!("remove needs --database or ${} to be set", DATABASE_ENV))?;

    let manifest_path = package.file_path(&config.reconciler.manifest_file)?;
    let mut manifest: Box<dyn ManifestHandle> = match ManifestFile::open(&manifest_path) {
        Ok(manifest) => Box::new(manifest),
        Err(e) => {
            warn!(manifest = %manifest_path.display(), error = %e, "Proceeding without the package manifest");
            Box::new(NoManifest)
        }
    };

    let reconciler = VfsReconciler::with_config(&mappings, config.reconciler);
    let result = reconciler.execute_remove(&package, manifest.as_mut(), &database);

    // The package directory is gone either way, so drop this user's record
    if let Err(e) = database.unregister(&package.full_name) {
        warn!(database = %database.path().display(), error = %e, "Unable to update install database");
    }

    let report = result.with_context(|| format!("Failed to remove VFS files for {}", package.full_name))?;
    let shared = match report.shared_files {
        SharedFiles::Removed => "removed",
        SharedFiles::RetainedInstalledElsewhere => "kept for other users",
    };
    println!(
        "{}: VFS files {} ({} deleted, {} failed), {} package entries removed",
        package.full_name,
        shared,
        report.files.removed(),
        report.files.failed(),
        report.package_entries_removed
    );
    Ok(())
}

fn load_config(args: &PackageArgs) -> Result<SyncConfig> {
    let path = args.config.clone().or_else(|| env_path(CONFIG_ENV));
    match path {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            SyncConfig::load(&path).with_context(|| format!("Failed to load configuration {}", path.display()))
        }
        None => Ok(SyncConfig::default()),
    }
}

/// Config rows first, then known folders for tokens the config left out
fn build_mappings(config: &SyncConfig, args: &PackageArgs) -> Result<PathMappings> {
    let mut mappings = config.path_mappings()?;
    if args.known_folders || mappings.is_empty() {
        for (token, root) in PathMappings::from_known_folders().iter() {
            if mappings.get(token).is_none() {
                mappings.insert(token, root)?;
            }
        }
    }
    if mappings.is_empty() {
        return Err(anyhow!("No VFS mappings configured"));
    }
    info!(count = mappings.len(), "Using VFS mappings");
    Ok(mappings)
}

fn package_context(args: &PackageArgs) -> Result<PackageContext> {
    let full_name = match &args.package {
        Some(name) => name.clone(),
        None => directory_name(&args.package_dir)
            .ok_or_else(|| anyhow!("Cannot derive a package name from {}", args.package_dir.display()))?,
    };
    Ok(PackageContext::new(full_name, &args.package_dir))
}

fn open_database(args: &PackageArgs) -> Result<Option<JsonInstallDatabase>> {
    let Some(path) = args.database.clone().or_else(|| env_path(DATABASE_ENV)) else {
        return Ok(None);
    };
    let user = args
        .user
        .clone()
        .or_else(|| std::env::var("USERNAME").ok())
        .or_else(|| std::env::var("USER").ok())
        .ok_or_else(|| anyhow!("No user given and neither USERNAME nor USER is set"))?;
    Ok(Some(JsonInstallDatabase::new(path, user)))
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn directory_name(dir: &Path) -> Option<String> {
    dir.file_name().map(|n| n.to_string_lossy().into_owned())
}
