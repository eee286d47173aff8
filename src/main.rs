// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use debforge::packages::manifest;
use debforge::rebuild::TracingSink;
use debforge::rebuild::bundle::{self, DEFAULT_BUNDLE_NAME};
use debforge::{
    BatchStatus, Compression, CompressionFormat, Database, DatabaseOptions, LoadMode,
    RebuildOptions, RebuildResult, Rebuilder, Selection, SortOrder,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "debforge")]
#[command(author, version, about = "Rebuild .deb archives from an installed dpkg database", long_about = None)]
struct Cli {
    /// Filesystem root the database and package files live under
    #[arg(short, long, default_value = "/", global = true)]
    root: PathBuf,

    /// dpkg admin directory, relative to the root
    #[arg(long, default_value = debforge::db::DEFAULT_ADMIN_DIR, global = true)]
    admin_dir: PathBuf,

    /// Hold dpkg's lock while reading the status file
    #[arg(long, global = true)]
    lock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed packages
    List {
        /// Sort by identifier instead of status file order
        #[arg(short, long)]
        sorted: bool,
        /// Only packages nothing else depends on
        #[arg(short, long)]
        leaves: bool,
    },
    /// Show the control record and files of a package
    Show {
        /// Package identifier
        package: String,
    },
    /// Rebuild .deb archives of installed packages
    Rebuild {
        /// Package identifiers (default: leaves)
        packages: Vec<String>,
        /// Rebuild every installed package instead of leaves
        #[arg(short, long, conflicts_with = "packages")]
        all: bool,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Worker threads (default: available parallelism)
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Member compression: gz, xz, zst or none
        #[arg(short, long, default_value = "gz")]
        compression: CompressionFormat,
        /// Compression level (default depends on the format)
        #[arg(long)]
        level: Option<u32>,
        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,
        /// Pack the rebuilt archives into one .tar.gz in the output directory
        #[arg(short = 'A', long)]
        archive: bool,
        /// File name of the bundle
        #[arg(long, default_value = DEFAULT_BUNDLE_NAME)]
        archive_name: String,
        /// Delete the .deb files once bundled
        #[arg(short = 'R', long, requires = "archive")]
        remove_after: bool,
    },
}

fn open_database(cli: &Cli, load: LoadMode) -> Result<Database> {
    let options = DatabaseOptions {
        admin_dir: cli.admin_dir.clone(),
        load,
        lock: cli.lock,
    };
    Database::open_with(&cli.root, &options)
        .with_context(|| format!("Failed to open dpkg database under {}", cli.root.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::List { sorted, leaves } => {
            let db = open_database(&cli, LoadMode::from(*leaves))?;
            let order = if *sorted {
                SortOrder::ByIdentifier
            } else {
                SortOrder::Unsorted
            };

            let packages = if *leaves {
                db.leaves(order)
            } else {
                db.list_packages(order)
            };

            for pkg in &packages {
                println!("{}\t{}\t{}", pkg.identifier(), pkg.version(), pkg.section());
            }
            info!("{} packages", packages.len());
            Ok(())
        }
        Commands::Show { package } => {
            let db = open_database(&cli, LoadMode::Deferred)?;
            let record = db
                .get(package)
                .ok_or_else(|| anyhow::anyhow!("Package '{}' is not installed", package))?;

            print!("{}", record.to_control());

            match manifest::resolve(&db, package) {
                Ok(files) => {
                    println!();
                    for entry in &files.entries {
                        let marker = if entry.is_missing() { " (missing)" } else { "" };
                        println!("{}{}", entry.path.display(), marker);
                    }
                }
                Err(e) => eprintln!("No file list: {}", e),
            }
            Ok(())
        }
        Commands::Rebuild {
            packages,
            all,
            output,
            jobs,
            compression,
            level,
            json,
            archive,
            archive_name,
            remove_after,
        } => {
            let selection = Selection::from_args(packages.clone(), *all);
            let db = open_database(&cli, LoadMode::from(selection == Selection::Leaves))?;
            let requested = selection.identifiers(&db);

            let mut compression = Compression::new(*compression);
            if let Some(level) = level {
                compression = compression.with_level(*level);
            }

            let mut options = RebuildOptions::new(output).compression(compression);
            if let Some(jobs) = jobs {
                options = options.workers(*jobs);
            }

            std::fs::create_dir_all(output)
                .with_context(|| format!("Failed to create {}", output.display()))?;

            let report = Rebuilder::new(&db, options).rebuild(&requested, &mut TracingSink);

            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for result in &report.results {
                    match result {
                        RebuildResult::Success { output_path, .. } => {
                            println!("ok\t{}\t{}", result.package(), output_path.display())
                        }
                        RebuildResult::Failure { message, .. } => {
                            println!("failed\t{}\t{}", result.package(), message)
                        }
                    }
                }
            }

            if *archive && report.succeeded().next().is_some() {
                let written = bundle::bundle(&report, &output.join(archive_name), *remove_after)?;
                info!("Bundle written to {}", written.path.display());
            }

            match report.status {
                BatchStatus::AllSucceeded => Ok(()),
                BatchStatus::NothingRequested => {
                    info!("Nothing to rebuild");
                    Ok(())
                }
                BatchStatus::PartialSuccess | BatchStatus::TotalFailure => Err(anyhow::anyhow!(
                    "{} of {} packages failed to rebuild",
                    report.failed().count(),
                    report.results.len()
                )),
            }
        }
    }
}
