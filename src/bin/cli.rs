//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! CLI over a single MinIO / S3 bucket.
//!
//! Connection settings come from `MINIO_*` variables (or a `.env` file).
//!
//! Examples:
//! ```bash
//! s3fs-cli put    ./report.pdf docs/report.pdf   # prints the name actually used
//! s3fs-cli get    docs/report.pdf ./copy.pdf
//! s3fs-cli ls     docs/
//! s3fs-cli stat   docs/report.pdf
//! s3fs-cli url    docs/report.pdf
//! s3fs-cli --public-urls url docs/report.pdf
//! s3fs-cli available-name docs/report.pdf --max-length 20
//! ```

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use futures::StreamExt;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use s3filestore::{BucketStorage, ClientRegistry, StorageConfig};

/// Print to stdout, exiting quietly when the pipe closes (e.g. `| head`).
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                std::process::exit(0);
            }
            Err(e) => return Err(e.into())
        }
    };
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Bucket to use instead of MINIO_BUCKET_NAME
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Replace existing objects on put instead of picking a new name
    #[arg(long, global = true)]
    overwrite: bool,

    /// Print static public URLs instead of presigned ones
    #[arg(long, global = true)]
    public_urls: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file. Prints the object name that was written.
    Put {
        file: PathBuf,
        /// Object name; defaults to the file name
        name: Option<String>,
    },
    /// Download an object to a file, or to stdout when no file is given.
    Get {
        name: String,
        output: Option<PathBuf>,
    },
    /// Delete an object.
    Rm { name: String },
    /// Show object metadata.
    Stat { name: String },
    /// Print whether an object exists.
    Exists { name: String },
    /// List the immediate children of a prefix.
    Ls {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Print a URL for an object.
    Url { name: String },
    /// Print the name a new upload of `name` would get.
    AvailableName {
        name: String,
        #[arg(long)]
        max_length: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = StorageConfig::from_env()?;
    if let Some(bucket) = cli.bucket {
        config.bucket_name = Some(bucket);
    }
    if cli.overwrite {
        config.overwrite_files = true;
    }
    if cli.public_urls {
        config.presigned_url = false;
    }

    let registry = ClientRegistry::s3();
    let storage = BucketStorage::connect(&config, &registry)
        .await
        .context("failed to connect to object store")?;

    match cli.cmd {
        Command::Put { file, name } => put_cmd(&storage, file, name).await?,
        Command::Get { name, output } => get_cmd(&storage, &name, output).await?,
        Command::Rm { name } => {
            storage.delete(&name).await?;
            info!("Deleted {}", name);
        }
        Command::Stat { name } => {
            let stat = storage.stat(&name).await?;
            safe_println!("Name            : {}", name);
            safe_println!("Size            : {}", stat.size);
            safe_println!("LastModified    : {}", stat.last_modified);
            if let Some(ref et) = stat.e_tag {
                safe_println!("ETag            : {}", et);
            }
            if let Some(ref ct) = stat.content_type {
                safe_println!("Content-Type    : {}", ct);
            }
        }
        Command::Exists { name } => {
            safe_println!("{}", storage.try_exists(&name).await?);
        }
        Command::Ls { prefix } => {
            let mut entries = storage.listdir(&prefix);
            let mut count = 0usize;
            while let Some(entry) = entries.next().await {
                let entry = entry?;
                if entry.is_dir {
                    safe_println!("{:>12}  {}", "DIR", entry.key);
                } else {
                    safe_println!("{:>12}  {}", entry.size, entry.key);
                }
                count += 1;
            }
            info!("{} entries under {:?}", count, prefix);
        }
        Command::Url { name } => {
            safe_println!("{}", storage.url(&name).await?);
        }
        Command::AvailableName { name, max_length } => {
            safe_println!("{}", storage.get_available_name(&name, max_length).await?);
        }
    }

    Ok(())
}

async fn put_cmd(storage: &BucketStorage, file: PathBuf, name: Option<String>) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .with_context(|| format!("cannot derive an object name from {}", file.display()))?,
    };

    let t0 = Instant::now();
    let source = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let saved = storage.save_reader(&name, source).await?;
    info!("Uploaded {} as {} in {:?}", file.display(), saved, t0.elapsed());

    safe_println!("{}", saved);
    Ok(())
}

async fn get_cmd(storage: &BucketStorage, name: &str, output: Option<PathBuf>) -> Result<()> {
    let t0 = Instant::now();
    let mut object = storage.open(name).await?;

    let copied = match output {
        Some(path) => {
            let mut out = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            tokio::io::copy(&mut object, &mut out).await?
        }
        None => {
            let mut out = tokio::io::stdout();
            tokio::io::copy(&mut object, &mut out).await?
        }
    };
    object.close();

    info!("Downloaded {} ({} bytes) in {:?}", name, copied, t0.elapsed());
    Ok(())
}
