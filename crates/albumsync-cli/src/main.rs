use std::path::PathBuf;
use std::time::Instant;

use albumsync_core::config::{ENV_API_ENDPOINT, ENV_TIMEOUT_SECS};
use albumsync_core::date::exif::ExifReader;
use albumsync_core::{
    ingest, ApiClient, AlbumStore, ClientConfig, IngestContext, IngestOptions, MediaItem,
    MimeGuess, Notifier, ProcessResult, RemoteMedia, MANIFEST_FILENAME,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "albumsync", version, about = "Upload local photos and videos to a self-hosted album server")]
struct Cli {
    /// Base URL of the album API
    #[arg(long, global = true, env = ENV_API_ENDPOINT)]
    api_endpoint: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = ENV_TIMEOUT_SECS)]
    timeout: Option<u64>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Subcommand)]
enum Command {
    /// List albums
    Albums,
    /// Create an album
    Create { name: String },
    /// Rename an album
    Rename { name: String, new_name: String },
    /// Delete an album
    Delete { name: String },
    /// Ask the server to re-index an album's media
    Fix { name: String },
    /// List the media of an album
    Media {
        album: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Delete one media entry
    DeleteMedia {
        #[arg(long)]
        id: String,
        #[arg(long)]
        path: String,
        /// Delete every media of the entry's album
        #[arg(long)]
        select_all: bool,
    },
    /// Upload files and directories to an album in batches
    Upload {
        album: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
        /// Where failed items are recorded
        #[arg(long, default_value = MANIFEST_FILENAME)]
        manifest: PathBuf,
    },
    /// Resend the items recorded by a previous upload
    Retry {
        #[arg(long, default_value = MANIFEST_FILENAME)]
        manifest: PathBuf,
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
    },
    /// Upload a single file
    UploadOne { album: String, file: PathBuf },
    /// Download one media file
    Download {
        remote_path: String,
        dest: PathBuf,
        /// Set the file's modification time (RFC 3339)
        #[arg(long)]
        captured_at: Option<DateTime<Utc>>,
    },
}

/// Prints notices above the progress bar.
struct ConsoleNotifier {
    pb: ProgressBar,
}

impl Notifier for ConsoleNotifier {
    fn error(&self, title: &str, message: &str) {
        self.pb.suspend(|| eprintln!("{}: {}", title, message));
    }

    fn info(&self, title: &str, message: &str) {
        self.pb.suspend(|| eprintln!("{}: {}", title, message));
    }
}

fn percent_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn client_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let endpoint = cli
        .api_endpoint
        .clone()
        .context("No API endpoint given: pass --api-endpoint or set ALBUMSYNC_API_ENDPOINT")?;
    let mut config = ClientConfig::new(endpoint);
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.log_level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = client_config(&cli)?;
    tracing::debug!("Using API endpoint {}", config.base_url());
    let client = ApiClient::new(&config)?;

    match cli.command {
        Command::Albums => {
            for album in client.list_albums()? {
                println!(
                    "{}\t{}",
                    album.folder,
                    album.file_count.map_or("-".to_string(), |n| n.to_string())
                );
            }
        }
        Command::Create { name } => {
            client.create_album(&name)?;
            eprintln!("Created album {}", name);
        }
        Command::Rename { name, new_name } => {
            client.rename_album(&name, &new_name)?;
            eprintln!("Renamed album {} to {}", name, new_name);
        }
        Command::Delete { name } => {
            client.delete_album(&name)?;
            eprintln!("Deleted album {}", name);
        }
        Command::Fix { name } => {
            client.fix_album_media(&name)?;
            eprintln!("Re-indexed album {}", name);
        }
        Command::Media {
            album,
            offset,
            limit,
        } => {
            for media in client.list_media(&album, offset, limit)? {
                println!("{}\t{}", media.id, media.path);
            }
        }
        Command::DeleteMedia {
            id,
            path,
            select_all,
        } => {
            let media = RemoteMedia {
                id: id.into(),
                path,
                extra: Default::default(),
            };
            client.delete_media(&media, select_all)?;
            eprintln!("Deleted {}", media.path);
        }
        Command::Upload {
            album,
            paths,
            batch_size,
            manifest,
        } => {
            let options = IngestOptions {
                album,
                paths,
                batch_size,
                manifest_path: Some(manifest),
            };
            run_batches(&client, |ctx, on_progress| {
                albumsync_core::process(&options, ctx, on_progress).map(Some)
            })?;
        }
        Command::Retry {
            manifest,
            batch_size,
        } => {
            run_batches(&client, |ctx, on_progress| {
                albumsync_core::retry_failed(&manifest, batch_size, ctx, on_progress)
            })?;
        }
        Command::UploadOne { album, file } => {
            let item = MediaItem::from_path(&file, &MimeGuess)
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let entry = ingest::prepare_entry(&item, &ExifReader, &MimeGuess);
            let pb = percent_bar();
            pb.set_message(entry.display_name.clone());
            client.upload_media(&album, &entry, &|p| pb.set_position(p as u64))?;
            pb.finish_and_clear();
            eprintln!("Uploaded {} to {}", entry.display_name, album);
        }
        Command::Download {
            remote_path,
            dest,
            captured_at,
        } => {
            let pb = percent_bar();
            pb.set_message(remote_path.clone());
            let bytes =
                client.download_media(&remote_path, &dest, captured_at, &|p| {
                    pb.set_position(p as u64)
                })?;
            pb.finish_and_clear();
            eprintln!("Downloaded {} ({} bytes)", dest.display(), bytes);
        }
    }

    Ok(())
}

/// Run an upload with a progress bar and print the summary.
fn run_batches<F>(client: &ApiClient, run: F) -> anyhow::Result<()>
where
    F: FnOnce(&IngestContext<'_>, &albumsync_core::ProgressCallback<'_>) -> anyhow::Result<Option<ProcessResult>>,
{
    let t_total = Instant::now();
    let pb = percent_bar();
    let notifier = ConsoleNotifier { pb: pb.clone() };
    let ctx = IngestContext {
        albums: client,
        transport: client,
        metadata: &ExifReader,
        mime: &MimeGuess,
        notifier: &notifier,
    };

    let progress_bar = pb.clone();
    let result = run(&ctx, &move |p| progress_bar.set_position(p as u64));
    pb.finish_and_clear();

    let Some(result) = result? else {
        eprintln!("Nothing to retry");
        return Ok(());
    };

    eprintln!(
        "Done! {} media files, {} sent, {} failed ({:.2}s)",
        result.total_media,
        result.sent,
        result.failed,
        t_total.elapsed().as_secs_f64()
    );
    if let Some(manifest) = result.manifest {
        anyhow::bail!(
            "{} items failed; run `albumsync retry --manifest {}` to send them again",
            result.failed,
            manifest.display()
        );
    }
    Ok(())
}
