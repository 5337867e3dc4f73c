//! chunkvault CLI
//!
//! Content-addressed, deduplicating file backups on local storage.

mod config;
mod progress;

use anyhow::Context;
use chunkvault_core::{
    BackupOptions, FsBlobStore, FsMetadataStore, ManifestId, MetadataStore, Pipeline,
    RestoreOptions, StoredManifest,
};
use chunkvault_files::FileSource;
use chunkvault_files::tree_hash::compute_tree_hash;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{ChunkProgress, format_bytes, format_ratio};

/// chunkvault - deduplicating backups with end-to-end integrity checks
#[derive(Parser)]
#[command(name = "chunkvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up one or more files
    Backup {
        /// Files to back up
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// MIME type recorded in the manifests
        #[arg(long)]
        mime_type: Option<String>,

        /// Caption recorded in the manifests
        #[arg(long)]
        caption: Option<String>,

        /// Mood recorded in the manifests
        #[arg(long)]
        mood: Option<String>,

        /// Owner recorded in the manifests
        #[arg(long)]
        owner: Option<String>,
    },

    /// List backups, newest first
    List {
        /// Only show this owner's backups
        #[arg(long)]
        owner: Option<String>,
    },

    /// Restore one backup
    Restore {
        /// Manifest id
        #[arg(required = true)]
        id: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Restore every backup of an owner
    RestoreAll {
        /// Only restore this owner's backups
        #[arg(long)]
        owner: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Check a local file against a backup's root hash
    Verify {
        /// Local file
        #[arg(required = true)]
        file: PathBuf,

        /// Manifest id
        #[arg(required = true)]
        id: String,
    },

    /// Show configuration and store summary
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if cli.config.is_some() {
        Config::load(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        Config::load_or_default(&config_path)?
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Backup {
            files,
            mime_type,
            caption,
            mood,
            owner,
        } => {
            let tags = BackupTags {
                mime_type,
                caption,
                mood,
                owner,
            };
            backup_files(files, tags, &config).await?;
        }
        Commands::List { owner } => {
            list_backups(owner, &config).await?;
        }
        Commands::Restore { id, output } => {
            restore_backup(id, output, &config).await?;
        }
        Commands::RestoreAll { owner, output } => {
            restore_all(owner, output, &config).await?;
        }
        Commands::Verify { file, id } => {
            verify_file(file, id, &config).await?;
        }
        Commands::Status => {
            show_status(&config_path, &config).await?;
        }
    }

    Ok(())
}

/// Open the configured stores and build a pipeline over them
async fn open_pipeline(config: &Config) -> anyhow::Result<(Pipeline, FsMetadataStore)> {
    let blobs = FsBlobStore::open(&config.storage.blob_dir)
        .await
        .with_context(|| format!("Cannot open blob store {}", config.storage.blob_dir.display()))?;
    let manifests = FsMetadataStore::open(&config.storage.manifest_dir)
        .await
        .with_context(|| {
            format!(
                "Cannot open manifest store {}",
                config.storage.manifest_dir.display()
            )
        })?;
    let pipeline = Pipeline::new(config.pipeline.clone(), Arc::new(blobs))?;
    Ok((pipeline, manifests))
}

async fn find_manifest(store: &FsMetadataStore, id: &str) -> anyhow::Result<StoredManifest> {
    store
        .get_manifest(&ManifestId::from(id))
        .await?
        .with_context(|| format!("No backup with id {id}"))
}

/// Name a restored file is written under, stripped of any directory parts
fn output_path(output: &Path, file_name: &str) -> anyhow::Result<PathBuf> {
    let name = Path::new(file_name)
        .file_name()
        .with_context(|| format!("Backup has unusable file name {file_name:?}"))?;
    Ok(output.join(name))
}

/// Metadata attached to every file of one `backup` invocation
struct BackupTags {
    mime_type: Option<String>,
    caption: Option<String>,
    mood: Option<String>,
    owner: Option<String>,
}

/// Back up files
async fn backup_files(files: Vec<PathBuf>, tags: BackupTags, config: &Config) -> anyhow::Result<()> {
    let (pipeline, manifests) = open_pipeline(config).await?;
    let mime_type = tags
        .mime_type
        .unwrap_or_else(|| config.backup.default_mime_type.clone());
    let owner = tags.owner.or_else(|| config.backup.owner_id.clone());
    let mut failures = 0usize;

    for file in &files {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let source = match FileSource::open(file) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Cannot open {}: {}", file.display(), e);
                failures += 1;
                continue;
            }
        };

        let (bar, tx) = ChunkProgress::start(&file_name, "Backing up");
        let mut options = BackupOptions::default().with_progress(tx);
        options.owner_id = owner.clone();
        options.caption = tags.caption.clone();
        options.mood = tags.mood.clone();

        match pipeline
            .backup_and_record(&manifests, &source, &file_name, &mime_type, options)
            .await
        {
            Ok(stored) => {
                bar.finish_with_message(format!("Backed up {file_name}")).await;
                println!("  id:     {}", stored.id);
                println!("  size:   {}", format_bytes(stored.manifest.file_size));
                println!("  chunks: {}", stored.manifest.chunk_count);
                println!("  root:   {}", stored.manifest.root_hash);
            }
            Err(e) => {
                bar.abandon().await;
                tracing::error!("Backup of {} failed: {}", file.display(), e);
                failures += 1;
            }
        }
    }

    let stats = pipeline.session().stats().snapshot();
    println!();
    println!("Files backed up: {}", stats.files_backed_up);
    println!(
        "Chunks uploaded: {} ({})",
        stats.chunks_uploaded,
        format_bytes(stats.bytes_uploaded)
    );
    println!(
        "Chunks deduplicated: {} ({})",
        stats.chunks_deduplicated,
        format_ratio(stats.dedup_ratio())
    );

    if failures > 0 {
        anyhow::bail!("{failures} of {} file(s) failed", files.len());
    }
    Ok(())
}

/// List backups
async fn list_backups(owner: Option<String>, config: &Config) -> anyhow::Result<()> {
    let store = FsMetadataStore::open(&config.storage.manifest_dir).await?;
    let manifests = store.list_manifests(owner.as_deref()).await?;

    if manifests.is_empty() {
        println!("No backups found");
        return Ok(());
    }

    println!(
        "{:<32}  {:<24}  {:>12}  {:>7}  {:>10}  CAPTION",
        "ID", "NAME", "SIZE", "CHUNKS", "CREATED"
    );
    for stored in &manifests {
        let m = &stored.manifest;
        println!(
            "{:<32}  {:<24}  {:>12}  {:>7}  {:>10}  {}",
            stored.id,
            m.file_name,
            format_bytes(m.file_size),
            m.chunk_count,
            m.created_at,
            m.caption.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Restore one backup into `output`
async fn restore_backup(id: String, output: PathBuf, config: &Config) -> anyhow::Result<()> {
    let (pipeline, manifests) = open_pipeline(config).await?;
    let stored = find_manifest(&manifests, &id).await?;
    let target = output_path(&output, &stored.manifest.file_name)?;

    let (bar, tx) = ChunkProgress::start(&stored.manifest.file_name, "Restoring");
    let options = RestoreOptions {
        progress: Some(tx),
        cancel: None,
    };
    let result = pipeline
        .restore_file_with(&stored.manifest, pipeline.blob_store().as_ref(), &options)
        .await;
    drop(options);

    let data = match result {
        Ok(data) => {
            bar.finish_with_message(format!("Restored {}", stored.manifest.file_name))
                .await;
            data
        }
        Err(e) => {
            bar.abandon().await;
            return Err(e.into());
        }
    };

    tokio::fs::create_dir_all(&output).await?;
    tokio::fs::write(&target, &data).await?;
    println!("Wrote {} ({})", target.display(), format_bytes(data.len() as u64));
    Ok(())
}

/// Restore every backup of an owner into `output`
async fn restore_all(owner: Option<String>, output: PathBuf, config: &Config) -> anyhow::Result<()> {
    let (pipeline, manifests) = open_pipeline(config).await?;
    let owner = owner.or_else(|| config.backup.owner_id.clone());

    let report = pipeline
        .restore_all(&manifests, owner.as_deref(), pipeline.blob_store().as_ref())
        .await?;

    tokio::fs::create_dir_all(&output).await?;
    for restored in &report.restored {
        let target = output_path(&output, &restored.file_name)?;
        tokio::fs::write(&target, &restored.data).await?;
        println!("Restored {} -> {}", restored.id, target.display());
    }
    for failure in &report.failed {
        eprintln!("Failed {} ({}): {}", failure.id, failure.file_name, failure.error);
    }

    if !report.is_success() {
        anyhow::bail!(
            "{} of {} backup(s) could not be restored",
            report.failed.len(),
            report.failed.len() + report.restored.len()
        );
    }
    Ok(())
}

/// Compare a local file's tree root with a backup's
async fn verify_file(file: PathBuf, id: String, config: &Config) -> anyhow::Result<()> {
    let manifests = FsMetadataStore::open(&config.storage.manifest_dir).await?;
    let stored = find_manifest(&manifests, &id).await?;
    let chunk_size = usize::try_from(stored.manifest.chunk_size)?;

    let path = file.clone();
    let tree = tokio::task::spawn_blocking(move || compute_tree_hash(path, chunk_size)).await??;

    println!("File:     {}", file.display());
    println!("Backup:   {} ({})", stored.id, stored.manifest.file_name);
    println!("Expected: {}", stored.manifest.root_hash);
    println!("Computed: {}", tree.root());

    if !tree.verify(&stored.manifest.root_hash) {
        anyhow::bail!("{} does not match backup {}", file.display(), stored.id);
    }
    println!("OK");
    Ok(())
}

/// Show configuration and store summary
async fn show_status(config_path: &Path, config: &Config) -> anyhow::Result<()> {
    println!("chunkvault {}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_path.display());
    println!();

    println!("Storage:");
    println!("  Blobs: {}", config.storage.blob_dir.display());
    println!("  Manifests: {}", config.storage.manifest_dir.display());
    println!();

    println!("Pipeline:");
    println!(
        "  Chunk size: {}",
        format_bytes(config.pipeline.chunk_size as u64)
    );
    println!("  Max attempts: {}", config.pipeline.max_attempts);
    println!(
        "  Filter: {} items, {} hash functions",
        config.pipeline.filter_expected_items, config.pipeline.filter_hash_functions
    );
    println!("  Hash workers: {}", config.pipeline.hash_workers);
    println!();

    let store = FsMetadataStore::open(&config.storage.manifest_dir).await?;
    let manifests = store.list_manifests(None).await?;
    let logical: u64 = manifests.iter().map(|m| m.manifest.file_size).sum();
    let chunks: u64 = manifests.iter().map(|m| m.manifest.chunk_count).sum();

    println!("Backups:");
    println!("  Files: {}", manifests.len());
    println!("  Logical size: {}", format_bytes(logical));
    println!("  Chunks referenced: {chunks}");

    Ok(())
}
