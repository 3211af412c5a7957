//! trackpanel - metadata cache tool for the production-tracking panel

mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use trackpanel_core::cache::persist;
use trackpanel_core::{CacheConfig, Fetcher, JsonExportFetcher, SchemaCache};

#[derive(Parser)]
#[command(
    name = "trackpanel",
    version,
    about = "Inspect and refresh the production-tracking metadata cache",
    long_about = "Reads the schema and status cache used by the tracking panel.\n\
                  \n\
                  Examples:\n\
                    trackpanel show                       # Summarize cached types and statuses\n\
                    trackpanel type CustomEntity03        # Display name of an entity type\n\
                    trackpanel field Shot sg_status_list  # Display name of a field\n\
                    trackpanel status ip --name-only      # Long name of a status code\n\
                    trackpanel refresh --from export.json # Rebuild the cache from an export\n\
                    trackpanel clear-cache                # Delete the cache files\n\
                  \n\
                  Environment Variables:\n\
                    TRACKPANEL_CACHE_DIR                  # Override cache directory\n\
                    TRACKPANEL_CONFIG                     # Path to config.toml\n\
                    RUST_LOG                              # Log filter (default: trackpanel=info)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: <config dir>/trackpanel/config.toml)
    #[arg(long, env = "TRACKPANEL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overrides the config file
    #[arg(long, env = "TRACKPANEL_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Project whose schema is fetched, overrides the config file
    #[arg(long, global = true)]
    project_id: Option<i64>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize cached entity types and status codes
    Show,
    /// Print the display name of an entity type
    Type {
        /// Entity type (e.g. Shot, CustomEntity03)
        entity_type: String,
    },
    /// Print the display name, data type and empty phrase of a field
    Field {
        entity_type: String,
        field_name: String,
    },
    /// Print the display name of a status code
    Status {
        /// Status code (e.g. ip)
        code: String,
        /// Omit the HTML colour marker
        #[arg(long)]
        name_only: bool,
    },
    /// Rebuild the cache from a JSON export of the production database
    Refresh {
        /// Export file with "schema" and "entities" sections
        #[arg(long)]
        from: PathBuf,
        /// Seconds to wait for the export to be read
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Delete the cache files and exit
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trackpanel=info,trackpanel_core=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let json = cli.json;

    match cli.command {
        Command::Show => {
            let cache = SchemaCache::new(config);
            cli::print_show(&cache, json)?;
        }
        Command::Type { entity_type } => {
            let cache = SchemaCache::new(config);
            cli::print_type(&cache, &entity_type, json)?;
        }
        Command::Field {
            entity_type,
            field_name,
        } => {
            let cache = SchemaCache::new(config);
            cli::print_field(&cache, &entity_type, &field_name, json)?;
        }
        Command::Status { code, name_only } => {
            let cache = SchemaCache::new(config);
            cli::print_status(&cache, &code, name_only, json)?;
        }
        Command::Refresh { from, timeout } => {
            run_refresh(config, from, Duration::from_secs(timeout), json).await?;
        }
        Command::ClearCache => {
            run_clear_cache(&config)?;
        }
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<CacheConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => dirs::config_dir().map(|d| d.join("trackpanel").join("config.toml")),
    };

    let mut config = match path {
        // An explicit path must parse; the default location is optional
        Some(path) if cli.config.is_some() => CacheConfig::try_load(&path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        Some(path) => CacheConfig::load(&path),
        None => CacheConfig::default(),
    };

    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(project_id) = cli.project_id {
        config.project_id = project_id;
    }
    Ok(config)
}

async fn run_refresh(config: CacheConfig, from: PathBuf, timeout: Duration, json: bool) -> Result<()> {
    if !from.exists() {
        anyhow::bail!("Export not found: {}", from.display());
    }

    // Loaded datasets are never re-fetched, so fetch into an empty staging
    // dir next to the cache and swap the files in once both datasets arrived
    std::fs::create_dir_all(&config.cache_dir)
        .with_context(|| format!("Failed to create {}", config.cache_dir.display()))?;
    let staging = tempfile::Builder::new()
        .prefix(".refresh-")
        .tempdir_in(&config.cache_dir)
        .context("Failed to create staging directory")?;
    let mut staged = config.clone();
    staged.cache_dir = staging.path().to_path_buf();

    let cache = SchemaCache::new(staged);
    let fetcher = Arc::new(JsonExportFetcher::new(
        from,
        tokio::runtime::Handle::current(),
    ));
    let mut replies = fetcher.subscribe();
    let handle: Arc<dyn Fetcher> = fetcher;
    cache.register_fetcher(Arc::clone(&handle));

    // Any lookup primes its dataset
    cache.get_type_display_name("");
    cache.get_status_long_name("");

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snap = cache.snapshot();
        if snap.pending_schema.is_none() && snap.pending_status.is_none() {
            break;
        }
        tokio::time::timeout_at(deadline, replies.recv())
            .await
            .context("Timed out waiting for export")?
            .context("Export fetcher closed")?;
        cache.dispatch_pending();
    }
    cache.unregister_fetcher(&handle);

    let snap = cache.snapshot();
    if snap.schema_loaded && snap.status_loaded {
        install_refreshed(cache.config(), &config)?;
    }
    cli::print_refresh(&cache, json)
}

/// Move freshly written cache files over the live ones
fn install_refreshed(staged: &CacheConfig, live: &CacheConfig) -> Result<()> {
    for (from, to) in [
        (staged.schema_path(), live.schema_path()),
        (staged.status_path(), live.status_path()),
    ] {
        std::fs::rename(&from, &to)
            .with_context(|| format!("Failed to install {}", to.display()))?;
    }
    tracing::info!(cache_dir = %live.cache_dir.display(), "Cache refreshed");
    Ok(())
}

fn run_clear_cache(config: &CacheConfig) -> Result<()> {
    let removed = persist::clear(&[config.schema_path().as_path(), config.status_path().as_path()])
        .with_context(|| format!("Failed to clear cache in {}", config.cache_dir.display()))?;

    if removed == 0 {
        println!("No cache files in {}", config.cache_dir.display());
    } else {
        println!(
            "Removed {} cache file(s) from {}",
            removed,
            config.cache_dir.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_export(path: &std::path::Path, type_name: &str) {
        let export = json!({
            "schema": {
                "types": {"Shot": {"name": {"value": type_name}}},
                "fields": {"Shot": {"code": {"name": {"value": "Shot Code"}, "data_type": {"value": "text"}}}}
            },
            "entities": {"Status": [{"code": "ip", "name": "In Progress"}]}
        });
        std::fs::write(path, serde_json::to_vec(&export).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_refresh_installs_both_files() {
        let dir = tempdir().unwrap();
        let export = dir.path().join("export.json");
        write_export(&export, "Shot Item");
        let config = CacheConfig::with_cache_dir(dir.path().join("cache"));

        run_refresh(config.clone(), export, Duration::from_secs(5), true)
            .await
            .unwrap();

        let cache = SchemaCache::new(config);
        assert!(cache.load_report().is_warm());
        assert_eq!(cache.get_type_display_name("Shot"), "Shot Item");
        assert_eq!(cache.get_status_long_name("ip"), "In Progress");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_warm_cache() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.json");
        write_export(&good, "Shot Item");
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        let config = CacheConfig::with_cache_dir(dir.path().join("cache"));

        run_refresh(config.clone(), good, Duration::from_secs(5), true)
            .await
            .unwrap();
        let result = run_refresh(config.clone(), bad, Duration::from_secs(5), true).await;
        assert!(result.is_err());

        let cache = SchemaCache::new(config.clone());
        assert!(cache.load_report().is_warm());
        assert_eq!(cache.get_type_display_name("Shot"), "Shot Item");

        // Staging dirs are cleaned up either way
        let leftovers: Vec<_> = std::fs::read_dir(&config.cache_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".refresh-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
