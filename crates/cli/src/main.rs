use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use booksearch_core::config::{config_path, load_config, AppConfig};
use booksearch_core::cover::{select_cover, CoverStorage, LocalCoverStorage};
use booksearch_core::error::StorageError;
use booksearch_core::isbn::{CodeType, Isbn};
use booksearch_core::persist::{MemorySitePersistence, SitePersistence, TomlSitePersistence};
use booksearch_core::provider::{builtin_providers, ProviderId};
use booksearch_core::registry::{ListType, SiteRegistry};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "booksearch")]
#[command(about = "Book metadata search sites, ISBN checks and cover candidates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Site preferences file (overrides sites.state_file)
    #[arg(long, global = true)]
    state: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show and change search site lists
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },

    /// Validate an ISBN or barcode
    Isbn {
        /// Code to check
        code: String,

        /// Also accept UPC-A and EAN-13 barcodes
        #[arg(long)]
        lenient: bool,
    },

    /// Keep the largest of several cover images, delete the rest
    Covers {
        /// Candidate image files, in order of preference
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Report the winner without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SitesAction {
    /// List sites in search order
    List {
        /// List type (data, covers, alted, view)
        #[arg(long, default_value = "data", value_parser = parse_list)]
        list: ListType,
    },
    /// Enable a site
    Enable {
        id: ProviderId,
        #[arg(long, default_value = "data", value_parser = parse_list)]
        list: ListType,
    },
    /// Disable a site
    Disable {
        id: ProviderId,
        #[arg(long, default_value = "data", value_parser = parse_list)]
        list: ListType,
    },
    /// Set the search order (comma-separated ids; unnamed sites go last)
    Order {
        ids: String,
        #[arg(long, default_value = "data", value_parser = parse_list)]
        list: ListType,
    },
    /// Forget preferences and restore the default order
    Reset {
        #[arg(long, default_value = "data", value_parser = parse_list)]
        list: ListType,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize default config file
    Init,
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Key (dot-separated path)
        key: String,
        /// Value
        value: String,
    },
}

fn parse_list(s: &str) -> Result<ListType, String> {
    ListType::from_key(s).ok_or_else(|| format!("unknown list '{}' (expected data, covers, alted or view)", s))
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Sites { action } => run_sites(action, cli.state.as_deref(), cli.json),
        Commands::Isbn { code, lenient } => run_isbn(code, *lenient, cli.json),
        Commands::Covers { files, dry_run } => run_covers(files, *dry_run, cli.json),
        Commands::Config { action } => run_config(action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open_registry(state: Option<&Path>) -> SiteRegistry {
    let path = state
        .map(Path::to_path_buf)
        .or_else(|| load_config().sites.state_path());
    let persistence: Arc<dyn SitePersistence> = match path {
        Some(p) => Arc::new(TomlSitePersistence::open(p)),
        None => {
            tracing::warn!("No config directory, site preferences will not be saved");
            Arc::new(MemorySitePersistence::new())
        }
    };
    SiteRegistry::load(builtin_providers(), persistence)
}

#[derive(Serialize)]
struct SiteRow {
    id: ProviderId,
    name: String,
    enabled: bool,
}

fn run_sites(action: &SitesAction, state: Option<&Path>, json: bool) -> CliResult {
    let registry = open_registry(state);
    let list = match action {
        SitesAction::List { list } => *list,
        SitesAction::Enable { id, list } | SitesAction::Disable { id, list } => {
            let enable = matches!(action, SitesAction::Enable { .. });
            if !registry.set_enabled(*list, *id, enable) {
                return Err(format!("Site {} is not in the {} list", id, list.key()).into());
            }
            *list
        }
        SitesAction::Order { ids, list } => {
            let named = SiteRegistry::reorder(&registry.list_for(*list), ids);
            if named.is_empty() {
                return Err(format!("No site of the {} list named in '{}'", list.key(), ids).into());
            }
            registry.set_order(*list, named);
            *list
        }
        SitesAction::Reset { list } => {
            registry.reset(*list);
            *list
        }
    };

    let rows: Vec<SiteRow> = registry
        .list_for(list)
        .into_iter()
        .map(|s| SiteRow {
            id: s.provider,
            name: registry.name_of(s.provider),
            enabled: s.enabled,
        })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            let mark = if row.enabled { "x" } else { " " };
            println!("[{}] {:>2}  {}", mark, row.id.0, row.name);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct IsbnReport {
    input: String,
    digits: String,
    kind: CodeType,
    valid: bool,
    isbn13: Option<String>,
    isbn10: Option<String>,
}

fn run_isbn(code: &str, lenient: bool, json: bool) -> CliResult {
    let isbn = Isbn::parse(code);
    let report = IsbnReport {
        input: code.to_string(),
        digits: isbn.digits().to_string(),
        kind: isbn.kind(),
        valid: isbn.is_valid(!lenient),
        isbn13: isbn.to_isbn13(),
        isbn10: isbn.to_isbn10(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Code:    {}", report.digits);
        println!("Type:    {:?}", report.kind);
        if let Some(thirteen) = &report.isbn13 {
            println!("ISBN-13: {}", thirteen);
        }
        if let Some(ten) = &report.isbn10 {
            println!("ISBN-10: {}", ten);
        }
    }
    if !report.valid {
        return Err(format!("'{}' is not a valid {}", code, if lenient { "ISBN or barcode" } else { "ISBN" }).into());
    }
    Ok(())
}

/// Local storage that only reports what it would delete.
struct DryRunStorage;

impl CoverStorage for DryRunStorage {
    fn exists(&self, path: &Path) -> bool {
        LocalCoverStorage.exists(path)
    }

    fn dimensions(&self, path: &Path) -> Result<(u32, u32), StorageError> {
        LocalCoverStorage.dimensions(path)
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        tracing::info!("Would delete {}", path.display());
        Ok(())
    }
}

#[derive(Serialize)]
struct CoversReport {
    winner: Option<PathBuf>,
    removed: Vec<PathBuf>,
    errors: Vec<String>,
}

fn run_covers(files: &[PathBuf], dry_run: bool, json: bool) -> CliResult {
    let existing: Vec<PathBuf> = files.iter().filter(|f| f.is_file()).cloned().collect();
    let selection = if dry_run {
        select_cover(&DryRunStorage, files)
    } else {
        select_cover(&LocalCoverStorage, files)
    };
    let removed = existing
        .into_iter()
        .filter(|f| Some(f) != selection.winner.as_ref() && (dry_run || !f.exists()))
        .collect();
    let report = CoversReport {
        winner: selection.winner,
        removed,
        errors: selection.errors.iter().map(|e| e.to_string()).collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &report.winner {
            Some(w) => println!("Kept: {}", w.display()),
            None => println!("No usable image among {} file(s)", files.len()),
        }
        let verb = if dry_run { "Would remove" } else { "Removed" };
        for f in &report.removed {
            println!("{}: {}", verb, f.display());
        }
        for e in &report.errors {
            eprintln!("Failed: {}", e);
        }
    }
    if report.winner.is_none() {
        return Err("No candidate could be read as an image".into());
    }
    Ok(())
}

fn run_config(action: &ConfigAction, json: bool) -> CliResult {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let default_cfg = AppConfig::default();
            let toml = toml::to_string_pretty(&default_cfg)?;
            std::fs::write(&path, toml)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Set { key, value } => {
            let path = config_path().ok_or("Could not determine config directory")?;
            let mut cfg: AppConfig = if path.exists() {
                let s = std::fs::read_to_string(&path)?;
                toml::from_str(&s).unwrap_or_else(|_| AppConfig::default())
            } else {
                AppConfig::default()
            };

            set_config_key(&mut cfg, key, value)?;

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&cfg)?;
            std::fs::write(&path, toml)?;
            if !json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    value
        .parse()
        .map_err(|_| format!("{} expects true or false, got '{}'", key, value).into())
}

fn set_config_key(cfg: &mut AppConfig, key: &str, value: &str) -> CliResult {
    let parts: Vec<&str> = key.splitn(2, '.').collect();
    match parts.as_slice() {
        ["search", sub] => match *sub {
            "strict_isbn" => cfg.search.strict_isbn = parse_bool(key, value)?,
            "fetch_front_cover" => cfg.search.fetch_front_cover = parse_bool(key, value)?,
            "fetch_back_cover" => cfg.search.fetch_back_cover = parse_bool(key, value)?,
            "covers_dir" => cfg.search.covers_dir = Some(value.to_string()),
            "connectivity_url" => cfg.search.connectivity_url = value.to_string(),
            "connect_timeout_secs" => {
                cfg.search.connect_timeout_secs = value
                    .parse()
                    .map_err(|_| format!("{} expects a number of seconds", key))?
            }
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        ["sites", "state_file"] => cfg.sites.state_file = Some(value.to_string()),
        _ => return Err(format!("Unknown key: {}", key).into()),
    }
    Ok(())
}
