//! Classdex CLI - Build, inspect and query a symbol-to-file index

use classdex_core::{Config, InitOutcome, Lookup, Resolver, SymbolStatus};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent
const LOCAL_CONFIG: &str = "classdex.toml";

#[derive(Parser)]
#[command(name = "classdex")]
#[command(about = "Resolve declared symbols to the files that define them", long_about = None)]
struct Cli {
    /// TOML config file (defaults to ./classdex.toml when present)
    #[arg(long, global = true, env = "CLASSDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Directory to scan (repeatable, appended to the config's list)
    #[arg(long = "include", global = true)]
    include: Vec<PathBuf>,

    /// Directory to prune from scans (repeatable)
    #[arg(long = "exclude", global = true)]
    exclude: Vec<PathBuf>,

    /// Directory holding cache and lock files
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Disable the persisted cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the index from cache or build it
    Init {
        /// Delete any existing cache and rebuild
        #[arg(long)]
        force: bool,
    },

    /// Resolve symbol names to files
    Lookup {
        /// Namespace-qualified names, e.g. 'App\Models\User'
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print index entries
    List {
        /// Only show symbols recorded as missing
        #[arg(long)]
        missing: bool,
    },

    /// Show the cache identity and file locations
    Identity,

    /// Delete the cache file (and a stale lock) for this configuration
    Clear,
}

#[derive(Serialize)]
struct LookupReport<'a> {
    name: &'a str,
    #[serde(flatten)]
    result: Lookup,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = build_resolver(&cli).and_then(|resolver| match &cli.command {
        Commands::Init { force } => cmd_init(resolver, *force, cli.json),
        Commands::Lookup { names } => cmd_lookup(resolver, names, cli.json),
        Commands::List { missing } => cmd_list(resolver, *missing, cli.json),
        Commands::Identity => cmd_identity(resolver, cli.json),
        Commands::Clear => cmd_clear(resolver, cli.json),
    });

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            if cli.json {
                let error_json = serde_json::json!({ "code": "error", "message": e.to_string() });
                eprintln!(
                    "{}",
                    serde_json::to_string_pretty(&error_json).unwrap_or_default()
                );
            } else {
                eprintln!("Error: {}", e);
            }
            std::process::exit(2);
        }
    }
}

/// Install the stderr subscriber; `CLASSDEX_LOG` overrides the default level
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CLASSDEX_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn build_resolver(cli: &Cli) -> classdex_core::Result<Resolver> {
    let mut config = load_config(cli.config.as_deref())?;

    for path in &cli.include {
        config = config.include_path(path);
    }
    for path in &cli.exclude {
        config = config.exclude_path(path);
    }
    if let Some(dir) = &cli.cache_dir {
        config = config.cache_dir(dir);
    }
    if cli.no_cache {
        config.cache.enabled = false;
    }

    Resolver::new(config)
}

fn load_config(explicit: Option<&Path>) -> classdex_core::Result<Config> {
    if let Some(path) = explicit {
        return Config::load(path);
    }

    let local = Path::new(LOCAL_CONFIG);
    if local.exists() {
        Config::load(local)
    } else {
        Ok(Config::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> classdex_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(mut resolver: Resolver, force: bool, json: bool) -> classdex_core::Result<bool> {
    use colored::Colorize;

    let outcome = resolver.init(force);

    if json {
        print_json(&serde_json::json!({
            "result": outcome,
            "entries": resolver.index().len(),
            "found": resolver.store().found_count(),
            "stats": resolver.stats(),
        }))?;
        return Ok(true);
    }

    match outcome {
        InitOutcome::AlreadyReady => println!("{}", "Already initialized".green()),
        InitOutcome::CacheLoaded { entries } => {
            println!("{}: {} entries from cache", "Loaded".green(), entries)
        }
        InitOutcome::Scanned { entries, persisted } => {
            let stats = resolver.stats();
            println!(
                "{}: {} symbols in {} files",
                "Indexed".green(),
                entries,
                stats.files_parsed
            );
            if stats.duplicates > 0 {
                println!(
                    "{}: {} duplicate declarations ignored",
                    "Warning".yellow(),
                    stats.duplicates
                );
            }
            if !persisted {
                println!("{}: index was not cached", "Note".yellow());
            }
        }
        InitOutcome::Degraded => println!(
            "{}: cache is locked by another process; lookups will scan on demand",
            "Degraded".yellow()
        ),
    }
    Ok(true)
}

fn cmd_lookup(mut resolver: Resolver, names: &[String], json: bool) -> classdex_core::Result<bool> {
    use colored::Colorize;

    let reports: Vec<LookupReport> = names
        .iter()
        .map(|name| LookupReport {
            name,
            result: resolver.lookup(name),
        })
        .collect();
    let all_found = reports
        .iter()
        .all(|r| matches!(r.result, Lookup::Found(_)));

    if json {
        print_json(&reports)?;
        return Ok(all_found);
    }

    for report in &reports {
        match &report.result {
            Lookup::Found(location) => {
                println!("{} {}", report.name.cyan(), location.display())
            }
            Lookup::NotFound => println!("{} {}", report.name.cyan(), "not found".red()),
        }
    }
    Ok(all_found)
}

fn cmd_list(mut resolver: Resolver, missing_only: bool, json: bool) -> classdex_core::Result<bool> {
    use colored::Colorize;

    resolver.init(false);
    let entries: Vec<_> = resolver
        .index()
        .iter()
        .filter(|(_, e)| !missing_only || e.status == SymbolStatus::Missing)
        .collect();

    if json {
        let mut map = serde_json::Map::new();
        for (key, entry) in &entries {
            map.insert(key.to_string(), serde_json::to_value(entry)?);
        }
        print_json(&map)?;
        return Ok(true);
    }

    for (_, entry) in &entries {
        match &entry.location {
            Some(location) => println!("{} {}", entry.name.cyan(), location.display()),
            None => println!(
                "{} {} (checked {}x)",
                entry.name.cyan(),
                "missing".yellow(),
                entry.last_check_count
            ),
        }
    }
    println!("{} entries", entries.len());
    Ok(true)
}

fn cmd_identity(resolver: Resolver, json: bool) -> classdex_core::Result<bool> {
    use colored::Colorize;

    let Some(cache) = resolver.cache_store() else {
        if json {
            print_json(&serde_json::json!({ "cache": "disabled" }))?;
        } else {
            println!("{}", "Cache disabled".yellow());
        }
        return Ok(true);
    };

    if json {
        print_json(&serde_json::json!({
            "identity": cache.identity(),
            "cache_file": cache.cache_path(),
            "lock_file": cache.lock_path(),
            "cache_exists": cache.exists(),
            "include": resolver.scan_config().include,
            "exclude": resolver.scan_config().exclude,
        }))?;
        return Ok(true);
    }

    println!("{}: {}", "Identity".blue(), cache.identity());
    println!("{}: {}", "Cache".blue(), cache.cache_path().display());
    println!("{}: {}", "Lock".blue(), cache.lock_path().display());
    for path in &resolver.scan_config().include {
        println!("{}: {}", "Include".blue(), path.display());
    }
    for path in &resolver.scan_config().exclude {
        println!("{}: {}", "Exclude".blue(), path.display());
    }
    Ok(true)
}

fn cmd_clear(mut resolver: Resolver, json: bool) -> classdex_core::Result<bool> {
    use colored::Colorize;

    let removed = resolver.clear_cache()?;
    if json {
        print_json(&serde_json::json!({ "removed": removed }))?;
    } else if removed {
        println!("{} cache file", "Removed".green());
    } else {
        println!("No cache file to remove");
    }
    Ok(true)
}
