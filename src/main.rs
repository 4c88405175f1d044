//! Prebuilt cache CLI
//!
//! Entry point for the `prebuilt-cache` command-line tool.

use clap::{Parser, Subcommand};
use prebuilt_cache::config::{default_host_config_path, default_project_config_path};
use prebuilt_cache::{
    ArchiveFormat, Archiver, BuildTarget, CacheCoordinator, EffectiveConfig, StoreOutcome,
    ToolchainVersion,
};
use serde_json::{json, Value};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prebuilt-cache")]
#[command(about = "Two-tier cache for prebuilt framework artifacts", version)]
struct Cli {
    /// Host config file (default: <config dir>/prebuilt-cache/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Disable the remote tier
    #[arg(long, global = true)]
    no_remote: bool,

    /// Disable the local tier (lookups always miss)
    #[arg(long, global = true)]
    no_local: bool,

    /// Enable the remote tier against this bucket
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Local cache root
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cache key and locations for a target
    Key {
        name: String,
        version: String,
        platform: String,

        /// Build option (repeatable, order matters)
        #[arg(long = "option", short = 'o')]
        options: Vec<String>,

        /// Also ask the remote store whether the object exists
        #[arg(long)]
        check_remote: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Look up a target; exits 0 on hit, 1 on miss
    Lookup {
        name: String,
        version: String,
        platform: String,

        /// Build option (repeatable, order matters)
        #[arg(long = "option", short = 'o')]
        options: Vec<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Store a build output directory for a target
    Store {
        name: String,
        version: String,
        platform: String,

        /// Directory whose contents are cached
        input_dir: PathBuf,

        /// Build option (repeatable, order matters)
        #[arg(long = "option", short = 'o')]
        options: Vec<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Pack directories into one archive; zip if the output ends in .zip
    Pack {
        /// Source directories; later ones never replace earlier entries
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Archive file to write
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// Unpack an archive into a directory without overwriting files
    Unpack {
        archive: PathBuf,
        dir: PathBuf,

        /// Delete the archive afterwards
        #[arg(long)]
        remove: bool,
    },

    /// Show the effective configuration with provenance
    Config {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the toolchain version used in cache keys
    Toolchain,
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("prebuilt_cache=warn,prebuilt_store=warn"),
        1 => EnvFilter::new("prebuilt_cache=info,prebuilt_store=info"),
        _ => EnvFilter::new("prebuilt_cache=debug,prebuilt_store=debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli);

    match cli.command {
        Commands::Key {
            name,
            version,
            platform,
            options,
            check_remote,
            json,
        } => run_key(
            &config,
            BuildTarget::new(name, version, platform),
            &options,
            check_remote,
            json,
        ),
        Commands::Lookup {
            name,
            version,
            platform,
            options,
            json,
        } => run_lookup(&config, BuildTarget::new(name, version, platform), &options, json),
        Commands::Store {
            name,
            version,
            platform,
            input_dir,
            options,
            json,
        } => run_store(
            &config,
            BuildTarget::new(name, version, platform),
            &input_dir,
            &options,
            json,
        ),
        Commands::Pack { dirs, output } => run_pack(&config, &dirs, &output),
        Commands::Unpack {
            archive,
            dir,
            remove,
        } => run_unpack(&archive, &dir, remove),
        Commands::Config { json } => run_config(&config, json),
        Commands::Toolchain => println!("{}", toolchain(&config)),
    }
}

fn fail(context: &str, err: impl Display) -> ! {
    eprintln!("{}: {}", context, err);
    process::exit(2);
}

fn cli_overrides(cli: &Cli) -> Option<Value> {
    let mut overrides = json!({});
    if let Some(root) = &cli.root {
        overrides["local"]["root"] = json!(root.to_string_lossy());
    }
    if cli.no_local {
        overrides["local"]["enabled"] = json!(false);
    }
    if let Some(bucket) = &cli.bucket {
        overrides["remote"]["enabled"] = json!(true);
        overrides["remote"]["bucket"] = json!(bucket);
    }
    if cli.no_remote {
        overrides["remote"]["enabled"] = json!(false);
    }

    match overrides.as_object() {
        Some(map) if !map.is_empty() => Some(overrides),
        _ => None,
    }
}

fn load_config(cli: &Cli) -> EffectiveConfig {
    let host_path = match &cli.config {
        Some(path) if !path.exists() => {
            fail("Error loading config", format!("{} not found", path.display()))
        }
        Some(path) => Some(path.clone()),
        None => default_host_config_path(),
    };
    let project_path = default_project_config_path();

    EffectiveConfig::build(
        host_path.as_deref(),
        project_path.as_deref(),
        cli_overrides(cli),
    )
    .unwrap_or_else(|e| fail("Error loading config", e))
}

fn toolchain(config: &EffectiveConfig) -> ToolchainVersion {
    ToolchainVersion::resolve(config.settings.toolchain.version.as_deref())
}

fn coordinator(config: &EffectiveConfig) -> CacheCoordinator {
    CacheCoordinator::from_settings(config.settings.clone(), toolchain(config))
        .unwrap_or_else(|e| fail("Error opening cache", e))
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail("Error serializing output", e),
    }
}

fn run_key(
    config: &EffectiveConfig,
    target: BuildTarget,
    options: &[String],
    check_remote: bool,
    json_output: bool,
) {
    let cache = coordinator(config);
    let key = cache.key_for(&target, options);
    let local_path = cache.local().fetch_path(&key);
    let object_key = key.object_key(config.settings.remote.key_layout);
    let remote_present = if check_remote {
        cache
            .remote_contains(&target, options)
            .unwrap_or_else(|e| fail("Remote check failed", e))
    } else {
        None
    };

    if json_output {
        print_json(&json!({
            "target": target.to_string(),
            "key": key,
            "local_path": local_path,
            "object_key": object_key,
            "remote_present": remote_present,
        }));
    } else {
        println!("Key:        {}", key);
        println!("Local path: {}", local_path.display());
        println!("Object key: {}", object_key);
        match remote_present {
            Some(true) => println!("Remote:     present"),
            Some(false) => println!("Remote:     absent"),
            None if check_remote => println!("Remote:     disabled"),
            None => {}
        }
    }
}

fn run_lookup(config: &EffectiveConfig, target: BuildTarget, options: &[String], json_output: bool) {
    let cache = coordinator(config);
    let lookup = cache
        .lookup(&target, options)
        .unwrap_or_else(|e| fail("Lookup failed", e));

    if json_output {
        print_json(&lookup);
    } else if lookup.is_hit() {
        println!("{}", lookup.path.display());
    } else {
        eprintln!("{}: {:?}", target, lookup.outcome);
    }

    process::exit(if lookup.is_hit() { 0 } else { 1 });
}

fn run_store(
    config: &EffectiveConfig,
    target: BuildTarget,
    input_dir: &Path,
    options: &[String],
    json_output: bool,
) {
    let cache = coordinator(config);
    let outcome = cache
        .store(&target, input_dir, options)
        .unwrap_or_else(|e| fail("Store failed", e));

    if json_output {
        print_json(&outcome);
        return;
    }
    match outcome {
        StoreOutcome::Disabled => eprintln!("Local cache disabled, nothing stored"),
        StoreOutcome::Stored {
            path,
            uploaded_bytes,
        } => {
            println!("Stored: {}", path.display());
            if let Some(bytes) = uploaded_bytes {
                println!("Uploaded: {} bytes", bytes);
            }
        }
    }
}

fn run_pack(config: &EffectiveConfig, dirs: &[PathBuf], archive: &Path) {
    let exclude = config
        .settings
        .exclude_rules()
        .unwrap_or_else(|e| fail("Error loading config", e));
    let sources: Vec<&Path> = dirs.iter().map(PathBuf::as_path).collect();
    let summary = Archiver::new()
        .with_exclude(exclude)
        .with_format(ArchiveFormat::from_path(archive))
        .pack_all(&sources, archive)
        .unwrap_or_else(|e| fail("Pack failed", e));

    println!(
        "{} entries, {} bytes, sha256 {}",
        summary.entries, summary.bytes, summary.sha256
    );
    if summary.skipped_duplicates > 0 {
        println!("Skipped {} duplicate entries", summary.skipped_duplicates);
    }
}

fn run_unpack(archive: &Path, dir: &Path, remove: bool) {
    let summary = Archiver::new()
        .with_format(ArchiveFormat::from_path(archive))
        .unpack(archive, dir, remove)
        .unwrap_or_else(|e| fail("Unpack failed", e));

    println!(
        "{} extracted, {} already present",
        summary.extracted, summary.skipped_existing
    );
}

fn run_config(config: &EffectiveConfig, json_output: bool) {
    if json_output {
        print_json(config);
        return;
    }

    println!("Sources:");
    for source in &config.sources {
        match (&source.path, &source.digest) {
            (Some(path), Some(digest)) => {
                println!("  {:?}: {} (sha256 {})", source.origin, path, &digest[..12])
            }
            _ => println!("  {:?}", source.origin),
        }
    }
    println!();
    match toml::to_string_pretty(&config.config) {
        Ok(text) => print!("{}", text),
        Err(e) => fail("Error serializing output", e),
    }
}
