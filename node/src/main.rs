use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use fs2::FileExt;
use hashweave_crypto::{mnemonic, KeyPair};
use hashweave_state::SavedStateMetadata;
use hashweave_types::Timestamp;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod checkpoint;
mod config;
mod ledger;
mod node;
mod transport;
mod version;

use config::NodeConfig;
use version::{git_commit_hash, HASHWEAVE_VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("hashweave-node")
        .version(HASHWEAVE_VERSION)
        .about("Hashweave hashgraph node")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit")
                .global(true),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Run configuration and environment self-checks, then exit")
                .global(true),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .action(ArgAction::SetTrue)
                .help("Print the resolved configuration as TOML and exit")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format")
                .global(true),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("Override the gossip listen address")
                .global(true),
        )
        .subcommand(Command::new("start").about("Start the node using the provided configuration"))
        .subcommand(
            Command::new("public-key")
                .about("Print the public key belonging to a key seed")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_name("HEX")
                        .required(true)
                        .help("32 byte seed, hex encoded"),
                ),
        )
        .subcommand(
            Command::new("inspect-metadata")
                .about("Parse a saved state metadata file and print its fields")
                .arg(
                    Arg::new("file")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                ),
        )
        .get_matches();

    if matches.get_flag("version_flag") {
        println!("hashweave-node {} (commit {})", HASHWEAVE_VERSION, git_commit_hash());
        return Ok(());
    }

    if let Some(key_matches) = matches.subcommand_matches("public-key") {
        let seed = key_matches
            .get_one::<String>("seed")
            .ok_or_else(|| anyhow!("--seed is required"))?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(seed.trim(), &mut bytes).context("seed must be 64 hex characters")?;
        println!("{}", hex::encode(KeyPair::from_seed(bytes).public_key()));
        return Ok(());
    }

    if let Some(inspect_matches) = matches.subcommand_matches("inspect-metadata") {
        let path = inspect_matches
            .get_one::<PathBuf>("file")
            .ok_or_else(|| anyhow!("a metadata file is required"))?;
        let metadata = SavedStateMetadata::read(path)?;
        print!("{}", metadata.render());
        if let Some(hash) = metadata.hash {
            let consistent = metadata.hash_mnemonic.as_deref() == Some(mnemonic(&hash).as_str());
            println!("# hash mnemonic consistent: {consistent}");
        }
        return Ok(());
    }

    let mut config = NodeConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    apply_overrides(&matches, &mut config);

    if matches.get_flag("print-config") {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    config.validate()?;

    if matches.get_flag("check") {
        return run_self_check(&config);
    }

    init_logging(&config)?;
    let _lock = DataDirLock::acquire(&config.state.saved_state_dir, "node")?;
    info!(
        node = config.node.id,
        version = HASHWEAVE_VERSION,
        commit = git_commit_hash(),
        members = config.members.len(),
        "starting hashweave node"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(err) => warn!("failed to listen for shutdown signal: {}", err),
            }
            cancel.cancel();
        });
    }

    node::run(config, cancel).await
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut NodeConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.logging.level = log_level.clone();
    }
    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.logging.format = log_format.clone();
    }
    if let Some(listen) = matches.get_one::<String>("listen") {
        config.node.listen = listen.clone();
    }
}

fn init_logging(config: &NodeConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

fn run_self_check(config: &NodeConfig) -> Result<()> {
    println!("Running hashweave node self-check...");
    let mut issues = Vec::new();

    if let Err(err) = ensure_port_available(&config.node.listen) {
        issues.push(err);
    }
    if let Err(err) = ensure_writable_directory(&config.state.saved_state_dir) {
        issues.push(err);
    }
    let peers_without_endpoint: Vec<String> = config
        .members
        .iter()
        .filter(|member| member.node_id > config.node.id && member.endpoint.is_none())
        .map(|member| member.node_id.to_string())
        .collect();
    if !peers_without_endpoint.is_empty() {
        issues.push(format!(
            "members {} have no endpoint and cannot be dialed",
            peers_without_endpoint.join(",")
        ));
    }

    if issues.is_empty() {
        println!("OK");
        Ok(())
    } else {
        for issue in &issues {
            eprintln!("- {issue}");
        }
        anyhow::bail!("self-check failed")
    }
}

fn ensure_port_available(addr: &str) -> Result<(), String> {
    match TcpListener::bind(addr) {
        Ok(listener) => drop(listener),
        Err(err) => return Err(format!("listen address {addr} is not available for binding: {err}")),
    }
    Ok(())
}

fn ensure_writable_directory(dir: &Path) -> Result<(), String> {
    if let Err(err) = fs::create_dir_all(dir) {
        return Err(format!("Unable to create {}: {}", dir.display(), err));
    }
    let marker = dir.join(".hashweave_write_test");
    match OpenOptions::new().create(true).write(true).truncate(true).open(&marker) {
        Ok(mut file) => {
            if let Err(err) = file.write_all(b"ok") {
                return Err(format!("Unable to write into {}: {}", dir.display(), err));
            }
        }
        Err(err) => {
            return Err(format!("Unable to open {} for writing: {}", dir.display(), err));
        }
    }
    let _ = fs::remove_file(&marker);
    Ok(())
}

/// Keeps a second node from writing into the same saved state directory.
struct DataDirLock {
    path: PathBuf,
    file: File,
}

impl DataDirLock {
    fn acquire<P: AsRef<Path>>(data_dir: P, purpose: &str) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let lock_path = dir.join(".hashweave.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        if let Err(err) = file.try_lock_exclusive() {
            return Err(anyhow!(
                "Data directory {} is locked by another process ({}). \
                 Stop the running node or remove {} if you are sure it is stale.",
                dir.display(),
                err,
                lock_path.display()
            ));
        }

        file.set_len(0)?;
        writeln!(
            &file,
            "pid={};purpose={};started={}",
            std::process::id(),
            purpose,
            Timestamp::now()
        )?;

        Ok(Self { path: lock_path, file })
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.path);
    }
}
