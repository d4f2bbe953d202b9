use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use memmap2::Mmap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::EnvFilter;

use skyfs_core::config::{load_json, save_json, ProviderConfig, RenterConfig};
use skyfs_core::contract;
use skyfs_core::directory::{MemoryDirectory, MetadataDirectory};
use skyfs_core::keys::{parse_verifying_key, Identity};
use skyfs_core::network::LocalNetwork;
use skyfs_core::placement::PlacementPolicy;
use skyfs_core::progress::Progress;
use skyfs_core::provider::Provider;
use skyfs_core::renter::Renter;
use skyfs_core::transfer::TransferConfig;
use skyfs_core::types::Contract;
use skyfs_core::version::RedundancyPolicy;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Party { Renter, Provider }

#[derive(Parser)]
#[command(name="skyfs", version, about="skyfs storage contracts, provider ledger and erasure-coded uploads")]
struct Cli { #[command(subcommand)] cmd: Cmd }

#[derive(Subcommand)]
enum Cmd {
    /// Generate a signing + encryption identity
    Keygen {
        #[arg(long)] out: PathBuf,
        #[arg(long, default_value = "node")] id: String,
    },
    /// Provider home management
    Provider { #[command(subcommand)] cmd: ProviderCmd },
    /// Build, sign and verify storage contracts
    Contract { #[command(subcommand)] cmd: ContractCmd },
    /// In-process network: reserve, upload, lose blocks, download, compare
    Simulate {
        #[arg(long, default_value_t = 6)] providers: usize,
        #[arg(long)] capacity: i64,
        #[arg(long)] input: PathBuf,
        #[arg(long, default_value_t = 4)] k: usize,
        #[arg(long, default_value_t = 2)] m: usize,
        #[arg(long, default_value_t = 0)] drop: usize,
        #[arg(long, default_value = ".skyfs-sim")] work: PathBuf,
        #[arg(long, default_value_t = false)] progress: bool,
    },
}

#[derive(Subcommand)]
enum ProviderCmd {
    /// Create a provider home with config and identity
    Init {
        #[arg(long)] home: PathBuf,
        #[arg(long)] id: String,
        #[arg(long)] capacity: i64,
        #[arg(long)] address: Option<String>,
    },
    /// Ledger stats, contract count and recent activity
    Stats { #[arg(long)] home: PathBuf },
    /// Reconcile ledger block records with block files on disk
    Audit { #[arg(long)] home: PathBuf },
}

#[derive(Subcommand)]
enum ContractCmd {
    /// Write an unsigned contract
    New {
        #[arg(long)] renter: String,
        #[arg(long)] provider: String,
        #[arg(long)] space: i64,
        #[arg(long)] out: PathBuf,
    },
    /// Add one party's signature
    Sign {
        #[arg(long)] contract: PathBuf,
        #[arg(long)] key: PathBuf,
        #[arg(long = "as", value_enum)] party: Party,
    },
    /// Check both signatures against the current terms
    Verify {
        #[arg(long)] contract: PathBuf,
        #[arg(long)] renter_key: String,
        #[arg(long)] provider_key: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Keygen { out, id } => keygen(&out, &id)?,
        Cmd::Provider { cmd } => match cmd {
            ProviderCmd::Init { home, id, capacity, address } => provider_init(&home, &id, capacity, address)?,
            ProviderCmd::Stats { home } => provider_stats(&home)?,
            ProviderCmd::Audit { home } => provider_audit(&home)?,
        },
        Cmd::Contract { cmd } => match cmd {
            ContractCmd::New { renter, provider, space, out } => contract_new(&renter, &provider, space, &out)?,
            ContractCmd::Sign { contract, key, party } => contract_sign(&contract, &key, party)?,
            ContractCmd::Verify { contract, renter_key, provider_key } => contract_verify(&contract, &renter_key, &provider_key)?,
        },
        Cmd::Simulate { providers, capacity, input, k, m, drop, work, progress } => {
            simulate(providers, capacity, &input, k, m, drop, &work, progress)?
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn keygen(out: &Path, id: &str) -> Result<()> {
    if out.exists() { bail!("{} already exists", out.display()); }
    let identity = Identity::generate(id);
    identity.save(out).with_context(|| format!("write key file {}", out.display()))?;
    print_json(&identity.public())
}

fn provider_init(home: &Path, id: &str, capacity: i64, address: Option<String>) -> Result<()> {
    if capacity <= 0 { bail!("capacity must be positive"); }
    let address = address.unwrap_or_else(|| format!("local://{id}"));
    let config = ProviderConfig::new(id, address, capacity);
    let identity = Identity::generate(id);
    Provider::init(home, &config, &identity).with_context(|| format!("init provider home {}", home.display()))?;
    info!(provider = %id, home = %home.display(), capacity, "provider initialised");
    print_json(&identity.public())
}

fn provider_stats(home: &Path) -> Result<()> {
    let provider = Provider::open_home(home).with_context(|| format!("open provider home {}", home.display()))?;
    print_json(&provider.info()?)
}

fn provider_audit(home: &Path) -> Result<()> {
    let provider = Provider::open_home(home).with_context(|| format!("open provider home {}", home.display()))?;
    let report = provider.audit()?;
    print_json(&report)?;
    if !report.is_clean() { bail!("ledger and disk disagree"); }
    Ok(())
}

fn contract_new(renter: &str, provider: &str, space: i64, out: &Path) -> Result<()> {
    if space <= 0 { bail!("space must be positive"); }
    let c = contract::build(renter, provider, space);
    save_json(out, &c).with_context(|| format!("write {}", out.display()))?;
    println!("{}", c.id);
    Ok(())
}

fn contract_sign(path: &Path, key: &Path, party: Party) -> Result<()> {
    let mut c: Contract = load_json(path).with_context(|| format!("read contract {}", path.display()))?;
    let identity = Identity::load(key).with_context(|| format!("read key file {}", key.display()))?;
    let signature = contract::sign(&c, identity.signing_key());
    match party {
        Party::Renter => {
            if identity.id != c.renter_id { bail!("key {} does not belong to renter {}", identity.id, c.renter_id); }
            c.renter_signature = signature;
        }
        Party::Provider => {
            if identity.id != c.provider_id { bail!("key {} does not belong to provider {}", identity.id, c.provider_id); }
            c.provider_signature = signature;
        }
    }
    save_json(path, &c)?;
    Ok(())
}

fn contract_verify(path: &Path, renter_key: &str, provider_key: &str) -> Result<()> {
    let c: Contract = load_json(path).with_context(|| format!("read contract {}", path.display()))?;
    let renter_key = parse_verifying_key(renter_key).context("renter key")?;
    let provider_key = parse_verifying_key(provider_key).context("provider key")?;
    contract::verify(&c, &c.renter_signature, &renter_key).map_err(|e| anyhow!("renter signature: {e}"))?;
    contract::verify(&c, &c.provider_signature, &provider_key).map_err(|e| anyhow!("provider signature: {e}"))?;
    println!("FULLY EXECUTED");
    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    if f.metadata()?.len() == 0 { return Ok(Vec::new()); }
    let mm = unsafe { Mmap::map(&f) }.with_context(|| format!("mmap {}", path.display()))?;
    Ok(mm.to_vec())
}

#[allow(clippy::too_many_arguments)]
fn simulate(providers: usize, capacity: i64, input: &Path, k: usize, m: usize, drop: usize, work: &Path, progress: bool) -> Result<()> {
    if providers == 0 { bail!("need at least one provider"); }
    if drop > m { bail!("dropping {drop} blocks exceeds parity {m}; the file could not be rebuilt"); }
    let data = read_input(input)?;
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    let run = work.join(format!("run-{}-{nanos}", std::process::id()));

    let net = Arc::new(LocalNetwork::new());
    let dir = Arc::new(MemoryDirectory::new());
    for i in 0..providers {
        let id = format!("provider-{i}");
        let identity = Identity::generate(&id);
        let config = ProviderConfig::new(&id, format!("local://{id}"), capacity);
        let provider = Arc::new(Provider::open(config, &identity, &run.join(&id))?);
        dir.insert_provider(&provider.provider_info()?)?;
        net.attach(provider);
    }

    let mut config = RenterConfig::new("renter-0", "sim");
    config.redundancy = RedundancyPolicy::fixed(k, m);
    config.placement = if providers >= k + m { PlacementPolicy::DistinctProviders } else { PlacementPolicy::Spread };
    config.transfer = TransferConfig { backoff_base_ms: 10, ..TransferConfig::default() };
    let reporter = Progress::new(progress);
    let renter = Renter::new(config, Identity::generate("renter-0"), dir.clone(), net.clone())?.with_progress(reporter.clone());
    renter.register()?;
    let contracts = renter.reserve_storage(capacity, providers)?;
    info!(contracts = contracts.len(), "storage reserved");

    reporter.start();
    let file = renter.upload("input", &data, false)?;
    let version = file.latest_version().ok_or_else(|| anyhow!("upload left no version"))?;
    for block in version.blocks.iter().take(drop) {
        let provider = net.provider(&block.location.address).ok_or_else(|| anyhow!("no provider at {}", block.location.address))?;
        provider.block_store().remove(&file.owner_id, &block.id)?;
        info!(block = block.num, provider = %block.location.provider_id, "block dropped");
    }
    let restored = renter.download(&file.id, None)?;
    reporter.stop();
    if restored != data { bail!("downloaded bytes differ from input"); }

    let usage = renter.info()?;
    info!(reserved = usage.reserved, used = usage.used, blocks = version.blocks.len(), "simulation finished");
    fs::remove_dir_all(&run).ok();
    println!("OK");
    Ok(())
}
