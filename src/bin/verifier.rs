use anyhow::{Context, Result};
use clap::Parser;
use cti_zk_registry::{
    circuit::MembershipProver,
    config::Config,
    membership::ContributorMembershipTree,
    types::MembershipProofFile,
    utils::{parse_word, word_to_decimal},
    verifier::{ArkGroth16Verifier, ZkMembershipVerifier},
};
use log::{debug, error, info};
use std::fs;
use std::io::{BufRead, BufReader, Seek, Write};
use std::path::{Path, PathBuf};

/// Can be overridden via `CTI_MAX_PROOF_FILE_SIZE` environment variable
fn get_max_proof_file_size(config: &Config) -> u64 {
    std::env::var("CTI_MAX_PROOF_FILE_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(config.proof.max_file_size)
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify an anonymous contributor membership proof", long_about = None)]
struct Args {
    #[arg(short, long)]
    proof_file: String,

    /// Published contributor roots, one per line, oldest first
    #[arg(short, long)]
    roots_file: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Verifying key; defaults to the cached key for the proof's depth
    #[arg(long)]
    vk: Option<PathBuf>,
}

/// Loads the last `capacity` roots of `path` into a validity window.
fn load_root_window(path: &Path, capacity: usize) -> Result<ContributorMembershipTree> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read roots file: {}", path.display()))?;
    let roots = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            parse_word(line.trim()).with_context(|| format!("Invalid root at line {}", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    if roots.is_empty() {
        return Err(anyhow::anyhow!("Roots file {} is empty", path.display()));
    }

    let mut window = ContributorMembershipTree::new(capacity)?;
    let start = roots.len().saturating_sub(capacity);
    for (slot, root) in roots[start..].iter().enumerate() {
        window.update_merkle_root(*root, slot as u64);
    }
    debug!("Root window holds {} of {} published roots", window.valid_roots().len(), roots.len());
    Ok(window)
}

fn commitment_seen(commitment_file: &Path, commitment: &str) -> Result<bool> {
    if !commitment_file.exists() {
        return Ok(false);
    }
    let file = fs::File::open(commitment_file).context("Failed to open commitment file")?;
    for line in BufReader::new(file).lines() {
        let line = line.context("Failed to read line from commitment file")?;
        if line.trim() == commitment {
            return Ok(true);
        }
    }
    Ok(false)
}

fn check_and_add_commitment(commitment_file: &Path, commitment: &str) -> Result<()> {
    let normalized = commitment.trim().to_string();

    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(commitment_file)
        .context("Failed to open commitment file")?;

    let reader = BufReader::new(&file);
    for line in reader.lines() {
        let line = line.context("Failed to read line from commitment file")?;
        if line.trim() == normalized {
            return Err(anyhow::anyhow!("Commitment already used"));
        }
    }

    let mut writer = std::io::BufWriter::new(&file);
    writer
        .seek(std::io::SeekFrom::End(0))
        .context("Failed to seek to end of file")?;
    writer
        .write_all(normalized.as_bytes())
        .context("Failed to write commitment")?;
    writer.write_all(b"\n").context("Failed to write newline")?;
    writer.flush().context("Failed to flush writer")?;

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args
        .config
        .as_ref()
        .map(Config::load_from_file)
        .transpose()?
        .unwrap_or_default();
    config
        .validate_membership()
        .context("Invalid membership configuration")?;

    let proof_path = Path::new(&args.proof_file);
    if !proof_path.exists() {
        return Err(anyhow::anyhow!(
            "Proof file does not exist: {}",
            args.proof_file
        ));
    }

    info!("Loading proof from: {}", args.proof_file);
    println!("Loading proof from: {}", args.proof_file);

    let metadata = fs::metadata(proof_path).context("Failed to read proof file metadata")?;
    debug!("Proof file size: {} bytes", metadata.len());

    let max_proof_file_size = get_max_proof_file_size(&config);
    if metadata.len() > max_proof_file_size {
        return Err(anyhow::anyhow!(
            "Proof file too large: {} bytes (max {} bytes). Set CTI_MAX_PROOF_FILE_SIZE to raise the limit.",
            metadata.len(),
            max_proof_file_size
        ));
    }

    let proof_content = fs::read_to_string(proof_path).context("Failed to read proof file")?;

    info!("Parsing proof JSON...");
    let proof_file: MembershipProofFile =
        serde_json::from_str(&proof_content).context("Failed to parse proof JSON")?;
    let (proof, signals) = proof_file
        .parse(config.proof.max_age_secs)
        .context("Proof validation failed. The proof structure is invalid or stale.")?;
    info!("Proof structure validation passed");

    println!("Proof details:");
    println!("  Membership Root: {}", proof_file.merkle_root);
    println!("  Commitment: {}", proof_file.commitment);
    println!("  Tree Depth: {}", proof_file.tree_depth);
    println!("  Timestamp: {}", proof_file.timestamp);

    let mut commitment_path = PathBuf::from(&args.proof_file);
    commitment_path.set_extension("commitments.txt");
    let commitment_text = word_to_decimal(&signals.commitment.0);
    if commitment_seen(&commitment_path, &commitment_text)? {
        error!("Commitment {} was already used", commitment_text);
        return Err(anyhow::anyhow!(
            "Commitment already used: {}",
            commitment_path.display()
        ));
    }

    let window = load_root_window(&args.roots_file, config.membership.root_window_size)?;

    let vk_path = args.vk.clone().unwrap_or_else(|| {
        MembershipProver::verifying_key_path(&config.keys.cache_dir, proof_file.tree_depth)
    });
    info!("Loading verifying key from {}", vk_path.display());
    let backend = ArkGroth16Verifier::from_file(&vk_path)?;
    let verifier = ZkMembershipVerifier::new(Box::new(backend));

    println!("Verifying ZK proof...");
    match verifier.check(&window, &proof, &signals) {
        Ok(()) => {
            info!("Proof verification PASSED");
            println!("\n✓ Proof verification PASSED!");
            println!("The prover is a member of a current contributor tree.");

            check_and_add_commitment(&commitment_path, &commitment_text).with_context(|| {
                format!(
                    "Failed to record commitment to: {}",
                    commitment_path.display()
                )
            })?;
            info!("Commitment recorded to: {}", commitment_path.display());
            println!("\nCommitment recorded to: {}", commitment_path.display());
            Ok(())
        }
        Err(e) => {
            error!("Proof verification FAILED ({}): {e}", e.kind());
            println!("\n✗ Proof verification FAILED!");
            println!("Reason: {} ({e})", e.kind());
            Err(anyhow::anyhow!("Proof verification failed: {}", e.kind()))
        }
    }
}
