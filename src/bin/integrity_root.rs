use anyhow::{Context, Result};
use clap::Parser;
use cti_zk_registry::{
    content_store::BatchPayload, merkle::MerkleCommitmentTree, types::unix_now,
};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Compute the integrity Merkle root of an IOC batch", long_about = None)]
struct Args {
    /// Newline-separated IOCs
    #[arg(short, long)]
    ioc_file: PathBuf,

    /// Print the inclusion proof for this IOC
    #[arg(long)]
    ioc: Option<String>,

    /// Also write the batch payload JSON for the content store
    #[arg(long)]
    payload_out: Option<PathBuf>,

    /// Payload source field: submitter address or "anonymous"
    #[arg(long, default_value = "anonymous")]
    source: String,
}

#[derive(Serialize)]
struct ProofOutput {
    ioc: String,
    root: String,
    leaf: String,
    index: usize,
    siblings: Vec<String>,
    path_bits: Vec<bool>,
}

fn read_iocs(path: &PathBuf) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read IOC file: {}", path.display()))?;
    let iocs: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if iocs.is_empty() {
        return Err(anyhow::anyhow!("No IOCs found in '{}'", path.display()));
    }
    Ok(iocs)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let iocs = read_iocs(&args.ioc_file)?;
    println!("Loaded {} IOCs from {}", iocs.len(), args.ioc_file.display());

    let tree = MerkleCommitmentTree::from_items(iocs.as_slice())?;
    println!("Unique leaves: {}", tree.leaves.len());
    println!("Integrity root: 0x{}", hex::encode(tree.root));

    if let Some(ioc) = &args.ioc {
        let proof = tree
            .proof_for_item(ioc)
            .with_context(|| format!("IOC '{ioc}' is not part of the batch"))?;
        if !tree.verify_proof(&proof) {
            return Err(anyhow::anyhow!("Generated proof failed self-check"));
        }

        let output = ProofOutput {
            ioc: ioc.clone(),
            root: format!("0x{}", hex::encode(proof.root)),
            leaf: format!("0x{}", hex::encode(proof.leaf)),
            index: proof.index,
            siblings: proof
                .siblings
                .iter()
                .map(|s| format!("0x{}", hex::encode(s)))
                .collect(),
            path_bits: proof.path_bits.clone(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialize proof")?
        );
    }

    if let Some(path) = &args.payload_out {
        let payload = BatchPayload::new(iocs, args.source.clone(), unix_now()?)?;
        let json = serde_json::to_string_pretty(&payload).context("Failed to serialize payload")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write payload: {}", path.display()))?;
        println!("Payload written to {}", path.display());
    }

    Ok(())
}
