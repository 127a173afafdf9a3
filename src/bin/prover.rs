use anyhow::{Context, Result};
use ark_bn254::Fr;
use ark_std::UniformRand;
use clap::Parser;
use cti_zk_registry::{
    circuit::MembershipProver,
    config::Config,
    contributor_tree::ContributorTree,
    ethereum::{address_from_private_key, address_to_field, parse_addresses_batch},
    types::{unix_now, MembershipProofFile},
    utils::{field_from_word, field_to_word, parse_word, word_to_decimal},
};
use log::{debug, info};
use rand::rngs::OsRng;
use std::fs;
use std::path::PathBuf;

/// Can be overridden via `CTI_MAX_CONTRIBUTORS_FILE_SIZE` environment variable
fn get_max_contributors_file_size(config: &Config) -> u64 {
    std::env::var("CTI_MAX_CONTRIBUTORS_FILE_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(config.contributors.max_file_size)
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate an anonymous contributor membership proof", long_about = None)]
struct Args {
    /// Newline-separated contributor addresses, in tree order
    #[arg(short, long)]
    contributors_file: Option<PathBuf>,

    #[arg(short, long, env = "CTI_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Commitment nonce (decimal or 0x-hex); random when omitted
    #[arg(short, long)]
    nonce: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Tree depth; overrides the config file
    #[arg(short, long)]
    depth: Option<usize>,

    /// Proof JSON path; defaults to the config's proof output file
    #[arg(short, long)]
    output: Option<PathBuf>,
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
    let depth = args.depth.unwrap_or(config.membership.tree_depth);
    if depth == 0 {
        return Err(anyhow::anyhow!("Tree depth must be at least 1"));
    }

    let contributors_file = args
        .contributors_file
        .clone()
        .or_else(|| config.contributors.default_file.clone())
        .context("No contributors file given and none configured")?;
    let output_file = args
        .output
        .clone()
        .unwrap_or_else(|| config.proof.output_file.clone());

    println!("Loading contributors from: {:?}", contributors_file);

    let metadata = fs::metadata(&contributors_file)
        .context("Failed to read contributors file metadata")?;
    let max_file_size = get_max_contributors_file_size(&config);
    if metadata.len() > max_file_size {
        return Err(anyhow::anyhow!(
            "Contributors file too large: {} bytes (max {} bytes)",
            metadata.len(),
            max_file_size
        ));
    }

    let content =
        fs::read_to_string(&contributors_file).context("Failed to read contributors file")?;
    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    let contributors = parse_addresses_batch(&lines)?;

    if contributors.is_empty() {
        return Err(anyhow::anyhow!(
            "No valid addresses found in contributors file '{}'",
            contributors_file.display()
        ));
    }

    println!(
        "Loaded {} contributors from {}",
        contributors.len(),
        contributors_file.display()
    );

    println!("Validating private key...");
    let prover_address = address_from_private_key(&args.private_key)?;
    println!("Prover address: {:?}", prover_address);

    println!("Building Poseidon contributor tree (depth {depth})...");
    let tree = ContributorTree::from_addresses(depth, &contributors)
        .context("Failed to build contributor tree")?;
    println!("Contributor root: {}", word_to_decimal(&field_to_word(tree.root())));

    let path = tree.path_for_address(&prover_address).with_context(|| {
        format!(
            "Prover address '{:?}' not found in contributors file '{}'. Make sure your private key corresponds to an address in the set.",
            prover_address,
            contributors_file.display()
        )
    })?;
    debug!("Membership path has {} levels", path.siblings.len());

    let mut rng = OsRng;
    let nonce = match &args.nonce {
        Some(text) => {
            let word = parse_word(text).context("Invalid nonce")?;
            field_from_word::<Fr>(&word, "nonce")?
        }
        None => {
            let nonce = Fr::rand(&mut rng);
            println!("Generated nonce: {}", word_to_decimal(&field_to_word(nonce)));
            println!("Keep it secret; it is the only link between you and the commitment.");
            nonce
        }
    };

    let mut prover = MembershipProver::new(depth)?;
    let keys_dir = &config.keys.cache_dir;
    if prover.load_keys(keys_dir)? {
        info!("Loaded cached Groth16 keys from {}", keys_dir.display());
    } else {
        println!("Generating Groth16 keys (first run for depth {depth})...");
        prover.generate_and_cache_keys(&mut rng)?;
        prover.save_keys(keys_dir)?;
        println!("Keys cached in {}", keys_dir.display());
    }

    println!("Generating ZK proof (this may take a while)...");
    let (proof, signals) = prover
        .prove_membership(address_to_field(&prover_address), nonce, &path, &mut rng)
        .context("Failed to create proof")?;

    let output = MembershipProofFile::from_parts(&proof, &signals, depth, unix_now()?);

    println!("Writing proof to: {:?}", output_file);
    let json_output =
        serde_json::to_string_pretty(&output).context("Failed to serialize proof to JSON")?;
    fs::write(&output_file, json_output).context("Failed to write proof file")?;

    println!("Proof successfully generated and saved!");
    println!("Membership Root: {}", output.merkle_root);
    println!("Commitment: {}", output.commitment);

    Ok(())
}
