use ethers::signers::{LocalWallet, Signer};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::thread;
use tempfile::TempDir;

const TEST_DEPTH: usize = 4;

fn write_config(dir: &Path) -> PathBuf {
    let config_file = dir.join("config.toml");
    let config = format!(
        r#"
        [membership]
        tree_depth = {TEST_DEPTH}
        root_window_size = 2

        [keys]
        cache_dir = "{}"
        "#,
        dir.join("keys").display()
    );
    fs::write(&config_file, config).expect("Failed to write config file");
    config_file
}

fn write_contributors(path: &Path, wallets: &[&LocalWallet]) {
    let addresses: Vec<String> = wallets
        .iter()
        .map(|w| format!("{:x}", w.address()))
        .collect();
    fs::write(path, addresses.join("\n")).expect("Failed to write contributors file");
}

fn run_prover(
    prover_path: &Path,
    contributors_file: &Path,
    config_file: &Path,
    proof_file: &Path,
    private_key_hex: &str,
) -> Output {
    std::process::Command::new(prover_path)
        .arg("--contributors-file")
        .arg(contributors_file)
        .arg("--config")
        .arg(config_file)
        .arg("--output")
        .arg(proof_file)
        .env("CTI_PRIVATE_KEY", private_key_hex)
        .output()
        .expect("Failed to execute prover")
}

fn run_verifier(verifier_path: &Path, proof_file: &Path, roots_file: &Path, config_file: &Path) -> Output {
    std::process::Command::new(verifier_path)
        .arg("--proof-file")
        .arg(proof_file)
        .arg("--roots-file")
        .arg(roots_file)
        .arg("--config")
        .arg(config_file)
        .output()
        .expect("Failed to execute verifier")
}

/// Writes the proof's own root as the only published root.
fn publish_proof_root(proof_file: &Path, roots_file: &Path) -> String {
    let proof: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(proof_file).expect("Failed to read proof"))
            .expect("Proof is not JSON");
    let root = proof["merkle_root"]
        .as_str()
        .expect("Proof has no merkle_root")
        .to_string();
    fs::write(roots_file, format!("{root}\n")).expect("Failed to write roots file");
    root
}

#[test]
fn test_end_to_end_prover_verifier_workflow() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let contributors_file = temp_dir.path().join("contributors.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let roots_file = temp_dir.path().join("roots.txt");
    let config_file = write_config(temp_dir.path());

    let wallet1 = LocalWallet::new(&mut rand::thread_rng());
    let wallet2 = LocalWallet::new(&mut rand::thread_rng());
    let wallet3 = LocalWallet::new(&mut rand::thread_rng());
    write_contributors(&contributors_file, &[&wallet1, &wallet2, &wallet3]);

    let private_key_hex = format!("{:x}", wallet2.signer().to_bytes());

    let prover_path = PathBuf::from("./target/release/prover");
    let verifier_path = PathBuf::from("./target/release/verifier");

    if !prover_path.exists() || !verifier_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return;
    }

    let prover_output = run_prover(
        &prover_path,
        &contributors_file,
        &config_file,
        &proof_file,
        &private_key_hex,
    );
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );
    assert!(proof_file.exists(), "Proof file was not created");

    publish_proof_root(&proof_file, &roots_file);
    let verifier_output = run_verifier(&verifier_path, &proof_file, &roots_file, &config_file);
    assert!(
        verifier_output.status.success(),
        "Verifier failed: {}",
        String::from_utf8_lossy(&verifier_output.stderr)
    );

    let verifier_stdout = String::from_utf8_lossy(&verifier_output.stdout);
    assert!(
        verifier_stdout.contains("Proof verification PASSED"),
        "Proof verification did not pass: {verifier_stdout}"
    );
}

#[test]
fn test_replay_attack_prevention() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let contributors_file = temp_dir.path().join("contributors.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let roots_file = temp_dir.path().join("roots.txt");
    let config_file = write_config(temp_dir.path());

    let wallet1 = LocalWallet::new(&mut rand::thread_rng());
    let wallet2 = LocalWallet::new(&mut rand::thread_rng());
    write_contributors(&contributors_file, &[&wallet1, &wallet2]);

    let private_key_hex = format!("{:x}", wallet1.signer().to_bytes());

    let prover_path = PathBuf::from("./target/release/prover");
    let verifier_path = PathBuf::from("./target/release/verifier");

    if !prover_path.exists() || !verifier_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return;
    }

    let prover_output = run_prover(
        &prover_path,
        &contributors_file,
        &config_file,
        &proof_file,
        &private_key_hex,
    );
    assert!(
        prover_output.status.success(),
        "Prover failed: {}",
        String::from_utf8_lossy(&prover_output.stderr)
    );
    publish_proof_root(&proof_file, &roots_file);

    let verifier_output = run_verifier(&verifier_path, &proof_file, &roots_file, &config_file);
    assert!(
        verifier_output.status.success(),
        "First verification should succeed: {}",
        String::from_utf8_lossy(&verifier_output.stderr)
    );

    let verifier_output2 = run_verifier(&verifier_path, &proof_file, &roots_file, &config_file);
    assert!(
        !verifier_output2.status.success(),
        "Second verification should fail due to commitment reuse"
    );

    let verifier_stderr = String::from_utf8_lossy(&verifier_output2.stderr);
    assert!(
        verifier_stderr.contains("already used"),
        "Error should mention commitment reuse: {verifier_stderr}"
    );
}

#[test]
fn test_rotated_out_root_is_stale() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let contributors_file = temp_dir.path().join("contributors.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let roots_file = temp_dir.path().join("roots.txt");
    let config_file = write_config(temp_dir.path());

    let wallet1 = LocalWallet::new(&mut rand::thread_rng());
    let wallet2 = LocalWallet::new(&mut rand::thread_rng());
    write_contributors(&contributors_file, &[&wallet1, &wallet2]);
    let private_key_hex = format!("{:x}", wallet1.signer().to_bytes());

    let prover_path = PathBuf::from("./target/release/prover");
    let verifier_path = PathBuf::from("./target/release/verifier");

    if !prover_path.exists() || !verifier_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return;
    }

    let prover_output = run_prover(
        &prover_path,
        &contributors_file,
        &config_file,
        &proof_file,
        &private_key_hex,
    );
    assert!(prover_output.status.success());

    // two rotations after the proof's root push it out of a window of two
    let root = publish_proof_root(&proof_file, &roots_file);
    fs::write(&roots_file, format!("{root}\n11\n12\n")).expect("Failed to write roots file");

    let verifier_output = run_verifier(&verifier_path, &proof_file, &roots_file, &config_file);
    assert!(!verifier_output.status.success());
    let stderr = String::from_utf8_lossy(&verifier_output.stderr);
    assert!(stderr.contains("StaleRoot"), "Expected StaleRoot: {stderr}");
}

#[test]
fn test_invalid_proof_structure() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let proof_file = temp_dir.path().join("invalid_proof.json");
    let roots_file = temp_dir.path().join("roots.txt");
    let config_file = write_config(temp_dir.path());

    let invalid_json = r#"{
        "proof": ["1", "2", "3"],
        "commitment": "5",
        "merkle_root": "7",
        "tree_depth": 4,
        "timestamp": 1234567890
    }"#;

    fs::write(&proof_file, invalid_json).expect("Failed to write invalid proof file");
    fs::write(&roots_file, "7\n").expect("Failed to write roots file");

    let verifier_path = PathBuf::from("./target/release/verifier");

    if !verifier_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return;
    }

    let verifier_output = run_verifier(&verifier_path, &proof_file, &roots_file, &config_file);
    assert!(
        !verifier_output.status.success(),
        "Verifier should fail on invalid proof structure"
    );
}

#[test]
fn test_duplicate_addresses() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let contributors_file = temp_dir.path().join("duplicate_contributors.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let config_file = write_config(temp_dir.path());
    let wallet1 = LocalWallet::new(&mut rand::thread_rng());
    let wallet2 = LocalWallet::new(&mut rand::thread_rng());
    write_contributors(&contributors_file, &[&wallet1, &wallet2, &wallet1]);

    let private_key_hex = format!("{:x}", wallet1.signer().to_bytes());

    let prover_path = PathBuf::from("./target/release/prover");

    if !prover_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return;
    }

    let prover_output = run_prover(
        &prover_path,
        &contributors_file,
        &config_file,
        &proof_file,
        &private_key_hex,
    );
    assert!(
        !prover_output.status.success(),
        "Prover should fail with duplicate addresses"
    );

    let stderr = String::from_utf8_lossy(&prover_output.stderr);
    assert!(
        stderr.to_lowercase().contains("duplicate"),
        "Error should mention duplicate: {stderr}"
    );
}

#[test]
fn test_non_member_cannot_prove() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let contributors_file = temp_dir.path().join("contributors.txt");
    let proof_file = temp_dir.path().join("proof.json");
    let config_file = write_config(temp_dir.path());

    let member = LocalWallet::new(&mut rand::thread_rng());
    let outsider = LocalWallet::new(&mut rand::thread_rng());
    write_contributors(&contributors_file, &[&member]);

    let prover_path = PathBuf::from("./target/release/prover");
    if !prover_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return;
    }

    let prover_output = run_prover(
        &prover_path,
        &contributors_file,
        &config_file,
        &proof_file,
        &format!("{:x}", outsider.signer().to_bytes()),
    );
    assert!(!prover_output.status.success());
    assert!(!proof_file.exists());
}

#[test]
fn test_concurrent_prover_calls() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let contributors_file = temp_dir.path().join("contributors.txt");
    let proof_file1 = temp_dir.path().join("proof1.json");
    let proof_file2 = temp_dir.path().join("proof2.json");

    let wallet1 = LocalWallet::new(&mut rand::thread_rng());
    let wallet2 = LocalWallet::new(&mut rand::thread_rng());
    let wallet3 = LocalWallet::new(&mut rand::thread_rng());
    write_contributors(&contributors_file, &[&wallet1, &wallet2, &wallet3]);

    let private_key1 = format!("{:x}", wallet1.signer().to_bytes());
    let private_key2 = format!("{:x}", wallet2.signer().to_bytes());

    let prover_path = PathBuf::from("./target/release/prover");

    if !prover_path.exists() {
        eprintln!("Skipping integration test: release binaries not found");
        return;
    }

    // separate key caches so the two setups do not race on the same files
    let dir1 = temp_dir.path().join("one");
    let dir2 = temp_dir.path().join("two");
    fs::create_dir_all(&dir1).expect("Failed to create dir");
    fs::create_dir_all(&dir2).expect("Failed to create dir");
    let config1 = write_config(&dir1);
    let config2 = write_config(&dir2);

    let prover_path_clone = prover_path.clone();
    let contributors_file_clone = contributors_file.clone();
    let proof_file1_clone = proof_file1.clone();
    let proof_file2_clone = proof_file2.clone();

    let handle1 = thread::spawn(move || {
        run_prover(
            &prover_path,
            &contributors_file,
            &config1,
            &proof_file1_clone,
            &private_key1,
        )
    });

    let handle2 = thread::spawn(move || {
        run_prover(
            &prover_path_clone,
            &contributors_file_clone,
            &config2,
            &proof_file2_clone,
            &private_key2,
        )
    });

    let output1 = handle1.join().expect("Thread 1 panicked");
    let output2 = handle2.join().expect("Thread 2 panicked");

    assert!(
        output1.status.success(),
        "Prover 1 failed: {}",
        String::from_utf8_lossy(&output1.stderr)
    );

    assert!(
        output2.status.success(),
        "Prover 2 failed: {}",
        String::from_utf8_lossy(&output2.stderr)
    );

    assert!(proof_file1.exists());
    assert!(proof_file2.exists());
}
