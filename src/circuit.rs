//! Groth16 circuit for contributor membership.
//!
//! The circuit proves knowledge of an address, a nonce and a Merkle path such
//! that
//!
//! 1. folding the leaf `address` up the path with Poseidon yields the public
//!    `root`, and
//! 2. `poseidon(address, nonce)` equals the public `commitment`, and
//! 3. `address` is non-zero, since empty tree slots are zero leaves.
//!
//! Public inputs are allocated in the order `[commitment, root]`.
//!
//! The Poseidon gadget replays the same permutation as the native hash in
//! [`crate::poseidon`]: state `[0, left, right]`, each round adds round
//! constants, applies `x^5` to every element in full rounds and to the first
//! element in partial rounds, then multiplies by the MDS matrix.

use crate::contributor_tree::MembershipPath;
use crate::error::{RegistryError, RegistryResult};
use crate::poseidon::{commitment_of, poseidon_parameters};
use crate::types::{Commitment, ProofElements, PublicSignals};
use crate::utils::field_to_word;
use crate::verifier::proof_to_elements;
use anyhow::{Context, Result};
use ark_bn254::{Bn254, Fr};
use ark_ff::Field;
use ark_groth16::{Groth16, ProvingKey, VerifyingKey};
use ark_relations::lc;
use ark_relations::r1cs::{
    ConstraintSynthesizer, ConstraintSystemRef, LinearCombination, SynthesisError, Variable,
};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use ark_std::rand::{CryptoRng, RngCore};
use ark_std::{One, Zero};
use light_poseidon::PoseidonParameters;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A linear combination together with the value it evaluates to.
#[derive(Clone)]
struct Wire {
    lc: LinearCombination<Fr>,
    value: Fr,
}

impl Wire {
    fn constant(value: Fr) -> Self {
        Wire {
            lc: lc!() + (value, Variable::One),
            value,
        }
    }

    fn variable(var: Variable, value: Fr) -> Self {
        Wire {
            lc: lc!() + var,
            value,
        }
    }

    fn add_constant(&mut self, c: Fr) {
        self.lc = self.lc.clone() + (c, Variable::One);
        self.value += c;
    }

    /// `self + k * other`
    fn add_scaled(mut self, other: &Wire, k: Fr) -> Self {
        for (coeff, var) in other.lc.0.iter() {
            self.lc = self.lc + (*coeff * k, *var);
        }
        self.value += other.value * k;
        self
    }
}

fn witness(cs: &ConstraintSystemRef<Fr>, value: Fr) -> Result<Variable, SynthesisError> {
    cs.new_witness_variable(|| Ok(value))
}

/// `x^5` with three multiplication constraints.
fn sbox(cs: &ConstraintSystemRef<Fr>, x: &Wire) -> Result<Wire, SynthesisError> {
    let x2_val = x.value.square();
    let x2 = witness(cs, x2_val)?;
    cs.enforce_constraint(x.lc.clone(), x.lc.clone(), lc!() + x2)?;

    let x4_val = x2_val.square();
    let x4 = witness(cs, x4_val)?;
    cs.enforce_constraint(lc!() + x2, lc!() + x2, lc!() + x4)?;

    let x5_val = x4_val * x.value;
    let x5 = witness(cs, x5_val)?;
    cs.enforce_constraint(lc!() + x4, x.lc.clone(), lc!() + x5)?;

    Ok(Wire::variable(x5, x5_val))
}

fn mix(state: &[Wire], mds: &[Vec<Fr>]) -> Vec<Wire> {
    mds.iter()
        .map(|row| {
            row.iter()
                .zip(state)
                .fold(Wire::constant(Fr::zero()), |acc, (m, s)| acc.add_scaled(s, *m))
        })
        .collect()
}

fn poseidon_gadget(
    cs: &ConstraintSystemRef<Fr>,
    params: &PoseidonParameters<Fr>,
    left: Wire,
    right: Wire,
) -> Result<Wire, SynthesisError> {
    let width = params.width;
    let half_full = params.full_rounds / 2;
    let total = params.full_rounds + params.partial_rounds;

    let mut state = vec![Wire::constant(Fr::zero()), left, right];
    for round in 0..total {
        for (i, element) in state.iter_mut().enumerate() {
            element.add_constant(params.ark[round * width + i]);
        }

        let full = round < half_full || round >= half_full + params.partial_rounds;
        if full {
            for element in state.iter_mut() {
                *element = sbox(cs, element)?;
            }
        } else {
            state[0] = sbox(cs, &state[0])?;
        }

        state = mix(&state, &params.mds);
    }

    Ok(state.swap_remove(0))
}

/// Constrains `a == b` for two wires.
fn enforce_equal(cs: &ConstraintSystemRef<Fr>, a: &Wire, b: &Wire) -> Result<(), SynthesisError> {
    cs.enforce_constraint(a.lc.clone(), lc!() + Variable::One, b.lc.clone())
}

#[derive(Clone)]
pub struct MembershipCircuit {
    pub address: Fr,
    pub nonce: Fr,
    pub siblings: Vec<Fr>,
    /// `true` when the path node is the right child at that level.
    pub path_bits: Vec<bool>,
    pub root: Fr,
    pub commitment: Fr,
    params: Arc<PoseidonParameters<Fr>>,
}

impl MembershipCircuit {
    /// Builds a satisfied circuit for `address` at `path`, deriving the
    /// public root and commitment natively.
    pub fn new(
        address: Fr,
        nonce: Fr,
        path: &MembershipPath,
        params: Arc<PoseidonParameters<Fr>>,
    ) -> RegistryResult<Self> {
        if address.is_zero() {
            return Err(RegistryError::MalformedInput(
                "the zero address is an empty tree slot, not a contributor".to_string(),
            ));
        }
        if path.leaf != address {
            return Err(RegistryError::MalformedInput(
                "membership path does not start at the prover's address".to_string(),
            ));
        }
        if path.siblings.len() != path.path_bits.len() {
            return Err(RegistryError::MalformedInput(format!(
                "path has {} siblings but {} direction bits",
                path.siblings.len(),
                path.path_bits.len()
            )));
        }

        Ok(Self {
            address,
            nonce,
            siblings: path.siblings.clone(),
            path_bits: path.path_bits.clone(),
            root: path.compute_root()?,
            commitment: commitment_of(address, nonce)?,
            params,
        })
    }

    /// An all-zero instance of the given depth, used for key generation.
    /// Its witness does not satisfy the non-zero leaf constraint.
    #[must_use]
    pub fn blank(depth: usize, params: Arc<PoseidonParameters<Fr>>) -> Self {
        Self {
            address: Fr::zero(),
            nonce: Fr::zero(),
            siblings: vec![Fr::zero(); depth],
            path_bits: vec![false; depth],
            root: Fr::zero(),
            commitment: Fr::zero(),
            params,
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    #[must_use]
    pub fn public_signals(&self) -> PublicSignals {
        PublicSignals {
            root: field_to_word(self.root),
            commitment: Commitment(field_to_word(self.commitment)),
        }
    }
}

impl ConstraintSynthesizer<Fr> for MembershipCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let commitment_var = cs.new_input_variable(|| Ok(self.commitment))?;
        let root_var = cs.new_input_variable(|| Ok(self.root))?;

        let address = Wire::variable(witness(&cs, self.address)?, self.address);
        let nonce = Wire::variable(witness(&cs, self.nonce)?, self.nonce);

        // address * address_inv == 1
        let inv_val = self.address.inverse().unwrap_or_else(Fr::zero);
        let inv = witness(&cs, inv_val)?;
        cs.enforce_constraint(address.lc.clone(), lc!() + inv, lc!() + Variable::One)?;

        let computed_commitment =
            poseidon_gadget(&cs, &self.params, address.clone(), nonce)?;
        enforce_equal(
            &cs,
            &computed_commitment,
            &Wire::variable(commitment_var, self.commitment),
        )?;

        let mut current = address;
        for (sibling_val, is_right) in self.siblings.iter().zip(&self.path_bits) {
            let sibling = Wire::variable(witness(&cs, *sibling_val)?, *sibling_val);

            let bit_val = if *is_right { Fr::one() } else { Fr::zero() };
            let bit = witness(&cs, bit_val)?;
            // bit * (1 - bit) == 0
            cs.enforce_constraint(
                lc!() + bit,
                lc!() + Variable::One + (-Fr::one(), bit),
                lc!(),
            )?;

            // swap = bit * (sibling - current)
            let diff = sibling.clone().add_scaled(&current, -Fr::one());
            let swap_val = bit_val * diff.value;
            let swap = Wire::variable(witness(&cs, swap_val)?, swap_val);
            cs.enforce_constraint(lc!() + bit, diff.lc.clone(), swap.lc.clone())?;

            let left = current.clone().add_scaled(&swap, Fr::one());
            let right = sibling.add_scaled(&swap, -Fr::one());
            current = poseidon_gadget(&cs, &self.params, left, right)?;
        }

        enforce_equal(&cs, &current, &Wire::variable(root_var, self.root))?;
        Ok(())
    }
}

/// Circuit-specific Groth16 setup and proving for one tree depth.
///
/// Keys are generated once and cached behind `Arc`s.
pub struct MembershipProver {
    depth: usize,
    params: Arc<PoseidonParameters<Fr>>,
    pk: Option<Arc<ProvingKey<Bn254>>>,
    vk: Option<Arc<VerifyingKey<Bn254>>>,
}

impl MembershipProver {
    /// Create a new prover with no cached keys.
    pub fn new(depth: usize) -> RegistryResult<Self> {
        Ok(Self {
            depth,
            params: Arc::new(poseidon_parameters()?),
            pk: None,
            vk: None,
        })
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Shared Poseidon parameters for building circuits.
    #[must_use]
    pub fn params(&self) -> Arc<PoseidonParameters<Fr>> {
        Arc::clone(&self.params)
    }

    #[must_use]
    pub fn verifying_key(&self) -> Option<Arc<VerifyingKey<Bn254>>> {
        self.vk.clone()
    }

    /// Generate keys and cache them for future use.
    pub fn generate_and_cache_keys<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        info!("Running Groth16 setup for depth {}", self.depth);
        let circuit = MembershipCircuit::blank(self.depth, self.params());
        let (pk, vk) = Groth16::<Bn254>::circuit_specific_setup(circuit, rng)
            .map_err(|e| anyhow::anyhow!("Groth16 setup failed: {e:?}"))?;
        debug!("Verifying key has {} IC points", vk.gamma_abc_g1.len());

        self.pk = Some(Arc::new(pk));
        self.vk = Some(Arc::new(vk));
        Ok(())
    }

    /// Builds the circuit for `address` at `path` and proves it.
    pub fn prove_membership<R: RngCore + CryptoRng>(
        &mut self,
        address: Fr,
        nonce: Fr,
        path: &MembershipPath,
        rng: &mut R,
    ) -> Result<(ProofElements, PublicSignals)> {
        let circuit = MembershipCircuit::new(address, nonce, path, self.params())
            .context("Failed to build membership circuit")?;
        self.generate_proof(circuit, rng)
    }

    /// Generates a proof for a satisfied circuit, creating keys on first use.
    pub fn generate_proof<R: RngCore + CryptoRng>(
        &mut self,
        circuit: MembershipCircuit,
        rng: &mut R,
    ) -> Result<(ProofElements, PublicSignals)> {
        if circuit.depth() != self.depth {
            return Err(anyhow::anyhow!(
                "Circuit depth {} does not match prover depth {}",
                circuit.depth(),
                self.depth
            ));
        }

        let pk = match &self.pk {
            Some(pk) => Arc::clone(pk),
            None => {
                self.generate_and_cache_keys(rng)?;
                self.pk
                    .clone()
                    .context("Proving key missing after setup")?
            }
        };

        let signals = circuit.public_signals();
        let proof = Groth16::<Bn254>::prove(&pk, circuit, rng)
            .map_err(|e| anyhow::anyhow!("Groth16 proving failed: {e:?}"))?;

        Ok((proof_to_elements(&proof), signals))
    }

    fn key_paths(dir: &Path, depth: usize) -> (PathBuf, PathBuf) {
        (
            dir.join(format!("membership_d{depth}.pk")),
            dir.join(format!("membership_d{depth}.vk")),
        )
    }

    /// Writes both keys to `dir`.
    pub fn save_keys(&self, dir: &Path) -> Result<()> {
        let (pk, vk) = match (&self.pk, &self.vk) {
            (Some(pk), Some(vk)) => (pk, vk),
            _ => return Err(anyhow::anyhow!("No keys to save; run setup first")),
        };

        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create key directory: {}", dir.display()))?;
        let (pk_path, vk_path) = Self::key_paths(dir, self.depth);

        let mut pk_bytes = Vec::new();
        pk.serialize_uncompressed(&mut pk_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to serialize proving key: {e}"))?;
        fs::write(&pk_path, pk_bytes)
            .with_context(|| format!("Failed to write proving key: {}", pk_path.display()))?;

        write_verifying_key(vk, &vk_path)?;
        info!("Saved Groth16 keys to {}", dir.display());
        Ok(())
    }

    /// Loads cached keys from `dir`. Returns `Ok(false)` when none exist.
    pub fn load_keys(&mut self, dir: &Path) -> Result<bool> {
        let (pk_path, vk_path) = Self::key_paths(dir, self.depth);
        if !pk_path.exists() || !vk_path.exists() {
            return Ok(false);
        }

        let pk_bytes = fs::read(&pk_path)
            .with_context(|| format!("Failed to read proving key: {}", pk_path.display()))?;
        // produced by save_keys, so the expensive subgroup checks are skipped
        let pk = ProvingKey::<Bn254>::deserialize_uncompressed_unchecked(pk_bytes.as_slice())
            .map_err(|e| anyhow::anyhow!("Corrupt proving key {}: {e}", pk_path.display()))?;
        let vk = read_verifying_key(&vk_path)?;

        self.pk = Some(Arc::new(pk));
        self.vk = Some(Arc::new(vk));
        debug!("Loaded Groth16 keys from {}", dir.display());
        Ok(true)
    }

    /// Path of the verifying key for `depth` inside `dir`.
    #[must_use]
    pub fn verifying_key_path(dir: &Path, depth: usize) -> PathBuf {
        Self::key_paths(dir, depth).1
    }
}

/// Serializes a verifying key to `path`.
pub fn write_verifying_key(vk: &VerifyingKey<Bn254>, path: &Path) -> Result<()> {
    let mut bytes = Vec::new();
    vk.serialize_uncompressed(&mut bytes)
        .map_err(|e| anyhow::anyhow!("Failed to serialize verifying key: {e}"))?;
    fs::write(path, bytes)
        .with_context(|| format!("Failed to write verifying key: {}", path.display()))
}

/// Reads and validates a verifying key from `path`.
pub fn read_verifying_key(path: &Path) -> Result<VerifyingKey<Bn254>> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read verifying key: {}", path.display()))?;
    VerifyingKey::<Bn254>::deserialize_uncompressed(bytes.as_slice())
        .map_err(|e| anyhow::anyhow!("Corrupt verifying key {}: {e}", path.display()))
}
