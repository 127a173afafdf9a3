//! Zero-knowledge membership verification.
//!
//! [`ZkMembershipVerifier`] decides whether an anonymous submission carries a
//! valid membership proof. Checks run cheapest first:
//!
//! 1. every proof word must be below the BN254 base-field modulus and every
//!    public signal below the scalar-field modulus (`MalformedInput`);
//! 2. the proof's root must be in the current validity window (`StaleRoot`);
//! 3. the Groth16 pairing check, delegated to a [`Groth16Verifier`]
//!    (`InvalidProof`).

use crate::error::{RegistryError, RegistryResult};
use crate::membership::ContributorMembershipTree;
use crate::types::{FieldBytes, ProofElements, PublicSignals};
use crate::utils::{field_from_word, field_to_word};
use anyhow::Result;
use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_snark::SNARK;
use log::{debug, warn};
use std::path::Path;

/// Pairing-check collaborator.
///
/// `public_inputs` are canonical scalars in circuit order
/// (`[commitment, root]`).
pub trait Groth16Verifier: Send + Sync {
    fn verify(&self, proof: &ProofElements, public_inputs: &[Fr]) -> RegistryResult<bool>;

    /// Human-readable identity, logged when the verifier is replaced.
    fn describe(&self) -> String;
}

/// Splits an arkworks proof into the eight-word wire layout.
#[must_use]
pub fn proof_to_elements(proof: &Proof<Bn254>) -> ProofElements {
    ProofElements([
        field_to_word(proof.a.x),
        field_to_word(proof.a.y),
        field_to_word(proof.b.x.c1),
        field_to_word(proof.b.x.c0),
        field_to_word(proof.b.y.c1),
        field_to_word(proof.b.y.c0),
        field_to_word(proof.c.x),
        field_to_word(proof.c.y),
    ])
}

fn coordinate(words: &[FieldBytes; 8], i: usize) -> RegistryResult<Fq> {
    field_from_word::<Fq>(&words[i], &format!("proof element {i}"))
}

/// Reassembles and validates the curve points of a wire proof.
///
/// # Errors
///
/// `MalformedInput` for a coordinate outside the base field, `InvalidProof`
/// for a point that is off the curve or outside the prime-order subgroup.
pub fn elements_to_proof(elements: &ProofElements) -> RegistryResult<Proof<Bn254>> {
    let w = &elements.0;

    let a = G1Affine::new_unchecked(coordinate(w, 0)?, coordinate(w, 1)?);
    let b = G2Affine::new_unchecked(
        Fq2::new(coordinate(w, 3)?, coordinate(w, 2)?),
        Fq2::new(coordinate(w, 5)?, coordinate(w, 4)?),
    );
    let c = G1Affine::new_unchecked(coordinate(w, 6)?, coordinate(w, 7)?);

    let g1_ok = |p: &G1Affine| p.is_on_curve() && p.is_in_correct_subgroup_assuming_on_curve();
    if !g1_ok(&a) || !g1_ok(&c) {
        debug!("Proof G1 point rejected by curve or subgroup check");
        return Err(RegistryError::InvalidProof);
    }
    if !(b.is_on_curve() && b.is_in_correct_subgroup_assuming_on_curve()) {
        debug!("Proof G2 point rejected by curve or subgroup check");
        return Err(RegistryError::InvalidProof);
    }

    Ok(Proof { a, b, c })
}

/// Groth16 verification over BN254 with a prepared verifying key.
pub struct ArkGroth16Verifier {
    pvk: PreparedVerifyingKey<Bn254>,
    label: String,
}

impl ArkGroth16Verifier {
    pub fn new(vk: &VerifyingKey<Bn254>, label: impl Into<String>) -> Self {
        Self {
            pvk: prepare_verifying_key(vk),
            label: label.into(),
        }
    }

    /// Loads a verifying key written by the prover tooling.
    pub fn from_file(path: &Path) -> Result<Self> {
        let vk = crate::circuit::read_verifying_key(path)?;
        Ok(Self::new(&vk, path.display().to_string()))
    }
}

impl Groth16Verifier for ArkGroth16Verifier {
    fn verify(&self, proof: &ProofElements, public_inputs: &[Fr]) -> RegistryResult<bool> {
        let expected = self.pvk.vk.gamma_abc_g1.len().saturating_sub(1);
        if public_inputs.len() != expected {
            return Err(RegistryError::MalformedInput(format!(
                "verifying key expects {expected} public inputs, got {}",
                public_inputs.len()
            )));
        }

        let proof = elements_to_proof(proof)?;
        Groth16::<Bn254>::verify_with_processed_vk(&self.pvk, public_inputs, &proof)
            .map_err(|e| RegistryError::MalformedInput(format!("pairing check: {e:?}")))
    }

    fn describe(&self) -> String {
        format!("ark-groth16 bn254 ({})", self.label)
    }
}

/// Membership verifier combining the root window with a pairing backend.
pub struct ZkMembershipVerifier {
    backend: Box<dyn Groth16Verifier>,
}

impl ZkMembershipVerifier {
    pub fn new(backend: Box<dyn Groth16Verifier>) -> Self {
        Self { backend }
    }

    /// Swaps the pairing backend. Authorization is the caller's concern.
    pub fn set_backend(&mut self, backend: Box<dyn Groth16Verifier>) {
        debug!(
            "Replacing Groth16 verifier {} with {}",
            self.backend.describe(),
            backend.describe()
        );
        self.backend = backend;
    }

    #[must_use]
    pub fn backend_description(&self) -> String {
        self.backend.describe()
    }

    /// Verifies `proof` for `signals`, returning the precise failure kind.
    pub fn check(
        &self,
        window: &ContributorMembershipTree,
        proof: &ProofElements,
        signals: &PublicSignals,
    ) -> RegistryResult<()> {
        for (i, word) in proof.0.iter().enumerate() {
            field_from_word::<Fq>(word, &format!("proof element {i}"))?;
        }
        let [commitment_word, root_word] = signals.circuit_order();
        let commitment = field_from_word::<Fr>(&commitment_word, "commitment signal")?;
        let root = field_from_word::<Fr>(&root_word, "root signal")?;
        debug!("Proof inputs are canonical field elements");

        if !window.is_root_valid(&signals.root) {
            warn!(
                "Membership proof against root 0x{} outside the valid window",
                hex::encode(signals.root)
            );
            return Err(RegistryError::StaleRoot(format!(
                "0x{}",
                hex::encode(signals.root)
            )));
        }

        if self.backend.verify(proof, &[commitment, root])? {
            debug!("Membership proof accepted for commitment {}", signals.commitment);
            Ok(())
        } else {
            warn!("Membership proof failed the pairing check");
            Err(RegistryError::InvalidProof)
        }
    }

    /// Boolean form of [`Self::check`].
    #[must_use]
    pub fn verify(
        &self,
        window: &ContributorMembershipTree,
        proof: &ProofElements,
        signals: &PublicSignals,
    ) -> bool {
        self.check(window, proof, signals).is_ok()
    }
}
