//! # QKD Pipeline: BB84 Simulation and Post-Processing
//!
//! A research/demonstration simulator for a complete Quantum Key Distribution
//! pipeline built on the BB84 protocol. The crate models photonic hardware
//! imperfections, quantum channel effects, canonical eavesdropping attacks and
//! their statistical detection, then processes the raw bits through a
//! classical post-processing chain (error reconciliation, privacy
//! amplification) and can consume the final key for authenticated symmetric
//! encryption.
//!
//! ## Pipeline Stages
//!
//! ### Stage 1: Quantum Primitives
//! - **Qubit states**: normalized complex amplitude pairs with measurement in
//!   the computational (Z) and Hadamard (X) bases
//! - **Photon source**: emission efficiency, Poisson photon statistics,
//!   multi-photon flagging, wavelength and timing imperfections
//! - **Fiber channel**: temperature-corrected attenuation, depolarization,
//!   chromatic and polarization-mode dispersion, Kerr phase noise
//! - **Single-photon detector**: dead time, dark counts, crosstalk,
//!   afterpulsing, bounded detection history
//!
//! ### Stage 2: BB84 Protocol
//! - Phased exchange: initialization → transmission → basis announcement →
//!   sifting → error estimation → reconciliation → privacy amplification
//! - Per-run record with both parties' bits, bases, sifted/reconciled/final
//!   keys, QBER at every stage, and subsystem metadata
//!
//! ### Stage 3: Attack Models and Detection
//! - Intercept-resend, photon-number-splitting and detector-blinding
//!   eavesdroppers behind one interception interface
//! - Statistical attack detector over QBER, error clustering and attack
//!   strength, with confidence scoring and classification
//!
//! ### Stage 4: Classical Post-Processing
//! - **Cascade** reconciliation with deterministic per-round shuffles and
//!   parity binary search
//! - **LDPC-style** decoding, a deliberately simplified belief-propagation
//!   approximation, documented as such
//! - **Toeplitz** and **universal** hashing for privacy amplification with
//!   entropy-driven output sizing
//!
//! ### Stage 5: Key Consumption
//! - Decoy-state analysis (GLLP single-photon estimation, parameter
//!   optimization) running alongside the protocol
//! - PBKDF2-derived AES keys over GCM/CBC/CTR with a fixed interoperable
//!   ciphertext blob format
//! - Per-user key caching with TTL, shared-key provisioning, and secure
//!   user-to-user messaging
//!
//! ## Randomness Model
//!
//! Every stochastic simulation draw comes from a per-run seedable ChaCha20
//! PRNG so runs are reproducible. Cryptographic material (KDF salts, AES
//! nonces and IVs, Toeplitz seeds) always comes from the operating system's
//! entropy source, never from the simulation generator.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qkd_pipeline::{QkdSimulator, SimulationParameters};
//!
//! fn main() -> qkd_pipeline::Result<()> {
//!     let simulator = QkdSimulator::new();
//!     let params = SimulationParameters {
//!         num_qubits: 1000,
//!         channel_length_km: 5.0,
//!         ..Default::default()
//!     };
//!     let result = simulator.run_simulation(&params, None)?;
//!     println!("final key: {} bits, sifted QBER {:.3}",
//!         result.bb84.final_key_length, result.bb84.sifted_qber);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Ambient modules - randomness discipline and logging
pub mod entropy; // Seedable simulation PRNG, OS-backed cryptographic entropy
pub mod logging; // Structured logging, categories, performance timers

// Simulation core - quantum layer through classical post-processing
pub mod aes_integration; // PBKDF2 key derivation, AES-GCM/CBC/CTR blobs
pub mod attacks; // Eavesdropper variants and statistical attack detection
pub mod bb84; // Protocol orchestrator, sender, receiver, run records
pub mod decoy_states; // Decoy-state statistics and GLLP estimation
pub mod privacy_amplification; // Toeplitz/universal hashing, entropy estimation
pub mod quantum_optics; // Qubits, photon source, fiber channel, detector
pub mod reconciliation; // Cascade, simplified LDPC, hybrid combinator
pub mod secure_messaging; // User-to-user messaging over cached quantum keys
pub mod simulator; // Facade: parameters, runs, sweeps, key cache

pub use simulator::{QkdSimulator, SimulationParameters, SimulationResult};

/// Error type covering every simulator subsystem.
///
/// All failures in the core manifest as values of this enum; nothing aborts
/// the process, and a failed operation leaves the simulator instance usable.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SimulatorError {
    /// Out-of-range or inconsistent simulation parameters. Surfaced before
    /// any simulation work starts.
    #[error("Parameter validation error: {0}")]
    InvalidParameter(String),

    /// Quantum-layer failures: malformed states, impossible measurement
    /// requests, detector bookkeeping violations.
    #[error("Quantum operation error: {0}")]
    QuantumOperation(String),

    /// Reconciliation failures: mismatched key lengths, malformed codewords.
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// Privacy amplification failures: malformed hash parameters.
    #[error("Privacy amplification error: {0}")]
    PrivacyAmplification(String),

    /// Decoy-state analysis failures other than the degenerate-intensity
    /// case, which is reported in-band on the analysis record.
    #[error("Decoy-state analysis error: {0}")]
    DecoyAnalysis(String),

    /// AES key derivation failures: empty key material, unsupported sizes.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// A single decrypt call failed: GCM tag mismatch, truncated blob,
    /// bad padding. Other messages are unaffected.
    #[error("Decryption failed: {0}")]
    DecryptFailed(String),

    /// No valid (unexpired) cached quantum key for the named user.
    #[error("No quantum key available for user: {0}")]
    KeyUnavailable(String),

    /// Secure-message lookup failed.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The requesting user is not a party to the message.
    #[error("Unauthorized access to message")]
    UnauthorizedAccess,

    /// Messaging-service failures not covered by the variants above.
    #[error("Messaging error: {0}")]
    Messaging(String),

    /// Result export failures: unknown simulation id, unwritable path.
    #[error("Export error: {0}")]
    Export(String),
}

/// Result type for all simulator operations.
pub type Result<T> = std::result::Result<T, SimulatorError>;
