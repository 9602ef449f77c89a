//! Error reconciliation over the sifted key.
//!
//! Three methods behind one dispatcher:
//!
//! - **Cascade**: the classic interactive protocol. Blocks are parity-checked
//!   against the sender's key and binary search localizes one error per
//!   odd-parity block; block size halves each round. Block shuffles are
//!   seeded deterministically per round (42 + round) so a run is exactly
//!   reproducible. Every localized error costs one revealed bit, and the
//!   revealed positions are reported for removal from the final key.
//! - **LDPC-style**: a low-density parity-check code with a 10%-density
//!   random matrix and an identity block on the parity columns. The decoder
//!   is a deliberately simplified approximation of belief propagation (a
//!   damped variable-node step plus a majority-pull check step) kept for
//!   behavioral fidelity with the system this models. It is NOT a faithful
//!   min-sum decoder; non-convergence returns the best-effort codeword with
//!   `success = false`.
//! - **Hybrid**: Cascade first; when its success rate falls below 0.95 the
//!   LDPC stage runs over the Cascade output and the records merge.

use serde::{Deserialize, Serialize};

use crate::entropy::SimulationRng;
use crate::logging::{log_info, LogCategory};
use crate::{Result, SimulatorError};

/// Reconciliation method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationMethod {
    Cascade,
    Ldpc,
    Hybrid,
}

impl std::fmt::Display for ReconciliationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cascade => "cascade",
            Self::Ldpc => "ldpc",
            Self::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// How Cascade partitions the key into parity blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParitySelection {
    /// Shuffle positions with a per-round deterministic seed, then chunk.
    Random,
    /// Consecutive chunks.
    Sequential,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub corrected_key_sender: Vec<u8>,
    pub corrected_key_receiver: Vec<u8>,
    /// Positions whose bits were revealed on the public channel; the caller
    /// drops these from the final key.
    pub discarded_positions: Vec<usize>,
    pub method: ReconciliationMethod,
    pub rounds_required: usize,
    pub bits_revealed: usize,
    /// `1 − errors_remaining / key_length`.
    pub success_rate: f64,
    /// Key length after the discarded positions are removed.
    pub final_key_length: usize,
}

impl ReconciliationResult {
    /// A key with the revealed positions removed.
    pub fn retained_key(&self, key: &[u8]) -> Vec<u8> {
        key.iter()
            .enumerate()
            .filter_map(|(i, &bit)| (!self.discarded_positions.contains(&i)).then_some(bit))
            .collect()
    }
}

/// Cascade configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CascadeConfig {
    pub initial_block_size: usize,
    pub max_rounds: usize,
    pub parity_selection: ParitySelection,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            initial_block_size: 64,
            max_rounds: 4,
            parity_selection: ParitySelection::Random,
        }
    }
}

/// The Cascade interactive reconciliation protocol.
#[derive(Debug, Clone)]
pub struct CascadeProtocol {
    config: CascadeConfig,
}

impl CascadeProtocol {
    pub fn new(config: CascadeConfig) -> Self {
        Self { config }
    }

    /// Reconcile the receiver's key against the sender's.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Reconciliation`] when the key lengths differ.
    pub fn reconcile(&self, key_sender: &[u8], key_receiver: &[u8]) -> Result<ReconciliationResult> {
        if key_sender.len() != key_receiver.len() {
            return Err(SimulatorError::Reconciliation(format!(
                "key lengths must match: {} vs {}",
                key_sender.len(),
                key_receiver.len()
            )));
        }
        let key_length = key_sender.len();
        let corrected_sender = key_sender.to_vec();
        let mut corrected_receiver = key_receiver.to_vec();

        let mut revealed_positions: Vec<usize> = Vec::new();
        let mut bits_revealed = 0usize;
        let mut rounds_completed = 0usize;

        let mut block_size = self.config.initial_block_size;
        for round in 0..self.config.max_rounds {
            rounds_completed = round + 1;

            for block in self.create_blocks(key_length, block_size, round) {
                let sender_parity = parity(&corrected_sender, &block);
                let receiver_parity = parity(&corrected_receiver, &block);
                if sender_parity == receiver_parity {
                    continue;
                }
                if let Some(error_pos) =
                    find_error_in_block(&corrected_sender, &corrected_receiver, &block)
                {
                    corrected_receiver[error_pos] = corrected_sender[error_pos];
                    if !revealed_positions.contains(&error_pos) {
                        revealed_positions.push(error_pos);
                    }
                    bits_revealed += 1;
                }
            }

            block_size = (block_size / 2).max(2);
            if residual_error_rate(&corrected_sender, &corrected_receiver) < 0.001 {
                break;
            }
        }

        let errors_remaining = corrected_sender
            .iter()
            .zip(corrected_receiver.iter())
            .filter(|(a, b)| a != b)
            .count();
        let success_rate = if key_length == 0 {
            1.0
        } else {
            1.0 - errors_remaining as f64 / key_length as f64
        };

        log_info(
            LogCategory::Reconciliation,
            &format!(
                "cascade: {rounds_completed} rounds, {bits_revealed} bits revealed, \
                 {errors_remaining} errors remaining"
            ),
        );

        Ok(ReconciliationResult {
            final_key_length: key_length - revealed_positions.len(),
            corrected_key_sender: corrected_sender,
            corrected_key_receiver: corrected_receiver,
            discarded_positions: revealed_positions,
            method: ReconciliationMethod::Cascade,
            rounds_required: rounds_completed,
            bits_revealed,
            success_rate,
        })
    }

    fn create_blocks(&self, key_length: usize, block_size: usize, round: usize) -> Vec<Vec<usize>> {
        let positions: Vec<usize> = match self.config.parity_selection {
            ParitySelection::Random => {
                // Deterministic but different per round, so both parties can
                // derive the same partition without extra communication.
                let mut shuffle_rng = SimulationRng::seeded(42 + round as u64);
                let mut positions: Vec<usize> = (0..key_length).collect();
                shuffle_rng.shuffle(&mut positions);
                positions
            }
            ParitySelection::Sequential => (0..key_length).collect(),
        };
        positions
            .chunks(block_size)
            .filter(|chunk| chunk.len() >= 2)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

fn parity(key: &[u8], indices: &[usize]) -> u8 {
    indices.iter().map(|&i| key[i]).sum::<u8>() % 2
}

fn residual_error_rate(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() as f64 / a.len() as f64
}

/// Binary search for the (single) error inside an odd-parity block.
fn find_error_in_block(sender: &[u8], receiver: &[u8], block: &[usize]) -> Option<usize> {
    if block.len() == 1 {
        let i = block[0];
        return (sender[i] != receiver[i]).then_some(i);
    }
    let mid = block.len() / 2;
    let (left, right) = block.split_at(mid);
    if parity(sender, left) != parity(receiver, left) {
        find_error_in_block(sender, receiver, left)
    } else {
        find_error_in_block(sender, receiver, right)
    }
}

/// LDPC code configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LdpcConfig {
    pub code_length: usize,
    pub code_rate: f64,
    pub max_iterations: usize,
}

impl Default for LdpcConfig {
    fn default() -> Self {
        Self {
            code_length: 1024,
            code_rate: 0.5,
            max_iterations: 50,
        }
    }
}

/// Low-density parity-check code with the simplified decoder.
#[derive(Debug, Clone)]
pub struct LdpcCode {
    config: LdpcConfig,
    /// parity_bits × code_length binary matrix, 10% density with an identity
    /// block on the parity columns.
    parity_check: Vec<Vec<u8>>,
}

impl LdpcCode {
    pub fn new(config: LdpcConfig, rng: &mut SimulationRng) -> Self {
        let info_bits = (config.code_length as f64 * config.code_rate) as usize;
        let parity_bits = config.code_length - info_bits;

        let mut parity_check = vec![vec![0u8; config.code_length]; parity_bits];
        for row in parity_check.iter_mut() {
            for entry in row.iter_mut() {
                *entry = u8::from(rng.chance(0.1));
            }
        }
        for (r, row) in parity_check.iter_mut().enumerate() {
            for (c, entry) in row.iter_mut().enumerate().skip(info_bits) {
                *entry = u8::from(c - info_bits == r);
            }
        }

        Self {
            config,
            parity_check,
        }
    }

    pub fn info_bits(&self) -> usize {
        (self.config.code_length as f64 * self.config.code_rate) as usize
    }

    /// Systematic encode: append the parity of the information bits.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Reconciliation`] when the payload length
    /// does not match the code rate.
    pub fn encode(&self, information_bits: &[u8]) -> Result<Vec<u8>> {
        let info_bits = self.info_bits();
        if information_bits.len() != info_bits {
            return Err(SimulatorError::Reconciliation(format!(
                "information length {} does not match code rate ({} expected)",
                information_bits.len(),
                info_bits
            )));
        }
        let mut codeword = information_bits.to_vec();
        for row in &self.parity_check {
            let parity: u8 = row
                .iter()
                .take(info_bits)
                .zip(information_bits.iter())
                .map(|(h, b)| h & b)
                .fold(0, |acc, x| acc ^ x);
            codeword.push(parity);
        }
        Ok(codeword)
    }

    /// Decode with the simplified belief-propagation approximation.
    ///
    /// Returns the decoded information bits and whether the syndrome reached
    /// zero within the iteration budget.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Reconciliation`] when the codeword length
    /// is wrong.
    pub fn decode(&self, received: &[u8], rng: &mut SimulationRng) -> Result<(Vec<u8>, bool)> {
        if received.len() != self.config.code_length {
            return Err(SimulatorError::Reconciliation(format!(
                "codeword length {} does not match code length {}",
                received.len(),
                self.config.code_length
            )));
        }

        // Channel LLRs for an assumed 10% crossover probability
        let channel_llr = (0.9f64 / 0.1).ln();
        let mut llr: Vec<f64> = received
            .iter()
            .map(|&r| channel_llr * (1.0 - 2.0 * f64::from(r)))
            .collect();

        let mut decoded: Vec<u8> = received.to_vec();
        let mut converged = self.syndrome_is_zero(&decoded);

        for _ in 0..self.config.max_iterations {
            if converged {
                break;
            }
            // Damped variable-node step with a small stochastic perturbation
            for value in llr.iter_mut() {
                *value = (*value * 0.9 + rng.gauss(0.0, 0.01)).clamp(-10.0, 10.0);
            }
            // Check-node step: pull every LLR toward the bitwise majority
            let hard: Vec<u8> = llr.iter().map(|&v| u8::from(v < 0.0)).collect();
            let majority =
                (hard.iter().map(|&b| f64::from(b)).sum::<f64>() / hard.len() as f64).round();
            for (value, &bit) in llr.iter_mut().zip(hard.iter()) {
                *value += 0.1 * (majority - f64::from(bit));
            }

            decoded = llr.iter().map(|&v| u8::from(v < 0.0)).collect();
            converged = self.syndrome_is_zero(&decoded);
        }

        let info = decoded[..self.info_bits()].to_vec();
        Ok((info, converged))
    }

    fn syndrome_is_zero(&self, codeword: &[u8]) -> bool {
        self.parity_check.iter().all(|row| {
            row.iter()
                .zip(codeword.iter())
                .map(|(h, c)| h & c)
                .fold(0u8, |acc, x| acc ^ x)
                == 0
        })
    }
}

/// Method dispatcher owning one Cascade instance and one LDPC code.
pub struct Reconciler {
    method: ReconciliationMethod,
    cascade: CascadeProtocol,
    ldpc: LdpcCode,
}

impl Reconciler {
    /// Build a reconciler with default stage configurations. The LDPC
    /// parity-check matrix is drawn from the supplied simulation generator.
    pub fn new(method: ReconciliationMethod, rng: &mut SimulationRng) -> Self {
        Self::with_configs(method, CascadeConfig::default(), LdpcConfig::default(), rng)
    }

    pub fn with_configs(
        method: ReconciliationMethod,
        cascade: CascadeConfig,
        ldpc: LdpcConfig,
        rng: &mut SimulationRng,
    ) -> Self {
        Self {
            method,
            cascade: CascadeProtocol::new(cascade),
            ldpc: LdpcCode::new(ldpc, rng),
        }
    }

    pub fn method(&self) -> ReconciliationMethod {
        self.method
    }

    /// Run the configured reconciliation method.
    pub fn reconcile(
        &self,
        key_sender: &[u8],
        key_receiver: &[u8],
        rng: &mut SimulationRng,
    ) -> Result<ReconciliationResult> {
        match self.method {
            ReconciliationMethod::Cascade => self.cascade.reconcile(key_sender, key_receiver),
            ReconciliationMethod::Ldpc => self.ldpc_reconcile(key_sender, key_receiver, rng),
            ReconciliationMethod::Hybrid => self.hybrid_reconcile(key_sender, key_receiver, rng),
        }
    }

    fn ldpc_reconcile(
        &self,
        key_sender: &[u8],
        key_receiver: &[u8],
        rng: &mut SimulationRng,
    ) -> Result<ReconciliationResult> {
        let padded_sender = self.pad_to_info_length(key_sender, rng);
        let encoded = self.ldpc.encode(&padded_sender)?;
        let received = simulate_transmission(&encoded, rng);
        let (decoded_info, converged) = self.ldpc.decode(&received, rng)?;

        let final_len = key_sender.len().min(decoded_info.len());
        let corrected_sender = decoded_info[..final_len].to_vec();
        let corrected_receiver = key_receiver[..final_len].to_vec();

        let errors = corrected_sender
            .iter()
            .zip(corrected_receiver.iter())
            .filter(|(a, b)| a != b)
            .count();
        let success_rate = if final_len == 0 {
            1.0
        } else {
            1.0 - errors as f64 / final_len as f64
        };

        if !converged {
            log_info(
                LogCategory::Reconciliation,
                "ldpc decoder did not converge; returning best-effort codeword",
            );
        }

        Ok(ReconciliationResult {
            final_key_length: corrected_sender.len(),
            corrected_key_sender: corrected_sender,
            corrected_key_receiver: corrected_receiver,
            discarded_positions: Vec::new(),
            method: ReconciliationMethod::Ldpc,
            rounds_required: 1,
            bits_revealed: 0,
            success_rate,
        })
    }

    fn hybrid_reconcile(
        &self,
        key_sender: &[u8],
        key_receiver: &[u8],
        rng: &mut SimulationRng,
    ) -> Result<ReconciliationResult> {
        let cascade_result = self.cascade.reconcile(key_sender, key_receiver)?;
        if cascade_result.success_rate >= 0.95 {
            return Ok(cascade_result);
        }

        let ldpc_result = self.ldpc_reconcile(
            &cascade_result.corrected_key_sender,
            &cascade_result.corrected_key_receiver,
            rng,
        )?;

        let mut discarded = cascade_result.discarded_positions.clone();
        discarded.extend(ldpc_result.discarded_positions.iter().copied());

        Ok(ReconciliationResult {
            corrected_key_sender: ldpc_result.corrected_key_sender,
            corrected_key_receiver: ldpc_result.corrected_key_receiver,
            discarded_positions: discarded,
            method: ReconciliationMethod::Hybrid,
            rounds_required: cascade_result.rounds_required + ldpc_result.rounds_required,
            bits_revealed: cascade_result.bits_revealed + ldpc_result.bits_revealed,
            success_rate: ldpc_result.success_rate,
            final_key_length: ldpc_result.final_key_length,
        })
    }

    fn pad_to_info_length(&self, key: &[u8], rng: &mut SimulationRng) -> Vec<u8> {
        let info_bits = self.ldpc.info_bits();
        if key.len() >= info_bits {
            key[..info_bits].to_vec()
        } else {
            let mut padded = key.to_vec();
            padded.extend((0..info_bits - key.len()).map(|_| rng.random_bit()));
            padded
        }
    }
}

/// Classical-channel error injection used by the LDPC reconciliation flow.
fn simulate_transmission(encoded: &[u8], rng: &mut SimulationRng) -> Vec<u8> {
    const ERROR_RATE: f64 = 0.05;
    encoded
        .iter()
        .map(|&bit| if rng.chance(ERROR_RATE) { 1 - bit } else { bit })
        .collect()
}
