//! Privacy amplification: length-reducing GF(2) hashes that strip whatever
//! partial information an eavesdropper may hold on the reconciled key.
//!
//! Two hash families, plus their XOR combination:
//!
//! - **Toeplitz**: a matrix `M[i][j] = seed[(i+j) mod seed_len]` generated
//!   from a cryptographically random seed; the output is `M·x mod 2`. Same
//!   seed, same input → bit-identical output.
//! - **Universal**: a polynomial family with degree capped at 10, or a
//!   uniformly random linear map.
//!
//! The secure output length follows from the estimated entropy of the input
//! and the security parameter ε:
//! `secure_len = max(min_len, min(requested, ⌊H − log2(1/ε)⌋ · jitter))`
//! where `H` is the total Shannon entropy of the input, jitter is a ±10%
//! uniform factor drawn from the simulation generator, and `min_len` scales
//! with the input length. Alternate estimators (block min-entropy,
//! conditional entropy) are available for assessment but do not drive the
//! length choice.

use serde::{Deserialize, Serialize};

use crate::entropy::{secure_bits, secure_bytes, SimulationRng};
use crate::logging::{log_info, LogCategory};

/// Privacy amplification method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplificationMethod {
    Toeplitz,
    Universal,
    Hybrid,
}

impl std::fmt::Display for AmplificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Toeplitz => "toeplitz",
            Self::Universal => "universal",
            Self::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Outcome of one privacy-amplification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyAmplificationResult {
    pub final_key: Vec<u8>,
    pub original_length: usize,
    pub final_length: usize,
    pub compression_ratio: f64,
    pub method: AmplificationMethod,
    /// Toeplitz seed bytes when that family participated.
    pub hash_seed: Option<Vec<u8>>,
    pub security_parameter: f64,
    /// Per-bit Shannon entropy estimate of the input.
    pub entropy_estimate: f64,
}

/// Toeplitz-matrix hashing with a cryptographically random seed.
#[derive(Debug, Clone)]
pub struct ToeplitzHasher {
    output_length: usize,
    seed_length_bits: usize,
    seed: Option<Vec<u8>>,
}

impl ToeplitzHasher {
    pub fn new(output_length: usize) -> Self {
        Self {
            output_length,
            seed_length_bits: 512,
            seed: None,
        }
    }

    /// Fix the seed explicitly (reproducibility and interop tests).
    pub fn with_seed(output_length: usize, seed: Vec<u8>) -> Self {
        Self {
            output_length,
            seed_length_bits: seed.len() * 8,
            seed: Some(seed),
        }
    }

    pub fn seed(&self) -> Option<&[u8]> {
        self.seed.as_deref()
    }

    fn ensure_seed(&mut self) -> &[u8] {
        if self.seed.is_none() {
            self.seed = Some(secure_bytes(self.seed_length_bits / 8));
        }
        self.seed.as_deref().unwrap_or(&[])
    }

    fn seed_bits(&mut self) -> Vec<u8> {
        let seed = self.ensure_seed().to_vec();
        (0..seed.len() * 8)
            .map(|i| (seed[i / 8] >> (i % 8)) & 1)
            .collect()
    }

    /// Row `i` of the implicit matrix: `M[i][j] = seed[(i+j) mod seed_len]`.
    pub fn matrix_entry(seed_bits: &[u8], i: usize, j: usize) -> u8 {
        seed_bits[(i + j) % seed_bits.len()]
    }

    /// `M·x mod 2` without materializing the matrix.
    pub fn hash_key(&mut self, input_key: &[u8]) -> Vec<u8> {
        if input_key.is_empty() {
            return Vec::new();
        }
        let seed_bits = self.seed_bits();
        (0..self.output_length)
            .map(|i| {
                input_key
                    .iter()
                    .enumerate()
                    .map(|(j, &x)| Self::matrix_entry(&seed_bits, i, j) & x)
                    .fold(0u8, |acc, bit| acc ^ bit)
            })
            .collect()
    }
}

/// Universal hash family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFamily {
    Polynomial,
    Linear,
}

enum UniversalParameters {
    Polynomial { coefficients: Vec<u8> },
    Linear { matrix: Vec<Vec<u8>> },
}

/// Universal hashing over GF(2).
pub struct UniversalHasher {
    output_length: usize,
    family: HashFamily,
    parameters: Option<(usize, UniversalParameters)>,
}

impl UniversalHasher {
    pub fn new(output_length: usize, family: HashFamily) -> Self {
        Self {
            output_length,
            family,
            parameters: None,
        }
    }

    fn ensure_parameters(&mut self, input_length: usize) -> &UniversalParameters {
        let family = self.family;
        let output_length = self.output_length;
        if !matches!(&self.parameters, Some((len, _)) if *len == input_length) {
            self.parameters = None;
        }
        let (_, params) = self.parameters.get_or_insert_with(|| {
            (
                input_length,
                build_universal_parameters(family, output_length, input_length),
            )
        });
        params
    }

    pub fn hash_key(&mut self, input_key: &[u8]) -> Vec<u8> {
        if input_key.is_empty() {
            return Vec::new();
        }
        let output_length = self.output_length;
        match self.ensure_parameters(input_key.len()) {
            UniversalParameters::Polynomial { coefficients } => (0..output_length)
                .map(|i| {
                    let mut acc = 0u16;
                    for (j, &coeff) in coefficients.iter().enumerate() {
                        if j >= input_key.len() {
                            break;
                        }
                        // i^j mod 2: 1 for j = 0, parity of i otherwise
                        let power = if j == 0 { 1 } else { (i % 2) as u16 };
                        acc = (acc + u16::from(coeff) * u16::from(input_key[j]) * power) % 2;
                    }
                    acc as u8
                })
                .collect(),
            UniversalParameters::Linear { matrix } => matrix
                .iter()
                .map(|row| {
                    row.iter()
                        .zip(input_key.iter())
                        .map(|(m, x)| m & x)
                        .fold(0u8, |acc, bit| acc ^ bit)
                })
                .collect(),
        }
    }
}

fn build_universal_parameters(
    family: HashFamily,
    output_length: usize,
    input_length: usize,
) -> UniversalParameters {
    match family {
        HashFamily::Polynomial => {
            let degree = input_length.saturating_sub(1).min(10);
            UniversalParameters::Polynomial {
                coefficients: secure_bits(degree + 1),
            }
        }
        HashFamily::Linear => UniversalParameters::Linear {
            matrix: (0..output_length)
                .map(|_| secure_bits(input_length))
                .collect(),
        },
    }
}

/// Entropy estimators over bit strings.
pub struct EntropyEstimator;

impl EntropyEstimator {
    /// Per-bit Shannon entropy from the bit frequencies.
    pub fn shannon(key: &[u8]) -> f64 {
        if key.is_empty() {
            return 0.0;
        }
        let ones = key.iter().filter(|&&b| b == 1).count() as f64;
        let total = key.len() as f64;
        let mut entropy = 0.0;
        for count in [ones, total - ones] {
            if count > 0.0 {
                let p = count / total;
                entropy -= p * p.log2();
            }
        }
        entropy
    }

    /// Per-bit min-entropy from non-overlapping block frequencies.
    pub fn min_entropy(key: &[u8], block_size: usize) -> f64 {
        if block_size == 0 || key.len() < block_size {
            return 0.0;
        }
        let mut counts: std::collections::HashMap<&[u8], usize> = std::collections::HashMap::new();
        let mut blocks = 0usize;
        let mut i = 0;
        while i + block_size <= key.len() {
            *counts.entry(&key[i..i + block_size]).or_insert(0) += 1;
            blocks += 1;
            i += block_size;
        }
        let max_count = counts.values().copied().max().unwrap_or(0);
        let max_probability = max_count as f64 / blocks as f64;
        -max_probability.log2() / block_size as f64
    }

    /// Conditional entropy of the next bit given the preceding context.
    pub fn conditional_entropy(key: &[u8], context_length: usize) -> f64 {
        if key.len() < context_length + 1 {
            return 0.0;
        }
        let mut counts: std::collections::HashMap<&[u8], [usize; 2]> =
            std::collections::HashMap::new();
        for i in 0..key.len() - context_length {
            let context = &key[i..i + context_length];
            let next = key[i + context_length] as usize;
            counts.entry(context).or_insert([0, 0])[next.min(1)] += 1;
        }
        let mut total_entropy = 0.0;
        let mut total_samples = 0usize;
        for pair in counts.values() {
            let total = pair[0] + pair[1];
            if total == 0 {
                continue;
            }
            let mut context_entropy = 0.0;
            for &count in pair {
                if count > 0 {
                    let p = count as f64 / total as f64;
                    context_entropy -= p * p.log2();
                }
            }
            total_entropy += context_entropy * total as f64;
            total_samples += total;
        }
        if total_samples == 0 {
            0.0
        } else {
            total_entropy / total_samples as f64
        }
    }
}

/// Privacy amplifier dispatching over the configured hash method.
pub struct PrivacyAmplifier {
    method: AmplificationMethod,
    /// Requested (maximum) output length in bits.
    output_length: usize,
    /// Security parameter ε in the length rule.
    security_parameter: f64,
    toeplitz: ToeplitzHasher,
    universal: UniversalHasher,
}

impl PrivacyAmplifier {
    pub fn new(method: AmplificationMethod, output_length: usize) -> Self {
        Self {
            method,
            output_length,
            security_parameter: 0.1,
            toeplitz: ToeplitzHasher::new(output_length),
            universal: UniversalHasher::new(output_length, HashFamily::Polynomial),
        }
    }

    pub fn method(&self) -> AmplificationMethod {
        self.method
    }

    /// Hash the input down to the secure output length.
    ///
    /// `estimated_entropy` overrides the Shannon estimate when the caller has
    /// a better bound (per-bit). The jitter in the length rule draws from the
    /// simulation generator so seeded runs stay reproducible.
    pub fn amplify(
        &mut self,
        input_key: &[u8],
        estimated_entropy: Option<f64>,
        rng: &mut SimulationRng,
    ) -> PrivacyAmplificationResult {
        if input_key.is_empty() {
            return PrivacyAmplificationResult {
                final_key: Vec::new(),
                original_length: 0,
                final_length: 0,
                compression_ratio: 0.0,
                method: self.method,
                hash_seed: None,
                security_parameter: 0.0,
                entropy_estimate: 0.0,
            };
        }

        let entropy_per_bit =
            estimated_entropy.unwrap_or_else(|| EntropyEstimator::shannon(input_key));
        let secure_length = self.secure_output_length(input_key.len(), entropy_per_bit, rng);

        let (mut final_key, hash_seed) = self.hash_with_method(input_key);

        match final_key.len().cmp(&secure_length) {
            std::cmp::Ordering::Greater => final_key.truncate(secure_length),
            std::cmp::Ordering::Less => final_key.resize(secure_length, 0),
            std::cmp::Ordering::Equal => {}
        }

        let compression_ratio = final_key.len() as f64 / input_key.len() as f64;
        let security_level = if entropy_per_bit <= 0.0 {
            0.0
        } else {
            (entropy_per_bit / (1.0 + compression_ratio)).min(1.0)
        };

        log_info(
            LogCategory::Privacy,
            &format!(
                "{} amplification: {} -> {} bits (entropy/bit {:.3})",
                self.method,
                input_key.len(),
                final_key.len(),
                entropy_per_bit
            ),
        );

        PrivacyAmplificationResult {
            original_length: input_key.len(),
            final_length: final_key.len(),
            final_key,
            compression_ratio,
            method: self.method,
            hash_seed,
            security_parameter: security_level,
            entropy_estimate: entropy_per_bit,
        }
    }

    /// Amplify the two parties' reconciled keys with identical hash
    /// parameters and a single output-length draw.
    ///
    /// Both sides of a QKD exchange must apply the same publicly agreed hash
    /// and land on the same length, otherwise matching inputs stop producing
    /// matching outputs. The sender's entropy estimate drives the length.
    pub fn amplify_pair(
        &mut self,
        sender_key: &[u8],
        receiver_key: &[u8],
        rng: &mut SimulationRng,
    ) -> (PrivacyAmplificationResult, PrivacyAmplificationResult) {
        let sender_result = self.amplify(sender_key, None, rng);

        let (mut receiver_final, hash_seed) = self.hash_with_method(receiver_key);
        match receiver_final.len().cmp(&sender_result.final_length) {
            std::cmp::Ordering::Greater => receiver_final.truncate(sender_result.final_length),
            std::cmp::Ordering::Less => receiver_final.resize(sender_result.final_length, 0),
            std::cmp::Ordering::Equal => {}
        }
        let entropy = EntropyEstimator::shannon(receiver_key);
        let compression_ratio = if receiver_key.is_empty() {
            0.0
        } else {
            receiver_final.len() as f64 / receiver_key.len() as f64
        };
        let receiver_result = PrivacyAmplificationResult {
            original_length: receiver_key.len(),
            final_length: receiver_final.len(),
            final_key: receiver_final,
            compression_ratio,
            method: self.method,
            hash_seed,
            security_parameter: sender_result.security_parameter,
            entropy_estimate: entropy,
        };
        (sender_result, receiver_result)
    }

    /// Run the configured hash family over an input. Parameters (Toeplitz
    /// seed, universal coefficients) are generated once and reused, so both
    /// parties' keys go through the same function.
    fn hash_with_method(&mut self, input_key: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
        match self.method {
            AmplificationMethod::Toeplitz => {
                let hashed = self.toeplitz.hash_key(input_key);
                let seed = self.toeplitz.seed().map(<[u8]>::to_vec);
                (hashed, seed)
            }
            AmplificationMethod::Universal => (self.universal.hash_key(input_key), None),
            AmplificationMethod::Hybrid => {
                let toeplitz_key = self.toeplitz.hash_key(input_key);
                let universal_key = self.universal.hash_key(input_key);
                let combined = toeplitz_key
                    .iter()
                    .zip(universal_key.iter())
                    .map(|(t, u)| t ^ u)
                    .collect();
                (combined, self.toeplitz.seed().map(<[u8]>::to_vec))
            }
        }
    }

    /// The entropy-driven length rule with the ±10% jitter.
    fn secure_output_length(
        &self,
        input_length: usize,
        entropy_per_bit: f64,
        rng: &mut SimulationRng,
    ) -> usize {
        let total_entropy = entropy_per_bit * input_length as f64;
        let security_bits = (1.0 / self.security_parameter).log2();
        let secure = (total_entropy - security_bits).floor();
        let jittered = (secure * rng.uniform_range(0.9, 1.1)) as i64;

        let min_length = if input_length < 100 {
            (input_length / 10).max(8)
        } else if input_length < 500 {
            (input_length / 15).max(32)
        } else {
            (input_length / 25).max(32)
        };

        let capped = jittered.max(0) as usize;
        // The floor may not push the output past the input: the final key is
        // never longer than the reconciled key it came from.
        capped
            .min(self.output_length)
            .max(min_length)
            .min(input_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn toeplitz_matches_explicit_matrix_product() {
        let seed: Vec<u8> = (0..64u8).collect();
        let mut hasher = ToeplitzHasher::with_seed(32, seed.clone());
        let input: Vec<u8> = (0..48).map(|i| ((i * 7) % 3 == 0) as u8).collect();
        let hashed = hasher.hash_key(&input);

        let seed_bits: Vec<u8> = (0..seed.len() * 8)
            .map(|i| (seed[i / 8] >> (i % 8)) & 1)
            .collect();
        let reference: Vec<u8> = (0..32)
            .map(|i| {
                let mut acc = 0u32;
                for (j, &x) in input.iter().enumerate() {
                    acc += u32::from(seed_bits[(i + j) % seed_bits.len()] & x);
                }
                (acc % 2) as u8
            })
            .collect();
        assert_eq!(hashed, reference);
    }

    #[test]
    fn toeplitz_same_seed_is_bit_identical() {
        let seed = vec![0xA5u8; 64];
        let input: Vec<u8> = (0..100).map(|i| (i % 2) as u8).collect();
        let mut a = ToeplitzHasher::with_seed(64, seed.clone());
        let mut b = ToeplitzHasher::with_seed(64, seed);
        assert_eq!(a.hash_key(&input), b.hash_key(&input));
    }

    #[test]
    fn toeplitz_fresh_seeds_differ() {
        let input: Vec<u8> = (0..128).map(|i| (i % 3 == 0) as u8).collect();
        let mut a = ToeplitzHasher::new(64);
        let mut b = ToeplitzHasher::new(64);
        // Seeds come from the CSPRNG, so two hashers disagree
        assert_ne!(a.hash_key(&input), b.hash_key(&input));
        assert_ne!(a.seed(), b.seed());
    }

    #[test]
    fn linear_family_matches_its_matrix() {
        let mut hasher = UniversalHasher::new(16, HashFamily::Linear);
        let input: Vec<u8> = (0..40).map(|i| (i % 5 == 0) as u8).collect();
        let first = hasher.hash_key(&input);
        // Parameters are cached per input length, so rehashing agrees
        assert_eq!(first, hasher.hash_key(&input));
        assert_eq!(first.len(), 16);
        assert!(first.iter().all(|&b| b <= 1));
    }

    #[test]
    fn polynomial_family_produces_binary_output() {
        let mut hasher = UniversalHasher::new(24, HashFamily::Polynomial);
        let input: Vec<u8> = (0..64).map(|i| (i % 2) as u8).collect();
        let out = hasher.hash_key(&input);
        assert_eq!(out.len(), 24);
        assert!(out.iter().all(|&b| b <= 1));
    }

    #[test]
    fn shannon_entropy_extremes() {
        assert_eq!(EntropyEstimator::shannon(&[]), 0.0);
        assert_eq!(EntropyEstimator::shannon(&[0; 64]), 0.0);
        let balanced: Vec<u8> = (0..64).map(|i| (i % 2) as u8).collect();
        assert!((EntropyEstimator::shannon(&balanced) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn min_entropy_of_repeating_blocks_is_zero() {
        let constant = vec![0u8; 64];
        assert_eq!(EntropyEstimator::min_entropy(&constant, 8), 0.0);
        // A varied key has positive block min-entropy
        let mut rng = SimulationRng::seeded(21);
        let varied: Vec<u8> = (0..512).map(|_| rng.random_bit()).collect();
        assert!(EntropyEstimator::min_entropy(&varied, 8) > 0.0);
    }

    #[test]
    fn conditional_entropy_of_deterministic_sequence_is_zero() {
        // Period-2 sequence: context fully determines the next bit
        let periodic: Vec<u8> = (0..128).map(|i| (i % 2) as u8).collect();
        assert!(EntropyEstimator::conditional_entropy(&periodic, 4) < 1e-9);
    }

    #[test]
    fn amplify_empty_input_yields_empty_result() {
        let mut rng = SimulationRng::seeded(1);
        let mut amp = PrivacyAmplifier::new(AmplificationMethod::Toeplitz, 256);
        let result = amp.amplify(&[], None, &mut rng);
        assert!(result.final_key.is_empty());
        assert_eq!(result.final_length, 0);
    }

    #[test]
    fn amplified_length_respects_request_and_floor() {
        let mut rng = SimulationRng::seeded(2);
        let mut amp = PrivacyAmplifier::new(AmplificationMethod::Toeplitz, 256);
        let mut key_rng = SimulationRng::seeded(3);
        let input: Vec<u8> = (0..600).map(|_| key_rng.random_bit()).collect();
        let result = amp.amplify(&input, None, &mut rng);
        // 600 high-entropy bits comfortably support the requested 256
        assert_eq!(result.final_length, 256);
        assert!(result.final_length <= result.original_length);
    }

    #[test]
    fn zero_entropy_input_falls_back_to_the_floor() {
        let mut rng = SimulationRng::seeded(4);
        let mut amp = PrivacyAmplifier::new(AmplificationMethod::Toeplitz, 256);
        let input = vec![0u8; 300];
        let result = amp.amplify(&input, None, &mut rng);
        // min_len for a 300-bit input is max(32, 300/15) = 32... but the
        // floor formula gives 300/15 = 20 -> 32
        assert_eq!(result.final_length, 32);
        assert_eq!(result.entropy_estimate, 0.0);
        assert_eq!(result.security_parameter, 0.0);
    }

    #[test]
    fn hybrid_is_the_xor_of_both_families() {
        let mut rng = SimulationRng::seeded(5);
        let mut amp = PrivacyAmplifier::new(AmplificationMethod::Hybrid, 64);
        let mut key_rng = SimulationRng::seeded(6);
        let input: Vec<u8> = (0..200).map(|_| key_rng.random_bit()).collect();
        let result = amp.amplify(&input, None, &mut rng);
        assert!(result.hash_seed.is_some());
        assert!(result.final_key.iter().all(|&b| b <= 1));
        assert!(result.final_length <= 64);
    }

    #[test]
    fn pair_amplification_agrees_on_identical_inputs() {
        let mut rng = SimulationRng::seeded(8);
        let mut key_rng = SimulationRng::seeded(9);
        let key: Vec<u8> = (0..300).map(|_| key_rng.random_bit()).collect();
        for method in [
            AmplificationMethod::Toeplitz,
            AmplificationMethod::Universal,
            AmplificationMethod::Hybrid,
        ] {
            let mut amp = PrivacyAmplifier::new(method, 128);
            let (sender, receiver) = amp.amplify_pair(&key, &key, &mut rng);
            assert_eq!(sender.final_key, receiver.final_key, "method {method}");
            assert_eq!(sender.final_length, receiver.final_length);
        }
    }

    #[test]
    fn pair_amplification_localizes_input_differences() {
        let mut rng = SimulationRng::seeded(10);
        let mut key_rng = SimulationRng::seeded(11);
        let sender_key: Vec<u8> = (0..300).map(|_| key_rng.random_bit()).collect();
        let mut receiver_key = sender_key.clone();
        receiver_key[150] ^= 1;
        let mut amp = PrivacyAmplifier::new(AmplificationMethod::Toeplitz, 128);
        let (sender, receiver) = amp.amplify_pair(&sender_key, &receiver_key, &mut rng);
        // Same hash, same length; the single input error spreads but the
        // outputs remain comparable bit-for-bit
        assert_eq!(sender.final_length, receiver.final_length);
        assert_ne!(sender.final_key, receiver.final_key);
    }

    proptest! {
        #[test]
        fn output_is_always_binary_and_bounded(len in 1usize..400) {
            let mut rng = SimulationRng::seeded(7);
            let mut key_rng = SimulationRng::seeded(len as u64);
            let input: Vec<u8> = (0..len).map(|_| key_rng.random_bit()).collect();
            let mut amp = PrivacyAmplifier::new(AmplificationMethod::Toeplitz, 128);
            let result = amp.amplify(&input, None, &mut rng);
            prop_assert!(result.final_key.iter().all(|&b| b <= 1));
            prop_assert!(result.final_length <= 128);
        }
    }
}
