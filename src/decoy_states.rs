//! Decoy-state defense against photon-number-splitting.
//!
//! The sender interleaves three intensity classes (signal, decoy, vacuum)
//! drawn with fixed probabilities. Comparing the observed gain and error
//! rate across classes bounds the single-photon yield `Y1` and error `e1`,
//! which a PNS attacker cannot fake, and feeds the GLLP-style secret key
//! rate `Y1·µ_s · (1 − H2(e1) − f·H2(e1))` with reconciliation inefficiency
//! `f = 1.1`.
//!
//! Two evaluation paths exist side by side:
//!
//! - [`DecoyStateAnalyzer::gain_and_error`] aggregates analytically over a
//!   Poisson photon-number histogram with the simplified 0.5 error model.
//! - [`DecoyPulseSimulator`] plays out an actual pulse sequence against a
//!   lossy channel with a 2% intrinsic error rate and analyzes the counts.
//!
//! Degenerate intensities (µ_s ≈ µ_d) cannot be analyzed; that case is
//! reported in-band via `analysis_success = false`, not as an error.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::entropy::SimulationRng;
use crate::logging::{log_info, LogCategory};
use crate::{Result, SimulatorError};

/// Intensity class of one transmitted pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoyPulseType {
    /// High intensity, used for key generation.
    Signal,
    /// Medium intensity, used for parameter estimation.
    Decoy,
    /// Zero intensity, used to bound the background yield.
    Vacuum,
}

/// Decoy-state protocol parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoyStateConfig {
    /// Signal intensity µ_s (mean photons per pulse).
    pub signal_intensity: f64,
    /// Decoy intensity µ_d.
    pub decoy_intensity: f64,
    /// Vacuum intensity (zero by construction, kept for completeness).
    pub vacuum_intensity: f64,
    pub signal_probability: f64,
    pub decoy_probability: f64,
    pub vacuum_probability: f64,
}

impl Default for DecoyStateConfig {
    fn default() -> Self {
        Self {
            signal_intensity: 0.5,
            decoy_intensity: 0.1,
            vacuum_intensity: 0.0,
            signal_probability: 0.7,
            decoy_probability: 0.2,
            vacuum_probability: 0.1,
        }
    }
}

impl DecoyStateConfig {
    /// The emission probabilities must sum to 1 (±1e-6).
    pub fn validate(&self) -> Result<()> {
        let total = self.signal_probability + self.decoy_probability + self.vacuum_probability;
        if (total - 1.0).abs() > 1e-6 {
            return Err(SimulatorError::InvalidParameter(format!(
                "decoy state probabilities must sum to 1.0, got {total}"
            )));
        }
        if self.signal_intensity < 0.0 || self.decoy_intensity < 0.0 {
            return Err(SimulatorError::InvalidParameter(
                "decoy state intensities must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    fn intensity(&self, pulse_type: DecoyPulseType) -> f64 {
        match pulse_type {
            DecoyPulseType::Signal => self.signal_intensity,
            DecoyPulseType::Decoy => self.decoy_intensity,
            DecoyPulseType::Vacuum => self.vacuum_intensity,
        }
    }
}

/// Single-photon parameter estimate from the decoy-state comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecoyStateEstimate {
    /// Estimated single-photon yield Y1.
    pub single_photon_yield: f64,
    /// Estimated single-photon error rate e1.
    pub single_photon_error_rate: f64,
    /// Y1 · µ_s.
    pub single_photon_gain: f64,
    /// Signal gain not attributable to background or single photons.
    pub multi_photon_gain: f64,
    /// Fraction of the signal gain that is provably single-photon, in [0,1].
    pub security_parameter: f64,
    /// GLLP secret key rate, clamped at zero.
    pub final_key_rate: f64,
    /// False when the intensities are degenerate or otherwise unanalyzable.
    pub analysis_success: bool,
}

impl DecoyStateEstimate {
    fn failed() -> Self {
        Self {
            single_photon_yield: 0.0,
            single_photon_error_rate: 0.0,
            single_photon_gain: 0.0,
            multi_photon_gain: 0.0,
            security_parameter: 0.0,
            final_key_rate: 0.0,
            analysis_success: false,
        }
    }

    fn to_metadata(self) -> serde_json::Value {
        json!({
            "estimated_single_photon_yield": self.single_photon_yield,
            "estimated_single_photon_error_rate": self.single_photon_error_rate,
            "estimated_single_photon_gain": self.single_photon_gain,
            "estimated_multi_photon_gain": self.multi_photon_gain,
            "security_parameter": self.security_parameter,
            "final_key_rate": self.final_key_rate,
            "decoy_state_analysis_success": self.analysis_success,
        })
    }
}

/// Binary entropy, zero outside (0, 1).
fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    -p * p.log2() - (1.0 - p) * (1.0 - p).log2()
}

/// Analytic decoy-state analyzer over Poisson photon statistics.
#[derive(Debug, Clone)]
pub struct DecoyStateAnalyzer {
    config: DecoyStateConfig,
    detector_efficiency: f64,
    dark_count_rate: f64,
}

impl DecoyStateAnalyzer {
    /// # Errors
    ///
    /// Rejects configurations whose probabilities do not sum to 1.
    pub fn new(config: DecoyStateConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            detector_efficiency: 0.1,
            dark_count_rate: 1e-6,
        })
    }

    pub fn with_detector(mut self, efficiency: f64, dark_count_rate: f64) -> Self {
        self.detector_efficiency = efficiency;
        self.dark_count_rate = dark_count_rate;
        self
    }

    pub fn config(&self) -> &DecoyStateConfig {
        &self.config
    }

    /// Draw a pulse-type sequence with the configured probabilities.
    pub fn generate_sequence(&self, num_pulses: usize, rng: &mut SimulationRng) -> Vec<DecoyPulseType> {
        (0..num_pulses)
            .map(|_| {
                let draw = rng.uniform();
                if draw < self.config.signal_probability {
                    DecoyPulseType::Signal
                } else if draw < self.config.signal_probability + self.config.decoy_probability {
                    DecoyPulseType::Decoy
                } else {
                    DecoyPulseType::Vacuum
                }
            })
            .collect()
    }

    /// Photon-number histogram for `num_pulses` pulses of one class.
    pub fn photon_number_distribution(
        &self,
        pulse_type: DecoyPulseType,
        num_pulses: usize,
        rng: &mut SimulationRng,
    ) -> HashMap<u32, usize> {
        if pulse_type == DecoyPulseType::Vacuum {
            return HashMap::from([(0, num_pulses)]);
        }
        let intensity = self.config.intensity(pulse_type);
        let mut distribution = HashMap::new();
        for _ in 0..num_pulses {
            *distribution.entry(rng.poisson(intensity)).or_insert(0) += 1;
        }
        distribution
    }

    /// Aggregate gain and error rate for one pulse class.
    ///
    /// Detection probability is the dark-count rate for empty pulses and
    /// `1 − (1−η)^n` otherwise; the error probability is the simplified 0.5.
    pub fn gain_and_error(
        &self,
        pulse_type: DecoyPulseType,
        num_pulses: usize,
        rng: &mut SimulationRng,
    ) -> (f64, f64) {
        let distribution = self.photon_number_distribution(pulse_type, num_pulses, rng);
        let mut total_detections = 0.0;
        let mut total_errors = 0.0;
        for (&photon_count, &count) in &distribution {
            let detection_prob = if photon_count == 0 {
                self.dark_count_rate
            } else {
                1.0 - (1.0 - self.detector_efficiency).powi(photon_count as i32)
            };
            total_detections += count as f64 * detection_prob;
            total_errors += count as f64 * detection_prob * 0.5;
        }
        let gain = total_detections / num_pulses as f64;
        let error = total_errors / total_detections.max(1.0);
        (gain, error)
    }

    /// GLLP-style single-photon parameter estimation from the per-class
    /// gains and error rates.
    pub fn estimate_single_photon(
        &self,
        signal_gain: f64,
        _signal_error: f64,
        decoy_gain: f64,
        decoy_error: f64,
        vacuum_gain: f64,
        vacuum_error: f64,
    ) -> DecoyStateEstimate {
        let mu_signal = self.config.signal_intensity;
        let mu_decoy = self.config.decoy_intensity;

        if (mu_signal - mu_decoy).abs() < 1e-6 || mu_decoy <= 0.0 {
            return DecoyStateEstimate::failed();
        }

        let background_yield = vacuum_gain; // Y0
        let single_photon_yield = (decoy_gain - background_yield) / mu_decoy; // Y1

        let denominator = decoy_gain - background_yield;
        let single_photon_error_rate = if denominator > 0.0 {
            (decoy_error * decoy_gain - vacuum_error * background_yield) / denominator
        } else {
            0.5
        };

        let single_photon_gain = single_photon_yield * mu_signal;
        let multi_photon_gain = (signal_gain - background_yield - single_photon_gain).max(0.0);

        let security_parameter = if signal_gain <= 0.0 {
            0.0
        } else {
            let mut security = single_photon_gain / signal_gain;
            if multi_photon_gain > 0.0 {
                security *= 1.0 - multi_photon_gain / signal_gain;
            }
            security.clamp(0.0, 1.0)
        };

        let final_key_rate = if single_photon_gain > 0.0 {
            const RECONCILIATION_INEFFICIENCY: f64 = 1.1;
            let h = binary_entropy(single_photon_error_rate);
            (single_photon_gain * (1.0 - h - RECONCILIATION_INEFFICIENCY * h)).max(0.0)
        } else {
            0.0
        };

        DecoyStateEstimate {
            single_photon_yield,
            single_photon_error_rate,
            single_photon_gain,
            multi_photon_gain,
            security_parameter,
            final_key_rate,
            analysis_success: true,
        }
    }

    /// Full analytic pass: per-class gains, estimation, security grading.
    /// Returns the metadata document the simulator attaches to a run.
    pub fn run_analysis(&self, num_pulses: usize, rng: &mut SimulationRng) -> serde_json::Value {
        let (signal_gain, signal_error) =
            self.gain_and_error(DecoyPulseType::Signal, num_pulses, rng);
        let (decoy_gain, decoy_error) = self.gain_and_error(DecoyPulseType::Decoy, num_pulses, rng);
        let (vacuum_gain, vacuum_error) =
            self.gain_and_error(DecoyPulseType::Vacuum, num_pulses, rng);

        let estimate = self.estimate_single_photon(
            signal_gain,
            signal_error,
            decoy_gain,
            decoy_error,
            vacuum_gain,
            vacuum_error,
        );

        log_info(
            LogCategory::Decoy,
            &format!(
                "decoy analysis: Y1={:.4}, e1={:.4}, key rate {:.5}, success={}",
                estimate.single_photon_yield,
                estimate.single_photon_error_rate,
                estimate.final_key_rate,
                estimate.analysis_success
            ),
        );

        json!({
            "signal_results": { "gain": signal_gain, "error": signal_error },
            "decoy_results": { "gain": decoy_gain, "error": decoy_error },
            "vacuum_results": { "gain": vacuum_gain, "error": vacuum_error },
            "decoy_analysis": estimate.to_metadata(),
            "final_key_rate": estimate.final_key_rate,
            "security_improvement": self.security_improvement(&estimate),
        })
    }

    /// Coarse grading of how much the decoy analysis improved on plain BB84.
    pub fn security_improvement(&self, estimate: &DecoyStateEstimate) -> serde_json::Value {
        if !estimate.analysis_success {
            return json!({ "improvement": 0.0, "description": "Analysis failed" });
        }
        let single_photon_ratio = estimate.single_photon_gain
            / (estimate.single_photon_gain + estimate.multi_photon_gain).max(1.0);
        let improvement = (single_photon_ratio - 0.5).max(0.0);
        let description = if improvement > 0.3 {
            "High security improvement - PNS attacks effectively mitigated"
        } else if improvement > 0.1 {
            "Moderate security improvement - PNS attacks partially mitigated"
        } else {
            "Low security improvement - PNS attacks still possible"
        };
        json!({
            "improvement": improvement,
            "description": description,
            "single_photon_ratio": single_photon_ratio,
            "pns_attack_mitigation": if improvement > 0.2 { "Effective" } else { "Partial" },
        })
    }
}

/// Per-class counts from a simulated pulse sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseClassCounts {
    pub detections: usize,
    pub errors: usize,
}

/// Sequence-level decoy simulation: an actual pulse train against a lossy
/// channel with a small intrinsic error rate.
pub struct DecoyPulseSimulator {
    analyzer: DecoyStateAnalyzer,
    num_pulses: usize,
    sequence: Vec<DecoyPulseType>,
    counts: HashMap<DecoyPulseType, PulseClassCounts>,
    final_key: Vec<u8>,
}

impl DecoyPulseSimulator {
    /// # Errors
    ///
    /// Rejects configurations whose probabilities do not sum to 1.
    pub fn new(config: DecoyStateConfig, num_pulses: usize) -> Result<Self> {
        Ok(Self {
            analyzer: DecoyStateAnalyzer::new(config)?,
            num_pulses,
            sequence: Vec::new(),
            counts: HashMap::new(),
            final_key: Vec::new(),
        })
    }

    pub fn analyzer(&self) -> &DecoyStateAnalyzer {
        &self.analyzer
    }

    /// Draw the pulse-type sequence.
    pub fn generate_sequence(&mut self, rng: &mut SimulationRng) -> &[DecoyPulseType] {
        self.sequence = self.analyzer.generate_sequence(self.num_pulses, rng);
        &self.sequence
    }

    /// Play the sequence through a channel with the given end-to-end
    /// efficiency; detections pick up errors at a 2% intrinsic rate.
    pub fn simulate_measurements(&mut self, channel_efficiency: f64, rng: &mut SimulationRng) {
        const INTRINSIC_ERROR_RATE: f64 = 0.02;
        self.counts = HashMap::from([
            (DecoyPulseType::Signal, PulseClassCounts::default()),
            (DecoyPulseType::Decoy, PulseClassCounts::default()),
            (DecoyPulseType::Vacuum, PulseClassCounts::default()),
        ]);
        for &pulse_type in &self.sequence {
            if !rng.chance(channel_efficiency) {
                continue;
            }
            let entry = self.counts.entry(pulse_type).or_default();
            entry.detections += 1;
            if rng.chance(INTRINSIC_ERROR_RATE) {
                entry.errors += 1;
            }
        }
    }

    fn class_gain_and_error(&self, pulse_type: DecoyPulseType) -> (f64, f64) {
        let counts = self.counts.get(&pulse_type).cloned().unwrap_or_default();
        let gain = counts.detections as f64 / self.num_pulses.max(1) as f64;
        let error = counts.errors as f64 / counts.detections.max(1) as f64;
        (gain, error)
    }

    /// Estimate single-photon parameters from the simulated counts.
    pub fn analyze(&self) -> DecoyStateEstimate {
        let (signal_gain, signal_error) = self.class_gain_and_error(DecoyPulseType::Signal);
        let (decoy_gain, decoy_error) = self.class_gain_and_error(DecoyPulseType::Decoy);
        let (vacuum_gain, vacuum_error) = self.class_gain_and_error(DecoyPulseType::Vacuum);
        self.analyzer.estimate_single_photon(
            signal_gain,
            signal_error,
            decoy_gain,
            decoy_error,
            vacuum_gain,
            vacuum_error,
        )
    }

    /// Derive a key sized by the estimated single-photon gain. Empty when
    /// the analysis failed.
    pub fn generate_final_key(
        &mut self,
        estimate: &DecoyStateEstimate,
        rng: &mut SimulationRng,
    ) -> &[u8] {
        if !estimate.analysis_success {
            self.final_key.clear();
            return &self.final_key;
        }
        let bits = (estimate.single_photon_gain * self.num_pulses as f64) as usize;
        self.final_key = (0..bits).map(|_| rng.random_bit()).collect();
        &self.final_key
    }

    /// Protocol statistics snapshot.
    pub fn statistics(&self) -> serde_json::Value {
        let mut per_class = serde_json::Map::new();
        for (pulse_type, name) in [
            (DecoyPulseType::Signal, "signal"),
            (DecoyPulseType::Decoy, "decoy"),
            (DecoyPulseType::Vacuum, "vacuum"),
        ] {
            let (gain, error) = self.class_gain_and_error(pulse_type);
            let counts = self.counts.get(&pulse_type).cloned().unwrap_or_default();
            per_class.insert(
                name.to_string(),
                json!({
                    "detections": counts.detections,
                    "errors": counts.errors,
                    "gain": gain,
                    "error_rate": error,
                }),
            );
        }
        json!({
            "total_pulses": self.num_pulses,
            "sequence_length": self.sequence.len(),
            "measurement_results": per_class,
            "final_key_length": self.final_key.len(),
        })
    }
}

/// One evaluated point of the intensity-optimization sweep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepEntry {
    pub signal_intensity: f64,
    pub decoy_intensity: f64,
    pub key_rate: f64,
    pub security_parameter: f64,
    pub single_photon_yield: f64,
}

/// Result of the (µ_s, µ_d) grid search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub best_parameters: Option<DecoyStateConfig>,
    pub best_key_rate: f64,
    pub sweep: Vec<SweepEntry>,
    pub target_distance_km: f64,
    pub channel_transmission: f64,
}

/// Grid optimizer for the intensity pair.
#[derive(Debug, Clone, Copy)]
pub struct DecoyOptimizer {
    pub target_distance_km: f64,
    pub channel_loss_db_per_km: f64,
}

impl Default for DecoyOptimizer {
    fn default() -> Self {
        Self {
            target_distance_km: 50.0,
            channel_loss_db_per_km: 0.2,
        }
    }
}

impl DecoyOptimizer {
    /// Sweep a grid of (µ_s, µ_d) with µ_d < µ_s, evaluating the analytic
    /// key rate at each point. Returns the best pair and the full table.
    ///
    /// # Errors
    ///
    /// Propagates configuration validation failures (not expected for the
    /// fixed probabilities used here).
    pub fn optimize(
        &self,
        min_intensity: f64,
        max_intensity: f64,
        num_samples: usize,
        rng: &mut SimulationRng,
    ) -> Result<OptimizationOutcome> {
        let transmission =
            10f64.powf(-self.channel_loss_db_per_km * self.target_distance_km / 10.0);

        let mut best_key_rate = 0.0;
        let mut best_parameters: Option<DecoyStateConfig> = None;
        let mut sweep = Vec::new();

        for signal_intensity in linspace(min_intensity, max_intensity, num_samples) {
            for decoy_intensity in linspace(0.01, max_intensity * 0.5, num_samples) {
                if decoy_intensity >= signal_intensity {
                    continue;
                }
                let config = DecoyStateConfig {
                    signal_intensity,
                    decoy_intensity,
                    ..Default::default()
                };
                let analyzer = DecoyStateAnalyzer::new(config)?;
                let (signal_gain, signal_error) =
                    analyzer.gain_and_error(DecoyPulseType::Signal, 1000, rng);
                let (decoy_gain, decoy_error) =
                    analyzer.gain_and_error(DecoyPulseType::Decoy, 1000, rng);
                let (vacuum_gain, vacuum_error) =
                    analyzer.gain_and_error(DecoyPulseType::Vacuum, 1000, rng);
                let estimate = analyzer.estimate_single_photon(
                    signal_gain,
                    signal_error,
                    decoy_gain,
                    decoy_error,
                    vacuum_gain,
                    vacuum_error,
                );

                sweep.push(SweepEntry {
                    signal_intensity,
                    decoy_intensity,
                    key_rate: estimate.final_key_rate,
                    security_parameter: estimate.security_parameter,
                    single_photon_yield: estimate.single_photon_yield,
                });

                if estimate.final_key_rate > best_key_rate {
                    best_key_rate = estimate.final_key_rate;
                    best_parameters = Some(config);
                }
            }
        }

        Ok(OptimizationOutcome {
            best_parameters,
            best_key_rate,
            sweep,
            target_distance_km: self.target_distance_km,
            channel_transmission: transmission,
        })
    }
}

fn linspace(start: f64, end: f64, samples: usize) -> Vec<f64> {
    if samples <= 1 {
        return vec![start];
    }
    let step = (end - start) / (samples - 1) as f64;
    (0..samples).map(|i| start + step * i as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_must_sum_to_one() {
        let bad = DecoyStateConfig {
            signal_probability: 0.7,
            decoy_probability: 0.2,
            vacuum_probability: 0.2,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(DecoyStateConfig::default().validate().is_ok());
    }

    #[test]
    fn vacuum_pulses_carry_no_photons() {
        let mut rng = SimulationRng::seeded(1);
        let analyzer = DecoyStateAnalyzer::new(DecoyStateConfig::default()).unwrap();
        let dist = analyzer.photon_number_distribution(DecoyPulseType::Vacuum, 500, &mut rng);
        assert_eq!(dist.get(&0), Some(&500));
        assert_eq!(dist.len(), 1);
    }

    #[test]
    fn sequence_follows_configured_probabilities() {
        let mut rng = SimulationRng::seeded(2);
        let analyzer = DecoyStateAnalyzer::new(DecoyStateConfig::default()).unwrap();
        let sequence = analyzer.generate_sequence(20_000, &mut rng);
        let signal = sequence
            .iter()
            .filter(|&&t| t == DecoyPulseType::Signal)
            .count() as f64
            / 20_000.0;
        assert!((signal - 0.7).abs() < 0.02, "signal share {signal}");
    }

    #[test]
    fn degenerate_intensities_fail_in_band() {
        let analyzer = DecoyStateAnalyzer::new(DecoyStateConfig {
            signal_intensity: 0.3,
            decoy_intensity: 0.3,
            ..Default::default()
        })
        .unwrap();
        let estimate = analyzer.estimate_single_photon(0.05, 0.5, 0.02, 0.5, 1e-6, 0.5);
        assert!(!estimate.analysis_success);
        assert_eq!(estimate.final_key_rate, 0.0);
        assert_eq!(estimate.single_photon_yield, 0.0);
    }

    #[test]
    fn healthy_estimation_yields_positive_single_photon_gain() {
        let analyzer = DecoyStateAnalyzer::new(DecoyStateConfig::default()).unwrap();
        // Low-error counts typical of the sequence simulation
        let estimate = analyzer.estimate_single_photon(0.07, 0.02, 0.02, 0.02, 0.01, 0.02);
        assert!(estimate.analysis_success);
        assert!(estimate.single_photon_yield > 0.0);
        assert!(estimate.single_photon_gain > 0.0);
        assert!(estimate.final_key_rate > 0.0);
        assert!(estimate.security_parameter > 0.0 && estimate.security_parameter <= 1.0);
    }

    #[test]
    fn simplified_error_model_zeroes_the_analytic_key_rate() {
        // With the 0.5 error model, H2(e1) = 1 and the GLLP rate clamps to 0
        let mut rng = SimulationRng::seeded(3);
        let analyzer = DecoyStateAnalyzer::new(DecoyStateConfig::default()).unwrap();
        let value = analyzer.run_analysis(2000, &mut rng);
        assert_eq!(value["decoy_analysis"]["decoy_state_analysis_success"], true);
        assert_eq!(value["final_key_rate"], 0.0);
    }

    #[test]
    fn pulse_simulation_supports_positive_key_rates() {
        let mut rng = SimulationRng::seeded(4);
        let mut sim = DecoyPulseSimulator::new(DecoyStateConfig::default(), 10_000).unwrap();
        sim.generate_sequence(&mut rng);
        sim.simulate_measurements(0.1, &mut rng);
        let estimate = sim.analyze();
        assert!(estimate.analysis_success);
        assert!(estimate.final_key_rate > 0.0);
        let key = sim.generate_final_key(&estimate, &mut rng).to_vec();
        assert!(!key.is_empty());
        assert_eq!(
            sim.statistics()["final_key_length"].as_u64().unwrap() as usize,
            key.len()
        );
    }

    #[test]
    fn optimizer_prefers_separated_intensities() {
        let mut rng = SimulationRng::seeded(5);
        let outcome = DecoyOptimizer::default()
            .optimize(0.05, 1.0, 6, &mut rng)
            .unwrap();
        assert!(!outcome.sweep.is_empty());
        if let Some(best) = outcome.best_parameters {
            assert!(best.decoy_intensity < best.signal_intensity);
        }
        assert!(outcome.channel_transmission > 0.0);
    }
}
