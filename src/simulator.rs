//! Simulator facade: parameter validation, run orchestration, history,
//! parameter sweeps and the per-user quantum key cache.
//!
//! [`QkdSimulator`] wires the quantum layer, the BB84 orchestrator, the
//! attack machinery and the classical post-processing chain behind one
//! `run_simulation` call. Shared state lives behind interior mutability
//! (the run history under a `RwLock`, the key cache in a concurrent map) so
//! parameter sweeps can fan out across threads while the facade serializes
//! insertions.
//!
//! Every run draws its stochastic behavior from a per-run ChaCha20 generator
//! seeded from `SimulationParameters::rng_seed` (or OS entropy when absent),
//! making any run reproducible bit-for-bit.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::attacks::{AttackDetector, AttackParameters, AttackRecord, AttackType, DetectionRecord};
use crate::bb84::{Bb84Config, Bb84Protocol, Bb84Result};
use crate::decoy_states::{DecoyStateAnalyzer, DecoyStateConfig};
use crate::entropy::SimulationRng;
use crate::logging::{log_error, log_info, LogCategory, PerformanceTimer};
use crate::privacy_amplification::{AmplificationMethod, PrivacyAmplifier};
use crate::quantum_optics::{calculate_qber, DetectorConfig, FiberChannelConfig, PhotonSourceConfig};
use crate::reconciliation::{ReconciliationMethod, Reconciler};
use crate::{Result, SimulatorError};

/// Default lifetime of a cached per-user quantum key.
const KEY_TTL_SECS: i64 = 3600;

/// Full parameter record for one simulation run.
///
/// Validation happens before any simulation work starts; invalid
/// combinations never reach the quantum layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    /// Number of qubits to prepare, in `[8, 10000]`.
    pub num_qubits: usize,
    /// Fiber length in km, in `[0.1, 300]`.
    pub channel_length_km: f64,
    /// Attenuation in dB/km, in `[0.05, 1.0]`.
    pub channel_attenuation: f64,
    /// Operating wavelength in nm, in `[800, 1600]`.
    pub wavelength_nm: f64,
    /// Depolarization probability, in `[0, 0.1]`.
    pub channel_depolarization: f64,
    /// Operating temperature in Celsius.
    pub temperature_c: f64,
    /// Photon source emission efficiency, in `[0.5, 0.95]`.
    pub photon_source_efficiency: f64,
    /// Mean photons per pulse of the attenuated laser source.
    pub mean_photons_per_pulse: f64,
    /// Source timing jitter (ns).
    pub source_timing_jitter: f64,
    /// Source wavelength stability.
    pub source_wavelength_stability: f64,
    /// Detector efficiency, in `[0.1, 0.95]`.
    pub detector_efficiency: f64,
    /// Detector dark counts per second.
    pub detector_dark_count_rate: f64,
    /// Detector dead time (µs).
    pub detector_dead_time_us: f64,
    /// Detector timing jitter (ns).
    pub detector_timing_jitter_ns: f64,
    /// Detector afterpulse probability.
    pub detector_afterpulse_probability: f64,
    /// Detector crosstalk probability.
    pub detector_crosstalk_probability: f64,
    /// Chromatic dispersion coefficient, ps/(nm·km).
    pub chromatic_dispersion: f64,
    /// Polarization-mode dispersion coefficient, ps/√km.
    pub polarization_mode_dispersion: f64,
    /// Nonlinear Kerr coefficient, m²/W.
    pub nonlinear_coefficient: f64,
    /// Eavesdropping attack to simulate.
    pub attack_type: AttackType,
    pub attack_parameters: AttackParameters,
    pub use_advanced_reconciliation: bool,
    pub reconciliation_method: ReconciliationMethod,
    pub use_advanced_privacy_amplification: bool,
    pub privacy_amplification_method: AmplificationMethod,
    /// Requested (maximum) final key length for advanced amplification.
    pub privacy_amplification_output_length: usize,
    pub use_decoy_states: bool,
    pub decoy_state_parameters: DecoyStateConfig,
    /// Seed for the per-run simulation PRNG; absent means OS-seeded.
    pub rng_seed: Option<u64>,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            num_qubits: 1000,
            channel_length_km: 10.0,
            channel_attenuation: 0.1,
            wavelength_nm: 1550.0,
            channel_depolarization: 0.01,
            temperature_c: 20.0,
            photon_source_efficiency: 0.8,
            mean_photons_per_pulse: 3.5,
            source_timing_jitter: 0.1,
            source_wavelength_stability: 0.99,
            detector_efficiency: 0.8,
            detector_dark_count_rate: 100.0,
            detector_dead_time_us: 0.001,
            detector_timing_jitter_ns: 0.05,
            detector_afterpulse_probability: 0.01,
            detector_crosstalk_probability: 0.001,
            chromatic_dispersion: 17.0,
            polarization_mode_dispersion: 0.1,
            nonlinear_coefficient: 2.6e-20,
            attack_type: AttackType::NoAttack,
            attack_parameters: AttackParameters::default(),
            use_advanced_reconciliation: true,
            reconciliation_method: ReconciliationMethod::Cascade,
            use_advanced_privacy_amplification: true,
            privacy_amplification_method: AmplificationMethod::Toeplitz,
            privacy_amplification_output_length: 256,
            use_decoy_states: false,
            decoy_state_parameters: DecoyStateConfig::default(),
            rng_seed: None,
        }
    }
}

impl SimulationParameters {
    /// Range-check every validated field.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::InvalidParameter`] naming the offending
    /// field; no simulation is started.
    pub fn validate(&self) -> Result<()> {
        fn check(name: &str, value: f64, low: f64, high: f64) -> Result<()> {
            if value < low || value > high {
                return Err(SimulatorError::InvalidParameter(format!(
                    "{name} must be between {low} and {high}, got {value}"
                )));
            }
            Ok(())
        }
        if self.num_qubits < 8 || self.num_qubits > 10_000 {
            return Err(SimulatorError::InvalidParameter(format!(
                "num_qubits must be between 8 and 10000, got {}",
                self.num_qubits
            )));
        }
        check("channel_length_km", self.channel_length_km, 0.1, 300.0)?;
        check("channel_attenuation", self.channel_attenuation, 0.05, 1.0)?;
        check("wavelength_nm", self.wavelength_nm, 800.0, 1600.0)?;
        check("channel_depolarization", self.channel_depolarization, 0.0, 0.1)?;
        check(
            "photon_source_efficiency",
            self.photon_source_efficiency,
            0.5,
            0.95,
        )?;
        check("detector_efficiency", self.detector_efficiency, 0.1, 0.95)?;
        if self.mean_photons_per_pulse <= 0.0 {
            return Err(SimulatorError::InvalidParameter(
                "mean_photons_per_pulse must be positive".to_string(),
            ));
        }
        if self.use_decoy_states {
            self.decoy_state_parameters.validate()?;
        }
        Ok(())
    }

    /// Attenuation corrected for operation away from the 1550 nm window.
    pub fn wavelength_dependent_attenuation(&self) -> f64 {
        if (self.wavelength_nm - 1550.0).abs() < f64::EPSILON {
            self.channel_attenuation
        } else if (self.wavelength_nm - 1310.0).abs() < f64::EPSILON {
            self.channel_attenuation * 2.5
        } else if self.wavelength_nm < 1310.0 {
            self.channel_attenuation * (1.0 + (1310.0 - self.wavelength_nm) / 250.0)
        } else {
            self.channel_attenuation * (1.0 + (self.wavelength_nm - 1550.0) / 50.0)
        }
    }

    /// Wavelength- and temperature-corrected attenuation.
    pub fn temperature_corrected_attenuation(&self) -> f64 {
        self.wavelength_dependent_attenuation() * (1.0 + 0.001 * (self.temperature_c - 20.0))
    }

    /// End-to-end loss budget including dispersion and nonlinear penalties.
    pub fn total_channel_loss_db(&self) -> f64 {
        let base = self.temperature_corrected_attenuation() * self.channel_length_km;
        let dispersion_penalty = 0.1 * (self.channel_length_km / 10.0);
        let nonlinear_penalty = 0.05 * (self.channel_length_km / 50.0);
        base + dispersion_penalty + nonlinear_penalty
    }

    fn bb84_config(&self) -> Bb84Config {
        Bb84Config {
            num_qubits: self.num_qubits,
            source: PhotonSourceConfig {
                efficiency: self.photon_source_efficiency,
                multi_photon_probability: 0.05,
                mean_photons_per_pulse: self.mean_photons_per_pulse,
                timing_jitter: self.source_timing_jitter,
                wavelength_stability: self.source_wavelength_stability,
            },
            channel: FiberChannelConfig {
                attenuation_db_per_km: self.channel_attenuation,
                depolarization_rate: self.channel_depolarization,
                length_km: self.channel_length_km,
                wavelength_nm: self.wavelength_nm,
                temperature_c: self.temperature_c,
                chromatic_dispersion: self.chromatic_dispersion,
                polarization_mode_dispersion: self.polarization_mode_dispersion,
                nonlinear_coefficient: self.nonlinear_coefficient,
            },
            detector: DetectorConfig {
                efficiency: self.detector_efficiency,
                dark_count_rate: self.detector_dark_count_rate,
                dead_time_us: self.detector_dead_time_us,
                timing_jitter_ns: self.detector_timing_jitter_ns,
                afterpulse_probability: self.detector_afterpulse_probability,
                crosstalk_probability: self.detector_crosstalk_probability,
            },
        }
    }
}

/// Derived per-run performance figures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceMetricsRecord {
    /// final / sifted.
    pub key_rate: f64,
    /// sifted / raw.
    pub sifting_efficiency: f64,
    /// final / sifted (kept alongside `key_rate` for export parity).
    pub final_efficiency: f64,
    /// `max(0, 1 − qber)`.
    pub security_level: f64,
    /// final / raw.
    pub raw_to_final_ratio: f64,
}

/// Completed simulation: one JSON-serializable document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub simulation_id: String,
    pub timestamp: DateTime<Utc>,
    pub parameters: SimulationParameters,
    pub bb84: Bb84Result,
    pub attack_result: Option<AttackRecord>,
    pub attack_detection: Option<DetectionRecord>,
    pub performance_metrics: PerformanceMetricsRecord,
    pub simulation_time_secs: f64,
}

/// Cached quantum key for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuantumKey {
    pub key_bits: Vec<u8>,
    pub length: usize,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Simulation that produced the key material.
    pub simulation_id: String,
    /// QBER at generation time.
    pub qber: f64,
    pub security_level: f64,
    pub is_shared: bool,
    pub shared_with: Option<String>,
    /// True when the key was tiled from insufficient simulated material.
    pub is_synthetic: bool,
}

impl UserQuantumKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// The simulation facade.
pub struct QkdSimulator {
    history: RwLock<Vec<SimulationResult>>,
    quantum_keys: DashMap<String, UserQuantumKey>,
    attack_detector: Mutex<AttackDetector>,
    key_ttl: Duration,
}

impl Default for QkdSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl QkdSimulator {
    pub fn new() -> Self {
        crate::logging::init_logging();
        Self {
            history: RwLock::new(Vec::new()),
            quantum_keys: DashMap::new(),
            attack_detector: Mutex::new(AttackDetector::default()),
            key_ttl: Duration::seconds(KEY_TTL_SECS),
        }
    }

    /// Override the key-cache TTL (tests and short-lived deployments).
    pub fn with_key_ttl(mut self, ttl: Duration) -> Self {
        self.key_ttl = ttl;
        self
    }

    /// Run one simulation and append it to the history.
    ///
    /// # Errors
    ///
    /// Parameter validation failures surface before any simulation work;
    /// later stages only fail on internal invariant violations.
    pub fn run_simulation(
        &self,
        parameters: &SimulationParameters,
        simulation_id: Option<String>,
    ) -> Result<SimulationResult> {
        parameters.validate()?;
        let timer = PerformanceTimer::start(LogCategory::Simulator, "run_simulation");
        let simulation_id = simulation_id
            .unwrap_or_else(|| format!("qkd_sim_{}", Uuid::new_v4().simple()));

        let mut rng = match parameters.rng_seed {
            Some(seed) => SimulationRng::seeded(seed),
            None => SimulationRng::from_os_entropy(),
        };

        let mut protocol = Bb84Protocol::new(parameters.bb84_config());
        let (mut bb84, attack_result) = protocol.execute(
            parameters.attack_type,
            &parameters.attack_parameters,
            &mut rng,
        )?;

        if parameters.use_advanced_reconciliation {
            if let Err(e) = self.apply_advanced_reconciliation(&mut bb84, parameters, &mut rng) {
                log_error(
                    LogCategory::Reconciliation,
                    &format!("advanced reconciliation failed: {e}"),
                );
            }
        }

        if parameters.use_advanced_privacy_amplification {
            self.apply_advanced_privacy_amplification(&mut bb84, parameters, &mut rng);
        }

        if parameters.use_decoy_states {
            self.apply_decoy_states(&mut bb84, parameters, &mut rng);
        }

        bb84.final_key_length = bb84.final_key_sender.len();
        bb84.qber = calculate_qber(&bb84.final_key_sender, &bb84.final_key_receiver)?;

        let attack_detection = Some(self.detect_attack(&bb84, parameters));
        let performance_metrics = Self::performance_metrics(&bb84);

        let result = SimulationResult {
            simulation_id: simulation_id.clone(),
            timestamp: Utc::now(),
            parameters: parameters.clone(),
            bb84,
            attack_result,
            attack_detection,
            performance_metrics,
            simulation_time_secs: timer.finish(),
        };

        self.history.write().push(result.clone());
        log_info(
            LogCategory::Simulator,
            &format!("simulation {simulation_id} recorded"),
        );
        Ok(result)
    }

    fn apply_advanced_reconciliation(
        &self,
        bb84: &mut Bb84Result,
        parameters: &SimulationParameters,
        rng: &mut SimulationRng,
    ) -> Result<()> {
        let reconciler = Reconciler::new(parameters.reconciliation_method, rng);
        let outcome = reconciler.reconcile(
            &bb84.sifted_key_sender,
            &bb84.sifted_key_receiver,
            rng,
        )?;

        // Revealed positions leave the key here, before amplification
        bb84.reconciled_key_sender = outcome.retained_key(&outcome.corrected_key_sender);
        bb84.reconciled_key_receiver = outcome.retained_key(&outcome.corrected_key_receiver);
        bb84.reconciliation_info = json!({
            "reconciliation_method": outcome.method.to_string(),
            "rounds_required": outcome.rounds_required,
            "bits_revealed": outcome.bits_revealed,
            "success_rate": outcome.success_rate,
            "discarded_positions": outcome.discarded_positions.len(),
        });

        // Keep the chain consistent when advanced amplification is off
        if !parameters.use_advanced_privacy_amplification {
            let final_length =
                ((bb84.reconciled_key_sender.len() as f64 * 0.98) as usize).max(1);
            let final_length = final_length.min(bb84.reconciled_key_sender.len());
            bb84.final_key_sender = bb84.reconciled_key_sender[..final_length].to_vec();
            bb84.final_key_receiver = bb84.reconciled_key_receiver[..final_length].to_vec();
        }
        Ok(())
    }

    fn apply_advanced_privacy_amplification(
        &self,
        bb84: &mut Bb84Result,
        parameters: &SimulationParameters,
        rng: &mut SimulationRng,
    ) {
        let mut amplifier = PrivacyAmplifier::new(
            parameters.privacy_amplification_method,
            parameters.privacy_amplification_output_length,
        );
        let (sender_result, receiver_result) = amplifier.amplify_pair(
            &bb84.reconciled_key_sender,
            &bb84.reconciled_key_receiver,
            rng,
        );
        bb84.final_key_sender = sender_result.final_key.clone();
        bb84.final_key_receiver = receiver_result.final_key.clone();
        bb84.privacy_amplification_info = json!({
            "amplification_method": sender_result.method.to_string(),
            "original_length": sender_result.original_length,
            "final_length": sender_result.final_length,
            "compression_ratio": sender_result.compression_ratio,
            "security_parameter": sender_result.security_parameter,
            "entropy_estimate": sender_result.entropy_estimate,
        });
    }

    fn apply_decoy_states(
        &self,
        bb84: &mut Bb84Result,
        parameters: &SimulationParameters,
        rng: &mut SimulationRng,
    ) {
        let analyzer = match DecoyStateAnalyzer::new(parameters.decoy_state_parameters) {
            Ok(analyzer) => analyzer,
            Err(e) => {
                log_error(LogCategory::Decoy, &format!("decoy analysis skipped: {e}"));
                return;
            }
        };
        let metadata = analyzer.run_analysis(1000, rng);
        let success = metadata["decoy_analysis"]["decoy_state_analysis_success"]
            .as_bool()
            .unwrap_or(false);
        if success {
            let improvement = &metadata["security_improvement"];
            bb84.security_metadata = Some(json!({
                "decoy_state_security": improvement["improvement"],
                "pns_attack_mitigation": improvement["pns_attack_mitigation"],
                "single_photon_ratio": improvement["single_photon_ratio"],
            }));
        }
        bb84.decoy_state_metadata = Some(metadata);
    }

    /// Statistical detection over the sifted-key evidence, with the declared
    /// attack folded in when one was simulated at meaningful strength.
    fn detect_attack(
        &self,
        bb84: &Bb84Result,
        parameters: &SimulationParameters,
    ) -> DetectionRecord {
        let declared = (parameters.attack_type != AttackType::NoAttack)
            .then_some(&parameters.attack_parameters);
        let mut record = self.attack_detector.lock().detect_attack(
            bb84.sifted_qber,
            bb84.sifted_key_length,
            &bb84.error_positions,
            declared,
        );
        if let Some(params) = declared {
            if params.strength > 0.3 {
                record.attack_detected = true;
                record.attack_type = Some(parameters.attack_type.into());
                record.confidence = record.confidence.max(params.strength.min(0.9));
                record.indicators.push(format!(
                    "Simulated attack: {} (strength: {:.2})",
                    parameters.attack_type, params.strength
                ));
            }
        }
        record
    }

    fn performance_metrics(bb84: &Bb84Result) -> PerformanceMetricsRecord {
        let sifted = bb84.sifted_key_length.max(1) as f64;
        let raw = bb84.raw_key_length.max(1) as f64;
        let final_len = bb84.final_key_length as f64;
        PerformanceMetricsRecord {
            key_rate: final_len / sifted,
            sifting_efficiency: bb84.sifted_key_length as f64 / raw,
            final_efficiency: final_len / sifted,
            security_level: (1.0 - bb84.qber).max(0.0),
            raw_to_final_ratio: final_len / raw,
        }
    }

    /// Cartesian-product parameter sweep.
    ///
    /// Each dimension maps a parameter name to the values to try; every
    /// combination runs as a full simulation. Combinations are independent,
    /// so they fan out across worker threads; the history lock serializes
    /// insertions. Results come back in combination order.
    ///
    /// # Errors
    ///
    /// Unknown parameter names and invalid values fail before any run
    /// starts; individual run failures propagate.
    pub fn run_parameter_sweep(
        &self,
        base: &SimulationParameters,
        sweep: &BTreeMap<String, Vec<serde_json::Value>>,
    ) -> Result<Vec<SimulationResult>> {
        let mut combinations = vec![base.clone()];
        for (name, values) in sweep {
            if values.is_empty() {
                return Err(SimulatorError::InvalidParameter(format!(
                    "sweep dimension '{name}' has no values"
                )));
            }
            let mut expanded = Vec::with_capacity(combinations.len() * values.len());
            for combo in &combinations {
                for value in values {
                    let mut next = combo.clone();
                    apply_override(&mut next, name, value)?;
                    expanded.push(next);
                }
            }
            combinations = expanded;
        }
        for (index, combo) in combinations.iter_mut().enumerate() {
            combo.validate()?;
            // Decorrelate seeded sweeps while keeping them reproducible
            if let Some(seed) = base.rng_seed {
                combo.rng_seed = Some(seed.wrapping_add(index as u64));
            }
        }

        log_info(
            LogCategory::Simulator,
            &format!("parameter sweep: {} combinations", combinations.len()),
        );

        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
            .min(combinations.len().max(1));

        let slots: Vec<Mutex<Option<Result<SimulationResult>>>> =
            (0..combinations.len()).map(|_| Mutex::new(None)).collect();
        let next_index = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next_index.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let Some(combo) = combinations.get(index) else { break };
                    let outcome = self.run_simulation(combo, None);
                    *slots[index].lock() = Some(outcome);
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner().unwrap_or_else(|| {
                    Err(SimulatorError::InvalidParameter(
                        "sweep worker dropped a combination".to_string(),
                    ))
                })
            })
            .collect()
    }

    /// Generate (or regenerate) a quantum key for a user and cache it.
    ///
    /// Runs a simulation sized for the requested key. A short first run
    /// retries once with the most favorable channel the validator allows;
    /// if material is still insufficient, the available bits tile into a
    /// deterministic synthetic key marked as such with a reduced security
    /// level.
    pub fn generate_key_for_user(
        &self,
        user_id: &str,
        key_length: usize,
    ) -> Result<UserQuantumKey> {
        let record = self.generate_key_record(key_length)?;
        let entry = UserQuantumKey {
            is_shared: false,
            shared_with: None,
            ..record
        };
        self.quantum_keys.insert(user_id.to_string(), entry.clone());
        log_info(
            LogCategory::Simulator,
            &format!(
                "cached {}-bit key for {user_id} (synthetic: {})",
                entry.length, entry.is_synthetic
            ),
        );
        Ok(entry)
    }

    fn generate_key_record(&self, key_length: usize) -> Result<UserQuantumKey> {
        let favorable = SimulationParameters {
            num_qubits: (key_length * 50).clamp(2000, 10_000),
            channel_length_km: 2.0,
            channel_attenuation: 0.1,
            channel_depolarization: 0.001,
            photon_source_efficiency: 0.95,
            detector_efficiency: 0.95,
            attack_type: AttackType::NoAttack,
            use_advanced_reconciliation: true,
            reconciliation_method: ReconciliationMethod::Cascade,
            use_advanced_privacy_amplification: true,
            privacy_amplification_method: AmplificationMethod::Toeplitz,
            privacy_amplification_output_length: key_length,
            ..Default::default()
        };

        let mut result = self.run_simulation(&favorable, None)?;
        if result.bb84.final_key_length < key_length {
            let retry = SimulationParameters {
                num_qubits: 10_000,
                channel_length_km: 1.0,
                channel_attenuation: 0.05,
                channel_depolarization: 0.0005,
                ..favorable
            };
            result = self.run_simulation(&retry, None)?;
        }

        let now = Utc::now();
        let expires_at = now + self.key_ttl;
        let metrics_security = result.performance_metrics.security_level;

        if result.bb84.final_key_length >= key_length {
            Ok(UserQuantumKey {
                key_bits: result.bb84.final_key_sender[..key_length].to_vec(),
                length: key_length,
                generated_at: now,
                expires_at,
                simulation_id: result.simulation_id,
                qber: result.bb84.qber,
                security_level: metrics_security,
                is_shared: false,
                shared_with: None,
                is_synthetic: false,
            })
        } else {
            // Tile the available bits into a deterministic synthetic key
            let mut available = result.bb84.final_key_sender.clone();
            if available.is_empty() {
                available = vec![0, 1];
            }
            let key_bits: Vec<u8> = available.iter().copied().cycle().take(key_length).collect();
            log_error(
                LogCategory::Simulator,
                &format!(
                    "simulation produced only {} bits; issuing synthetic {key_length}-bit key",
                    result.bb84.final_key_length
                ),
            );
            Ok(UserQuantumKey {
                key_bits,
                length: key_length,
                generated_at: now,
                expires_at,
                simulation_id: result.simulation_id,
                qber: result.bb84.qber,
                security_level: 0.85,
                is_shared: false,
                shared_with: None,
                is_synthetic: true,
            })
        }
    }

    /// Fetch a user's cached key, evicting it if expired.
    pub fn get_user_quantum_key(&self, user_id: &str) -> Option<UserQuantumKey> {
        let now = Utc::now();
        let expired = match self.quantum_keys.get(user_id) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.quantum_keys.remove(user_id);
        }
        None
    }

    /// Drop any cached key and generate a fresh one.
    pub fn refresh_user_quantum_key(
        &self,
        user_id: &str,
        key_length: usize,
    ) -> Result<UserQuantumKey> {
        self.quantum_keys.remove(user_id);
        self.generate_key_for_user(user_id, key_length)
    }

    /// Generate one key and install it for both users with mutual
    /// `shared_with` pointers.
    pub fn generate_shared_key(
        &self,
        user1_id: &str,
        user2_id: &str,
        key_length: usize,
    ) -> Result<UserQuantumKey> {
        let record = self.generate_key_record(key_length)?;
        let entry_for = |shared_with: &str| UserQuantumKey {
            is_shared: true,
            shared_with: Some(shared_with.to_string()),
            ..record.clone()
        };
        let first = entry_for(user2_id);
        self.quantum_keys.insert(user1_id.to_string(), first.clone());
        self.quantum_keys
            .insert(user2_id.to_string(), entry_for(user1_id));
        log_info(
            LogCategory::Simulator,
            &format!("shared {key_length}-bit key installed for {user1_id} and {user2_id}"),
        );
        Ok(first)
    }

    /// Key-cache occupancy snapshot.
    pub fn key_cache_statistics(&self) -> serde_json::Value {
        let now = Utc::now();
        let total = self.quantum_keys.len();
        let active = self
            .quantum_keys
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count();
        json!({
            "total_users": total,
            "active_keys": active,
            "expired_keys": total - active,
            "key_ttl_secs": self.key_ttl.num_seconds(),
        })
    }

    /// Simulation history snapshot (cloned).
    pub fn simulation_history(&self) -> Vec<SimulationResult> {
        self.history.read().clone()
    }

    pub fn get_simulation_by_id(&self, simulation_id: &str) -> Option<SimulationResult> {
        self.history
            .read()
            .iter()
            .find(|r| r.simulation_id == simulation_id)
            .cloned()
    }

    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    /// Export one simulation as a JSON document to `path`.
    ///
    /// # Errors
    ///
    /// Unknown ids and filesystem failures return [`SimulatorError::Export`].
    pub fn export_results(&self, simulation_id: &str, path: &std::path::Path) -> Result<()> {
        let result = self
            .get_simulation_by_id(simulation_id)
            .ok_or_else(|| SimulatorError::Export(format!("unknown simulation {simulation_id}")))?;
        let document = serde_json::to_string_pretty(&result)
            .map_err(|e| SimulatorError::Export(format!("serialization failed: {e}")))?;
        std::fs::write(path, document)
            .map_err(|e| SimulatorError::Export(format!("write failed: {e}")))?;
        Ok(())
    }

    /// Aggregate statistics over the recorded history.
    pub fn statistics(&self) -> serde_json::Value {
        let history = self.history.read();
        if history.is_empty() {
            return json!({ "total_simulations": 0 });
        }
        let total = history.len();
        let successful = history
            .iter()
            .filter(|r| r.bb84.final_key_length > 0)
            .count();
        let avg_qber: f64 = history.iter().map(|r| r.bb84.qber).sum::<f64>() / total as f64;
        let avg_final: f64 = history
            .iter()
            .map(|r| r.bb84.final_key_length as f64)
            .sum::<f64>()
            / total as f64;
        let avg_time: f64 =
            history.iter().map(|r| r.simulation_time_secs).sum::<f64>() / total as f64;
        let attack_runs = history.iter().filter(|r| r.attack_result.is_some()).count();
        json!({
            "total_simulations": total,
            "successful_simulations": successful,
            "success_rate": successful as f64 / total as f64,
            "average_qber": avg_qber,
            "average_final_key_length": avg_final,
            "average_simulation_time_secs": avg_time,
            "attack_simulations": attack_runs,
            "attack_detection_stats": self.attack_detector.lock().statistics(),
        })
    }
}

/// Apply one sweep override by parameter name.
fn apply_override(
    params: &mut SimulationParameters,
    name: &str,
    value: &serde_json::Value,
) -> Result<()> {
    let bad_value = || {
        SimulatorError::InvalidParameter(format!(
            "sweep value for '{name}' has the wrong type: {value}"
        ))
    };
    let as_f64 = || value.as_f64().ok_or_else(bad_value);
    match name {
        "num_qubits" => {
            params.num_qubits = value.as_u64().ok_or_else(bad_value)? as usize;
        }
        "channel_length_km" => params.channel_length_km = as_f64()?,
        "channel_attenuation" => params.channel_attenuation = as_f64()?,
        "wavelength_nm" => params.wavelength_nm = as_f64()?,
        "channel_depolarization" => params.channel_depolarization = as_f64()?,
        "temperature_c" => params.temperature_c = as_f64()?,
        "photon_source_efficiency" => params.photon_source_efficiency = as_f64()?,
        "mean_photons_per_pulse" => params.mean_photons_per_pulse = as_f64()?,
        "detector_efficiency" => params.detector_efficiency = as_f64()?,
        "detector_dark_count_rate" => params.detector_dark_count_rate = as_f64()?,
        "detector_dead_time_us" => params.detector_dead_time_us = as_f64()?,
        "detector_timing_jitter_ns" => params.detector_timing_jitter_ns = as_f64()?,
        "attack_strength" => params.attack_parameters.strength = as_f64()?,
        _ => {
            return Err(SimulatorError::InvalidParameter(format!(
                "unknown sweep parameter: {name}"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params(seed: u64) -> SimulationParameters {
        SimulationParameters {
            num_qubits: 300,
            channel_length_km: 1.0,
            channel_attenuation: 0.05,
            rng_seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn out_of_range_parameters_are_rejected_before_running() {
        let simulator = QkdSimulator::new();
        let mutations: Vec<Box<dyn Fn(&mut SimulationParameters)>> = vec![
            Box::new(|p| p.num_qubits = 4),
            Box::new(|p| p.num_qubits = 20_000),
            Box::new(|p| p.channel_length_km = 500.0),
            Box::new(|p| p.channel_attenuation = 2.0),
            Box::new(|p| p.wavelength_nm = 500.0),
            Box::new(|p| p.detector_efficiency = 0.99),
            Box::new(|p| p.photon_source_efficiency = 0.2),
            Box::new(|p| p.channel_depolarization = 0.5),
        ];
        for mutate in mutations {
            let mut params = fast_params(1);
            mutate(&mut params);
            let result = simulator.run_simulation(&params, None);
            assert!(matches!(result, Err(SimulatorError::InvalidParameter(_))));
        }
        assert!(simulator.simulation_history().is_empty());
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let simulator = QkdSimulator::new();
        let params = fast_params(42);
        let a = simulator.run_simulation(&params, None).unwrap();
        let b = simulator.run_simulation(&params, None).unwrap();
        assert_eq!(a.bb84.sifted_key_sender, b.bb84.sifted_key_sender);
        assert_eq!(a.bb84.sifted_qber, b.bb84.sifted_qber);
        assert_eq!(a.bb84.error_positions, b.bb84.error_positions);
    }

    #[test]
    fn history_records_runs_in_order() {
        let simulator = QkdSimulator::new();
        let first = simulator
            .run_simulation(&fast_params(1), Some("run_one".into()))
            .unwrap();
        let _second = simulator
            .run_simulation(&fast_params(2), Some("run_two".into()))
            .unwrap();
        assert_eq!(simulator.simulation_history().len(), 2);
        assert_eq!(
            simulator.get_simulation_by_id("run_one").unwrap().timestamp,
            first.timestamp
        );
        simulator.clear_history();
        assert!(simulator.simulation_history().is_empty());
    }

    #[test]
    fn sweep_covers_the_cartesian_product_in_order() {
        let simulator = QkdSimulator::new();
        let mut sweep = BTreeMap::new();
        sweep.insert(
            "channel_length_km".to_string(),
            vec![json!(1.0), json!(5.0)],
        );
        sweep.insert(
            "detector_efficiency".to_string(),
            vec![json!(0.5), json!(0.8), json!(0.9)],
        );
        let results = simulator
            .run_parameter_sweep(&fast_params(7), &sweep)
            .unwrap();
        assert_eq!(results.len(), 6);
        assert_eq!(simulator.simulation_history().len(), 6);
        // BTreeMap iterates dimensions alphabetically: length expands first
        let lengths: Vec<f64> = results
            .iter()
            .map(|r| r.parameters.channel_length_km)
            .collect();
        assert_eq!(lengths, vec![1.0, 1.0, 1.0, 5.0, 5.0, 5.0]);
        let efficiencies: Vec<f64> = results[..3]
            .iter()
            .map(|r| r.parameters.detector_efficiency)
            .collect();
        assert_eq!(efficiencies, vec![0.5, 0.8, 0.9]);
    }

    #[test]
    fn sweep_rejects_unknown_parameters() {
        let simulator = QkdSimulator::new();
        let mut sweep = BTreeMap::new();
        sweep.insert("flux_capacitance".to_string(), vec![json!(1.21)]);
        assert!(matches!(
            simulator.run_parameter_sweep(&fast_params(1), &sweep),
            Err(SimulatorError::InvalidParameter(_))
        ));
        assert!(simulator.simulation_history().is_empty());
    }

    #[test]
    fn generated_keys_are_cached_until_expiry() {
        let simulator = QkdSimulator::new();
        let key = simulator.generate_key_for_user("alice", 64).unwrap();
        assert_eq!(key.length, 64);
        assert_eq!(key.key_bits.len(), 64);
        let cached = simulator.get_user_quantum_key("alice").unwrap();
        assert_eq!(cached.key_bits, key.key_bits);
        assert!(cached.expires_at > cached.generated_at);
    }

    #[test]
    fn expired_keys_are_evicted_on_access() {
        let simulator = QkdSimulator::new().with_key_ttl(Duration::seconds(-1));
        simulator.generate_key_for_user("bob", 32).unwrap();
        // TTL already elapsed: access evicts and reports no key
        assert!(simulator.get_user_quantum_key("bob").is_none());
        assert_eq!(simulator.key_cache_statistics()["total_users"], 0);
    }

    #[test]
    fn refresh_replaces_the_cached_key() {
        let simulator = QkdSimulator::new();
        let first = simulator.generate_key_for_user("carol", 64).unwrap();
        let second = simulator.refresh_user_quantum_key("carol", 64).unwrap();
        assert_ne!(
            first.simulation_id, second.simulation_id,
            "refresh must run a fresh simulation"
        );
        assert_eq!(
            simulator.get_user_quantum_key("carol").unwrap().simulation_id,
            second.simulation_id
        );
    }

    #[test]
    fn shared_keys_install_mutual_pointers() {
        let simulator = QkdSimulator::new();
        simulator.generate_shared_key("alice", "bob", 128).unwrap();
        let alice = simulator.get_user_quantum_key("alice").unwrap();
        let bob = simulator.get_user_quantum_key("bob").unwrap();
        assert_eq!(alice.key_bits, bob.key_bits);
        assert!(alice.is_shared && bob.is_shared);
        assert_eq!(alice.shared_with.as_deref(), Some("bob"));
        assert_eq!(bob.shared_with.as_deref(), Some("alice"));
    }

    #[test]
    fn wavelength_correction_bands() {
        let mut params = fast_params(1);
        params.wavelength_nm = 1550.0;
        assert!((params.wavelength_dependent_attenuation() - params.channel_attenuation).abs() < 1e-12);
        params.wavelength_nm = 1310.0;
        assert!(
            (params.wavelength_dependent_attenuation() - params.channel_attenuation * 2.5).abs()
                < 1e-12
        );
        params.wavelength_nm = 1600.0;
        assert!(params.wavelength_dependent_attenuation() > params.channel_attenuation);
    }

    #[test]
    fn statistics_aggregate_over_history() {
        let simulator = QkdSimulator::new();
        simulator.run_simulation(&fast_params(3), None).unwrap();
        simulator.run_simulation(&fast_params(4), None).unwrap();
        let stats = simulator.statistics();
        assert_eq!(stats["total_simulations"], 2);
        assert!(stats["average_final_key_length"].as_f64().unwrap() > 0.0);
    }
}
