//! Quantum primitives: qubit states, measurement, and the photonic hardware
//! models (source, fiber channel, single-photon detector).
//!
//! ## State Representation
//!
//! A qubit is a normalized pair of complex amplitudes (α, β) over the
//! computational basis, |ψ⟩ = α|0⟩ + β|1⟩ with |α|² + |β|² = 1. Measurement
//! follows the Born rule in either the computational (Z) basis or the
//! Hadamard (X) basis, where the state is projected onto
//! |±⟩ = (|0⟩ ± |1⟩)/√2. Probabilities are renormalized before sampling so
//! floating drift accumulated across many channel operations never biases an
//! outcome.
//!
//! ## Hardware Models
//!
//! - [`PhotonSource`]: emission efficiency, Poisson photon-number statistics
//!   (multi-photon pulses are flagged, which is what the PNS attack exploits),
//!   wavelength-stability phase noise and timing jitter.
//! - [`FiberChannel`]: temperature-corrected attenuation with survival
//!   floors, depolarization, chromatic-dispersion timing spread, stochastic
//!   polarization-mode-dispersion rotations, Kerr phase noise and
//!   off-wavelength penalties.
//! - [`SinglePhotonDetector`]: a small state machine over simulation time
//!   with dead-time blocking, dark counts, crosstalk, afterpulsing and a
//!   bounded detection history.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::entropy::SimulationRng;
use crate::{Result, SimulatorError};

const FRAC_1_SQRT_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Measurement basis for BB84.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Basis {
    /// Z basis: |0⟩, |1⟩
    Computational,
    /// X basis: |+⟩, |−⟩
    Hadamard,
}

impl Basis {
    /// Uniformly random basis choice.
    pub fn random(rng: &mut SimulationRng) -> Self {
        if rng.random_bit() == 0 {
            Self::Computational
        } else {
            Self::Hadamard
        }
    }

    /// Conventional one-character rendering: `+` for Z, `x` for X.
    pub fn symbol(&self) -> char {
        match self {
            Self::Computational => '+',
            Self::Hadamard => 'x',
        }
    }
}

/// Per-pulse side data carried alongside a qubit.
///
/// Explicit record rather than ad-hoc attributes: the photon source and the
/// channel both write here, the detector and the PNS eavesdropper read it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseInfo {
    /// Accumulated timing offset relative to the pulse clock (ns scale).
    pub timing_offset: f64,
    /// Whether the source emitted more than one photon for this pulse.
    pub is_multi_photon: bool,
    /// Photon count drawn for the pulse.
    pub photon_count: u32,
}

impl Default for PulseInfo {
    fn default() -> Self {
        Self {
            timing_offset: 0.0,
            is_multi_photon: false,
            photon_count: 1,
        }
    }
}

/// A single qubit state with normalized complex amplitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QubitState {
    alpha: Complex64,
    beta: Complex64,
    /// Pulse metadata attached by the source and mutated by the channel.
    pub pulse: PulseInfo,
}

impl QubitState {
    /// Construct from raw amplitudes, normalizing on entry.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::QuantumOperation`] if both amplitudes are
    /// (numerically) zero.
    pub fn new(alpha: Complex64, beta: Complex64) -> Result<Self> {
        let norm = (alpha.norm_sqr() + beta.norm_sqr()).sqrt();
        if !norm.is_finite() || norm < 1e-12 {
            return Err(SimulatorError::QuantumOperation(
                "cannot normalize a zero-amplitude state".to_string(),
            ));
        }
        Ok(Self {
            alpha: alpha / norm,
            beta: beta / norm,
            pulse: PulseInfo::default(),
        })
    }

    /// The four BB84 preparation states: |0⟩, |1⟩, |+⟩, |−⟩.
    pub fn from_basis_state(basis: Basis, bit: u8) -> Self {
        let (alpha, beta) = match (basis, bit) {
            (Basis::Computational, 0) => (Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)),
            (Basis::Computational, _) => (Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)),
            (Basis::Hadamard, 0) => (
                Complex64::new(FRAC_1_SQRT_2, 0.0),
                Complex64::new(FRAC_1_SQRT_2, 0.0),
            ),
            (Basis::Hadamard, _) => (
                Complex64::new(FRAC_1_SQRT_2, 0.0),
                Complex64::new(-FRAC_1_SQRT_2, 0.0),
            ),
        };
        Self {
            alpha,
            beta,
            pulse: PulseInfo::default(),
        }
    }

    /// Amplitude of |0⟩.
    pub fn alpha(&self) -> Complex64 {
        self.alpha
    }

    /// Amplitude of |1⟩.
    pub fn beta(&self) -> Complex64 {
        self.beta
    }

    /// Born-rule measurement in the given basis.
    ///
    /// Returns the outcome bit and the probability with which that outcome
    /// was selected. Probabilities are renormalized before the draw to
    /// contain floating drift; the state itself is not collapsed, matching
    /// the single-use lifetime of a transmitted photon.
    pub fn measure(&self, basis: Basis, rng: &mut SimulationRng) -> (u8, f64) {
        let (p0, p1) = match basis {
            Basis::Computational => (self.alpha.norm_sqr(), self.beta.norm_sqr()),
            Basis::Hadamard => {
                let plus = (self.alpha + self.beta) * FRAC_1_SQRT_2;
                let minus = (self.alpha - self.beta) * FRAC_1_SQRT_2;
                (plus.norm_sqr(), minus.norm_sqr())
            }
        };
        let total = p0 + p1;
        let p0 = p0 / total;
        if rng.uniform() < p0 {
            (0, p0)
        } else {
            (1, 1.0 - p0)
        }
    }

    /// Depolarization noise channel.
    ///
    /// With probability `rate` the state is replaced by a uniformly random
    /// pure state; otherwise a residual phase error (σ = 0.2 rad) strikes
    /// 15% of pulses. Rate zero is the identity, so a noise-free channel is
    /// genuinely noise-free.
    pub fn apply_depolarization(&self, rate: f64, rng: &mut SimulationRng) -> Self {
        if rate <= 0.0 {
            return self.clone();
        }
        if rng.chance(rate) {
            let theta = rng.uniform_range(0.0, 2.0 * std::f64::consts::PI);
            let phi = rng.uniform_range(0.0, 2.0 * std::f64::consts::PI);
            let mut state = Self {
                alpha: Complex64::new((theta / 2.0).cos(), 0.0),
                beta: Complex64::from_polar(1.0, phi) * (theta / 2.0).sin(),
                pulse: self.pulse,
            };
            state.renormalize();
            state
        } else if rng.chance(0.15) {
            self.with_phase_shift(rng.gauss(0.0, 0.2))
        } else {
            self.clone()
        }
    }

    /// Gaussian phase noise on the |1⟩ amplitude.
    pub fn apply_phase_noise(&self, std_dev: f64, rng: &mut SimulationRng) -> Self {
        if std_dev <= 0.0 {
            return self.clone();
        }
        self.with_phase_shift(rng.gauss(0.0, std_dev))
    }

    /// Multiply β by `e^{iφ}`. Preserves normalization.
    pub fn with_phase_shift(&self, phase: f64) -> Self {
        Self {
            alpha: self.alpha,
            beta: self.beta * Complex64::from_polar(1.0, phase),
            pulse: self.pulse,
        }
    }

    /// Real rotation in the {|0⟩, |1⟩} plane (polarization rotation).
    pub fn rotated(&self, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        let mut state = Self {
            alpha: self.alpha * cos - self.beta * sin,
            beta: self.alpha * sin + self.beta * cos,
            pulse: self.pulse,
        };
        state.renormalize();
        state
    }

    /// Bloch-sphere coordinates (x, y, z).
    pub fn bloch_coordinates(&self) -> (f64, f64, f64) {
        let x = 2.0 * (self.alpha.re * self.beta.re + self.alpha.im * self.beta.im);
        let y = 2.0 * (self.alpha.re * self.beta.im - self.alpha.im * self.beta.re);
        let z = self.alpha.norm_sqr() - self.beta.norm_sqr();
        (x, y, z)
    }

    /// |α|² + |β|², which should sit at 1 up to floating error.
    pub fn norm_sqr(&self) -> f64 {
        self.alpha.norm_sqr() + self.beta.norm_sqr()
    }

    fn renormalize(&mut self) {
        let norm = self.norm_sqr().sqrt();
        if norm > 0.0 {
            self.alpha /= norm;
            self.beta /= norm;
        }
    }
}

impl std::fmt::Display for QubitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "|psi> = {:.3}|0> + {:.3}|1>", self.alpha, self.beta)
    }
}

/// Photon source configuration. Stateless across pulses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhotonSourceConfig {
    /// Probability of successfully firing the source at all.
    pub efficiency: f64,
    /// Nominal multi-photon emission probability (reported in statistics;
    /// the actual photon-number distribution is Poissonian).
    pub multi_photon_probability: f64,
    /// Mean of the Poisson photon-number distribution per pulse.
    pub mean_photons_per_pulse: f64,
    /// Timing jitter standard deviation (ns).
    pub timing_jitter: f64,
    /// Wavelength stability; the complement is the phase-error probability.
    pub wavelength_stability: f64,
}

impl Default for PhotonSourceConfig {
    fn default() -> Self {
        Self {
            efficiency: 0.8,
            multi_photon_probability: 0.05,
            mean_photons_per_pulse: 3.5,
            timing_jitter: 0.1,
            wavelength_stability: 0.99,
        }
    }
}

/// Attenuated laser source with realistic pulse statistics.
#[derive(Debug, Clone)]
pub struct PhotonSource {
    config: PhotonSourceConfig,
}

impl PhotonSource {
    pub fn new(config: PhotonSourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PhotonSourceConfig {
        &self.config
    }

    /// Attempt to emit a pulse carrying the prepared state.
    ///
    /// Fails outright with probability `1 − efficiency`, then draws the
    /// photon number from Poisson(`mean_photons_per_pulse`): zero photons is
    /// a failed emission, one photon emits an imperfection-adjusted copy,
    /// more than one emits the same imperfect state flagged multi-photon.
    pub fn emit(&self, state: &QubitState, rng: &mut SimulationRng) -> Option<QubitState> {
        if !rng.chance(self.config.efficiency) {
            return None;
        }
        let photon_count = rng.poisson(self.config.mean_photons_per_pulse);
        if photon_count == 0 {
            return None;
        }
        let mut emitted = self.apply_source_imperfections(state, rng);
        if photon_count > 1 {
            emitted.pulse.is_multi_photon = true;
            emitted.pulse.photon_count = photon_count;
        }
        Some(emitted)
    }

    fn apply_source_imperfections(
        &self,
        state: &QubitState,
        rng: &mut SimulationRng,
    ) -> QubitState {
        let mut emitted = if rng.chance(1.0 - self.config.wavelength_stability) {
            state.apply_phase_noise(0.1, rng)
        } else {
            state.clone()
        };
        emitted.pulse.timing_offset = rng.gauss(0.0, self.config.timing_jitter);
        emitted
    }

    /// Snapshot for run metadata.
    pub fn statistics(&self) -> serde_json::Value {
        json!({
            "efficiency": self.config.efficiency,
            "multi_photon_probability": self.config.multi_photon_probability,
            "mean_photons_per_pulse": self.config.mean_photons_per_pulse,
            "timing_jitter": self.config.timing_jitter,
            "wavelength_stability": self.config.wavelength_stability,
        })
    }
}

/// Optical fiber configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FiberChannelConfig {
    /// Attenuation in dB/km before temperature correction.
    pub attenuation_db_per_km: f64,
    /// Depolarization probability per transit.
    pub depolarization_rate: f64,
    /// Fiber length in km.
    pub length_km: f64,
    /// Operating wavelength in nm; 1550 is the low-loss window.
    pub wavelength_nm: f64,
    /// Operating temperature in Celsius.
    pub temperature_c: f64,
    /// Chromatic dispersion coefficient, ps/(nm·km).
    pub chromatic_dispersion: f64,
    /// Polarization-mode dispersion coefficient, ps/√km.
    pub polarization_mode_dispersion: f64,
    /// Nonlinear Kerr coefficient, m²/W.
    pub nonlinear_coefficient: f64,
}

impl Default for FiberChannelConfig {
    fn default() -> Self {
        Self {
            attenuation_db_per_km: 0.1,
            depolarization_rate: 0.01,
            length_km: 10.0,
            wavelength_nm: 1550.0,
            temperature_c: 20.0,
            chromatic_dispersion: 17.0,
            polarization_mode_dispersion: 0.1,
            nonlinear_coefficient: 2.6e-20,
        }
    }
}

/// Quantum channel over optical fiber with loss and noise models.
#[derive(Debug, Clone)]
pub struct FiberChannel {
    config: FiberChannelConfig,
    temp_corrected_attenuation: f64,
}

impl FiberChannel {
    pub fn new(config: FiberChannelConfig) -> Self {
        // 0.1% attenuation shift per degree away from 20 C
        let correction = 1.0 + 0.001 * (config.temperature_c - 20.0);
        Self {
            temp_corrected_attenuation: config.attenuation_db_per_km * correction,
            config,
        }
    }

    pub fn config(&self) -> &FiberChannelConfig {
        &self.config
    }

    /// Attenuation after temperature correction, dB/km.
    pub fn effective_attenuation(&self) -> f64 {
        self.temp_corrected_attenuation
    }

    /// Survival probability including the high-loss floors.
    pub fn transmission_probability(&self) -> f64 {
        let loss_db = self.temp_corrected_attenuation * self.config.length_km;
        let raw = 10f64.powf(-loss_db / 10.0);
        if loss_db > 30.0 {
            raw.max(0.01)
        } else if loss_db > 20.0 {
            raw.max(0.05)
        } else if loss_db > 10.0 {
            raw.max(0.1)
        } else {
            raw
        }
    }

    /// Propagate a pulse through the fiber.
    ///
    /// Returns `None` when the pulse is absorbed; otherwise applies, in
    /// order: depolarization, chromatic-dispersion timing spread, stochastic
    /// PMD rotation, Kerr phase noise and the off-wavelength penalty.
    pub fn transmit(&self, qubit: &QubitState, rng: &mut SimulationRng) -> Option<QubitState> {
        if !rng.chance(self.transmission_probability()) {
            return None;
        }

        let mut out = qubit.apply_depolarization(self.config.depolarization_rate, rng);

        if self.config.chromatic_dispersion > 0.0 {
            let dispersion_delay =
                self.config.chromatic_dispersion * self.config.length_km * 1e-12;
            out.pulse.timing_offset += rng.gauss(0.0, dispersion_delay * 0.1);
        }

        if self.config.polarization_mode_dispersion > 0.0 && rng.chance(0.1) {
            let pmd_delay =
                self.config.polarization_mode_dispersion * self.config.length_km.sqrt() * 1e-12;
            out = out.rotated(rng.gauss(0.0, pmd_delay * 1e9));
        }

        if self.config.nonlinear_coefficient > 0.0 && rng.chance(0.05) {
            out = out.apply_phase_noise(0.05, rng);
        }

        self.apply_wavelength_effects(out, rng)
    }

    fn apply_wavelength_effects(
        &self,
        qubit: QubitState,
        rng: &mut SimulationRng,
    ) -> Option<QubitState> {
        let detuning = (self.config.wavelength_nm - 1550.0).abs();
        if detuning > 10.0 {
            let wavelength_factor = 1.0 + detuning / 100.0;
            if rng.chance((wavelength_factor - 1.0) * 0.1) {
                return Some(qubit.apply_phase_noise(0.02, rng));
            }
        }
        Some(qubit)
    }

    /// Snapshot for run metadata, with a coarse quality grade.
    pub fn statistics(&self) -> serde_json::Value {
        let transmission = self.transmission_probability();
        let total_dispersion = self.config.chromatic_dispersion * self.config.length_km;
        let total_pmd =
            self.config.polarization_mode_dispersion * self.config.length_km.sqrt();
        let quality = if transmission > 0.8 && total_dispersion < 50.0 {
            "excellent"
        } else if transmission > 0.5 && total_dispersion < 100.0 {
            "good"
        } else if transmission > 0.2 {
            "fair"
        } else {
            "poor"
        };
        json!({
            "attenuation_db_per_km": self.config.attenuation_db_per_km,
            "temp_corrected_attenuation": self.temp_corrected_attenuation,
            "length_km": self.config.length_km,
            "depolarization_rate": self.config.depolarization_rate,
            "transmission_probability": transmission,
            "total_loss_db": self.temp_corrected_attenuation * self.config.length_km,
            "chromatic_dispersion_total": total_dispersion,
            "polarization_mode_dispersion_total": total_pmd,
            "temperature_c": self.config.temperature_c,
            "wavelength_nm": self.config.wavelength_nm,
            "channel_quality": quality,
            "nonlinear_effects": self.config.nonlinear_coefficient > 0.0,
        })
    }
}

/// Single-photon detector configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Detection efficiency for a real photon.
    pub efficiency: f64,
    /// Dark count rate, counts/s (applied per-call at µs granularity).
    pub dark_count_rate: f64,
    /// Dead time after any registered event, µs.
    pub dead_time_us: f64,
    /// Timing jitter standard deviation, ns.
    pub timing_jitter_ns: f64,
    /// Afterpulse probability once the history is non-empty.
    pub afterpulse_probability: f64,
    /// Crosstalk probability from neighboring detectors.
    pub crosstalk_probability: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            efficiency: 0.8,
            dark_count_rate: 100.0,
            dead_time_us: 0.001,
            timing_jitter_ns: 0.05,
            afterpulse_probability: 0.01,
            crosstalk_probability: 0.001,
        }
    }
}

/// Everything the detector knows about one detection attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Simulation-clock time of the attempt (seconds).
    pub detection_time: f64,
    /// Basis the receiver intended to measure in.
    pub basis: Basis,
    /// The click was a dark count, not a photon.
    pub dark_count: bool,
    /// The click came from an afterpulse of a previous detection.
    pub afterpulse: bool,
    /// The click leaked in from a neighboring detector.
    pub crosstalk: bool,
    /// The attempt fell inside the dead-time window.
    pub dead_time_effect: bool,
    /// Timing jitter drawn for a genuine detection (ns).
    pub timing_jitter: f64,
    /// Configured detection efficiency at the time of the attempt.
    pub detection_efficiency: f64,
}

impl DetectionEvent {
    fn at(time: f64, basis: Basis, efficiency: f64) -> Self {
        Self {
            detection_time: time,
            basis,
            dark_count: false,
            afterpulse: false,
            crosstalk: false,
            dead_time_effect: false,
            timing_jitter: 0.0,
            detection_efficiency: efficiency,
        }
    }
}

/// Avalanche-photodiode-style detector with dead time and noise sources.
///
/// Detection attempts are keyed by a simulation clock; every registered
/// event (genuine or spurious) arms the dead-time window and appends to the
/// bounded history that afterpulsing feeds on.
#[derive(Debug, Clone)]
pub struct SinglePhotonDetector {
    config: DetectorConfig,
    is_dead: bool,
    dead_until: f64,
    last_detection_time: f64,
    detection_history: Vec<f64>,
}

impl SinglePhotonDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            is_dead: false,
            dead_until: 0.0,
            last_detection_time: 0.0,
            detection_history: Vec::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Attempt a detection at simulation time `now` (seconds).
    ///
    /// The outcome ordering is fixed: dead-time blocking, dark count,
    /// crosstalk, afterpulse, then the genuine-photon branch gated on
    /// `efficiency`. Any successful branch records the event, arming dead
    /// time and extending the history.
    pub fn detect(
        &mut self,
        qubit: Option<&QubitState>,
        basis: Basis,
        now: f64,
        rng: &mut SimulationRng,
    ) -> (bool, DetectionEvent) {
        let mut event = DetectionEvent::at(now, basis, self.config.efficiency);

        if self.is_dead && now < self.dead_until {
            event.dead_time_effect = true;
            return (false, event);
        }

        // counts/s scaled to the µs attempt window
        if rng.chance(self.config.dark_count_rate * 1e-6) {
            event.dark_count = true;
            self.record(now);
            return (true, event);
        }

        if rng.chance(self.config.crosstalk_probability) {
            event.crosstalk = true;
            self.record(now);
            return (true, event);
        }

        if !self.detection_history.is_empty() && rng.chance(self.config.afterpulse_probability) {
            event.afterpulse = true;
            self.record(now);
            return (true, event);
        }

        if qubit.is_some() && rng.chance(self.config.efficiency) {
            event.timing_jitter = rng.gauss(0.0, self.config.timing_jitter_ns);
            self.record(now);
            return (true, event);
        }

        (false, event)
    }

    fn record(&mut self, now: f64) {
        self.last_detection_time = now;
        self.detection_history.push(now);
        self.is_dead = true;
        self.dead_until = now + self.config.dead_time_us * 1e-6;
        if self.detection_history.len() > 1000 {
            let keep_from = self.detection_history.len() - 500;
            self.detection_history.drain(..keep_from);
        }
    }

    /// Total registered events.
    pub fn total_detections(&self) -> usize {
        self.detection_history.len()
    }

    /// Snapshot for run metadata.
    pub fn statistics(&self) -> serde_json::Value {
        json!({
            "efficiency": self.config.efficiency,
            "dark_count_rate": self.config.dark_count_rate,
            "dead_time_us": self.config.dead_time_us,
            "timing_jitter_ns": self.config.timing_jitter_ns,
            "afterpulse_probability": self.config.afterpulse_probability,
            "crosstalk_probability": self.config.crosstalk_probability,
            "is_dead": self.is_dead,
            "dead_until": self.dead_until,
            "total_detections": self.detection_history.len(),
            "last_detection_time": self.last_detection_time,
        })
    }
}

/// Quantum bit error rate between two equal-length sifted keys.
///
/// Empty keys have QBER zero by definition.
///
/// # Errors
///
/// Returns [`SimulatorError::QuantumOperation`] if the lengths differ.
pub fn calculate_qber(sender: &[u8], receiver: &[u8]) -> Result<f64> {
    if sender.len() != receiver.len() {
        return Err(SimulatorError::QuantumOperation(format!(
            "key lengths must match: {} vs {}",
            sender.len(),
            receiver.len()
        )));
    }
    if sender.is_empty() {
        return Ok(0.0);
    }
    let errors = sender
        .iter()
        .zip(receiver.iter())
        .filter(|(s, r)| s != r)
        .count();
    Ok(errors as f64 / sender.len() as f64)
}
