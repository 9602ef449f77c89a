//! BB84 protocol: sender, receiver and the phased orchestrator.
//!
//! A run walks the canonical phase sequence (initialization, quantum
//! transmission, basis announcement, sifting, error estimation,
//! reconciliation, privacy amplification) and records every transition, so
//! the completed [`Bb84Result`] carries the full observable trace of the
//! exchange: both parties' bits and bases, the sifted/reconciled/final keys,
//! error positions and the QBER at each stage.
//!
//! The orchestrator owns the built-in (bounded-efficiency) reconciliation and
//! truncation-style privacy amplification; the simulator facade swaps in the
//! advanced stages from [`crate::reconciliation`] and
//! [`crate::privacy_amplification`] when asked.
//!
//! An attack, when configured, strikes strictly between transmission and
//! detection, which is exactly where a fiber tap sits.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::attacks::{apply_attack, AttackParameters, AttackRecord, AttackType};
use crate::entropy::SimulationRng;
use crate::logging::{log_info, LogCategory};
use crate::quantum_optics::{
    calculate_qber, Basis, DetectionEvent, DetectorConfig, FiberChannel, FiberChannelConfig,
    PhotonSource, PhotonSourceConfig, QubitState, SinglePhotonDetector,
};
use crate::Result;

/// Phases of one protocol run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolPhase {
    Initialization,
    QuantumTransmission,
    BasisAnnouncement,
    Sifting,
    ErrorEstimation,
    Reconciliation,
    PrivacyAmplification,
    Completed,
}

impl std::fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initialization => "initialization",
            Self::QuantumTransmission => "quantum_transmission",
            Self::BasisAnnouncement => "basis_announcement",
            Self::Sifting => "sifting",
            Self::ErrorEstimation => "error_estimation",
            Self::Reconciliation => "reconciliation",
            Self::PrivacyAmplification => "privacy_amplification",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Completed run record. Immutable once the facade finishes post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bb84Result {
    pub raw_key_length: usize,
    pub sifted_key_length: usize,
    pub final_key_length: usize,
    /// QBER over the final keys.
    pub qber: f64,
    /// Disagreement over every detected slot, basis-matched or not.
    pub raw_qber: f64,
    /// QBER over the sifted keys before reconciliation.
    pub sifted_qber: f64,
    pub sifted_key_sender: Vec<u8>,
    pub sifted_key_receiver: Vec<u8>,
    pub reconciled_key_sender: Vec<u8>,
    pub reconciled_key_receiver: Vec<u8>,
    pub final_key_sender: Vec<u8>,
    pub final_key_receiver: Vec<u8>,
    /// Slots where both parties used the same basis and detection succeeded.
    pub matching_indices: Vec<usize>,
    /// Error indices within the sifted keys.
    pub error_positions: Vec<usize>,
    pub protocol_phases: Vec<ProtocolPhase>,
    /// Sender's raw bit string.
    pub sender_bits: Vec<u8>,
    /// Sender's bases as `+`/`x` symbols.
    pub sender_bases: Vec<char>,
    /// Receiver's bases per slot; `None` where detection failed.
    pub receiver_bases: Vec<Option<char>>,
    /// Receiver's measured bits per slot; `None` where detection failed.
    pub receiver_measurements: Vec<Option<u8>>,
    /// Per-slot detection events; `None` where the pulse never arrived.
    pub detection_info: Vec<Option<DetectionEvent>>,
    pub reconciliation_info: serde_json::Value,
    pub privacy_amplification_info: serde_json::Value,
    /// Present when the facade ran decoy-state analysis alongside the run.
    pub decoy_state_metadata: Option<serde_json::Value>,
    /// Present when decoy-state analysis produced a security assessment.
    pub security_metadata: Option<serde_json::Value>,
    /// Source/channel/detector snapshots at completion.
    pub system_statistics: serde_json::Value,
}

/// Sender side: prepares random (basis, bit) pairs and pushes the encoded
/// states through the source and fiber.
#[derive(Debug, Clone)]
pub struct Bb84Sender {
    num_qubits: usize,
    states: Vec<QubitState>,
    bases: Vec<Basis>,
    bits: Vec<u8>,
}

impl Bb84Sender {
    pub fn new(num_qubits: usize) -> Self {
        Self {
            num_qubits,
            states: Vec::new(),
            bases: Vec::new(),
            bits: Vec::new(),
        }
    }

    /// Draw fresh random bases and bits and build the preparation states.
    pub fn initialize(&mut self, rng: &mut SimulationRng) {
        self.states = Vec::with_capacity(self.num_qubits);
        self.bases = Vec::with_capacity(self.num_qubits);
        self.bits = Vec::with_capacity(self.num_qubits);
        for _ in 0..self.num_qubits {
            let basis = Basis::random(rng);
            let bit = rng.random_bit();
            self.states.push(QubitState::from_basis_state(basis, bit));
            self.bases.push(basis);
            self.bits.push(bit);
        }
    }

    /// Emit and transmit every prepared state. Lost pulses propagate as
    /// `None` so slot indices stay aligned across the whole run.
    pub fn transmit(
        &self,
        source: &PhotonSource,
        channel: &FiberChannel,
        rng: &mut SimulationRng,
    ) -> Vec<Option<QubitState>> {
        self.states
            .iter()
            .map(|state| {
                source
                    .emit(state, rng)
                    .and_then(|emitted| channel.transmit(&emitted, rng))
            })
            .collect()
    }

    /// Public basis announcement.
    pub fn announce_bases(&self) -> &[Basis] {
        &self.bases
    }

    pub fn raw_bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn bases_symbols(&self) -> Vec<char> {
        self.bases.iter().map(Basis::symbol).collect()
    }

    pub fn sifted_key(&self, matching_indices: &[usize]) -> Vec<u8> {
        matching_indices.iter().map(|&i| self.bits[i]).collect()
    }
}

/// Receiver side: random basis choice per slot, detection through the
/// imperfect detector, and the post-hoc corrections the detection flags
/// imply.
#[derive(Debug)]
pub struct Bb84Receiver {
    detector: SinglePhotonDetector,
    measurement_bases: Vec<Option<Basis>>,
    measurement_results: Vec<Option<u8>>,
    detection_events: Vec<Option<DetectionEvent>>,
}

impl Bb84Receiver {
    pub fn new(detector_config: DetectorConfig) -> Self {
        Self {
            detector: SinglePhotonDetector::new(detector_config),
            measurement_bases: Vec::new(),
            measurement_results: Vec::new(),
            detection_events: Vec::new(),
        }
    }

    pub fn detector(&self) -> &SinglePhotonDetector {
        &self.detector
    }

    /// Measure the incoming pulse train.
    ///
    /// Detection attempts tick a simulation clock at 1 µs per slot so
    /// dead-time effects and seeded reproducibility both hold. Flags on the
    /// detection event rewrite the measured bit: a dark count is a uniform
    /// bit, crosstalk flips, an afterpulse repeats the last real
    /// measurement, and a large timing excursion flips with 10% probability.
    pub fn receive(&mut self, transmitted: &[Option<QubitState>], rng: &mut SimulationRng) {
        self.measurement_bases = Vec::with_capacity(transmitted.len());
        self.measurement_results = Vec::with_capacity(transmitted.len());
        self.detection_events = Vec::with_capacity(transmitted.len());

        for (slot, maybe_qubit) in transmitted.iter().enumerate() {
            let now = slot as f64 * 1e-6;
            let Some(qubit) = maybe_qubit else {
                self.measurement_bases.push(None);
                self.measurement_results.push(None);
                self.detection_events.push(None);
                continue;
            };

            let basis = Basis::random(rng);
            let (detected, event) = self.detector.detect(Some(qubit), basis, now, rng);
            if !detected {
                self.measurement_bases.push(None);
                self.measurement_results.push(None);
                self.detection_events.push(Some(event));
                continue;
            }

            let (mut result, _) = qubit.measure(basis, rng);
            if event.dark_count {
                result = rng.random_bit();
            } else if event.crosstalk {
                result = 1 - result;
            } else if event.afterpulse {
                if let Some(last) = self
                    .measurement_results
                    .iter()
                    .rev()
                    .find_map(|r| r.as_ref())
                {
                    result = *last;
                }
            }
            if event.timing_jitter.abs() > 0.1 && rng.chance(0.1) {
                result = 1 - result;
            }

            self.measurement_bases.push(Some(basis));
            self.measurement_results.push(Some(result));
            self.detection_events.push(Some(event));
        }
    }

    /// Slots where the receiver measured in the sender's basis.
    pub fn matching_indices(&self, sender_bases: &[Basis]) -> Vec<usize> {
        sender_bases
            .iter()
            .zip(self.measurement_bases.iter())
            .enumerate()
            .filter_map(|(i, (sender, receiver))| (Some(*sender) == *receiver).then_some(i))
            .collect()
    }

    pub fn sifted_key(&self, matching_indices: &[usize]) -> Vec<u8> {
        matching_indices
            .iter()
            .filter_map(|&i| self.measurement_results[i])
            .collect()
    }

    pub fn bases_symbols(&self) -> Vec<Option<char>> {
        self.measurement_bases
            .iter()
            .map(|b| b.map(|basis| basis.symbol()))
            .collect()
    }

    pub fn measurements(&self) -> &[Option<u8>] {
        &self.measurement_results
    }

    pub fn detection_events(&self) -> &[Option<DetectionEvent>] {
        &self.detection_events
    }
}

/// Hardware configuration for one protocol run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bb84Config {
    pub num_qubits: usize,
    pub source: PhotonSourceConfig,
    pub channel: FiberChannelConfig,
    pub detector: DetectorConfig,
}

impl Default for Bb84Config {
    fn default() -> Self {
        Self {
            num_qubits: 1000,
            source: PhotonSourceConfig::default(),
            channel: FiberChannelConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

/// Orchestrator for one full BB84 exchange.
pub struct Bb84Protocol {
    config: Bb84Config,
    source: PhotonSource,
    channel: FiberChannel,
    sender: Bb84Sender,
    receiver: Bb84Receiver,
    phases: Vec<ProtocolPhase>,
}

impl Bb84Protocol {
    pub fn new(config: Bb84Config) -> Self {
        Self {
            source: PhotonSource::new(config.source),
            channel: FiberChannel::new(config.channel),
            sender: Bb84Sender::new(config.num_qubits),
            receiver: Bb84Receiver::new(config.detector),
            phases: Vec::new(),
            config,
        }
    }

    /// Run the full phased exchange, optionally with an eavesdropper on the
    /// fiber.
    ///
    /// Empty intermediate results are not errors: a run whose sifted key is
    /// empty short-circuits to empty downstream keys with QBER zero.
    pub fn execute(
        &mut self,
        attack_type: AttackType,
        attack_params: &AttackParameters,
        rng: &mut SimulationRng,
    ) -> Result<(Bb84Result, Option<AttackRecord>)> {
        self.phases = vec![ProtocolPhase::Initialization];
        self.sender.initialize(rng);

        self.phases.push(ProtocolPhase::QuantumTransmission);
        let mut transmitted = self.sender.transmit(&self.source, &self.channel, rng);
        let attack_record = apply_attack(&mut transmitted, attack_type, attack_params, rng);

        self.receiver.receive(&transmitted, rng);

        self.phases.push(ProtocolPhase::BasisAnnouncement);
        let sender_bases = self.sender.announce_bases().to_vec();

        self.phases.push(ProtocolPhase::Sifting);
        let matching_indices = self.receiver.matching_indices(&sender_bases);
        let sifted_sender = self.sender.sifted_key(&matching_indices);
        let sifted_receiver = self.receiver.sifted_key(&matching_indices);

        self.phases.push(ProtocolPhase::ErrorEstimation);
        let error_positions: Vec<usize> = sifted_sender
            .iter()
            .zip(sifted_receiver.iter())
            .enumerate()
            .filter_map(|(i, (s, r))| (s != r).then_some(i))
            .collect();
        let sifted_qber = if sifted_sender.is_empty() {
            0.0
        } else {
            error_positions.len() as f64 / sifted_sender.len() as f64
        };
        let raw_qber = self.raw_disagreement();

        self.phases.push(ProtocolPhase::Reconciliation);
        let (reconciled_sender, reconciled_receiver, reconciliation_info) =
            builtin_reconciliation(&sifted_sender, &sifted_receiver, &error_positions, rng);

        self.phases.push(ProtocolPhase::PrivacyAmplification);
        let (final_sender, final_receiver, privacy_info) =
            builtin_privacy_amplification(&reconciled_sender, &reconciled_receiver);

        let qber = calculate_qber(&final_sender, &final_receiver)?;

        self.phases.push(ProtocolPhase::Completed);
        log_info(
            LogCategory::Protocol,
            &format!(
                "run complete: {} raw, {} sifted, {} final, sifted QBER {:.4}",
                self.config.num_qubits,
                sifted_sender.len(),
                final_sender.len(),
                sifted_qber
            ),
        );

        let result = Bb84Result {
            raw_key_length: self.config.num_qubits,
            sifted_key_length: sifted_sender.len(),
            final_key_length: final_sender.len(),
            qber,
            raw_qber,
            sifted_qber,
            sifted_key_sender: sifted_sender,
            sifted_key_receiver: sifted_receiver,
            reconciled_key_sender: reconciled_sender,
            reconciled_key_receiver: reconciled_receiver,
            final_key_sender: final_sender,
            final_key_receiver: final_receiver,
            matching_indices,
            error_positions,
            protocol_phases: self.phases.clone(),
            sender_bits: self.sender.raw_bits().to_vec(),
            sender_bases: self.sender.bases_symbols(),
            receiver_bases: self.receiver.bases_symbols(),
            receiver_measurements: self.receiver.measurements().to_vec(),
            detection_info: self.receiver.detection_events().to_vec(),
            reconciliation_info,
            privacy_amplification_info: privacy_info,
            decoy_state_metadata: None,
            security_metadata: None,
            system_statistics: self.system_statistics(),
        };
        Ok((result, attack_record))
    }

    /// Disagreement across every detected slot, whether or not the bases
    /// matched. Diagnostic only; hovers near 25% on a clean channel.
    fn raw_disagreement(&self) -> f64 {
        let mut compared = 0usize;
        let mut disagreements = 0usize;
        for (bit, measured) in self
            .sender
            .raw_bits()
            .iter()
            .zip(self.receiver.measurements().iter())
        {
            if let Some(m) = measured {
                compared += 1;
                if m != bit {
                    disagreements += 1;
                }
            }
        }
        if compared == 0 {
            0.0
        } else {
            disagreements as f64 / compared as f64
        }
    }

    fn system_statistics(&self) -> serde_json::Value {
        json!({
            "photon_source": self.source.statistics(),
            "quantum_channel": self.channel.statistics(),
            "quantum_detector": self.receiver.detector().statistics(),
            "protocol_parameters": {
                "num_qubits": self.config.num_qubits,
                "channel_length_km": self.config.channel.length_km,
                "channel_attenuation": self.config.channel.attenuation_db_per_km,
                "channel_depolarization": self.config.channel.depolarization_rate,
                "detector_efficiency": self.config.detector.efficiency,
            },
        })
    }
}

/// Built-in reconciliation: correct a bounded fraction (0.6) of the known
/// error positions, chosen uniformly. Stands in for a public-channel
/// error-correction conversation when the advanced stages are disabled.
fn builtin_reconciliation(
    sifted_sender: &[u8],
    sifted_receiver: &[u8],
    error_positions: &[usize],
    rng: &mut SimulationRng,
) -> (Vec<u8>, Vec<u8>, serde_json::Value) {
    const RECONCILIATION_EFFICIENCY: f64 = 0.6;

    let reconciled_sender = sifted_sender.to_vec();
    let mut reconciled_receiver = sifted_receiver.to_vec();

    let num_to_correct = (error_positions.len() as f64 * RECONCILIATION_EFFICIENCY) as usize;
    let mut shuffled = error_positions.to_vec();
    rng.shuffle(&mut shuffled);
    let corrected: Vec<usize> = shuffled.into_iter().take(num_to_correct).collect();
    for &pos in &corrected {
        reconciled_receiver[pos] = reconciled_sender[pos];
    }
    let uncorrected: Vec<usize> = error_positions
        .iter()
        .copied()
        .filter(|p| !corrected.contains(p))
        .collect();

    let info = json!({
        "reconciliation_method": "bounded_error_correction",
        "efficiency": RECONCILIATION_EFFICIENCY,
        "corrected_positions": corrected,
        "uncorrected_errors": uncorrected,
    });
    (reconciled_sender, reconciled_receiver, info)
}

/// Built-in privacy amplification: truncate to ~98% (80% for very short
/// keys). The advanced Toeplitz/universal stages replace this when enabled.
fn builtin_privacy_amplification(
    reconciled_sender: &[u8],
    reconciled_receiver: &[u8],
) -> (Vec<u8>, Vec<u8>, serde_json::Value) {
    let key_length = reconciled_sender.len();
    let final_length = if key_length == 0 {
        0
    } else if key_length < 10 {
        ((key_length as f64 * 0.8) as usize).max(1)
    } else {
        ((key_length as f64 * 0.98) as usize).max(1)
    };

    let final_sender = reconciled_sender[..final_length.min(key_length)].to_vec();
    let final_receiver = reconciled_receiver[..final_length.min(key_length)].to_vec();
    let info = json!({
        "amplification_method": "adaptive_compression",
        "original_length": key_length,
        "final_length": final_sender.len(),
        "compression_ratio": if key_length > 0 {
            final_sender.len() as f64 / key_length as f64
        } else {
            0.0
        },
    });
    (final_sender, final_receiver, info)
}
