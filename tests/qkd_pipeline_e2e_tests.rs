//! End-to-end pipeline scenarios: clean-channel key generation,
//! intercept-resend detection, QBER-floor convergence, detector precision,
//! shared-key provisioning, sweeps, cache TTL and result export.

use std::collections::BTreeMap;

use qkd_pipeline::attacks::{AttackParameters, AttackType, SuspectedAttack};
use qkd_pipeline::{QkdSimulator, SimulationParameters};

/// The literal "clean channel" scenario parameters.
fn clean_channel_params(seed: u64) -> SimulationParameters {
    SimulationParameters {
        num_qubits: 1000,
        channel_length_km: 1.0,
        channel_attenuation: 0.05,
        channel_depolarization: 0.0,
        photon_source_efficiency: 0.95,
        detector_efficiency: 0.95,
        attack_type: AttackType::NoAttack,
        rng_seed: Some(seed),
        ..Default::default()
    }
}

/// The literal "intercept-resend" scenario parameters.
fn intercept_resend_params(seed: u64) -> SimulationParameters {
    SimulationParameters {
        num_qubits: 2000,
        channel_length_km: 10.0,
        channel_attenuation: 0.2,
        attack_type: AttackType::InterceptResend,
        attack_parameters: AttackParameters {
            strength: 1.0,
            ..Default::default()
        },
        rng_seed: Some(seed),
        ..Default::default()
    }
}

#[test]
fn e2e_clean_channel_produces_a_usable_key() {
    println!("🧪 E2E-1: clean channel key generation");
    let simulator = QkdSimulator::new();

    let runs = 5;
    let mut total_sifted = 0usize;
    let mut total_errors = 0.0;
    for seed in 0..runs {
        let result = simulator
            .run_simulation(&clean_channel_params(1001 + seed), None)
            .unwrap();
        println!(
            "   sifted {} bits, QBER {:.4}, final {} bits",
            result.bb84.sifted_key_length, result.bb84.sifted_qber, result.bb84.final_key_length
        );
        total_sifted += result.bb84.sifted_key_length;
        total_errors += result.bb84.sifted_qber * result.bb84.sifted_key_length as f64;

        assert!(
            result.bb84.final_key_length > 200,
            "final key too short: {}",
            result.bb84.final_key_length
        );
        let detection = result.attack_detection.as_ref().unwrap();
        assert!(!detection.attack_detected, "clean run flagged an attack");

        // Both parties agree on the final key after reconciliation
        assert_eq!(result.bb84.final_key_sender, result.bb84.final_key_receiver);
        assert_eq!(result.bb84.qber, 0.0);
    }

    let mean_qber = total_errors / total_sifted as f64;
    println!("   mean sifted QBER: {mean_qber:.4}");
    assert!(
        mean_qber < 0.02,
        "clean channel QBER too high: {mean_qber}"
    );
    println!("✅ clean channel scenario passed");
}

#[test]
fn e2e_intercept_resend_is_detected_and_classified() {
    println!("🧪 E2E-2: full-strength intercept-resend attack");
    let simulator = QkdSimulator::new();

    let runs = 8;
    let mut total_sifted = 0usize;
    let mut total_errors = 0.0;
    for seed in 0..runs {
        let result = simulator
            .run_simulation(&intercept_resend_params(2000 + seed), None)
            .unwrap();
        total_sifted += result.bb84.sifted_key_length;
        total_errors += result.bb84.sifted_qber * result.bb84.sifted_key_length as f64;

        let detection = result.attack_detection.as_ref().unwrap();
        assert!(detection.attack_detected, "attack went undetected");
        assert_eq!(
            detection.attack_type,
            Some(SuspectedAttack::InterceptResend),
            "misclassified attack: {:?}",
            detection.attack_type
        );
        assert!(detection.confidence > 0.0);

        let attack = result.attack_result.as_ref().unwrap();
        assert!(attack.qubits_intercepted > 0);
        assert!(!attack.eavesdropped_bits.is_empty());
    }

    let mean_qber = total_errors / total_sifted as f64;
    println!("   mean sifted QBER over {runs} runs: {mean_qber:.4} ({total_sifted} bits)");
    assert!(
        (0.22..=0.28).contains(&mean_qber),
        "intercept-resend QBER outside the expected band: {mean_qber}"
    );
    println!("✅ intercept-resend scenario passed");
}

#[test]
fn qber_floor_converges_to_one_quarter() {
    println!("🧪 Intercept-resend QBER floor over ≥100k sifted bits");
    let simulator = QkdSimulator::new();

    // Perfect channel, all noise terms off, Eve at full strength
    let mut total_sifted = 0usize;
    let mut total_errors = 0.0;
    let mut seed = 0u64;
    while total_sifted < 100_000 {
        let params = SimulationParameters {
            num_qubits: 10_000,
            channel_length_km: 0.1,
            channel_attenuation: 0.05,
            channel_depolarization: 0.0,
            photon_source_efficiency: 0.95,
            detector_efficiency: 0.95,
            detector_dark_count_rate: 0.0,
            detector_timing_jitter_ns: 0.0,
            detector_afterpulse_probability: 0.0,
            detector_crosstalk_probability: 0.0,
            source_timing_jitter: 0.0,
            source_wavelength_stability: 1.0,
            chromatic_dispersion: 0.0,
            polarization_mode_dispersion: 0.0,
            nonlinear_coefficient: 0.0,
            attack_type: AttackType::InterceptResend,
            attack_parameters: AttackParameters {
                strength: 1.0,
                resend_error: 0.0,
                ..Default::default()
            },
            use_advanced_reconciliation: false,
            use_advanced_privacy_amplification: false,
            rng_seed: Some(31_000 + seed),
            ..Default::default()
        };
        let result = simulator.run_simulation(&params, None).unwrap();
        total_sifted += result.bb84.sifted_key_length;
        total_errors += result.bb84.sifted_qber * result.bb84.sifted_key_length as f64;
        seed += 1;
    }

    let qber = total_errors / total_sifted as f64;
    println!("   {total_sifted} sifted bits, QBER {qber:.4}");
    assert!(
        (qber - 0.25).abs() < 0.02,
        "QBER floor did not converge to 0.25: {qber}"
    );
    println!("✅ QBER floor convergence passed");
}

#[test]
fn clean_runs_never_raise_false_alarms() {
    println!("🧪 Attack-detector precision on clean runs");
    let simulator = QkdSimulator::new();
    let mut false_alarms = 0u32;
    let runs: u64 = 20;
    for seed in 0..runs {
        let result = simulator
            .run_simulation(&clean_channel_params(4000 + seed), None)
            .unwrap();
        assert!(result.bb84.sifted_qber <= 0.05, "clean run unexpectedly noisy");
        if result.attack_detection.as_ref().unwrap().attack_detected {
            false_alarms += 1;
        }
    }
    println!("   {false_alarms}/{runs} false alarms");
    assert!(
        f64::from(false_alarms) / runs as f64 <= 0.05,
        "false alarm rate above 5%: {false_alarms}/{runs}"
    );
    println!("✅ detector precision passed");
}

#[test]
fn e2e_shared_key_symmetry() {
    println!("🧪 E2E-5: shared key provisioning for alice and bob");
    let simulator = QkdSimulator::new();
    simulator.generate_shared_key("alice", "bob", 256).unwrap();

    let alice = simulator.get_user_quantum_key("alice").unwrap();
    let bob = simulator.get_user_quantum_key("bob").unwrap();

    assert_eq!(alice.key_bits.len(), 256);
    assert_eq!(alice.key_bits, bob.key_bits, "shared key bits must match");
    assert!(alice.is_shared && bob.is_shared);
    assert_eq!(alice.shared_with.as_deref(), Some("bob"));
    assert_eq!(bob.shared_with.as_deref(), Some("alice"));
    assert_eq!(alice.simulation_id, bob.simulation_id);
    println!("✅ shared key symmetry passed");
}

#[test]
fn key_cache_honors_its_ttl() {
    println!("🧪 Key cache TTL eviction");
    let simulator = QkdSimulator::new().with_key_ttl(chrono::Duration::milliseconds(300));
    simulator.generate_key_for_user("dora", 64).unwrap();
    assert!(simulator.get_user_quantum_key("dora").is_some());

    std::thread::sleep(std::time::Duration::from_millis(400));
    assert!(
        simulator.get_user_quantum_key("dora").is_none(),
        "expired key was served"
    );
    // The expired entry is gone, not just hidden
    assert_eq!(simulator.key_cache_statistics()["total_users"], 0);
    println!("✅ TTL eviction passed");
}

#[test]
fn parameter_sweep_runs_every_combination() {
    println!("🧪 Parameter sweep over length × detector efficiency");
    let simulator = QkdSimulator::new();
    let base = SimulationParameters {
        num_qubits: 300,
        rng_seed: Some(77),
        ..Default::default()
    };
    let mut sweep = BTreeMap::new();
    sweep.insert(
        "channel_length_km".to_string(),
        vec![
            serde_json::json!(1.0),
            serde_json::json!(25.0),
            serde_json::json!(50.0),
        ],
    );
    sweep.insert(
        "detector_efficiency".to_string(),
        vec![serde_json::json!(0.4), serde_json::json!(0.9)],
    );

    let results = simulator.run_parameter_sweep(&base, &sweep).unwrap();
    assert_eq!(results.len(), 6);

    // Longer fiber loses more pulses: sifting efficiency decays with length
    let short_runs: f64 = results
        .iter()
        .filter(|r| r.parameters.channel_length_km == 1.0)
        .map(|r| r.performance_metrics.sifting_efficiency)
        .sum();
    let long_runs: f64 = results
        .iter()
        .filter(|r| r.parameters.channel_length_km == 50.0)
        .map(|r| r.performance_metrics.sifting_efficiency)
        .sum();
    println!("   sifting efficiency: short {short_runs:.3} vs long {long_runs:.3}");
    assert!(short_runs > long_runs);
    println!("✅ parameter sweep passed");
}

#[test]
fn results_export_as_self_contained_json() {
    println!("🧪 Result export round-trip");
    let simulator = QkdSimulator::new();
    let result = simulator
        .run_simulation(&clean_channel_params(9), Some("export_me".into()))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simulation.json");
    simulator.export_results("export_me", &path).unwrap();

    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(document["simulation_id"], "export_me");
    assert_eq!(
        document["bb84"]["final_key_length"].as_u64().unwrap() as usize,
        result.bb84.final_key_length
    );
    assert!(document["timestamp"].is_string());
    assert!(document["parameters"]["num_qubits"].is_u64());
    assert!(document["performance_metrics"]["security_level"].is_f64());
    // The phase trail is part of the exported record
    assert_eq!(
        document["bb84"]["protocol_phases"]
            .as_array()
            .unwrap()
            .last()
            .unwrap(),
        "completed"
    );

    // Unknown ids fail cleanly
    assert!(simulator.export_results("nope", &path).is_err());
    println!("✅ export round-trip passed");
}

#[test]
fn no_noise_no_attack_yields_exactly_zero_qber() {
    println!("🧪 Zero-noise invariant");
    let simulator = QkdSimulator::new();
    let params = SimulationParameters {
        num_qubits: 2000,
        channel_length_km: 0.1,
        channel_attenuation: 0.05,
        channel_depolarization: 0.0,
        photon_source_efficiency: 0.95,
        detector_efficiency: 0.95,
        detector_dark_count_rate: 0.0,
        detector_timing_jitter_ns: 0.0,
        detector_afterpulse_probability: 0.0,
        detector_crosstalk_probability: 0.0,
        source_timing_jitter: 0.0,
        source_wavelength_stability: 1.0,
        chromatic_dispersion: 0.0,
        polarization_mode_dispersion: 0.0,
        nonlinear_coefficient: 0.0,
        attack_type: AttackType::NoAttack,
        rng_seed: Some(55),
        ..Default::default()
    };
    let result = simulator.run_simulation(&params, None).unwrap();
    assert!(result.bb84.sifted_key_length > 500);
    assert_eq!(result.bb84.sifted_qber, 0.0, "zero-noise run produced errors");
    assert!(result.bb84.error_positions.is_empty());
    println!(
        "✅ zero-noise invariant passed ({} sifted bits, QBER 0)",
        result.bb84.sifted_key_length
    );
}
