//! AES consumption of simulated quantum keys and the secure-messaging
//! workflow built on top of the per-user key cache.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use qkd_pipeline::aes_integration::{AesMode, QkdKeyCipher};
use qkd_pipeline::attacks::AttackType;
use qkd_pipeline::secure_messaging::{MessageFilter, MessageStatus, SecureMessagingService};
use qkd_pipeline::{QkdSimulator, SimulationParameters, SimulatorError};

/// A clean-channel run that reliably yields a 256-bit final key.
fn generate_quantum_key(simulator: &QkdSimulator, seed: u64) -> Vec<u8> {
    let params = SimulationParameters {
        num_qubits: 1000,
        channel_length_km: 1.0,
        channel_attenuation: 0.05,
        channel_depolarization: 0.0,
        photon_source_efficiency: 0.95,
        detector_efficiency: 0.95,
        attack_type: AttackType::NoAttack,
        rng_seed: Some(seed),
        ..Default::default()
    };
    let result = simulator.run_simulation(&params, None).unwrap();
    assert!(
        result.bb84.final_key_length >= 256,
        "run produced only {} bits",
        result.bb84.final_key_length
    );
    result.bb84.final_key_sender[..256].to_vec()
}

#[test]
fn e2e_aes_gcm_round_trip_with_simulated_key() {
    println!("🧪 E2E-4: AES-GCM round trip keyed from a simulation");
    let simulator = QkdSimulator::new();
    let qkd_bits = generate_quantum_key(&simulator, 1234);

    let cipher = QkdKeyCipher::default();
    let blob = cipher.encrypt("hello QKD", &qkd_bits).unwrap();
    let plaintext = cipher.decrypt(&blob, &qkd_bits).unwrap();
    assert_eq!(plaintext, "hello QKD");
    println!("   round trip recovered the plaintext");

    // Flipping the last byte of the blob (inside the GCM tag) must fail
    let mut raw = BASE64.decode(&blob).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0xFF;
    let tampered = BASE64.encode(&raw);
    let outcome = cipher.decrypt(&tampered, &qkd_bits);
    assert!(
        matches!(outcome, Err(SimulatorError::DecryptFailed(_))),
        "tampered ciphertext decrypted"
    );
    println!("✅ AES-GCM round trip and tamper detection passed");
}

#[test]
fn every_mode_round_trips_simulated_keys() {
    println!("🧪 GCM/CBC/CTR round trips over quantum keys");
    let simulator = QkdSimulator::new();
    let qkd_bits = generate_quantum_key(&simulator, 5678);
    let message = "the quick quantum fox jumps over the classical dog";

    for mode in [AesMode::Gcm, AesMode::Cbc, AesMode::Ctr] {
        let cipher = QkdKeyCipher::new(mode, 256).unwrap();
        let blob = cipher.encrypt(message, &qkd_bits).unwrap();
        assert_eq!(cipher.decrypt(&blob, &qkd_bits).unwrap(), message);
        println!("   {mode} round trip ok");
    }
    println!("✅ all modes passed");
}

#[test]
fn each_encryption_salts_independently() {
    let simulator = QkdSimulator::new();
    let qkd_bits = generate_quantum_key(&simulator, 42);
    let cipher = QkdKeyCipher::default();
    let first = cipher.encrypt("same message", &qkd_bits).unwrap();
    let second = cipher.encrypt("same message", &qkd_bits).unwrap();
    // Fresh salt and nonce every call: blobs differ, both decrypt
    assert_ne!(first, second);
    assert_eq!(cipher.decrypt(&first, &qkd_bits).unwrap(), "same message");
    assert_eq!(cipher.decrypt(&second, &qkd_bits).unwrap(), "same message");
}

#[test]
fn messaging_workflow_between_two_users() {
    println!("🧪 Secure messaging workflow: alice and bob");
    let simulator = Arc::new(QkdSimulator::new());
    let service = SecureMessagingService::new(Arc::clone(&simulator));

    println!("💬 alice sends the first message");
    let sent = service
        .send_secure_message("alice", "bob", "meet at the interferometer", AesMode::Gcm, 128)
        .unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);
    assert_eq!(sent.security_metrics["aes_mode"], "GCM");

    println!("🔑 the send provisioned a shared quantum key");
    let alice_key = simulator.get_user_quantum_key("alice").unwrap();
    let bob_key = simulator.get_user_quantum_key("bob").unwrap();
    assert_eq!(alice_key.key_bits, bob_key.key_bits);
    assert!(alice_key.is_shared);

    println!("📬 bob receives and reads");
    let delivered = service
        .receive_secure_message("bob", &sent.message_id)
        .unwrap();
    assert_eq!(delivered.plaintext, "meet at the interferometer");
    service.mark_read("bob", &sent.message_id).unwrap();

    println!("↩️  bob replies over the same shared key");
    let reply = service
        .send_secure_message("bob", "alice", "bring the beamsplitter", AesMode::Gcm, 128)
        .unwrap();
    let reply_delivered = service
        .receive_secure_message("alice", &reply.message_id)
        .unwrap();
    assert_eq!(reply_delivered.plaintext, "bring the beamsplitter");

    let alice_all = service.get_user_messages("alice", MessageFilter::All);
    assert_eq!(alice_all.len(), 2);
    let stats = service.statistics();
    assert_eq!(stats["total_messages"], 2);
    assert_eq!(stats["active_users"], 2);
    println!("✅ messaging workflow passed");
}

#[test]
fn messaging_rejects_interlopers_and_unknown_ids() {
    let simulator = Arc::new(QkdSimulator::new());
    let service = SecureMessagingService::new(simulator);
    let sent = service
        .send_secure_message("alice", "bob", "private", AesMode::Gcm, 64)
        .unwrap();

    assert!(matches!(
        service.receive_secure_message("mallory", &sent.message_id),
        Err(SimulatorError::UnauthorizedAccess)
    ));
    assert!(matches!(
        service.receive_secure_message("bob", "msg_does_not_exist"),
        Err(SimulatorError::MessageNotFound(_))
    ));
    assert!(service
        .get_message_details(&sent.message_id, "mallory")
        .is_none());
}

#[test]
fn cached_key_round_trips_through_aes() {
    // Keys served from the cache are usable AES key material as-is
    let simulator = QkdSimulator::new();
    simulator.generate_key_for_user("erin", 128).unwrap();
    let key = simulator.get_user_quantum_key("erin").unwrap();
    let cipher = QkdKeyCipher::default();
    let blob = cipher.encrypt("cache-backed", &key.key_bits).unwrap();
    assert_eq!(cipher.decrypt(&blob, &key.key_bits).unwrap(), "cache-backed");
}
