//! Secure user-to-user messaging over cached quantum keys.
//!
//! The service ties user identities to the simulator's per-user key cache:
//! sending ensures both parties hold a fresh key, negotiates a shared key
//! when they do not already share one, and encrypts the message body with
//! the AES integration layer. Receiving enforces that only the addressed
//! user can decrypt, and walks the message status from `sent` through
//! `delivered` to `read`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::aes_integration::{bits_to_bytes, key_fingerprint, AesMode, QkdKeyCipher};
use crate::logging::{log_info, LogCategory};
use crate::simulator::QkdSimulator;
use crate::{Result, SimulatorError};

/// Delivery status of a secure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

/// One stored secure message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureMessage {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub plaintext: String,
    /// Base64 ciphertext blob in the AES integration layout.
    pub ciphertext_blob: String,
    /// AES mode the blob was produced under.
    pub mode: AesMode,
    pub timestamp: DateTime<Utc>,
    /// Fingerprint of the quantum key material used.
    pub key_digest: String,
    pub status: MessageStatus,
    pub security_metrics: serde_json::Value,
}

/// Listing entry for a user's mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub preview: String,
}

/// Decrypted message as handed to the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub message_id: String,
    pub sender_id: String,
    pub plaintext: String,
    pub timestamp: DateTime<Utc>,
    pub security_metrics: serde_json::Value,
}

/// Mailbox filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFilter {
    Sent,
    Received,
    All,
}

/// Messaging service bound to a simulator's key cache.
pub struct SecureMessagingService {
    simulator: Arc<QkdSimulator>,
    messages: DashMap<String, SecureMessage>,
    sent_counter: AtomicU64,
}

impl SecureMessagingService {
    pub fn new(simulator: Arc<QkdSimulator>) -> Self {
        Self {
            simulator,
            messages: DashMap::new(),
            sent_counter: AtomicU64::new(0),
        }
    }

    /// Encrypt and store a message from `sender_id` to `receiver_id`.
    ///
    /// Both parties end up holding the same quantum key: existing shared
    /// keys are reused, anything else triggers a shared-key generation of
    /// `key_length` bits. The body is encrypted with AES-256 in `mode`.
    pub fn send_secure_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        plaintext: &str,
        mode: AesMode,
        key_length: usize,
    ) -> Result<SecureMessage> {
        let quantum_key = self.negotiate_key(sender_id, receiver_id, key_length)?;

        let cipher = QkdKeyCipher::new(mode, 256)?;
        let blob = cipher.encrypt(plaintext, &quantum_key)?;

        self.sent_counter.fetch_add(1, Ordering::Relaxed);
        let message = SecureMessage {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            plaintext: plaintext.to_string(),
            ciphertext_blob: blob,
            mode,
            timestamp: Utc::now(),
            key_digest: key_fingerprint(&bits_to_bytes(&quantum_key)),
            status: MessageStatus::Sent,
            security_metrics: cipher.security_metrics(&quantum_key),
        };
        self.messages
            .insert(message.message_id.clone(), message.clone());
        log_info(
            LogCategory::Messaging,
            &format!(
                "message {} sent {sender_id} -> {receiver_id} ({} bytes)",
                message.message_id,
                plaintext.len()
            ),
        );
        Ok(message)
    }

    /// Ensure both parties hold a usable key and return the shared bits.
    fn negotiate_key(
        &self,
        sender_id: &str,
        receiver_id: &str,
        key_length: usize,
    ) -> Result<Vec<u8>> {
        let sender_key = match self.simulator.get_user_quantum_key(sender_id) {
            Some(key) => key,
            None => self.simulator.generate_key_for_user(sender_id, key_length)?,
        };
        let receiver_key = match self.simulator.get_user_quantum_key(receiver_id) {
            Some(key) => key,
            None => self
                .simulator
                .generate_key_for_user(receiver_id, key_length)?,
        };

        if sender_key.is_shared && sender_key.shared_with.as_deref() == Some(receiver_id) {
            return Ok(sender_key.key_bits);
        }
        if receiver_key.is_shared && receiver_key.shared_with.as_deref() == Some(sender_id) {
            return Ok(receiver_key.key_bits);
        }

        // No usable shared key on either side: provision one for both
        let shared = self
            .simulator
            .generate_shared_key(sender_id, receiver_id, key_length)?;
        Ok(shared.key_bits)
    }

    /// Decrypt a message for its addressed receiver and mark it delivered.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::MessageNotFound`] for unknown ids,
    /// [`SimulatorError::UnauthorizedAccess`] when `receiver_id` is not the
    /// addressee, [`SimulatorError::KeyUnavailable`] when the receiver's
    /// cached key expired, and [`SimulatorError::DecryptFailed`] when the
    /// blob does not authenticate.
    pub fn receive_secure_message(
        &self,
        receiver_id: &str,
        message_id: &str,
    ) -> Result<DeliveredMessage> {
        let mut entry = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| SimulatorError::MessageNotFound(message_id.to_string()))?;
        if entry.receiver_id != receiver_id {
            return Err(SimulatorError::UnauthorizedAccess);
        }

        let receiver_key = self
            .simulator
            .get_user_quantum_key(receiver_id)
            .ok_or_else(|| SimulatorError::KeyUnavailable(receiver_id.to_string()))?;

        let cipher = QkdKeyCipher::new(entry.mode, 256)?;
        let plaintext = cipher.decrypt(&entry.ciphertext_blob, &receiver_key.key_bits)?;
        entry.status = MessageStatus::Delivered;

        Ok(DeliveredMessage {
            message_id: entry.message_id.clone(),
            sender_id: entry.sender_id.clone(),
            plaintext,
            timestamp: entry.timestamp,
            security_metrics: entry.security_metrics.clone(),
        })
    }

    /// Mark a delivered message as read by its receiver.
    pub fn mark_read(&self, receiver_id: &str, message_id: &str) -> Result<()> {
        let mut entry = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| SimulatorError::MessageNotFound(message_id.to_string()))?;
        if entry.receiver_id != receiver_id {
            return Err(SimulatorError::UnauthorizedAccess);
        }
        entry.status = MessageStatus::Read;
        Ok(())
    }

    /// Mailbox listing, newest first.
    pub fn get_user_messages(&self, user_id: &str, filter: MessageFilter) -> Vec<MessageSummary> {
        let mut summaries: Vec<MessageSummary> = self
            .messages
            .iter()
            .filter(|m| match filter {
                MessageFilter::Sent => m.sender_id == user_id,
                MessageFilter::Received => m.receiver_id == user_id,
                MessageFilter::All => m.sender_id == user_id || m.receiver_id == user_id,
            })
            .map(|m| MessageSummary {
                message_id: m.message_id.clone(),
                sender_id: m.sender_id.clone(),
                receiver_id: m.receiver_id.clone(),
                timestamp: m.timestamp,
                status: m.status,
                preview: if m.plaintext.len() > 50 {
                    format!("{}...", &m.plaintext[..50])
                } else {
                    m.plaintext.clone()
                },
            })
            .collect();
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        summaries
    }

    /// Details for one message, visible only to its two parties.
    pub fn get_message_details(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Option<serde_json::Value> {
        let message = self.messages.get(message_id)?;
        if message.sender_id != user_id && message.receiver_id != user_id {
            return None;
        }
        Some(json!({
            "message_id": message.message_id,
            "sender_id": message.sender_id,
            "receiver_id": message.receiver_id,
            "timestamp": message.timestamp.to_rfc3339(),
            "status": message.status,
            "mode": message.mode.to_string(),
            "key_digest": message.key_digest,
            "security_metrics": message.security_metrics,
        }))
    }

    /// Service-level statistics.
    pub fn statistics(&self) -> serde_json::Value {
        let total = self.messages.len();
        let delivered = self
            .messages
            .iter()
            .filter(|m| m.status != MessageStatus::Sent)
            .count();
        let mut users: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut total_len = 0usize;
        for m in self.messages.iter() {
            users.insert(m.sender_id.clone());
            users.insert(m.receiver_id.clone());
            total_len += m.plaintext.len();
        }
        json!({
            "total_messages": total,
            "messages_sent": self.sent_counter.load(Ordering::Relaxed),
            "delivered_messages": delivered,
            "average_message_length": if total > 0 { total_len as f64 / total as f64 } else { 0.0 },
            "active_users": users.len(),
        })
    }

    /// Drop messages older than `max_age_hours`; returns how many went.
    pub fn clear_expired_messages(&self, max_age_hours: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
        let before = self.messages.len();
        self.messages.retain(|_, m| m.timestamp >= cutoff);
        before - self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SecureMessagingService {
        SecureMessagingService::new(Arc::new(QkdSimulator::new()))
    }

    #[test]
    fn send_and_receive_round_trip() {
        let service = service();
        let sent = service
            .send_secure_message("alice", "bob", "quantum hello", AesMode::Gcm, 64)
            .unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(!sent.ciphertext_blob.is_empty());
        assert_ne!(sent.ciphertext_blob, "quantum hello");

        let delivered = service
            .receive_secure_message("bob", &sent.message_id)
            .unwrap();
        assert_eq!(delivered.plaintext, "quantum hello");
        assert_eq!(delivered.sender_id, "alice");

        let details = service
            .get_message_details(&sent.message_id, "bob")
            .unwrap();
        assert_eq!(details["status"], json!("delivered"));
    }

    #[test]
    fn only_the_addressee_may_receive() {
        let service = service();
        let sent = service
            .send_secure_message("alice", "bob", "for bob only", AesMode::Gcm, 64)
            .unwrap();
        let intruder = service.receive_secure_message("mallory", &sent.message_id);
        assert!(matches!(intruder, Err(SimulatorError::UnauthorizedAccess)));
        // Bob still receives fine afterwards
        assert!(service.receive_secure_message("bob", &sent.message_id).is_ok());
    }

    #[test]
    fn unknown_messages_are_reported() {
        let service = service();
        assert!(matches!(
            service.receive_secure_message("bob", "msg_missing"),
            Err(SimulatorError::MessageNotFound(_))
        ));
    }

    #[test]
    fn sending_provisions_a_shared_key() {
        let service = service();
        service
            .send_secure_message("alice", "bob", "hi", AesMode::Ctr, 64)
            .unwrap();
        let alice = service.simulator.get_user_quantum_key("alice").unwrap();
        let bob = service.simulator.get_user_quantum_key("bob").unwrap();
        assert!(alice.is_shared && bob.is_shared);
        assert_eq!(alice.key_bits, bob.key_bits);
    }

    #[test]
    fn status_walks_sent_delivered_read() {
        let service = service();
        let sent = service
            .send_secure_message("alice", "bob", "lifecycle", AesMode::Cbc, 64)
            .unwrap();
        service.receive_secure_message("bob", &sent.message_id).unwrap();
        service.mark_read("bob", &sent.message_id).unwrap();
        let details = service
            .get_message_details(&sent.message_id, "alice")
            .unwrap();
        assert_eq!(details["status"], json!("read"));
    }

    #[test]
    fn mailbox_filters_by_direction() {
        let service = service();
        let a = service
            .send_secure_message("alice", "bob", "one", AesMode::Gcm, 64)
            .unwrap();
        let b = service
            .send_secure_message("bob", "alice", "two", AesMode::Gcm, 64)
            .unwrap();
        let sent = service.get_user_messages("alice", MessageFilter::Sent);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_id, a.message_id);
        let received = service.get_user_messages("alice", MessageFilter::Received);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message_id, b.message_id);
        assert_eq!(service.get_user_messages("alice", MessageFilter::All).len(), 2);
        assert_eq!(service.statistics()["total_messages"], 2);
    }

    #[test]
    fn expiry_sweep_drops_old_messages() {
        let service = service();
        service
            .send_secure_message("alice", "bob", "fresh", AesMode::Gcm, 64)
            .unwrap();
        // Nothing is older than a day yet
        assert_eq!(service.clear_expired_messages(24), 0);
        // A zero-hour horizon clears everything sent before "now"
        assert_eq!(service.clear_expired_messages(-1), 1);
        assert_eq!(service.statistics()["total_messages"], 0);
    }
}
