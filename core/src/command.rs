//! Registration commands, idempotency keys and the queue wire format.
//!
//! A command is immutable once enqueued. Its idempotency key is derived
//! deterministically so a redelivered copy carries the same key as the
//! original and can be recognized by the processor.
//!
//! # Wire format
//!
//! Commands travel as one flat record (`event_id`, `user_id`, `kind`,
//! `idempotency_key`, `submitted_at`) encoded with `bincode`.

use crate::error::RegistrationError;
use crate::queue::QueueError;
use crate::types::{CommandKind, EventId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Maximum length of a caller-supplied nonce.
pub const MAX_NONCE_LEN: usize = 128;

/// Identifier used to detect redelivered copies of the same command.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive a key from the command identity and its submission time bucket.
    ///
    /// Two submissions of the same kind by the same user for the same event
    /// inside one bucket share a key.
    #[must_use]
    pub fn derive(
        event_id: &EventId,
        user_id: &UserId,
        kind: CommandKind,
        submitted_at: DateTime<Utc>,
        bucket: Duration,
    ) -> Self {
        let width = i64::try_from(bucket.as_millis()).unwrap_or(i64::MAX).max(1);
        let bucket_index = submitted_at.timestamp_millis().div_euclid(width);
        Self(format!("{event_id}:{user_id}:{kind}:b{bucket_index}"))
    }

    /// Build a key from a caller-supplied nonce.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Validation`] if the nonce is empty or
    /// longer than [`MAX_NONCE_LEN`].
    pub fn from_nonce(
        event_id: &EventId,
        user_id: &UserId,
        kind: CommandKind,
        nonce: &str,
    ) -> Result<Self, RegistrationError> {
        let nonce = nonce.trim();
        if nonce.is_empty() || nonce.len() > MAX_NONCE_LEN {
            return Err(RegistrationError::Validation(format!(
                "Idempotency key must be between 1 and {MAX_NONCE_LEN} characters"
            )));
        }
        Ok(Self(format!("{event_id}:{user_id}:{kind}:n{nonce}")))
    }

    /// Wrap a key read back from storage.
    #[must_use]
    pub const fn from_stored(key: String) -> Self {
        Self(key)
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A register or unregister request waiting in (or delivered by) the queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationCommand {
    /// Event ID (session key)
    pub event_id: EventId,
    /// User ID
    pub user_id: UserId,
    /// Register or unregister
    pub kind: CommandKind,
    /// Key used to detect redelivery
    pub idempotency_key: IdempotencyKey,
    /// When the submitter accepted the request
    pub submitted_at: DateTime<Utc>,
}

impl RegistrationCommand {
    /// Create a command with an explicit idempotency key.
    #[must_use]
    pub const fn new(
        event_id: EventId,
        user_id: UserId,
        kind: CommandKind,
        idempotency_key: IdempotencyKey,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            user_id,
            kind,
            idempotency_key,
            submitted_at,
        }
    }

    /// Create a command whose key is derived from its submission bucket.
    #[must_use]
    pub fn derived(
        event_id: EventId,
        user_id: UserId,
        kind: CommandKind,
        submitted_at: DateTime<Utc>,
        bucket: Duration,
    ) -> Self {
        let idempotency_key =
            IdempotencyKey::derive(&event_id, &user_id, kind, submitted_at, bucket);
        Self::new(event_id, user_id, kind, idempotency_key, submitted_at)
    }

    /// Queue session key: all commands of one event share it.
    #[must_use]
    pub fn session_key(&self) -> String {
        self.event_id.to_string()
    }

    /// Encode into the queue wire format.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        bincode::serialize(self)
            .map_err(|e| QueueError::Codec(format!("Failed to encode command: {e}")))
    }

    /// Decode from the queue wire format.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Codec`] if the payload is not a command.
    pub fn decode(payload: &[u8]) -> Result<Self, QueueError> {
        bincode::deserialize(payload)
            .map_err(|e| QueueError::Codec(format!("Failed to decode command: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn same_bucket_yields_same_key() {
        let event = EventId::new();
        let user = UserId::new("u1").unwrap();
        let bucket = Duration::from_secs(60);

        let a = IdempotencyKey::derive(&event, &user, CommandKind::Register, at(120), bucket);
        let b = IdempotencyKey::derive(&event, &user, CommandKind::Register, at(179), bucket);
        let c = IdempotencyKey::derive(&event, &user, CommandKind::Register, at(180), bucket);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn kind_is_part_of_the_key() {
        let event = EventId::new();
        let user = UserId::new("u1").unwrap();
        let bucket = Duration::from_secs(60);

        let register = IdempotencyKey::derive(&event, &user, CommandKind::Register, at(0), bucket);
        let unregister =
            IdempotencyKey::derive(&event, &user, CommandKind::Unregister, at(0), bucket);

        assert_ne!(register, unregister);
    }

    #[test]
    fn nonce_must_be_reasonable() {
        let event = EventId::new();
        let user = UserId::new("u1").unwrap();

        assert!(IdempotencyKey::from_nonce(&event, &user, CommandKind::Register, "").is_err());
        assert!(
            IdempotencyKey::from_nonce(
                &event,
                &user,
                CommandKind::Register,
                &"n".repeat(MAX_NONCE_LEN + 1)
            )
            .is_err()
        );

        let key =
            IdempotencyKey::from_nonce(&event, &user, CommandKind::Register, "retry-1").unwrap();
        assert!(key.as_str().ends_with(":nretry-1"));
    }

    #[test]
    fn wire_format_preserves_every_field() {
        let command = RegistrationCommand::derived(
            EventId::new(),
            UserId::new("u42").unwrap(),
            CommandKind::Unregister,
            at(1_700_000_000),
            Duration::from_secs(60),
        );

        let decoded = RegistrationCommand::decode(&command.encode().unwrap()).unwrap();
        assert_eq!(decoded, command);
        assert_eq!(decoded.session_key(), command.event_id.to_string());
    }

    #[test]
    fn garbage_payload_is_a_codec_error() {
        assert!(matches!(
            RegistrationCommand::decode(&[0xff, 0x01]),
            Err(QueueError::Codec(_))
        ));
    }
}
