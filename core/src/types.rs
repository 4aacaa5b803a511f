//! Domain types for event registration.
//!
//! Identifiers, registration status and the two stored records the coordinator
//! works with: an event's capacity and a user's registration row.

use crate::error::RegistrationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum accepted length of a user identifier.
pub const MAX_USER_ID_LEN: usize = 256;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event.
///
/// Also serves as the session key of the command queue: every command for
/// the same event lands in the same ordered session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| RegistrationError::Validation(format!("Invalid event ID: {s}")))
    }
}

/// Identifier of the user registering for an event.
///
/// Issued by the identity provider, so it is opaque text rather than a UUID.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a `UserId`, rejecting blank or oversized identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Validation`] if the identifier is empty
    /// after trimming or longer than [`MAX_USER_ID_LEN`].
    pub fn new(id: impl Into<String>) -> Result<Self, RegistrationError> {
        let id = id.into();
        let trimmed = id.trim();

        if trimmed.is_empty() {
            return Err(RegistrationError::Validation(
                "User ID must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_USER_ID_LEN {
            return Err(RegistrationError::Validation(format!(
                "User ID must be at most {MAX_USER_ID_LEN} characters"
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Get the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Enumerations
// ============================================================================

/// What a registration command asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Claim a spot
    Register,
    /// Give a spot back
    Unregister,
}

impl CommandKind {
    /// Stable lowercase name (used in idempotency keys, metrics and storage).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Unregister => "unregister",
        }
    }

    /// Parse from the stable lowercase name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Validation`] for unknown names.
    pub fn parse(s: &str) -> Result<Self, RegistrationError> {
        match s {
            "register" => Ok(Self::Register),
            "unregister" => Ok(Self::Unregister),
            _ => Err(RegistrationError::Validation(format!(
                "Unknown command kind: {s}"
            ))),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration status of a user for an event.
///
/// Stored rows are only ever `Unregistered` or `Registered`. `Pending` is a
/// read-side status reported while a submitted command has not been applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Not holding a spot
    #[default]
    Unregistered,
    /// A submitted command has not been applied yet
    Pending,
    /// Holding a spot, counted in the event's registered count
    Registered,
}

impl RegistrationStatus {
    /// Convert status to storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unregistered => "Unregistered",
            Self::Pending => "Pending",
            Self::Registered => "Registered",
        }
    }

    /// Parse status from storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Validation`] if the string doesn't match a
    /// known status.
    pub fn parse(s: &str) -> Result<Self, RegistrationError> {
        match s {
            "Unregistered" => Ok(Self::Unregistered),
            "Pending" => Ok(Self::Pending),
            "Registered" => Ok(Self::Registered),
            _ => Err(RegistrationError::Validation(format!(
                "Invalid registration status: {s}"
            ))),
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker written by the processor when it turns a register command down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Every spot was taken when the command was applied
    EventFull,
}

impl Rejection {
    /// Convert to storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EventFull => "event_full",
        }
    }

    /// Parse from storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Validation`] for unknown markers.
    pub fn parse(s: &str) -> Result<Self, RegistrationError> {
        match s {
            "event_full" => Ok(Self::EventFull),
            _ => Err(RegistrationError::Validation(format!(
                "Invalid rejection marker: {s}"
            ))),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Spot accounting for one event.
///
/// Invariant: `registered_count <= total_spots`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCapacity {
    /// Event ID
    pub event_id: EventId,
    /// Fixed number of spots
    pub total_spots: u32,
    /// Users currently holding a spot
    pub registered_count: u32,
}

impl EventCapacity {
    /// Creates capacity for an event with nobody registered yet
    #[must_use]
    pub const fn new(event_id: EventId, total_spots: u32) -> Self {
        Self {
            event_id,
            total_spots,
            registered_count: 0,
        }
    }

    /// Whether every spot is taken
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.registered_count >= self.total_spots
    }

    /// Spots still free
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.total_spots.saturating_sub(self.registered_count)
    }
}

/// Stored registration row for one `(event, user)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Event ID
    pub event_id: EventId,
    /// User ID
    pub user_id: UserId,
    /// Stored status (never `Pending`)
    pub status: RegistrationStatus,
    /// Idempotency key of the last command applied to this row (rejections are not recorded)
    pub last_applied_key: Option<String>,
    /// Set when the last register command was turned down
    pub rejection: Option<Rejection>,
    /// When this row last changed
    pub last_updated: DateTime<Utc>,
}

impl Registration {
    /// The implicit row every pair starts from before its first command.
    #[must_use]
    pub const fn unregistered(event_id: EventId, user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            event_id,
            user_id,
            status: RegistrationStatus::Unregistered,
            last_applied_key: None,
            rejection: None,
            last_updated: at,
        }
    }
}

/// Input for creating an event in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Where it happens
    pub location: String,
    /// When it happens, as given by the organizer
    pub date: String,
    /// Organizer identifier
    pub organizer_id: String,
    /// Fixed number of spots (must be > 0)
    pub total_spots: u32,
}

impl NewEvent {
    /// Default spot count for events created without one.
    pub const DEFAULT_TOTAL_SPOTS: u32 = 100;

    /// Check the catalog's input rules.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Validation`] if the name is blank or the
    /// spot count is zero.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.name.trim().is_empty() {
            return Err(RegistrationError::Validation(
                "Event name must not be empty".to_string(),
            ));
        }
        if self.total_spots == 0 {
            return Err(RegistrationError::Validation(
                "Total spots must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Event as seen by readers of the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    /// Event ID
    pub id: EventId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Where it happens
    pub location: String,
    /// When it happens
    pub date: String,
    /// Organizer identifier
    pub organizer_id: String,
    /// Fixed number of spots
    pub total_spots: u32,
    /// Users currently holding a spot
    pub registered_count: u32,
}

impl EventDetails {
    /// Build the catalog view of a freshly created event.
    #[must_use]
    pub fn from_new(id: EventId, event: NewEvent) -> Self {
        Self {
            id,
            name: event.name,
            description: event.description,
            location: event.location,
            date: event.date,
            organizer_id: event.organizer_id,
            total_spots: event.total_spots,
            registered_count: 0,
        }
    }

    /// Capacity slice of this event
    #[must_use]
    pub const fn capacity(&self) -> EventCapacity {
        EventCapacity {
            event_id: self.id,
            total_spots: self.total_spots,
            registered_count: self.registered_count,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn user_id_is_trimmed() {
        let user = UserId::new("  alice ").unwrap();
        assert_eq!(user.as_str(), "alice");
    }

    #[test]
    fn blank_user_id_is_rejected() {
        assert!(matches!(
            UserId::new("   "),
            Err(RegistrationError::Validation(_))
        ));
    }

    #[test]
    fn oversized_user_id_is_rejected() {
        let long = "x".repeat(MAX_USER_ID_LEN + 1);
        assert!(UserId::new(long).is_err());
    }

    #[test]
    fn event_id_parses_from_uuid_text() {
        let id = EventId::new();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<EventId>().is_err());
    }

    #[test]
    fn status_storage_names() {
        for status in [
            RegistrationStatus::Unregistered,
            RegistrationStatus::Pending,
            RegistrationStatus::Registered,
        ] {
            assert_eq!(RegistrationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(RegistrationStatus::parse("registered").is_err());
    }

    #[test]
    fn capacity_reports_fullness() {
        let mut capacity = EventCapacity::new(EventId::new(), 2);
        assert!(!capacity.is_full());
        assert_eq!(capacity.remaining(), 2);

        capacity.registered_count = 2;
        assert!(capacity.is_full());
        assert_eq!(capacity.remaining(), 0);
    }

    #[test]
    fn new_event_requires_spots_and_name() {
        let mut event = NewEvent {
            name: "RustConf".to_string(),
            description: String::new(),
            location: "Montreal".to_string(),
            date: "2026-09-01".to_string(),
            organizer_id: "org-1".to_string(),
            total_spots: 0,
        };
        assert!(event.validate().is_err());

        event.total_spots = NewEvent::DEFAULT_TOTAL_SPOTS;
        assert!(event.validate().is_ok());

        event.name = " ".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejection_serializes_snake_case() {
        let json = serde_json::to_string(&Rejection::EventFull).unwrap();
        assert_eq!(json, "\"event_full\"");
    }
}
