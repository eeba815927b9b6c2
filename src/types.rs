//! Shared value types threaded through the verifier, session FSM, and
//! snapshot boundary: tag identities, opaque identifiers, and the
//! point-in-time views the UI thread reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::Error;

/// Maximum UID capacity the core carries. NTAG424's real UID is 7 bytes;
/// 10 bytes covers ISO 14443-3 UIDs in general without requiring a
/// reallocation at the reader boundary.
pub const TAG_UID_CAPACITY: usize = 10;

/// A tag UID: fixed capacity, variable length, value semantics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagUid {
    bytes: [u8; TAG_UID_CAPACITY],
    len: u8,
}

impl TagUid {
    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        if data.len() > TAG_UID_CAPACITY {
            return Err(Error::invalid_argument(format!(
                "tag UID of {} bytes exceeds capacity {}",
                data.len(),
                TAG_UID_CAPACITY
            )));
        }
        let mut bytes = [0u8; TAG_UID_CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Ok(TagUid {
            bytes,
            len: data.len() as u8,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_slice())
    }
}

impl fmt::Debug for TagUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagUid({})", self.to_hex())
    }
}

impl fmt::Display for TagUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Maximum capacity for an [`Identifier`] (user id, auth id, machine id).
pub const IDENTIFIER_CAPACITY: usize = 32;

/// An opaque short identifier. Distinct from an empty string: `Identifier::EMPTY`
/// is a first-class value used when, e.g., a cache hit has no user_id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    bytes: [u8; IDENTIFIER_CAPACITY],
    len: u8,
}

impl Identifier {
    pub const EMPTY: Identifier = Identifier {
        bytes: [0u8; IDENTIFIER_CAPACITY],
        len: 0,
    };

    pub fn new(value: &str) -> Result<Self, Error> {
        let data = value.as_bytes();
        if data.len() > IDENTIFIER_CAPACITY {
            return Err(Error::invalid_argument(format!(
                "identifier of {} bytes exceeds capacity {}",
                data.len(),
                IDENTIFIER_CAPACITY
            )));
        }
        let mut bytes = [0u8; IDENTIFIER_CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Identifier {
            bytes,
            len: data.len() as u8,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier::EMPTY
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({:?})", self.as_str())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        // Truncates rather than erroring: callers that need strict
        // validation should use `Identifier::new`.
        let truncated = &value.as_bytes()[..value.len().min(IDENTIFIER_CAPACITY)];
        let mut bytes = [0u8; IDENTIFIER_CAPACITY];
        bytes[..truncated.len()].copy_from_slice(truncated);
        Identifier {
            bytes,
            len: truncated.len() as u8,
        }
    }
}

/// Maximum length the core retains for a cloud-supplied display label
/// (`user_label`, on both `AuthCacheEntry` and `SessionInfo`).
pub const USER_LABEL_CAPACITY: usize = 64;

/// Truncates a user label to `USER_LABEL_CAPACITY` bytes at a char
/// boundary. Display labels are advisory text rather than protocol data,
/// so an over-length label from the cloud collaborator is truncated
/// rather than rejected outright the way `Identifier::new` rejects an
/// over-length identifier.
pub fn truncate_user_label(label: String) -> String {
    if label.len() <= USER_LABEL_CAPACITY {
        return label;
    }
    let mut end = USER_LABEL_CAPACITY;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    label.as_str()[..end].to_string()
}

/// Reason a session's active slot was vacated, emitted once per
/// [`MachineUsage`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutReason {
    None,
    SelfCheckout,
    OtherTag,
    UiCheckout,
    Timeout,
}

impl Default for CheckoutReason {
    fn default() -> Self {
        CheckoutReason::None
    }
}

/// A live active session, constructed on entry to `Active` and destroyed on
/// exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub tag_uid: TagUid,
    pub user_id: Identifier,
    pub user_label: String,
    pub auth_id: Identifier,
    pub started_at: DateTime<Utc>,
}

/// One completed session's usage record, emitted exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineUsage {
    pub user_id: Identifier,
    pub auth_id: Identifier,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub reason: CheckoutReason,
}

/// A point-in-time view of the verification pipeline's externally visible
/// state, copied out under the verifier's own lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSnapshot {
    pub tag_present: bool,
    pub tag_uid: Option<TagUid>,
    pub state: VerificationState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerificationState {
    #[default]
    Idle,
    Verifying,
    TagVerified,
    Authorizing,
    Authorized,
    Unauthorized,
    UnknownTag,
}

/// A point-in-time view of the session FSM, copied out via `sync_snapshot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state_id: SessionStateId,
    pub active_user_label: Option<String>,
    pub tag_present: bool,
    pub tag_present_since: Option<DateTime<Utc>>,
    pub pending_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionStateId {
    #[default]
    NoSession,
    Running,
    CheckoutPending,
    TakeoverPending,
}

/// The minimum a host UI needs to render "is the core alive" without
/// inventing new protocol behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSnapshot {
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
    pub last_error: Option<String>,
}

mod duration_secs {
    use serde::{Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// A pure value snapshot of the whole core, copied out of each subsystem
/// under its own lock. No subsystem-internal reference escapes through
/// this type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppStateSnapshot {
    pub verification: VerificationSnapshot,
    pub session: SessionSnapshot,
    pub system: SystemSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_uid_round_trips_through_hex() {
        let uid = TagUid::from_slice(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]).unwrap();
        assert_eq!(uid.to_hex(), "04112233445566");
        assert_eq!(uid.len(), 7);
    }

    #[test]
    fn tag_uid_rejects_oversized_input() {
        let err = TagUid::from_slice(&[0u8; 11]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn identifier_empty_is_distinguishable_from_real_value() {
        assert!(Identifier::EMPTY.is_empty());
        let id = Identifier::new("auth_abc").unwrap();
        assert!(!id.is_empty());
        assert_eq!(id.as_str(), "auth_abc");
    }

    #[test]
    fn identifier_rejects_oversized_input() {
        let long = "x".repeat(IDENTIFIER_CAPACITY + 1);
        assert!(Identifier::new(&long).is_err());
    }

    #[test]
    fn user_label_under_capacity_is_unchanged() {
        let label = "Ada Lovelace".to_string();
        assert_eq!(truncate_user_label(label.clone()), label);
    }

    #[test]
    fn user_label_over_capacity_is_truncated_to_capacity() {
        let long = "x".repeat(USER_LABEL_CAPACITY + 20);
        let truncated = truncate_user_label(long);
        assert_eq!(truncated.len(), USER_LABEL_CAPACITY);
    }

    #[test]
    fn user_label_truncation_respects_char_boundaries() {
        // Each "é" is 2 bytes in UTF-8; a naive byte-index slice at an odd
        // offset would panic instead of landing on a char boundary.
        let long = "é".repeat(USER_LABEL_CAPACITY);
        let truncated = truncate_user_label(long);
        assert!(truncated.len() <= USER_LABEL_CAPACITY);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}
