//! The cloud RPC transport is an external collaborator a host process
//! provides. This module defines the three calls the verifier and the
//! cloud key provider make against it, plus a scripted mock for tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Identifier, TagUid};

/// Outcome of `terminal_checkin`.
#[derive(Debug, Clone)]
pub enum CheckinOutcome {
    Authorized {
        user_id: Identifier,
        user_label: String,
        /// Present when the cloud already has an authentication_id on file
        /// for this tag (no fresh mutual-auth round needed).
        authentication_id: Option<Identifier>,
    },
    Rejected {
        message: String,
    },
}

/// Outcome of `complete_tag_auth`.
#[derive(Debug, Clone)]
pub enum CloudAuthOutcome {
    SessionKeys {
        enc_key: [u8; 16],
        mac_key: [u8; 16],
        ti: [u8; 4],
        picc_caps: [u8; 6],
    },
    Rejected {
        message: String,
    },
}

/// The cloud collaborator's three RPCs.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn terminal_checkin(&self, tag_uid: TagUid) -> Result<CheckinOutcome>;

    /// Returns the cloud-assigned `auth_id` plus the 32-byte Part 2
    /// challenge payload to send to the tag.
    async fn authenticate_tag(
        &self,
        tag_uid: TagUid,
        key_number: u8,
        encrypted_rnd_b: &[u8; 16],
    ) -> Result<(Identifier, [u8; 32])>;

    async fn complete_tag_auth(
        &self,
        auth_id: &Identifier,
        encrypted_part3: &[u8; 32],
    ) -> Result<CloudAuthOutcome>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedCloudClient {
        checkins: Mutex<VecDeque<Result<CheckinOutcome>>>,
        tag_auths: Mutex<VecDeque<Result<(Identifier, [u8; 32])>>>,
        completions: Mutex<VecDeque<Result<CloudAuthOutcome>>>,
    }

    impl ScriptedCloudClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_checkin(&self, outcome: Result<CheckinOutcome>) {
            self.checkins.try_lock().unwrap().push_back(outcome);
        }

        pub fn push_tag_auth(&self, outcome: Result<(Identifier, [u8; 32])>) {
            self.tag_auths.try_lock().unwrap().push_back(outcome);
        }

        pub fn push_completion(&self, outcome: Result<CloudAuthOutcome>) {
            self.completions.try_lock().unwrap().push_back(outcome);
        }
    }

    #[async_trait]
    impl CloudClient for ScriptedCloudClient {
        async fn terminal_checkin(&self, _tag_uid: TagUid) -> Result<CheckinOutcome> {
            self.checkins
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(crate::error::Error::unavailable("no scripted checkin")))
        }

        async fn authenticate_tag(
            &self,
            _tag_uid: TagUid,
            _key_number: u8,
            _encrypted_rnd_b: &[u8; 16],
        ) -> Result<(Identifier, [u8; 32])> {
            self.tag_auths
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(crate::error::Error::unavailable("no scripted tag auth")))
        }

        async fn complete_tag_auth(
            &self,
            _auth_id: &Identifier,
            _encrypted_part3: &[u8; 32],
        ) -> Result<CloudAuthOutcome> {
            self.completions
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(crate::error::Error::unavailable("no scripted completion")))
        }
    }
}
