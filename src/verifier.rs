//! The verification & authorization pipeline: a single-threaded
//! cooperative task that subscribes to reader events, authenticates each
//! arriving tag against a terminal key, consults the auth cache, and
//! falls back to a cloud check-in. An `Arc<Self>`-owned async loop:
//! subscribe/await, dispatch, log and continue on error rather than
//! aborting the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::auth_cache::AuthCache;
use crate::cloud::{CheckinOutcome, CloudClient};
use crate::error::Result;
use crate::key_provider::{CloudKeyProvider, LocalKeyProvider};
use crate::reader::{NfcEvent, Reader};
use crate::secrets::SecretsProvider;
use crate::tag::Ntag424Tag;
use crate::types::{truncate_user_label, Identifier, TagUid};

/// Bound on registered verification observers — a small-N vector,
/// populated before any event can fire. Matches the session observer
/// bound for consistency.
pub const MAX_VERIFICATION_OBSERVERS: usize = 4;

/// Key slot used to authenticate against the terminal's own diversified
/// key (`kTerminal`, via a local key provider).
pub const KEY_NUMBER_TERMINAL: u8 = 0;

/// Key slot used for the cloud-authorized mutual-auth round (`kAuthorization`).
pub const KEY_NUMBER_AUTHORIZATION: u8 = 1;

/// Observes the per-tap verification/authorization trace. Default no-op
/// bodies so a test or host only overrides the events it cares about.
pub trait VerificationObserver: Send + Sync {
    fn on_tag_detected(&self, _uid: TagUid) {}
    fn on_verifying(&self) {}
    fn on_tag_verified(&self, _uid: TagUid) {}
    fn on_unknown_tag(&self) {}
    fn on_authorizing(&self) {}
    fn on_authorized(
        &self,
        _tag_uid: TagUid,
        _user_id: Identifier,
        _user_label: String,
        _auth_id: Identifier,
    ) {
    }
    fn on_unauthorized(&self) {}
    fn on_tag_removed(&self) {}
}

pub struct VerifierConfig {
    pub command_timeout: Duration,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

pub struct Verifier {
    reader: Arc<dyn Reader>,
    secrets: Arc<dyn SecretsProvider>,
    cloud: Arc<dyn CloudClient>,
    cache: AuthCache,
    cache_ttl: Duration,
    command_timeout: Duration,
    observers: Vec<Arc<dyn VerificationObserver>>,
}

impl Verifier {
    pub fn new(
        reader: Arc<dyn Reader>,
        secrets: Arc<dyn SecretsProvider>,
        cloud: Arc<dyn CloudClient>,
        config: VerifierConfig,
    ) -> Self {
        Verifier {
            reader,
            secrets,
            cloud,
            cache: AuthCache::with_capacity(config.cache_capacity),
            cache_ttl: config.cache_ttl,
            command_timeout: config.command_timeout,
            observers: Vec::with_capacity(MAX_VERIFICATION_OBSERVERS),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn VerificationObserver>) -> Result<()> {
        if self.observers.len() >= MAX_VERIFICATION_OBSERVERS {
            return Err(crate::error::Error::resource_exhausted(
                "verification observer registry is already at capacity",
            ));
        }
        self.observers.push(observer);
        Ok(())
    }

    pub fn clear_auth_cache(&mut self) {
        self.cache.clear();
    }

    /// Runs forever, handling one reader event per iteration. Errors
    /// from a single step are logged and do not stop the loop — the
    /// next reader event is still worth handling.
    pub async fn run(&mut self) {
        loop {
            if let Err(e) = self.step().await {
                warn!(error = %e, "verifier step failed");
            }
        }
    }

    /// Handle exactly one reader event. Exposed separately from `run`
    /// so tests can drive the pipeline deterministically.
    pub async fn step(&mut self) -> Result<()> {
        match self.reader.subscribe().await? {
            NfcEvent::Arrived(meta) => self.handle_arrival(meta.uid, meta.supports_iso14443_4).await,
            NfcEvent::Departed => {
                self.notify_tag_removed();
                Ok(())
            }
        }
    }

    async fn handle_arrival(&mut self, uid: TagUid, supports_iso14443_4: bool) -> Result<()> {
        self.notify_tag_detected(uid);

        if !supports_iso14443_4 {
            debug!(uid = %uid, "tag does not support ISO 14443-4");
            self.notify_unknown_tag();
            return Ok(());
        }

        let mut tag = Ntag424Tag::with_timeout(self.reader.clone(), self.command_timeout);
        if tag.select_application().await.is_err() {
            self.notify_unknown_tag();
            return Ok(());
        }

        self.notify_verifying();

        let terminal_key = match self.secrets.get_ntag_terminal_key().await {
            Ok(key) => key,
            Err(_) => {
                self.notify_unknown_tag();
                return Ok(());
            }
        };

        let mut terminal_provider = LocalKeyProvider::new(KEY_NUMBER_TERMINAL, terminal_key);
        let token = match tag.authenticate(&mut terminal_provider).await {
            Ok(token) => token,
            Err(_) => {
                self.notify_unknown_tag();
                return Ok(());
            }
        };

        let real_uid = match tag.get_card_uid(token).await {
            Ok(uid) => uid,
            Err(_) => {
                self.notify_unknown_tag();
                return Ok(());
            }
        };
        self.notify_tag_verified(real_uid);

        let now = Instant::now();
        if let Some(cached) = self.cache.get(real_uid, now) {
            debug!(uid = %real_uid, "auth cache hit");
            self.notify_authorized(real_uid, Identifier::EMPTY, cached.user_label, cached.auth_id);
            return Ok(());
        }

        self.notify_authorizing();
        self.authorize_via_cloud(&mut tag, real_uid, now).await
    }

    async fn authorize_via_cloud(
        &mut self,
        tag: &mut Ntag424Tag,
        real_uid: TagUid,
        now: Instant,
    ) -> Result<()> {
        let outcome = match self.cloud.terminal_checkin(real_uid).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "cloud check-in RPC failed");
                self.notify_unauthorized();
                return Ok(());
            }
        };

        match outcome {
            CheckinOutcome::Rejected { message } => {
                info!(reason = %message, "cloud rejected terminal check-in");
                self.notify_unauthorized();
                Ok(())
            }
            CheckinOutcome::Authorized {
                user_id,
                user_label,
                authentication_id: Some(auth_id),
            } => {
                let user_label = truncate_user_label(user_label);
                self.cache
                    .insert(real_uid, user_id, user_label.clone(), auth_id, now, self.cache_ttl);
                self.notify_authorized(real_uid, user_id, user_label, auth_id);
                Ok(())
            }
            CheckinOutcome::Authorized {
                user_id,
                user_label,
                authentication_id: None,
            } => {
                let user_label = truncate_user_label(user_label);
                if tag.select_application().await.is_err() {
                    self.notify_unauthorized();
                    return Ok(());
                }
                let mut cloud_provider =
                    CloudKeyProvider::new(KEY_NUMBER_AUTHORIZATION, real_uid, self.cloud.clone());
                match tag.authenticate(&mut cloud_provider).await {
                    Ok(_) => {
                        let auth_id = cloud_provider.auth_id().unwrap_or(Identifier::EMPTY);
                        self.cache.insert(
                            real_uid,
                            user_id,
                            user_label.clone(),
                            auth_id,
                            now,
                            self.cache_ttl,
                        );
                        self.notify_authorized(real_uid, user_id, user_label, auth_id);
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "cloud-key mutual authentication failed");
                        self.notify_unauthorized();
                        Ok(())
                    }
                }
            }
        }
    }

    fn notify_tag_detected(&self, uid: TagUid) {
        for o in &self.observers {
            o.on_tag_detected(uid);
        }
    }
    fn notify_verifying(&self) {
        for o in &self.observers {
            o.on_verifying();
        }
    }
    fn notify_tag_verified(&self, uid: TagUid) {
        for o in &self.observers {
            o.on_tag_verified(uid);
        }
    }
    fn notify_unknown_tag(&self) {
        for o in &self.observers {
            o.on_unknown_tag();
        }
    }
    fn notify_authorizing(&self) {
        for o in &self.observers {
            o.on_authorizing();
        }
    }
    fn notify_authorized(
        &self,
        tag_uid: TagUid,
        user_id: Identifier,
        user_label: String,
        auth_id: Identifier,
    ) {
        for o in &self.observers {
            o.on_authorized(tag_uid, user_id, user_label.clone(), auth_id);
        }
    }
    fn notify_unauthorized(&self) {
        for o in &self.observers {
            o.on_unauthorized();
        }
    }
    fn notify_tag_removed(&self) {
        for o in &self.observers {
            o.on_tag_removed();
        }
    }
}
