//! The hierarchical session state machine: self-checkout, takeover, and
//! hold/UI/timeout confirmations layered on top of authorization events.
//! Implemented as a tagged discriminant plus one context record rather
//! than inherited per-state structs — child-to-parent bubbling collapses
//! to two explicit `enter_active`/`exit_active` call sites instead of a
//! generic LCA walk, since `Active` only ever has one parent (`NoSession`)
//! to bubble to.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::types::{
    CheckoutReason, Identifier, MachineUsage, SessionInfo, SessionSnapshot, SessionStateId,
    TagUid,
};

/// Bound on registered session observers.
pub const MAX_SESSION_OBSERVERS: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct SessionFsmConfig {
    pub confirmation_timeout: Duration,
    pub hold_duration: Duration,
}

impl Default for SessionFsmConfig {
    fn default() -> Self {
        SessionFsmConfig {
            confirmation_timeout: Duration::from_secs(15),
            hold_duration: Duration::from_secs(5),
        }
    }
}

/// Inputs the FSM reacts to.
#[derive(Debug, Clone)]
pub enum Event {
    UserAuthorized {
        tag_uid: TagUid,
        user_id: Identifier,
        user_label: String,
        auth_id: Identifier,
    },
    TagPresence(bool),
    UiConfirm,
    UiCancel,
    HoldConfirmed,
    Timeout,
}

/// Observes whole-session lifecycle edges, never sub-state churn within
/// `Active`.
pub trait SessionObserver: Send + Sync {
    fn on_session_started(&self, info: &SessionInfo);
    fn on_session_ended(&self, info: &SessionInfo, usage: &MachineUsage);
}

fn duration_to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

/// The FSM. `receive` is the sole mutator; `snapshot` is a pure read of
/// the current context, safe to call from anywhere since it never
/// blocks on anything but a caller-held lock around the whole struct.
pub struct SessionFsm {
    config: SessionFsmConfig,
    state: SessionStateId,
    active_session: Option<SessionInfo>,
    pending_session: Option<SessionInfo>,
    pending_deadline: Option<DateTime<Utc>>,
    pending_since: Option<DateTime<Utc>>,
    checkout_reason: CheckoutReason,
    tag_present: bool,
    tag_present_since: Option<DateTime<Utc>>,
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl SessionFsm {
    pub fn new(config: SessionFsmConfig) -> Self {
        SessionFsm {
            config,
            state: SessionStateId::NoSession,
            active_session: None,
            pending_session: None,
            pending_deadline: None,
            pending_since: None,
            checkout_reason: CheckoutReason::None,
            tag_present: false,
            tag_present_since: None,
            observers: Vec::with_capacity(MAX_SESSION_OBSERVERS),
        }
    }

    /// Registration happens at boot, before any event can fire. Fails
    /// `ResourceExhausted` past the fixed bound.
    pub fn add_observer(&mut self, observer: Arc<dyn SessionObserver>) -> Result<()> {
        if self.observers.len() >= MAX_SESSION_OBSERVERS {
            return Err(Error::resource_exhausted(
                "session observer registry is already at capacity",
            ));
        }
        self.observers.push(observer);
        Ok(())
    }

    pub fn state_id(&self) -> SessionStateId {
        self.state
    }

    /// When the current pending confirmation (checkout or takeover) was
    /// raised. `None` outside `CheckoutPending`/`TakeoverPending`.
    pub fn pending_since(&self) -> Option<DateTime<Utc>> {
        self.pending_since
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state_id: self.state,
            active_user_label: self.active_session.as_ref().map(|s| s.user_label.clone()),
            tag_present: self.tag_present,
            tag_present_since: self.tag_present_since,
            pending_deadline: self.pending_deadline,
        }
    }

    fn notify_session_started(&self, info: &SessionInfo) {
        for observer in &self.observers {
            observer.on_session_started(info);
        }
    }

    fn notify_session_ended(&self, info: &SessionInfo, usage: &MachineUsage) {
        for observer in &self.observers {
            observer.on_session_ended(info, usage);
        }
    }

    /// `Active::on_exit`: emits exactly one `OnSessionEnded` for whatever
    /// is currently the active session, then clears it.
    fn exit_active(&mut self, now: DateTime<Utc>, reason: CheckoutReason) {
        if let Some(info) = self.active_session.take() {
            let usage = MachineUsage {
                user_id: info.user_id,
                auth_id: info.auth_id,
                check_in: info.started_at,
                check_out: now,
                reason,
            };
            self.notify_session_ended(&info, &usage);
        }
        self.pending_session = None;
        self.pending_deadline = None;
        self.pending_since = None;
        self.checkout_reason = CheckoutReason::None;
    }

    /// `Active::on_enter`: installs `info` as the active session and
    /// emits exactly one `OnSessionStarted`.
    fn enter_active(&mut self, info: SessionInfo) {
        self.notify_session_started(&info);
        self.active_session = Some(info);
    }

    fn clear_pending(&mut self) {
        self.pending_session = None;
        self.pending_deadline = None;
        self.pending_since = None;
    }

    /// Feed one event into the FSM. Illegal events for the current state
    /// are silent no-ops — the FSM never fails.
    pub fn receive(&mut self, event: Event, now: DateTime<Utc>) {
        match event {
            Event::UserAuthorized {
                tag_uid,
                user_id,
                user_label,
                auth_id,
            } => self.on_user_authorized(tag_uid, user_id, user_label, auth_id, now),
            Event::TagPresence(present) => self.on_tag_presence(present, now),
            Event::UiConfirm => self.on_confirm(now, CheckoutReason::UiCheckout),
            Event::UiCancel => self.on_cancel(),
            Event::HoldConfirmed => self.on_confirm(now, CheckoutReason::SelfCheckout),
            Event::Timeout => self.on_timeout(),
        }
    }

    fn on_user_authorized(
        &mut self,
        tag_uid: TagUid,
        user_id: Identifier,
        user_label: String,
        auth_id: Identifier,
        now: DateTime<Utc>,
    ) {
        match self.state {
            SessionStateId::NoSession => {
                let info = SessionInfo {
                    tag_uid,
                    user_id,
                    user_label,
                    auth_id,
                    started_at: now,
                };
                self.enter_active(info);
                self.state = SessionStateId::Running;
            }
            SessionStateId::Running => {
                let same_tag = self
                    .active_session
                    .as_ref()
                    .map(|s| s.tag_uid == tag_uid)
                    .unwrap_or(false);
                if same_tag {
                    self.pending_deadline =
                        Some(now + duration_to_chrono(self.config.confirmation_timeout));
                    self.pending_since = Some(now);
                    self.checkout_reason = CheckoutReason::SelfCheckout;
                    self.state = SessionStateId::CheckoutPending;
                } else {
                    self.pending_session = Some(SessionInfo {
                        tag_uid,
                        user_id,
                        user_label,
                        auth_id,
                        started_at: now,
                    });
                    self.pending_deadline =
                        Some(now + duration_to_chrono(self.config.confirmation_timeout));
                    self.pending_since = Some(now);
                    self.state = SessionStateId::TakeoverPending;
                }
            }
            SessionStateId::CheckoutPending | SessionStateId::TakeoverPending => {
                // A third tap while a confirmation is already pending has
                // no defined transition; ignore it.
            }
        }
    }

    fn on_tag_presence(&mut self, present: bool, now: DateTime<Utc>) {
        self.tag_present = present;
        self.tag_present_since = if present { Some(now) } else { None };
        if !present && self.state == SessionStateId::CheckoutPending {
            self.checkout_reason = CheckoutReason::None;
            self.clear_pending();
            self.state = SessionStateId::Running;
        }
        // TakeoverPending + TagPresence(false) stays in TakeoverPending:
        // the prompt remains regardless of tag_present.
    }

    fn on_confirm(&mut self, now: DateTime<Utc>, checkout_reason: CheckoutReason) {
        match self.state {
            SessionStateId::CheckoutPending => {
                self.exit_active(now, checkout_reason);
                self.state = SessionStateId::NoSession;
            }
            SessionStateId::TakeoverPending => {
                self.exit_active(now, CheckoutReason::OtherTag);
                if let Some(pending) = self.pending_session.take() {
                    self.enter_active(pending);
                    self.state = SessionStateId::Running;
                } else {
                    self.state = SessionStateId::NoSession;
                }
            }
            SessionStateId::NoSession | SessionStateId::Running => {}
        }
    }

    fn on_cancel(&mut self) {
        match self.state {
            SessionStateId::CheckoutPending | SessionStateId::TakeoverPending => {
                self.clear_pending();
                self.checkout_reason = CheckoutReason::None;
                self.state = SessionStateId::Running;
            }
            SessionStateId::NoSession | SessionStateId::Running => {}
        }
    }

    fn on_timeout(&mut self) {
        match self.state {
            SessionStateId::CheckoutPending | SessionStateId::TakeoverPending => {
                self.clear_pending();
                self.checkout_reason = CheckoutReason::None;
                self.state = SessionStateId::Running;
            }
            SessionStateId::NoSession | SessionStateId::Running => {}
        }
    }
}
