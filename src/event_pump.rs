//! Background event pump: polls at 100ms while a session confirmation is
//! pending and 500ms otherwise, draining a single atomic `UiAction` slot
//! and delivering `HoldConfirmed`/`Timeout` into the session FSM. An async
//! loop owned by an `Arc<Self>`, ticking, dispatching a unit of work, and
//! logging rather than aborting on error; the poll period here is
//! state-dependent rather than fixed, so `tokio::time::sleep` stands in
//! for `tokio::time::interval`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::session_fsm::{Event, SessionFsm};
use crate::types::SessionStateId;

const PENDING_POLL_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

const ACTION_NONE: u8 = 0;
const ACTION_CONFIRM: u8 = 1;
const ACTION_CANCEL: u8 = 2;

/// One UI button press, or none. Read and cleared atomically: a second
/// press before the pump drains the first overwrites it, matching "a
/// single atomic `UiAction`", not a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    None,
    Confirm,
    Cancel,
}

/// Shared between the host UI (writer) and the event pump (reader).
#[derive(Default)]
pub struct UiActionSlot(AtomicU8);

impl UiActionSlot {
    pub fn new() -> Self {
        UiActionSlot(AtomicU8::new(ACTION_NONE))
    }

    pub fn set_confirm(&self) {
        self.0.store(ACTION_CONFIRM, Ordering::SeqCst);
    }

    pub fn set_cancel(&self) {
        self.0.store(ACTION_CANCEL, Ordering::SeqCst);
    }

    /// Atomically read and clear the pending action.
    pub fn take(&self) -> UiAction {
        match self.0.swap(ACTION_NONE, Ordering::SeqCst) {
            ACTION_CONFIRM => UiAction::Confirm,
            ACTION_CANCEL => UiAction::Cancel,
            _ => UiAction::None,
        }
    }
}

pub struct EventPump {
    fsm: Arc<Mutex<SessionFsm>>,
    ui_action: Arc<UiActionSlot>,
    hold_duration: Duration,
}

impl EventPump {
    pub fn new(
        fsm: Arc<Mutex<SessionFsm>>,
        ui_action: Arc<UiActionSlot>,
        hold_duration: Duration,
    ) -> Self {
        EventPump {
            fsm,
            ui_action,
            hold_duration,
        }
    }

    /// Runs forever. Intended to be spawned as its own task.
    pub async fn run(&self) {
        loop {
            let pending = {
                let fsm = self.fsm.lock().unwrap();
                matches!(
                    fsm.state_id(),
                    SessionStateId::CheckoutPending | SessionStateId::TakeoverPending
                )
            };
            let interval = if pending {
                PENDING_POLL_INTERVAL
            } else {
                IDLE_POLL_INTERVAL
            };
            tokio::time::sleep(interval).await;
            self.tick().await;
        }
    }

    /// One poll cycle: drain the UI action, then deliver
    /// `HoldConfirmed`/`Timeout` if a confirmation is pending. Exposed
    /// separately from `run` so tests can drive it deterministically.
    pub async fn tick(&self) {
        let action = self.ui_action.take();
        let now = Utc::now();
        let mut fsm = self.fsm.lock().unwrap();

        match action {
            UiAction::Confirm => fsm.receive(Event::UiConfirm, now),
            UiAction::Cancel => fsm.receive(Event::UiCancel, now),
            UiAction::None => {}
        }

        let snapshot = fsm.snapshot();
        if !matches!(
            snapshot.state_id,
            SessionStateId::CheckoutPending | SessionStateId::TakeoverPending
        ) {
            return;
        }

        if snapshot.tag_present {
            if let Some(since) = snapshot.tag_present_since {
                let elapsed = now.signed_duration_since(since);
                if elapsed >= chrono_duration(self.hold_duration) {
                    fsm.receive(Event::HoldConfirmed, now);
                }
            }
        }

        let snapshot = fsm.snapshot();
        if let Some(deadline) = snapshot.pending_deadline {
            if now >= deadline {
                fsm.receive(Event::Timeout, now);
            }
        }
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}
