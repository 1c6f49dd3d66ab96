//! Operator control state shared between the loop and the observer API.
//!
//! The operator side only ever writes atomics and sends the one-shot
//! session settings; the loop only reads. Nothing here blocks the loop.
//!
//! # Architecture
//!
//! All mutable control fields use [`std::sync::atomic`] types so the loop
//! and the Axum handler tasks can share one [`std::sync::Arc`] without
//! locks on the hot path. The settings handoff is a
//! [`tokio::sync::oneshot`] channel whose sender is consumed by the first
//! confirmation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, oneshot};

use crate::config::SessionConfig;

/// Shortest tick interval the operator may set.
pub const MIN_TICK_INTERVAL_MS: u64 = 50;

/// Reason why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// An operator issued a stop command.
    OperatorStop,
    /// No supplies remained and nothing was left to service.
    ResourceExhausted,
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
}

/// Why a settings confirmation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmError {
    /// Settings were already confirmed for this session.
    #[error("session settings were already confirmed")]
    AlreadyConfirmed,
    /// The loop is no longer waiting for settings.
    #[error("the loop is no longer accepting settings")]
    LoopGone,
}

/// Shared operator control state.
#[derive(Debug)]
pub struct OperatorState {
    /// Whether the host asked to drain.
    drain_requested: AtomicBool,

    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes the loop when a stop is requested while it waits.
    stop_notify: Notify,

    /// Current tick interval in milliseconds (runtime-adjustable).
    tick_interval_ms: AtomicU64,

    /// Wall-clock time the operator state was created.
    started_at: DateTime<Utc>,

    /// Maximum number of ticks (0 = unlimited).
    max_ticks: u64,

    /// Sender half of the one-shot settings channel.
    settings_tx: std::sync::Mutex<Option<oneshot::Sender<SessionConfig>>>,

    /// Reason the session ended, if it has.
    end_reason: Mutex<Option<SessionEndReason>>,
}

impl OperatorState {
    /// Create operator state and the receiver the loop waits on for
    /// session settings.
    pub fn new(tick_interval_ms: u64, max_ticks: u64) -> (Self, oneshot::Receiver<SessionConfig>) {
        let (tx, rx) = oneshot::channel();
        let state = Self {
            drain_requested: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            tick_interval_ms: AtomicU64::new(tick_interval_ms.max(MIN_TICK_INTERVAL_MS)),
            started_at: Utc::now(),
            max_ticks,
            settings_tx: std::sync::Mutex::new(Some(tx)),
            end_reason: Mutex::new(None),
        };
        (state, rx)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Deliver the session settings to the loop. Succeeds at most once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmError::AlreadyConfirmed`] on a second call and
    /// [`ConfirmError::LoopGone`] if the loop dropped its receiver.
    pub fn confirm_settings(&self, settings: SessionConfig) -> Result<(), ConfirmError> {
        let sender = self
            .settings_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .ok_or(ConfirmError::AlreadyConfirmed)?;
        sender.send(settings).map_err(|_unsent| ConfirmError::LoopGone)
    }

    /// Whether settings have been confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.settings_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_none()
    }

    // -----------------------------------------------------------------------
    // Drain
    // -----------------------------------------------------------------------

    /// Ask the loop to stop laying and run the trap count down.
    pub fn request_drain(&self) {
        self.drain_requested.store(true, Ordering::Release);
    }

    /// Withdraw the drain request.
    pub fn withdraw_drain(&self) {
        self.drain_requested.store(false, Ordering::Release);
    }

    /// Whether a drain is requested.
    pub fn is_drain_requested(&self) -> bool {
        self.drain_requested.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a clean stop and wake the loop if it is waiting.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_one();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Wait until a stop is requested.
    pub async fn stopped(&self) {
        while !self.is_stop_requested() {
            self.stop_notify.notified().await;
        }
    }

    /// Record the reason the session ended.
    pub async fn set_end_reason(&self, reason: SessionEndReason) {
        let mut guard = self.end_reason.lock().await;
        *guard = Some(reason);
    }

    /// The reason the session ended, if it has.
    pub async fn end_reason(&self) -> Option<SessionEndReason> {
        *self.end_reason.lock().await
    }

    // -----------------------------------------------------------------------
    // Tick speed
    // -----------------------------------------------------------------------

    /// Current tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Set the tick interval. Returns the previous interval, or `None` if
    /// `ms` is below [`MIN_TICK_INTERVAL_MS`].
    pub fn set_tick_interval_ms(&self, ms: u64) -> Option<u64> {
        if ms < MIN_TICK_INTERVAL_MS {
            return None;
        }
        Some(self.tick_interval_ms.swap(ms, Ordering::AcqRel))
    }

    // -----------------------------------------------------------------------
    // Boundaries
    // -----------------------------------------------------------------------

    /// Whether `current_tick` reached the tick limit (0 = unlimited).
    pub const fn tick_limit_reached(&self, current_tick: u64) -> bool {
        self.max_ticks > 0 && current_tick >= self.max_ticks
    }

    /// Configured maximum ticks.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Elapsed wall-clock seconds since start.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn drain_request_and_withdrawal() {
        let (state, _rx) = OperatorState::new(600, 0);
        assert!(!state.is_drain_requested());
        state.request_drain();
        assert!(state.is_drain_requested());
        state.withdraw_drain();
        assert!(!state.is_drain_requested());
    }

    #[test]
    fn tick_interval_has_a_floor() {
        let (state, _rx) = OperatorState::new(600, 0);
        assert_eq!(state.set_tick_interval_ms(10), None);
        assert_eq!(state.set_tick_interval_ms(300), Some(600));
        assert_eq!(state.tick_interval_ms(), 300);
    }

    #[test]
    fn tick_limit_zero_means_unlimited() {
        let (state, _rx) = OperatorState::new(600, 0);
        assert!(!state.tick_limit_reached(1_000_000));
        let (bounded, _rx) = OperatorState::new(600, 10);
        assert!(!bounded.tick_limit_reached(9));
        assert!(bounded.tick_limit_reached(10));
    }

    #[tokio::test]
    async fn settings_are_confirmed_once() {
        let (state, rx) = OperatorState::new(600, 0);
        assert!(!state.is_confirmed());
        state.confirm_settings(SessionConfig::default()).unwrap();
        assert!(state.is_confirmed());
        assert_eq!(
            state.confirm_settings(SessionConfig::default()),
            Err(ConfirmError::AlreadyConfirmed)
        );
        let settings = rx.await.unwrap();
        assert_eq!(settings, SessionConfig::default());
    }

    #[test]
    fn confirmation_after_loop_exit_fails() {
        let (state, rx) = OperatorState::new(600, 0);
        drop(rx);
        assert_eq!(
            state.confirm_settings(SessionConfig::default()),
            Err(ConfirmError::LoopGone)
        );
    }

    #[tokio::test]
    async fn stop_wakes_waiter() {
        let (state, _rx) = OperatorState::new(600, 0);
        let state = std::sync::Arc::new(state);
        let waiter = {
            let state = std::sync::Arc::clone(&state);
            tokio::spawn(async move { state.stopped().await })
        };
        state.request_stop();
        waiter.await.unwrap();
        state.set_end_reason(SessionEndReason::OperatorStop).await;
        assert_eq!(state.end_reason().await, Some(SessionEndReason::OperatorStop));
    }
}
