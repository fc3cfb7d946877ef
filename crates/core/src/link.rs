//! Reconnecting frame source.
//!
//! The receiver's link to the upstream stream is a small state machine:
//!
//! ```text
//! Idle      --Acquired-->   Waiting   (wait-window clock starts)
//! Idle      --OpenFailed--> Idle      (retry after open_retry_delay)
//! Waiting   --NoFrame-->    Waiting   (poll again after poll_interval)
//! Waiting   --NoFrame-->    Idle      (window expired: release, reacquire)
//! Waiting   --Frame-->      Streaming (session starts)
//! Streaming --Frame-->      Streaming
//! Streaming --NoFrame-->    Idle      (end of stream, never a retry)
//! ```
//!
//! [`LinkState::on`] is the pure transition function.
//! [`ReconnectingSource`] owns the handle and executes the actions.

use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::RetryPolicy;
use crate::media::{Frame, FrameSource, SourceFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No handle held.
    Idle,
    /// Handle acquired at `since`, no frame yet.
    Waiting { since: Instant },
    /// At least one frame received on the current handle.
    Streaming { frames: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A handle was acquired and passed its open check.
    Acquired,
    /// Acquisition failed or the handle did not open.
    OpenFailed,
    /// A read returned a frame.
    Frame,
    /// A read returned no frame.
    NoFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// No handle is held; acquire one.
    Acquire,
    /// Read from the current handle immediately.
    Read,
    /// Sleep, then acquire again.
    RetryAfter(Duration),
    /// Sleep, then read again.
    PollAfter(Duration),
    /// Release the silent handle, sleep, then acquire a fresh one.
    Reacquire(Duration),
    /// First frame of a session.
    SessionStarted,
    /// Subsequent frame of a session.
    Deliver,
    /// Read failed while streaming; release the handle and end the session.
    EndOfStream,
}

impl LinkState {
    /// Whether a handle is held in this state.
    pub fn holds_handle(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn on(self, event: LinkEvent, now: Instant, policy: &RetryPolicy) -> (Self, LinkAction) {
        match (self, event) {
            (_, LinkEvent::Acquired) => (Self::Waiting { since: now }, LinkAction::Read),
            (_, LinkEvent::OpenFailed) => (Self::Idle, LinkAction::RetryAfter(policy.open_retry_delay)),

            (Self::Idle, LinkEvent::Frame | LinkEvent::NoFrame) => (Self::Idle, LinkAction::Acquire),

            (Self::Waiting { .. }, LinkEvent::Frame) => {
                (Self::Streaming { frames: 1 }, LinkAction::SessionStarted)
            }
            (Self::Waiting { since }, LinkEvent::NoFrame) => {
                if now.saturating_duration_since(since) > policy.wait_window {
                    (Self::Idle, LinkAction::Reacquire(policy.reacquire_delay))
                } else {
                    (Self::Waiting { since }, LinkAction::PollAfter(policy.poll_interval))
                }
            }

            (Self::Streaming { frames }, LinkEvent::Frame) => (
                Self::Streaming { frames: frames + 1 },
                LinkAction::Deliver,
            ),
            (Self::Streaming { .. }, LinkEvent::NoFrame) => (Self::Idle, LinkAction::EndOfStream),
        }
    }
}

/// Provides frames from a [`SourceFactory`], transparently replacing handles
/// that fail to open or stay silent past the wait window.
///
/// At most one handle is held at any time. Timeouts only apply before the
/// first frame of a session; once streaming, a failed read ends the session.
pub struct ReconnectingSource<F: SourceFactory, C: Clock> {
    factory: F,
    clock: C,
    policy: RetryPolicy,
    state: LinkState,
    handle: Option<F::Source>,
    acquisitions: u64,
    replacements: u64,
}

impl<F: SourceFactory, C: Clock> ReconnectingSource<F, C> {
    pub fn new(factory: F, clock: C, policy: RetryPolicy) -> Self {
        Self {
            factory,
            clock,
            policy,
            state: LinkState::Idle,
            handle: None,
            acquisitions: 0,
            replacements: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn holds_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Number of acquisition attempts, successful or not.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    /// Number of handles replaced because the wait window expired.
    pub fn replacements(&self) -> u64 {
        self.replacements
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Block until the first frame of a new session arrives.
    ///
    /// Returns `None` once `cancel` is observed, after releasing any held
    /// handle. A session already in progress is abandoned.
    pub fn wait_for_first_frame(&mut self, cancel: &CancelToken) -> Option<Frame> {
        if matches!(self.state, LinkState::Streaming { .. }) {
            tracing::debug!("previous session not ended, releasing handle");
            self.release();
        }

        loop {
            if cancel.is_cancelled() {
                self.release();
                return None;
            }

            let (action, frame) = self.step();
            match action {
                LinkAction::SessionStarted => return frame,
                LinkAction::RetryAfter(delay)
                | LinkAction::PollAfter(delay)
                | LinkAction::Reacquire(delay) => self.clock.sleep(delay),
                LinkAction::Acquire | LinkAction::Read => {}
                LinkAction::Deliver | LinkAction::EndOfStream => {
                    tracing::warn!(?action, "streaming action while waiting, reopening source");
                    self.release();
                }
            }
        }
    }

    /// Read the next frame of the current session.
    ///
    /// `None` means end-of-stream: the handle has been released and the
    /// next call to [`wait_for_first_frame`](Self::wait_for_first_frame)
    /// acquires a fresh one.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if !matches!(self.state, LinkState::Streaming { .. }) {
            return None;
        }

        match self.step() {
            (LinkAction::Deliver, frame) => frame,
            _ => None,
        }
    }

    /// Release the held handle, if any, and return to idle.
    pub fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
            tracing::debug!("source handle released");
        }
        self.state = LinkState::Idle;
    }

    fn step(&mut self) -> (LinkAction, Option<Frame>) {
        let Some(handle) = self.handle.as_mut() else {
            return (self.acquire(), None);
        };

        let frame = match handle.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "read failed");
                None
            }
        };
        let event = if frame.is_some() {
            LinkEvent::Frame
        } else {
            LinkEvent::NoFrame
        };

        let previous = self.state;
        let (next, action) = previous.on(event, self.clock.now(), &self.policy);
        self.state = next;

        match action {
            LinkAction::Reacquire(_) => {
                let waited = match previous {
                    LinkState::Waiting { since } => self.clock.now().saturating_duration_since(since),
                    _ => Duration::ZERO,
                };
                tracing::info!(
                    waited_ms = waited.as_millis() as u64,
                    "no frames within wait window, reopening source"
                );
                self.release();
                self.replacements += 1;
            }
            LinkAction::EndOfStream => {
                if let LinkState::Streaming { frames } = previous {
                    tracing::info!(frames, "stream ended");
                }
                self.release();
            }
            LinkAction::SessionStarted => {
                tracing::info!("first frame received");
            }
            _ => {}
        }

        (action, frame)
    }

    fn acquire(&mut self) -> LinkAction {
        self.acquisitions += 1;

        let event = match self.factory.acquire() {
            Ok(handle) if handle.is_open() => {
                tracing::info!(attempt = self.acquisitions, "source opened, waiting for stream");
                self.handle = Some(handle);
                LinkEvent::Acquired
            }
            Ok(mut handle) => {
                tracing::warn!(attempt = self.acquisitions, "source did not open");
                handle.release();
                LinkEvent::OpenFailed
            }
            Err(e) => {
                tracing::warn!(attempt = self.acquisitions, error = %e, "source failed to open");
                LinkEvent::OpenFailed
            }
        };

        let (next, action) = self.state.on(event, self.clock.now(), &self.policy);
        self.state = next;
        action
    }
}

impl<F: SourceFactory, C: Clock> Drop for ReconnectingSource<F, C> {
    fn drop(&mut self) {
        self.release();
    }
}
