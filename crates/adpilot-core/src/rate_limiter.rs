//! Outbound call budget for the ads API.
//!
//! Three fixed windows (second, minute, hour) are tracked side by side. A call
//! is granted only when every window has headroom for its cost, and a grant
//! charges all three under the same lock. When any window is saturated the call
//! joins a bounded FIFO queue; queued calls are granted in order as windows
//! roll over. A full queue rejects new calls with
//! [`AdpilotError::Backpressure`].
//!
//! Each window rolls over `size` after its own previous reset, so the three
//! never reset in lock-step.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::{AdpilotError, Result};

// ---------------------------------------------------------------------------
// WindowKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Second,
    Minute,
    Hour,
}

impl WindowKind {
    pub fn size(self) -> Duration {
        match self {
            WindowKind::Second => Duration::from_secs(1),
            WindowKind::Minute => Duration::from_secs(60),
            WindowKind::Hour => Duration::from_secs(3600),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowKind::Second => "second",
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
        }
    }
}

#[derive(Debug)]
struct Window {
    kind: WindowKind,
    limit: u32,
    used: u32,
    reset_at: Instant,
}

impl Window {
    fn new(kind: WindowKind, limit: u32, now: Instant) -> Self {
        Self {
            kind,
            limit,
            used: 0,
            reset_at: now + kind.size(),
        }
    }

    /// Zero the counter if the window has rolled over, keeping `reset_at` on
    /// the window's own cadence.
    fn roll(&mut self, now: Instant) {
        if now < self.reset_at {
            return;
        }
        let size = self.kind.size();
        let missed = (now - self.reset_at).as_nanos() / size.as_nanos();
        let steps = u32::try_from(missed + 1).unwrap_or(u32::MAX);
        self.reset_at += size.saturating_mul(steps);
        self.used = 0;
    }

    fn has_room(&self, cost: u32) -> bool {
        self.used.saturating_add(cost) <= self.limit
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStatus {
    pub window: WindowKind,
    pub limit: u32,
    pub used: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub windows: Vec<WindowStatus>,
    pub queue_depth: usize,
    pub max_queue_depth: usize,
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Result of [`RateLimiter::admit`].
#[derive(Debug)]
pub enum Admission {
    Granted,
    /// Queued behind `position - 1` earlier calls. Await the ticket to be
    /// granted; drop it to give up the place in line.
    Queued { position: usize, ticket: Ticket },
}

struct Waiter {
    id: u64,
    cost: u32,
    tx: oneshot::Sender<()>,
}

struct State {
    windows: [Window; 3],
    queue: VecDeque<Waiter>,
    next_id: u64,
}

impl State {
    fn roll(&mut self, now: Instant) {
        for w in &mut self.windows {
            w.roll(now);
        }
    }

    fn has_room(&self, cost: u32) -> bool {
        self.windows.iter().all(|w| w.has_room(cost))
    }

    fn charge(&mut self, cost: u32) {
        for w in &mut self.windows {
            w.used += cost;
        }
    }

    /// Grant queued calls from the front while budget allows.
    fn service(&mut self, now: Instant) {
        self.roll(now);
        while let Some(front) = self.queue.front() {
            if front.tx.is_closed() {
                self.queue.pop_front();
                continue;
            }
            if !self.has_room(front.cost) {
                break;
            }
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            if waiter.tx.send(()).is_ok() {
                self.charge(waiter.cost);
            }
        }
    }

    fn next_reset(&self) -> Instant {
        self.windows
            .iter()
            .filter(|w| w.used > 0)
            .map(|w| w.reset_at)
            .min()
            .unwrap_or(self.windows[0].reset_at)
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Shared, cloneable handle to the call budget.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<State>>,
    max_queue_depth: usize,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_queue_depth", &self.max_queue_depth)
            .finish_non_exhaustive()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self::new_at(cfg, Instant::now())
    }

    fn new_at(cfg: &RateLimitConfig, now: Instant) -> Self {
        let state = State {
            windows: [
                Window::new(WindowKind::Second, cfg.per_second, now),
                Window::new(WindowKind::Minute, cfg.per_minute, now),
                Window::new(WindowKind::Hour, cfg.per_hour, now),
            ],
            queue: VecDeque::new(),
            next_id: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            max_queue_depth: cfg.max_queue_depth,
        }
    }

    /// Ask for `cost` calls of budget.
    pub fn admit(&self, cost: u32) -> Result<Admission> {
        self.admit_at(cost, Instant::now())
    }

    pub fn admit_at(&self, cost: u32, now: Instant) -> Result<Admission> {
        let mut st = lock(&self.state);
        let smallest = st.windows.iter().map(|w| w.limit).min().unwrap_or(0);
        if cost == 0 || cost > smallest {
            return Err(AdpilotError::InvalidInput(format!(
                "call cost {cost} can never be admitted (smallest window limit is {smallest})"
            )));
        }

        st.service(now);
        if st.queue.is_empty() && st.has_room(cost) {
            st.charge(cost);
            return Ok(Admission::Granted);
        }

        if st.queue.len() >= self.max_queue_depth {
            tracing::warn!(depth = st.queue.len(), "rate limiter queue full");
            return Err(AdpilotError::Backpressure {
                depth: st.queue.len(),
            });
        }

        let id = st.next_id;
        st.next_id += 1;
        let (tx, rx) = oneshot::channel();
        st.queue.push_back(Waiter { id, cost, tx });
        let position = st.queue.len();
        tracing::debug!(position, cost, "rate limiter call queued");
        Ok(Admission::Queued {
            position,
            ticket: Ticket {
                id,
                rx,
                state: Arc::clone(&self.state),
            },
        })
    }

    /// Admit `cost` calls, waiting in the queue if needed.
    ///
    /// Fails fast with `Backpressure` when the queue is full.
    pub async fn acquire(&self, cost: u32) -> Result<()> {
        match self.admit(cost)? {
            Admission::Granted => Ok(()),
            Admission::Queued { ticket, .. } => ticket.wait().await,
        }
    }

    /// Like [`acquire`](Self::acquire), but on backpressure sleeps until the
    /// next window reset and asks again instead of failing.
    pub async fn acquire_patiently(&self, cost: u32) -> Result<()> {
        loop {
            match self.acquire(cost).await {
                Err(AdpilotError::Backpressure { depth }) => {
                    tracing::debug!(depth, "backpressure, waiting for window reset");
                    let at = self.next_reset();
                    tokio::time::sleep_until(at).await;
                }
                other => return other,
            }
        }
    }

    /// Earliest instant at which a saturated window rolls over.
    pub fn next_reset(&self) -> Instant {
        lock(&self.state).next_reset()
    }

    pub fn status(&self) -> RateLimitStatus {
        self.status_at(Instant::now(), Utc::now())
    }

    fn status_at(&self, now: Instant, wall: DateTime<Utc>) -> RateLimitStatus {
        let mut st = lock(&self.state);
        st.service(now);
        let windows = st
            .windows
            .iter()
            .map(|w| {
                let remaining = w.reset_at.saturating_duration_since(now);
                WindowStatus {
                    window: w.kind,
                    limit: w.limit,
                    used: w.used,
                    reset_at: wall
                        + chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero()),
                }
            })
            .collect();
        RateLimitStatus {
            windows,
            queue_depth: st.queue.len(),
            max_queue_depth: self.max_queue_depth,
        }
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// A place in the rate limiter queue.
pub struct Ticket {
    id: u64,
    rx: oneshot::Receiver<()>,
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket").field("id", &self.id).finish()
    }
}

impl Ticket {
    /// Wait until the queued call is granted.
    pub async fn wait(mut self) -> Result<()> {
        loop {
            let deadline = lock(&self.state).next_reset();
            tokio::select! {
                granted = &mut self.rx => {
                    return granted.map_err(|_| {
                        AdpilotError::InvalidInput("rate limiter ticket was discarded".to_string())
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    lock(&self.state).service(Instant::now());
                }
            }
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut st = lock(&self.state);
        st.queue.retain(|w| w.id != self.id);
    }
}
