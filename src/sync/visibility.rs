//! Visibility Signal
//!
//! Terminal stand-in for a page's visibility state. The dashboard treats each
//! Hidden -> Visible transition as a "wake" and resyncs, since the change feed
//! may have gone quiet while nobody was looking.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

const TRANSITION_BUFFER: usize = 16;

/// Whether the dashboard is currently being looked at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Visible => f.write_str("visible"),
            Visibility::Hidden => f.write_str("hidden"),
        }
    }
}

/// Source of visibility transitions
///
/// Cloning shares the same state; listeners see transitions from any clone.
#[derive(Clone)]
pub struct VisibilityHandle {
    state: Arc<watch::Sender<Visibility>>,
    transitions: broadcast::Sender<Visibility>,
}

impl Default for VisibilityHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityHandle {
    /// New handle, initially visible
    pub fn new() -> Self {
        let (state, _) = watch::channel(Visibility::Visible);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            state: Arc::new(state),
            transitions,
        }
    }

    pub fn current(&self) -> Visibility {
        *self.state.borrow()
    }

    /// Update the state, publishing only real transitions
    ///
    /// Returns whether the state changed.
    pub fn set(&self, visibility: Visibility) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });

        if changed {
            tracing::debug!(visibility = %visibility, "Visibility changed");
            // No listeners is fine
            let _ = self.transitions.send(visibility);
        }
        changed
    }

    pub fn hide(&self) -> bool {
        self.set(Visibility::Hidden)
    }

    pub fn show(&self) -> bool {
        self.set(Visibility::Visible)
    }

    /// Report a resume from system suspend as one wake
    ///
    /// A Hidden state set by the user is left alone; the wake comes when it
    /// is shown again. Returns whether a wake was published.
    pub fn resume(&self) -> bool {
        if self.current() == Visibility::Hidden {
            return false;
        }
        self.hide() && self.show()
    }

    /// Register a listener for future transitions
    pub fn listen(&self) -> VisibilityListener {
        VisibilityListener {
            rx: self.transitions.subscribe(),
        }
    }

    /// Number of listeners currently registered
    pub fn listener_count(&self) -> usize {
        self.transitions.receiver_count()
    }
}

/// Registered visibility listener; dropping it removes the registration
pub struct VisibilityListener {
    rx: broadcast::Receiver<Visibility>,
}

impl VisibilityListener {
    /// Wait for the next Hidden -> Visible transition
    ///
    /// Returns `None` once every handle is gone.
    pub async fn next_wake(&mut self) -> Option<()> {
        loop {
            match self.rx.recv().await {
                Ok(Visibility::Visible) => return Some(()),
                Ok(Visibility::Hidden) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Transitions alternate, so a lag always covers at least one wake
                    tracing::debug!(skipped, "Visibility listener lagged");
                    return Some(());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Gap between wall-clock and monotonic time that indicates a suspend
///
/// Returns the gap when wall-clock time ran ahead of the monotonic clock by
/// more than `threshold`.
pub fn suspend_gap(wall_elapsed: Duration, mono_elapsed: Duration, threshold: Duration) -> Option<Duration> {
    let gap = wall_elapsed.checked_sub(mono_elapsed)?;
    (gap > threshold).then_some(gap)
}

/// Configuration for [`WakeDetector`]
#[derive(Debug, Clone)]
pub struct WakeDetectorConfig {
    pub check_interval: Duration,
    pub gap_threshold: Duration,
}

impl Default for WakeDetectorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            gap_threshold: Duration::from_secs(10),
        }
    }
}

/// Detects system suspend and reports it as hidden-then-visible
///
/// The monotonic clock stops while the machine sleeps, wall-clock time does
/// not. A large difference between the two across one tick means the process
/// was frozen, just like a backgrounded tab.
pub struct WakeDetector {
    handle: VisibilityHandle,
    config: WakeDetectorConfig,
}

impl WakeDetector {
    pub fn new(handle: VisibilityHandle, config: WakeDetectorConfig) -> Self {
        Self { handle, config }
    }

    /// Spawn the detector; abort the returned task to stop it
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tracing::info!(
            interval_secs = self.config.check_interval.as_secs(),
            threshold_secs = self.config.gap_threshold.as_secs(),
            "Starting wake detector"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.check_interval);
            ticker.tick().await;

            let mut wall = Utc::now();
            let mut mono = Instant::now();

            loop {
                ticker.tick().await;

                let now_wall = Utc::now();
                let now_mono = Instant::now();
                let wall_elapsed = (now_wall - wall).to_std().unwrap_or_default();
                let mono_elapsed = now_mono.duration_since(mono);
                wall = now_wall;
                mono = now_mono;

                if let Some(gap) = suspend_gap(wall_elapsed, mono_elapsed, self.config.gap_threshold) {
                    let woke = self.handle.resume();
                    tracing::info!(gap_secs = gap.as_secs(), woke, "Resumed from suspend");
                }
            }
        })
    }
}
