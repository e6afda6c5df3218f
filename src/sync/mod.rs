//! List Synchronization
//!
//! The only state the client owns is a mirror of the backend's bookmark rows.
//!
//! - **BookmarkList**: full fetch-and-replace resync, add and delete
//! - **VisibilityHandle**: hidden/visible transitions that trigger a resync
//! - **WakeDetector**: reports system suspend as a visibility transition

mod reconciler;
mod visibility;

pub use reconciler::{BookmarkForm, BookmarkList, DashboardState, SyncStatus, WriteOutcome};
pub use visibility::{
    suspend_gap, Visibility, VisibilityHandle, VisibilityListener, WakeDetector, WakeDetectorConfig,
};
