//! Dashboard View
//!
//! Mounting the dashboard acquires two long-lived resources, the change
//! subscription and a visibility listener, and starts one live loop that
//! resyncs the list whenever either fires. Both resources belong to the loop
//! and are released on its single exit path.

use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::auth::SessionGuard;
use crate::backend::Backend;
use crate::realtime::{ChangeNotice, ChangeSubscription};
use crate::sync::{BookmarkList, VisibilityHandle, VisibilityListener};

use super::Navigator;

/// Counters from one mounted lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveStats {
    /// Change notices received
    pub notices: usize,
    /// Hidden -> Visible transitions received
    pub wakes: usize,
    /// Resyncs issued by the loop (the mount resync is not counted)
    pub resyncs: usize,
}

/// The bookmark dashboard, before mounting
pub struct DashboardView<B: Backend> {
    backend: Arc<B>,
    guard: SessionGuard<B>,
    visibility: VisibilityHandle,
}

impl<B: Backend + 'static> DashboardView<B> {
    pub fn new(backend: Arc<B>, navigator: Arc<dyn Navigator>, visibility: VisibilityHandle) -> Self {
        Self {
            guard: SessionGuard::new(Arc::clone(&backend), navigator),
            backend,
            visibility,
        }
    }

    /// Show the dashboard
    ///
    /// Returns `None` (after redirecting to the landing page) when there is no
    /// session; nothing is acquired in that case.
    pub async fn mount(&self) -> Option<MountedDashboard<B>> {
        if !self.guard.require_session().await {
            return None;
        }

        let subscription = match self.backend.subscribe().await {
            Ok(subscription) => {
                tracing::info!(topic = %subscription.topic(), "Subscribed to changes");
                Some(subscription)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Change subscription unavailable, relying on wake resyncs");
                None
            }
        };
        let listener = self.visibility.listen();

        let list = Arc::new(BookmarkList::new(Arc::clone(&self.backend)));
        list.resync().await;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(live_loop(
            Arc::clone(&list),
            subscription,
            listener,
            shutdown_rx,
        ));

        tracing::info!("Dashboard mounted");
        Some(MountedDashboard {
            list,
            guard: self.guard.clone(),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// A mounted dashboard
///
/// Call [`unmount`](Self::unmount) to tear it down and wait for the live loop
/// to finish. Dropping the handle also tears it down, without waiting.
pub struct MountedDashboard<B: Backend> {
    list: Arc<BookmarkList<B>>,
    guard: SessionGuard<B>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<LiveStats>>,
}

impl<B: Backend + 'static> MountedDashboard<B> {
    pub fn list(&self) -> &Arc<BookmarkList<B>> {
        &self.list
    }

    /// Stop the live loop and release its resources
    pub async fn unmount(mut self) -> LiveStats {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        let stats = match self.task.take() {
            Some(task) => match task.await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::error!(error = %e, "Dashboard loop panicked");
                    LiveStats::default()
                }
            },
            None => LiveStats::default(),
        };

        tracing::info!(
            notices = stats.notices,
            wakes = stats.wakes,
            resyncs = stats.resyncs,
            "Dashboard unmounted"
        );
        stats
    }

    /// Unmount and sign out
    pub async fn sign_out(self) {
        let guard = self.guard.clone();
        self.unmount().await;
        guard.sign_out().await;
    }
}

impl<B: Backend> Drop for MountedDashboard<B> {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn next_notice(subscription: &mut Option<ChangeSubscription>) -> Option<ChangeNotice> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

async fn next_wake(listener: &mut Option<VisibilityListener>) -> Option<()> {
    match listener {
        Some(listener) => listener.next_wake().await,
        None => std::future::pending().await,
    }
}

async fn live_loop<B: Backend>(
    list: Arc<BookmarkList<B>>,
    subscription: Option<ChangeSubscription>,
    listener: VisibilityListener,
    mut shutdown: oneshot::Receiver<()>,
) -> LiveStats {
    let mut subscription = subscription;
    let mut listener = Some(listener);
    let mut stats = LiveStats::default();

    loop {
        tokio::select! {
            biased;

            // Fires on send and when the handle is dropped
            _ = &mut shutdown => break,

            notice = next_notice(&mut subscription) => match notice {
                Some(notice) => {
                    tracing::debug!(kind = %notice.kind, table = %notice.table, "Change notice");
                    stats.notices += 1;
                    stats.resyncs += 1;
                    list.resync().await;
                }
                None => {
                    tracing::warn!("Change feed ended, relying on wake resyncs");
                    if let Some(subscription) = subscription.take() {
                        subscription.close();
                    }
                }
            },

            wake = next_wake(&mut listener) => match wake {
                Some(()) => {
                    tracing::debug!("Visible again, resyncing");
                    stats.wakes += 1;
                    stats.resyncs += 1;
                    list.resync().await;
                }
                None => {
                    listener = None;
                }
            },
        }
    }

    if let Some(subscription) = subscription.take() {
        subscription.close();
    }
    drop(listener);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::realtime::ChangeKind;
    use crate::views::{Route, RouteRecorder};
    use std::time::Duration;

    struct Fixture {
        backend: MemoryBackend,
        visibility: VisibilityHandle,
        recorder: Arc<RouteRecorder>,
        view: DashboardView<MemoryBackend>,
    }

    fn fixture(backend: MemoryBackend) -> Fixture {
        let visibility = VisibilityHandle::new();
        let recorder = Arc::new(RouteRecorder::new());
        let view = DashboardView::new(
            Arc::new(backend.clone()),
            recorder.clone(),
            visibility.clone(),
        );
        Fixture {
            backend,
            visibility,
            recorder,
            view,
        }
    }

    /// Wait until the backend has served `calls` list requests
    async fn wait_for_lists(backend: &MemoryBackend, calls: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.stats().list_calls < calls {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_mount_without_session_acquires_nothing() {
        let f = fixture(MemoryBackend::new());

        assert!(f.view.mount().await.is_none());
        assert_eq!(f.recorder.routes(), vec![Route::Landing]);
        assert_eq!(f.backend.stats().subscriptions_opened, 0);
        assert_eq!(f.backend.stats().list_calls, 0);
        assert_eq!(f.visibility.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_mount_loads_and_subscribes() {
        let f = fixture(MemoryBackend::signed_in("alice"));
        f.backend.seed("alice", "one", "https://1.example");

        let mounted = f.view.mount().await.unwrap();
        assert_eq!(mounted.list().bookmarks().len(), 1);
        assert_eq!(f.backend.stats().list_calls, 1);
        assert_eq!(f.backend.active_subscriptions(), 1);
        assert_eq!(f.visibility.listener_count(), 1);
        assert!(f.recorder.routes().is_empty());

        mounted.unmount().await;
    }

    #[tokio::test]
    async fn test_notice_from_other_session_resyncs() {
        let f = fixture(MemoryBackend::signed_in("alice"));
        let mounted = f.view.mount().await.unwrap();
        let mut state = mounted.list().subscribe_state();

        f.backend.seed("alice", "elsewhere", "https://e.example");
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| s.bookmarks.len() == 1),
        )
        .await
        .unwrap()
        .unwrap();

        let stats = mounted.unmount().await;
        assert_eq!(stats.notices, 1);
    }

    #[tokio::test]
    async fn test_one_resync_per_visibility_transition() {
        let f = fixture(MemoryBackend::signed_in("alice"));
        let mounted = f.view.mount().await.unwrap();
        assert_eq!(f.backend.stats().list_calls, 1);

        for round in 1..=3 {
            f.visibility.hide();
            // Hiding alone does nothing
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(f.backend.stats().list_calls, round);

            f.visibility.show();
            wait_for_lists(&f.backend, round + 1).await;
        }

        // Repeated "visible" is not a transition
        f.visibility.show();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.backend.stats().list_calls, 4);

        let stats = mounted.unmount().await;
        assert_eq!(stats.wakes, 3);
        assert_eq!(stats.resyncs, 3);
    }

    #[tokio::test]
    async fn test_unmount_releases_once_and_goes_quiet() {
        let f = fixture(MemoryBackend::signed_in("alice"));
        let mounted = f.view.mount().await.unwrap();
        mounted.unmount().await;

        let stats = f.backend.stats();
        assert_eq!(stats.subscriptions_opened, 1);
        assert_eq!(stats.subscriptions_closed, 1);
        assert_eq!(f.backend.active_subscriptions(), 0);
        assert_eq!(f.visibility.listener_count(), 0);

        // Nothing reacts after teardown
        f.backend.seed("alice", "late", "https://late.example");
        f.backend.notify(ChangeKind::Update);
        f.visibility.hide();
        f.visibility.show();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.backend.stats().list_calls, 1);
        assert_eq!(f.backend.stats().subscriptions_closed, 1);
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let f = fixture(MemoryBackend::signed_in("alice"));
        let mounted = f.view.mount().await.unwrap();
        drop(mounted);

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.backend.active_subscriptions() > 0 || f.visibility.listener_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.backend.stats().subscriptions_closed, 1);
    }

    #[tokio::test]
    async fn test_remount_does_not_duplicate_listeners() {
        let f = fixture(MemoryBackend::signed_in("alice"));

        for _ in 0..3 {
            let mounted = f.view.mount().await.unwrap();
            assert_eq!(f.backend.active_subscriptions(), 1);
            assert_eq!(f.visibility.listener_count(), 1);
            mounted.unmount().await;
        }
        assert_eq!(f.backend.stats().subscriptions_closed, 3);
    }

    #[tokio::test]
    async fn test_works_without_subscription() {
        let f = fixture(MemoryBackend::signed_in("alice"));
        f.backend.fail_next_subscribe("socket refused");

        let mounted = f.view.mount().await.unwrap();
        let list = Arc::clone(mounted.list());
        assert_eq!(f.backend.active_subscriptions(), 0);

        f.backend.seed("alice", "missed", "https://m.example");
        f.visibility.hide();
        f.visibility.show();
        wait_for_lists(&f.backend, 2).await;

        let stats = mounted.unmount().await;
        assert_eq!(stats.notices, 0);
        assert_eq!(stats.wakes, 1);
        assert_eq!(list.bookmarks().len(), 1);
    }

    #[tokio::test]
    async fn test_sign_out_unmounts_then_navigates() {
        let f = fixture(MemoryBackend::signed_in("alice"));
        let mounted = f.view.mount().await.unwrap();

        mounted.sign_out().await;
        assert_eq!(f.recorder.routes(), vec![Route::Landing]);
        assert_eq!(f.backend.active_subscriptions(), 0);
        assert!(f.backend.session().await.unwrap().is_none());
    }
}
