use crate::sources::{JobSource, StatsSource};
use crate::state::AppState;
use jc_core::config::StoreConfig;
use jc_core::{JobFilter, JobListing, NotificationDraft, NotificationId, SectionId, StatSnapshot};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no tokio runtime available to drive store timers")]
    NoRuntime,
}

/// What a one-shot removal removes. Captured when the timer is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKey {
    Pulse(SectionId),
    Notification(NotificationId),
}

type Listener = Arc<dyn Fn(&Arc<AppState>) + Send + Sync>;

struct PendingTimer {
    token: u64,
    handle: JoinHandle<()>,
}

struct StoreInner {
    config: StoreConfig,
    runtime: Handle,
    state: Mutex<Arc<AppState>>,
    changes: watch::Sender<Arc<AppState>>,
    timers: Mutex<HashMap<TimerKey, PendingTimer>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_notification_id: AtomicU64,
    next_timer_token: AtomicU64,
    next_listener_id: AtomicU64,
    closed: AtomicBool,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the application state. Clones share one store; construct one per
/// application (or per test) and pass it to whoever needs it.
#[derive(Clone)]
pub struct AppStore {
    inner: Arc<StoreInner>,
}

impl AppStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        Ok(Self::with_handle(config, runtime))
    }

    pub fn with_handle(config: StoreConfig, runtime: Handle) -> Self {
        let initial = Arc::new(AppState::default());
        let (changes, _) = watch::channel(initial.clone());
        Self {
            inner: Arc::new(StoreInner {
                config,
                runtime,
                state: Mutex::new(initial),
                changes,
                timers: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                next_notification_id: AtomicU64::new(1),
                next_timer_token: AtomicU64::new(1),
                next_listener_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        lock(&self.inner.state).clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<AppState>> {
        self.inner.changes.subscribe()
    }

    /// Registers a synchronous observer. It runs after every applied mutation with
    /// no store lock held, so it may call back into the store.
    pub fn on_change<F>(&self, listener: F) -> ChangeListener
    where
        F: Fn(&Arc<AppState>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        ChangeListener {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn pending_timers(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn set_active_section(&self, section: Option<SectionId>) {
        self.mutate("set_active_section", |state| {
            state.active_section = section;
            true
        });
    }

    pub fn set_mobile_menu_open(&self, open: bool) {
        self.mutate("set_mobile_menu_open", |state| {
            state.mobile_menu_open = open;
            true
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.mutate("set_loading", |state| {
            state.loading = loading;
            true
        });
    }

    pub fn replace_stats(&self, stats: StatSnapshot) {
        self.mutate("replace_stats", |state| {
            state.stats = stats;
            true
        });
    }

    pub fn replace_jobs(&self, jobs: Vec<JobListing>) {
        self.mutate("replace_jobs", |state| {
            state.jobs = Arc::new(jobs);
            true
        });
    }

    pub fn set_jobs_loading(&self, loading: bool) {
        self.mutate("set_jobs_loading", |state| {
            state.jobs_loading = loading;
            true
        });
    }

    pub fn set_selected_job(&self, job: Option<JobListing>) {
        self.mutate("set_selected_job", |state| {
            state.selected_job = job;
            true
        });
    }

    pub fn set_search_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.mutate("set_search_query", |state| {
            state.search_query = query;
            true
        });
    }

    /// Flags `section` for the pulse duration. A module that is already pulsing
    /// keeps its original deadline.
    pub fn add_pulsing_module(&self, section: SectionId) {
        let committed = {
            // Same lock as `expire`, so an add never lands between the timer
            // leaving the table and the section leaving the state.
            let mut timers = lock(&self.inner.timers);
            let committed = self.commit("add_pulsing_module", |state| {
                if state.is_pulsing(section) {
                    return false;
                }
                Arc::make_mut(&mut state.pulsing_modules).push(section);
                true
            });
            if committed.is_some() {
                self.spawn_removal(&mut timers, TimerKey::Pulse(section), self.inner.config.pulse_ttl);
            }
            committed
        };
        if let Some(snapshot) = committed {
            self.notify_listeners(&snapshot);
        }
    }

    pub fn add_notification(&self, draft: NotificationDraft) -> NotificationId {
        let id = NotificationId(self.inner.next_notification_id.fetch_add(1, Ordering::SeqCst));
        let notification = draft.into_notification(id);
        let added = self.mutate("add_notification", move |state| {
            Arc::make_mut(&mut state.notifications).push(notification);
            true
        });
        if added {
            self.schedule_removal(
                TimerKey::Notification(id),
                self.inner.config.notification_ttl,
            );
        }
        id
    }

    /// Removing an id that is not present is a no-op.
    pub fn remove_notification(&self, id: NotificationId) {
        self.cancel_timer(TimerKey::Notification(id));
        self.remove_notification_entry(id, "remove_notification");
    }

    pub async fn fetch_stats<S>(&self, source: &S) -> bool
    where
        S: StatsSource + ?Sized,
    {
        match source.current_stats().await {
            Ok(stats) => {
                self.replace_stats(stats);
                true
            }
            Err(err) => {
                warn!(event = "stats_fetch_failed", error = %err);
                false
            }
        }
    }

    pub async fn fetch_jobs<S>(&self, source: &S, filter: &JobFilter) -> bool
    where
        S: JobSource + ?Sized,
    {
        self.set_jobs_loading(true);
        let result = source.list_jobs(filter).await;
        self.finish_jobs_request("jobs_fetch_failed", result)
    }

    /// An empty query lists all jobs instead of searching.
    pub async fn search_jobs<S>(&self, source: &S, query: &str) -> bool
    where
        S: JobSource + ?Sized,
    {
        let query = query.trim();
        self.mutate("search_jobs", |state| {
            state.search_query = query.to_string();
            state.jobs_loading = true;
            true
        });
        let result = if query.is_empty() {
            source.list_jobs(&JobFilter::default()).await
        } else {
            source.search_jobs(query).await
        };
        self.finish_jobs_request("jobs_search_failed", result)
    }

    /// Cancels every pending removal. Later mutations and late timers are no-ops.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending: Vec<PendingTimer> = lock(&self.inner.timers)
            .drain()
            .map(|(_, timer)| timer)
            .collect();
        let cancelled = pending.len();
        for timer in pending {
            timer.handle.abort();
        }
        lock(&self.inner.listeners).clear();
        debug!(event = "store_shutdown", cancelled);
    }

    fn finish_jobs_request<E: Display>(
        &self,
        failure_event: &'static str,
        result: Result<Vec<JobListing>, E>,
    ) -> bool {
        match result {
            Ok(jobs) => {
                self.mutate("replace_jobs", |state| {
                    state.jobs = Arc::new(jobs);
                    state.jobs_loading = false;
                    true
                });
                true
            }
            Err(err) => {
                // keep whatever was shown before
                warn!(event = failure_event, error = %err);
                self.set_jobs_loading(false);
                false
            }
        }
    }

    fn remove_notification_entry(&self, id: NotificationId, op: &'static str) -> bool {
        self.mutate(op, |state| Self::drop_notification(state, id))
    }

    fn drop_notification(state: &mut AppState, id: NotificationId) -> bool {
        if state.notification(id).is_none() {
            return false;
        }
        Arc::make_mut(&mut state.notifications).retain(|notification| notification.id != id);
        true
    }

    fn drop_pulse(state: &mut AppState, section: SectionId) -> bool {
        if !state.is_pulsing(section) {
            return false;
        }
        Arc::make_mut(&mut state.pulsing_modules).retain(|pulsing| *pulsing != section);
        true
    }

    fn mutate<F>(&self, op: &'static str, apply: F) -> bool
    where
        F: FnOnce(&mut AppState) -> bool,
    {
        match self.commit(op, apply) {
            Some(snapshot) => {
                self.notify_listeners(&snapshot);
                true
            }
            None => false,
        }
    }

    /// Applies and publishes a change without running sync listeners, so callers
    /// holding the timer table can notify once it is released.
    fn commit<F>(&self, op: &'static str, apply: F) -> Option<Arc<AppState>>
    where
        F: FnOnce(&mut AppState) -> bool,
    {
        if self.is_closed() {
            trace!(event = "store_mutation_after_shutdown", op = op);
            return None;
        }
        let mut current = lock(&self.inner.state);
        let mut next = (**current).clone();
        if !apply(&mut next) {
            return None;
        }
        let next = Arc::new(next);
        *current = next.clone();
        self.inner.changes.send_replace(next.clone());
        trace!(event = "store_mutation", op = op);
        Some(next)
    }

    fn notify_listeners(&self, snapshot: &Arc<AppState>) {
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    fn schedule_removal(&self, key: TimerKey, after: Duration) {
        // Held across spawn so a timer that fires immediately still finds its entry.
        let mut timers = lock(&self.inner.timers);
        self.spawn_removal(&mut timers, key, after);
    }

    fn spawn_removal(&self, timers: &mut HashMap<TimerKey, PendingTimer>, key: TimerKey, after: Duration) {
        if self.is_closed() {
            return;
        }
        let token = self.inner.next_timer_token.fetch_add(1, Ordering::SeqCst);
        let store = Arc::downgrade(&self.inner);
        let handle = self.inner.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = store.upgrade() {
                AppStore { inner }.expire(key, token);
            }
        });
        if let Some(previous) = timers.insert(key, PendingTimer { token, handle }) {
            previous.handle.abort();
        }
    }

    fn cancel_timer(&self, key: TimerKey) {
        if let Some(timer) = lock(&self.inner.timers).remove(&key) {
            timer.handle.abort();
        }
    }

    fn expire(&self, key: TimerKey, token: u64) {
        let removed = {
            let mut timers = lock(&self.inner.timers);
            if !timers.get(&key).is_some_and(|pending| pending.token == token) {
                return;
            }
            timers.remove(&key);
            debug!(event = "store_timer_expired", key = ?key);
            // The state change happens before the table is released.
            match key {
                TimerKey::Pulse(section) => {
                    self.commit("expire_pulsing_module", |state| Self::drop_pulse(state, section))
                }
                TimerKey::Notification(id) => {
                    self.commit("expire_notification", |state| Self::drop_notification(state, id))
                }
            }
        };
        if let Some(snapshot) = removed {
            self.notify_listeners(&snapshot);
        }
    }
}

/// Keeps an `on_change` observer registered until dropped.
#[must_use = "dropping the handle unregisters the listener"]
pub struct ChangeListener {
    store: Weak<StoreInner>,
    id: u64,
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}
