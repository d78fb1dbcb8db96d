use jc_core::{JobListing, Notification, NotificationId, SectionId, StatSnapshot};
use std::sync::Arc;

/// Everything the view renders. Published as immutable snapshots: collections are
/// `Arc`-shared between snapshots and copied before they are changed.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub active_section: Option<SectionId>,
    pub mobile_menu_open: bool,
    pub loading: bool,
    pub stats: StatSnapshot,
    pub jobs: Arc<Vec<JobListing>>,
    pub jobs_loading: bool,
    pub selected_job: Option<JobListing>,
    pub search_query: String,
    /// Insertion ordered, never contains duplicates.
    pub pulsing_modules: Arc<Vec<SectionId>>,
    /// Insertion order is display order.
    pub notifications: Arc<Vec<Notification>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            active_section: None,
            mobile_menu_open: false,
            loading: true,
            stats: StatSnapshot::default(),
            jobs: Arc::new(Vec::new()),
            jobs_loading: false,
            selected_job: None,
            search_query: String::new(),
            pulsing_modules: Arc::new(Vec::new()),
            notifications: Arc::new(Vec::new()),
        }
    }
}

impl AppState {
    pub fn is_pulsing(&self, section: SectionId) -> bool {
        self.pulsing_modules.contains(&section)
    }

    pub fn notification(&self, id: NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|notification| notification.id == id)
    }
}
