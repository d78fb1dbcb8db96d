use jc_core::{LeadEvent, NotificationDraft, NotificationId, SectionId, StatSnapshot};
use jc_store::AppStore;
use tracing::{debug, info};

pub const LEAD_NOTIFICATION_TITLE: &str = "Neuer Lead!";

/// The view-side glue: turns user actions and pushed events into store mutations.
#[derive(Clone)]
pub struct LiveController {
    store: AppStore,
}

impl LiveController {
    pub fn new(store: AppStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AppStore {
        &self.store
    }

    /// Flags the section the lead came from (if it names one) and shows a
    /// success notification for it.
    pub fn on_new_lead(&self, lead: &LeadEvent) -> NotificationId {
        info!(
            event = "lead_received",
            name = %lead.name,
            position = %lead.position,
            source = %lead.source
        );
        match lead.section() {
            Some(section) => self.store.add_pulsing_module(section),
            None => debug!(event = "lead_source_unclassified", source = %lead.source),
        }
        self.store.add_notification(NotificationDraft::success(
            LEAD_NOTIFICATION_TITLE,
            format!("{} hat Interesse an {}", lead.name, lead.position),
        ))
    }

    pub fn apply_stats(&self, stats: StatSnapshot) {
        self.store.replace_stats(stats);
    }

    pub fn open_section(&self, section: SectionId) {
        self.store.set_active_section(Some(section));
    }

    pub fn close_panel(&self) {
        self.store.set_active_section(None);
    }

    pub fn toggle_mobile_menu(&self) {
        let open = self.store.snapshot().mobile_menu_open;
        self.store.set_mobile_menu_open(!open);
    }

    /// Menu navigation: opens the section and folds the mobile menu away.
    pub fn navigate(&self, section: SectionId) {
        self.open_section(section);
        self.store.set_mobile_menu_open(false);
    }

    pub fn dismiss_notification(&self, id: NotificationId) {
        self.store.remove_notification(id);
    }

    pub fn finish_splash(&self) {
        self.store.set_loading(false);
    }
}
