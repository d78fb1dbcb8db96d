use jc_core::{Notification, NotificationId, SectionId, StatSnapshot};
use jc_store::AppState;
use tracing::{debug, info};

/// What a renderer would redraw between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    Section(Option<SectionId>),
    MobileMenu(bool),
    Loading(bool),
    Stats(StatSnapshot),
    Jobs { count: usize, loading: bool },
    PulseStarted(SectionId),
    PulseEnded(SectionId),
    NotificationShown(Notification),
    NotificationGone(NotificationId),
}

pub fn diff(previous: &AppState, current: &AppState) -> Vec<ViewChange> {
    let mut changes = Vec::new();
    if previous.active_section != current.active_section {
        changes.push(ViewChange::Section(current.active_section));
    }
    if previous.mobile_menu_open != current.mobile_menu_open {
        changes.push(ViewChange::MobileMenu(current.mobile_menu_open));
    }
    if previous.loading != current.loading {
        changes.push(ViewChange::Loading(current.loading));
    }
    if previous.stats != current.stats {
        changes.push(ViewChange::Stats(current.stats));
    }
    if previous.jobs != current.jobs || previous.jobs_loading != current.jobs_loading {
        changes.push(ViewChange::Jobs {
            count: current.jobs.len(),
            loading: current.jobs_loading,
        });
    }
    for section in current.pulsing_modules.iter() {
        if !previous.is_pulsing(*section) {
            changes.push(ViewChange::PulseStarted(*section));
        }
    }
    for section in previous.pulsing_modules.iter() {
        if !current.is_pulsing(*section) {
            changes.push(ViewChange::PulseEnded(*section));
        }
    }
    for notification in current.notifications.iter() {
        if previous.notification(notification.id).is_none() {
            changes.push(ViewChange::NotificationShown(notification.clone()));
        }
    }
    for notification in previous.notifications.iter() {
        if current.notification(notification.id).is_none() {
            changes.push(ViewChange::NotificationGone(notification.id));
        }
    }
    changes
}

/// Headless rendering: every visible change becomes a log line.
pub fn render(previous: &AppState, current: &AppState) {
    for change in diff(previous, current) {
        match change {
            ViewChange::NotificationShown(notification) => info!(
                event = "view_notification",
                id = %notification.id,
                kind = notification.kind.as_str(),
                title = %notification.title,
                message = %notification.message
            ),
            ViewChange::PulseStarted(section) => info!(event = "view_pulse_start", section = %section),
            ViewChange::Stats(stats) => info!(
                event = "view_stats",
                open_positions = stats.open_positions,
                successful_placements = stats.successful_placements,
                consultations_per_month = stats.consultations_per_month,
                courses = stats.courses
            ),
            other => debug!(event = "view_change", change = ?other),
        }
    }
}
