pub mod channel_wire;
pub mod config;
pub mod model;

pub use model::{
    Ack, ApplicationReceipt, ConsultationBooking, ConsultationSlot, Course,
    JobApplication, JobFilter, JobListing, Lead, LeadEvent, LeadReceipt, Notification,
    NotificationDraft, NotificationId, NotificationKind, SectionId, StatSnapshot, TrackedEvent,
    UnknownSection,
};
