//! Calendar event model and pure scheduling helpers.

pub mod back_to_back;
pub mod conflict;
pub mod eligibility;
pub mod event;

pub use back_to_back::{
    current_meeting, detect_back_to_back, is_back_to_back, BackToBackState,
    BACK_TO_BACK_GAP_MINUTES,
};
pub use conflict::{find_conflicts, Conflict};
pub use eligibility::EligibilityFilter;
pub use event::{next_upcoming, Event, ResponseStatus};
