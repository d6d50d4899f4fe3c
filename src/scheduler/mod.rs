//! Background meeting scheduler.
//!
//! Sends the pre-meeting reminder and the post-start attendance check. Both
//! are gated on the meeting's `reminder_sent` latch, so each meeting is acted
//! on at most once.

pub mod checks;
pub mod runner;

pub use checks::{CheckWindows, DueCheck, due_check};
pub use runner::{CheckOutcome, MeetingScheduler, SchedulerSettings, TickReport};
