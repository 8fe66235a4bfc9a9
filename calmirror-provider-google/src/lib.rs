//! Google Calendar side of calmirror.

mod app_config;
mod calendar;
mod convert;
mod session;

pub use app_config::{Credentials, base_dir};
pub use calendar::GoogleCalendar;
pub use session::{Session, SessionData};
