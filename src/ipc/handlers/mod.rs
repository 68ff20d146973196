pub mod attendance;
pub mod core;
pub mod notifications;
pub mod qr;
pub mod reports;
pub mod roster;
pub mod scores;
pub mod setup;
pub mod timetable;
