pub mod availability;
pub mod booking;
pub mod calendar_sync;
pub mod init;
pub mod recurrence;
