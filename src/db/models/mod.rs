#![allow(unused_imports)]

//! Database models split into separate files, re-exported at
//! `crate::db::models` so call sites can import from one place.

pub mod booking_plan;
pub mod booking_request;
pub mod intake_slot;
pub mod legacy_assignment;
pub mod location;
pub mod room;
pub mod slot_event;
pub mod standing_assignment;
pub mod user;

pub use self::booking_plan::*;
pub use self::booking_request::*;
pub use self::intake_slot::*;
pub use self::legacy_assignment::*;
pub use self::location::*;
pub use self::room::*;
pub use self::slot_event::*;
pub use self::standing_assignment::*;
pub use self::user::*;
