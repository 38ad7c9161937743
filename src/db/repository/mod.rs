pub mod booking_plan_repository;
pub mod booking_request_repository;
pub mod intake_slot_repository;
pub mod legacy_assignment_repository;
pub mod location_repository;
pub mod room_repository;
pub mod slot_event_repository;
pub mod standing_assignment_repository;
pub mod user_repository;

pub use self::booking_plan_repository::BookingPlanRepository;
pub use self::booking_request_repository::BookingRequestRepository;
pub use self::intake_slot_repository::IntakeSlotRepository;
pub use self::legacy_assignment_repository::LegacyAssignmentRepository;
pub use self::location_repository::LocationRepository;
pub use self::room_repository::RoomRepository;
pub use self::slot_event_repository::{BookOutcome, NewSlotBooking, SlotEventRepository};
pub use self::standing_assignment_repository::StandingAssignmentRepository;
pub use self::user_repository::UserRepository;
