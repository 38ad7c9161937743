use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{
    event_source, AssignedFrequency, BookedFrequency, BookingRequest, Location, Recurrence,
    RequestStatus, Room, SessionKind, SlotEvent, SlotState, User,
};
use crate::db::repository::{
    BookOutcome, BookingPlanRepository, BookingRequestRepository, IntakeSlotRepository,
    LocationRepository, NewSlotBooking, RoomRepository, SlotEventRepository,
    StandingAssignmentRepository, UserRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::availability::is_room_open_at;
use crate::services::calendar_sync::CalendarSyncService;
use crate::services::recurrence::materialize_week;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequest {
    pub room_id: Option<String>,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub recurrence: Recurrence,
    #[serde(default)]
    pub open_to_alternative_room: bool,
    pub notes: Option<String>,
}

/// What a provider gets back from submitting a request: either the booked
/// slot (same-day fast path) or the queued request.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestOutcome {
    #[serde(rename = "auto_booked")]
    AutoBooked { event: SlotEvent },
    #[serde(rename = "request")]
    Pending { request: BookingRequest },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedBooking {
    pub request: BookingRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<SlotEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standing_assignment_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelScope {
    /// This occurrence only.
    Occurrence,
    /// This occurrence and everything after it in the series.
    Future,
}

/// Today's date on the location's wall clock, not the server's.
pub fn local_today(location: &Location, now_utc: DateTime<Utc>) -> AppResult<NaiveDate> {
    let tz: Tz = location.timezone.parse().map_err(|_| {
        AppError::Internal(anyhow::anyhow!(
            "location {} has invalid timezone {}",
            location.id,
            location.timezone
        ))
    })?;
    Ok(now_utc.with_timezone(&tz).date_naive())
}

fn validate_slot(start_at: NaiveDateTime, end_at: NaiveDateTime) -> AppResult<()> {
    if start_at.minute() != 0 || start_at.second() != 0 {
        return Err(AppError::Validation(
            "Slots start on the hour".to_string(),
        ));
    }
    if end_at != start_at + chrono::Duration::hours(1) {
        return Err(AppError::Validation(
            "Slots are exactly one hour long".to_string(),
        ));
    }
    Ok(())
}

pub async fn ensure_can_schedule(
    pool: &SqlitePool,
    provider_id: &str,
    today: NaiveDate,
) -> AppResult<()> {
    if UserRepository::has_blocking_expired_credential(pool, provider_id, today).await? {
        return Err(AppError::ComplianceBlocked);
    }
    Ok(())
}

/// Tenant boundary: anyone short of super admin must reach the location
/// through an agency link.
async fn ensure_location_access(
    pool: &SqlitePool,
    user: &User,
    location_id: &str,
) -> AppResult<()> {
    if user.is_super_admin() {
        return Ok(());
    }
    if !LocationRepository::user_has_access(pool, &user.id, location_id).await? {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Rooms to try for a request, requested room first. With
/// `open_to_alternative_room` every other active room at the location is a
/// fallback.
async fn candidate_rooms(
    pool: &SqlitePool,
    location: &Location,
    room_id: Option<&str>,
    open_to_alternative_room: bool,
) -> AppResult<Vec<Room>> {
    let mut rooms: Vec<Room> = Vec::new();
    if let Some(room_id) = room_id {
        let room = RoomRepository::find_by_id(pool, room_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;
        if room.location_id != location.id {
            return Err(AppError::BadRequest(
                "Room does not belong to this location".to_string(),
            ));
        }
        rooms.push(room);
    }
    if open_to_alternative_room || rooms.is_empty() {
        for room in RoomRepository::list_active_for_location(pool, &location.id).await? {
            if rooms.iter().all(|r| r.id != room.id) {
                rooms.push(room);
            }
        }
    }
    if rooms.is_empty() {
        return Err(AppError::BadRequest(
            "Request needs a room or openToAlternativeRoom".to_string(),
        ));
    }
    Ok(rooms)
}

/// Submits a booking request. One-time requests for the location's current
/// day skip the approval queue entirely and book on the spot; everything
/// else lands in the pending queue for staff.
pub async fn create_request(
    pool: &SqlitePool,
    sync: &CalendarSyncService,
    location: &Location,
    provider: &User,
    req: NewRequest,
    now_utc: DateTime<Utc>,
) -> AppResult<RequestOutcome> {
    validate_slot(req.start_at, req.end_at)?;

    let today = local_today(location, now_utc)?;
    ensure_can_schedule(pool, &provider.id, today).await?;

    if req.start_at.date() < today {
        return Err(AppError::Validation(
            "Cannot request a slot in the past".to_string(),
        ));
    }
    if req.room_id.is_none() && !req.open_to_alternative_room {
        return Err(AppError::Validation(
            "Request needs a room or openToAlternativeRoom".to_string(),
        ));
    }

    if req.recurrence == Recurrence::Once && req.start_at.date() == today {
        // Standing claims must be visible as events before the open scan.
        materialize_week(pool, &location.id, req.start_at.date()).await?;

        let rooms = candidate_rooms(
            pool,
            location,
            req.room_id.as_deref(),
            req.open_to_alternative_room,
        )
        .await?;

        for room in rooms {
            if !is_room_open_at(pool, &room.id, req.start_at, req.end_at).await? {
                continue;
            }
            let booking = NewSlotBooking {
                location_id: location.id.clone(),
                room_id: room.id.clone(),
                start_at: req.start_at,
                end_at: req.end_at,
                booked_provider_id: provider.id.clone(),
                standing_assignment_id: None,
                booking_plan_id: None,
                recurrence_group_id: None,
                source: event_source::AUTO_BOOK.to_string(),
                notes: req.notes.clone(),
                created_by: Some(provider.id.clone()),
                approved_by: None,
            };
            match SlotEventRepository::book_exclusive(pool, &booking).await? {
                BookOutcome::Booked(event) => {
                    info!(event_id = %event.id, room_id = %room.id, "same-day request auto-booked");
                    push_sync(pool, sync, &event.id).await;
                    let event = SlotEventRepository::find_by_id(pool, &event.id)
                        .await?
                        .unwrap_or(event);
                    return Ok(RequestOutcome::AutoBooked { event });
                }
                // Lost the race for this room; try the next candidate.
                BookOutcome::Conflict(_) => continue,
            }
        }
        return Err(AppError::Conflict(
            "No room is available at the requested time".to_string(),
        ));
    }

    let request = BookingRequestRepository::create(
        pool,
        &location.id,
        req.room_id.as_deref(),
        &provider.id,
        req.start_at,
        req.end_at,
        req.recurrence,
        req.open_to_alternative_room,
        req.notes.as_deref(),
    )
    .await?;

    Ok(RequestOutcome::Pending { request })
}

fn recurrence_cadence(recurrence: Recurrence) -> Option<(AssignedFrequency, BookedFrequency)> {
    match recurrence {
        Recurrence::Once => None,
        Recurrence::Weekly => Some((AssignedFrequency::Weekly, BookedFrequency::Weekly)),
        Recurrence::Biweekly => Some((AssignedFrequency::Biweekly, BookedFrequency::Biweekly)),
        // A monthly cadence still claims the cell every week; the plan
        // decides which weeks actually book.
        Recurrence::Monthly => Some((AssignedFrequency::Weekly, BookedFrequency::Monthly)),
    }
}

/// Approves a pending request, re-validating availability at decision time.
/// When the slot has been taken since the request was filed the approval
/// fails with a conflict and the request stays pending.
pub async fn approve_request(
    pool: &SqlitePool,
    sync: &CalendarSyncService,
    approver: &User,
    request_id: &str,
    comment: Option<&str>,
    now_utc: DateTime<Utc>,
) -> AppResult<ApprovedBooking> {
    if !approver.can_manage_schedule() {
        return Err(AppError::Forbidden);
    }

    let request = BookingRequestRepository::find_by_id(pool, request_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking request not found".to_string()))?;
    ensure_location_access(pool, approver, &request.location_id).await?;
    if request.status != RequestStatus::Pending {
        return Err(AppError::Conflict(
            "Request has already been decided".to_string(),
        ));
    }

    let location = LocationRepository::find_by_id(pool, &request.location_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Location not found".to_string()))?;

    // The provider's standing can change between filing and approval.
    let today = local_today(&location, now_utc)?;
    ensure_can_schedule(pool, &request.requested_provider_id, today).await?;

    materialize_week(pool, &location.id, request.start_at.date()).await?;
    let rooms = candidate_rooms(
        pool,
        &location,
        request.room_id.as_deref(),
        request.open_to_alternative_room,
    )
    .await?;

    let mut chosen: Option<Room> = None;
    for room in rooms {
        if is_room_open_at(pool, &room.id, request.start_at, request.end_at).await? {
            chosen = Some(room);
            break;
        }
    }
    let Some(room) = chosen else {
        return Err(AppError::Conflict(
            "Requested slot is no longer available".to_string(),
        ));
    };

    match recurrence_cadence(request.recurrence) {
        None => {
            let booking = NewSlotBooking {
                location_id: location.id.clone(),
                room_id: room.id.clone(),
                start_at: request.start_at,
                end_at: request.end_at,
                booked_provider_id: request.requested_provider_id.clone(),
                standing_assignment_id: None,
                booking_plan_id: None,
                recurrence_group_id: None,
                source: event_source::BOOKING_APPROVAL.to_string(),
                notes: request.requester_notes.clone(),
                created_by: Some(request.requested_provider_id.clone()),
                approved_by: Some(approver.id.clone()),
            };
            let event = match SlotEventRepository::book_exclusive(pool, &booking).await? {
                BookOutcome::Booked(event) => event,
                BookOutcome::Conflict(_) => {
                    return Err(AppError::Conflict(
                        "Requested slot is no longer available".to_string(),
                    ))
                }
            };
            let request = BookingRequestRepository::mark_decided(
                pool,
                &request.id,
                RequestStatus::Approved,
                &approver.id,
                comment,
            )
            .await?
            .ok_or_else(|| {
                AppError::Conflict("Request has already been decided".to_string())
            })?;

            push_sync(pool, sync, &event.id).await;
            let event = SlotEventRepository::find_by_id(pool, &event.id).await?.unwrap_or(event);
            Ok(ApprovedBooking {
                request,
                event: Some(event),
                standing_assignment_id: None,
            })
        }
        Some((assigned_frequency, booked_frequency)) => {
            let start_date = request.start_at.date();
            let weekday = start_date.weekday().num_days_from_sunday() as i64;
            let hour = request.start_at.hour() as i64;
            let group_id = Uuid::new_v4().to_string();

            let assignment = StandingAssignmentRepository::create(
                pool,
                &location.id,
                &room.id,
                &request.requested_provider_id,
                weekday,
                hour,
                assigned_frequency,
                Some(&group_id),
                Some(start_date),
                Some(&approver.id),
            )
            .await?;
            BookingPlanRepository::create_active(
                pool,
                &assignment.id,
                booked_frequency,
                start_date,
                None,
                None,
                Some(&approver.id),
            )
            .await?;

            materialize_week(pool, &location.id, start_date).await?;

            let request = BookingRequestRepository::mark_decided(
                pool,
                &request.id,
                RequestStatus::Approved,
                &approver.id,
                comment,
            )
            .await?
            .ok_or_else(|| {
                AppError::Conflict("Request has already been decided".to_string())
            })?;

            let first = SlotEventRepository::list_occupying_overlaps(
                pool,
                &room.id,
                request.start_at,
                request.end_at,
            )
            .await?
            .into_iter()
            .next();
            if let Some(event) = &first {
                push_sync(pool, sync, &event.id).await;
            }
            let first = match first {
                Some(event) => SlotEventRepository::find_by_id(pool, &event.id).await?,
                None => None,
            };

            Ok(ApprovedBooking {
                request,
                event: first,
                standing_assignment_id: Some(assignment.id),
            })
        }
    }
}

pub async fn deny_request(
    pool: &SqlitePool,
    approver: &User,
    request_id: &str,
    comment: Option<&str>,
) -> AppResult<BookingRequest> {
    if !approver.can_manage_schedule() {
        return Err(AppError::Forbidden);
    }
    let request = BookingRequestRepository::find_by_id(pool, request_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking request not found".to_string()))?;
    ensure_location_access(pool, approver, &request.location_id).await?;
    if request.status != RequestStatus::Pending {
        return Err(AppError::Conflict(
            "Request has already been decided".to_string(),
        ));
    }
    BookingRequestRepository::mark_decided(
        pool,
        &request.id,
        RequestStatus::Denied,
        &approver.id,
        comment,
    )
    .await?
    .ok_or_else(|| AppError::Conflict("Request has already been decided".to_string()))
}

/// Cancels a slot event. `Future` scope takes down the whole series from
/// this occurrence on: remaining events, the standing assignments behind
/// them, and their booking plans.
pub async fn cancel_event(
    pool: &SqlitePool,
    sync: &CalendarSyncService,
    actor: &User,
    event_id: &str,
    scope: CancelScope,
) -> AppResult<u64> {
    let event = SlotEventRepository::find_by_id(pool, event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Slot event not found".to_string()))?;
    ensure_location_access(pool, actor, &event.location_id).await?;
    if event.slot_state == SlotState::Cancelled {
        return Err(AppError::Conflict("Slot is already cancelled".to_string()));
    }

    let is_own = event.booked_provider_id.as_deref() == Some(actor.id.as_str())
        || event.assigned_provider_id.as_deref() == Some(actor.id.as_str());
    if !actor.can_manage_schedule() && !is_own {
        return Err(AppError::Forbidden);
    }

    let group = event.recurrence_group_id.clone();
    let cancelled = match (scope, group) {
        (CancelScope::Future, Some(group_id)) => {
            let series =
                SlotEventRepository::list_group_from(pool, &group_id, event.start_at).await?;
            let count =
                SlotEventRepository::cancel_group_from(pool, &group_id, event.start_at).await?;

            for assignment in
                StandingAssignmentRepository::list_active_by_group(pool, &group_id).await?
            {
                if let Some(plan) =
                    BookingPlanRepository::active_for_assignment(pool, &assignment.id).await?
                {
                    BookingPlanRepository::deactivate(pool, &plan.id).await?;
                }
            }
            StandingAssignmentRepository::deactivate_group(pool, &group_id).await?;

            for cancelled_event in &series {
                retract_event_side_effects(pool, sync, cancelled_event).await?;
            }
            count
        }
        (scope, group) => {
            if scope == CancelScope::Future && group.is_none() {
                warn!(event_id, "future-scope cancel on an event without a series; cancelling the occurrence");
            }
            let count = SlotEventRepository::cancel(pool, &event.id).await?;
            retract_event_side_effects(pool, sync, &event).await?;
            count
        }
    };

    info!(event_id, cancelled, "slot event cancelled");
    Ok(cancelled)
}

/// Cleanup that follows any cancellation: intake markers derived from the
/// event go away and the mirrored calendar event is deleted best-effort.
async fn retract_event_side_effects(
    pool: &SqlitePool,
    sync: &CalendarSyncService,
    event: &SlotEvent,
) -> AppResult<()> {
    IntakeSlotRepository::deactivate_for_event(pool, &event.id, SessionKind::VirtualIntake)
        .await?;
    IntakeSlotRepository::deactivate_for_event(pool, &event.id, SessionKind::VirtualRegular)
        .await?;
    IntakeSlotRepository::deactivate_for_event(pool, &event.id, SessionKind::InPersonIntake)
        .await?;

    if event.external_event_id.is_some() {
        if let Err(err) = sync.cancel_booked_event(pool, event).await {
            warn!(event_id = %event.id, error = %err, "calendar retraction failed");
        }
    }
    Ok(())
}

/// Toggles an intake marker on a booked slot.
pub async fn set_intake_flag(
    pool: &SqlitePool,
    actor: &User,
    event_id: &str,
    session_kind: SessionKind,
    enabled: bool,
) -> AppResult<()> {
    if !actor.can_manage_schedule() {
        return Err(AppError::Forbidden);
    }

    let event = SlotEventRepository::find_by_id(pool, event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Slot event not found".to_string()))?;
    ensure_location_access(pool, actor, &event.location_id).await?;
    if event.slot_state != SlotState::AssignedBooked {
        return Err(AppError::Conflict(
            "Intake flags apply to booked slots only".to_string(),
        ));
    }
    let Some(provider_id) = event.booked_provider_id.as_deref() else {
        return Err(AppError::Conflict(
            "Booked slot has no provider".to_string(),
        ));
    };

    if !enabled {
        IntakeSlotRepository::deactivate_for_event(pool, &event.id, session_kind).await?;
        return Ok(());
    }

    let agencies = UserRepository::agency_ids_for_user(pool, provider_id).await?;
    let Some(agency_id) = agencies.first() else {
        return Err(AppError::Validation(
            "Provider does not belong to an agency".to_string(),
        ));
    };

    IntakeSlotRepository::upsert(
        pool,
        agency_id,
        provider_id,
        &event.location_id,
        Some(&event.room_id),
        event.start_at,
        event.end_at,
        session_kind,
        Some(&event.id),
        Some(&actor.id),
    )
    .await?;
    Ok(())
}

/// Pushes a freshly booked event to the calendar without letting sync
/// trouble disturb the booking itself.
async fn push_sync(pool: &SqlitePool, sync: &CalendarSyncService, event_id: &str) {
    if let Err(err) = SlotEventRepository::mark_sync_pending(pool, event_id).await {
        warn!(event_id, error = %err, "could not mark slot for sync");
        return;
    }
    if let Err(err) = sync.upsert_booked_event(pool, event_id).await {
        warn!(event_id, error = %err, "calendar sync errored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    use crate::config::CalendarConfig;
    use crate::db::models::SyncStatus;
    use crate::db::repository::LocationRepository;
    use crate::services::init::test_pool;

    struct Fixture {
        pool: SqlitePool,
        sync: CalendarSyncService,
        location: Location,
        room: Room,
        provider: User,
        staff: User,
        agency_id: String,
    }

    async fn fixture() -> Fixture {
        let pool = test_pool().await;
        let sync = CalendarSyncService::new(CalendarConfig {
            base_url: None,
            api_token: None,
            timeout_seconds: 1,
        })
        .unwrap();
        let location = LocationRepository::create(&pool, "Main Clinic", "America/New_York")
            .await
            .unwrap();
        let room = RoomRepository::create(&pool, &location.id, "101", Some(101), None)
            .await
            .unwrap();
        let provider = UserRepository::create(
            &pool, "prov@x.test", "hash", "Pat", "Quinn", "provider", None,
        )
        .await
        .unwrap();
        let staff =
            UserRepository::create(&pool, "staff@x.test", "hash", "Sam", "Reed", "staff", None)
                .await
                .unwrap();

        let agency_id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO agencies (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&agency_id)
            .bind("Agency")
            .bind(chrono::Utc::now().naive_utc())
            .execute(&pool)
            .await
            .unwrap();
        LocationRepository::link_agency(&pool, &location.id, &agency_id)
            .await
            .unwrap();
        UserRepository::add_to_agency(&pool, &provider.id, &agency_id)
            .await
            .unwrap();
        UserRepository::add_to_agency(&pool, &staff.id, &agency_id)
            .await
            .unwrap();

        Fixture {
            pool,
            sync,
            location,
            room,
            provider,
            staff,
            agency_id,
        }
    }

    fn slot(date: NaiveDate, hour: u32) -> (NaiveDateTime, NaiveDateTime) {
        let start = date.and_hms_opt(hour, 0, 0).unwrap();
        (start, start + chrono::Duration::hours(1))
    }

    fn request(f: &Fixture, start: NaiveDateTime, end: NaiveDateTime, r: Recurrence) -> NewRequest {
        NewRequest {
            room_id: Some(f.room.id.clone()),
            start_at: start,
            end_at: end,
            recurrence: r,
            open_to_alternative_room: false,
            notes: None,
        }
    }

    #[tokio::test]
    async fn same_day_once_request_books_immediately() {
        let f = fixture().await;
        // 22:00 UTC on Aug 26 is still Aug 26 in New York.
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 22, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 8, 26).unwrap(), 19);

        let outcome = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await
        .unwrap();

        let RequestOutcome::AutoBooked { event } = outcome else {
            panic!("expected immediate booking");
        };
        assert_eq!(event.slot_state, SlotState::AssignedBooked);
        assert_eq!(event.booked_provider_id.as_deref(), Some(f.provider.id.as_str()));
        // Sync was attempted and failed (unconfigured), but the booking holds.
        assert_eq!(event.sync_status, Some(SyncStatus::Failed));
    }

    #[tokio::test]
    async fn location_day_decides_same_day_not_utc_day() {
        let f = fixture().await;
        // 02:00 UTC Aug 27 is 22:00 Aug 26 in New York.
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 2, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 8, 26).unwrap(), 23);

        let outcome = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, RequestOutcome::AutoBooked { .. }));
    }

    #[tokio::test]
    async fn future_once_request_queues_for_approval() {
        let f = fixture().await;
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);

        let outcome = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await
        .unwrap();

        let RequestOutcome::Pending { request } = outcome else {
            panic!("expected pending request");
        };
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn double_booking_same_slot_conflicts() {
        let f = fixture().await;
        let other = UserRepository::create(
            &f.pool, "other@x.test", "hash", "Ona", "Diaz", "provider", None,
        )
        .await
        .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 8, 26).unwrap(), 10);

        create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await
        .unwrap();

        let second = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &other,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn approval_revalidates_availability() {
        let f = fixture().await;
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);

        let RequestOutcome::Pending { request: pending } = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await
        .unwrap() else {
            panic!("expected pending request");
        };

        // Someone else takes the slot before staff get to the queue.
        SlotEventRepository::insert(
            &f.pool,
            &f.location.id,
            &f.room.id,
            start,
            end,
            SlotState::AssignedBooked,
            None,
            Some(&f.staff.id),
            event_source::STAFF_MANUAL,
            None,
        )
        .await
        .unwrap();

        let result =
            approve_request(&f.pool, &f.sync, &f.staff, &pending.id, None, now).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        // The request survives the failed approval untouched.
        let stored = BookingRequestRepository::find_by_id(&f.pool, &pending.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn approving_weekly_request_creates_series() {
        let f = fixture().await;
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
        // A Wednesday.
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);

        let RequestOutcome::Pending { request: pending } = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Weekly),
            now,
        )
        .await
        .unwrap() else {
            panic!("expected pending request");
        };

        let approved =
            approve_request(&f.pool, &f.sync, &f.staff, &pending.id, Some("ok"), now)
                .await
                .unwrap();
        assert_eq!(approved.request.status, RequestStatus::Approved);
        let assignment_id = approved.standing_assignment_id.expect("assignment created");

        let assignment = StandingAssignmentRepository::find_by_id(&f.pool, &assignment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(assignment.weekday, 3);
        assert_eq!(assignment.hour, 10);

        let event = approved.event.expect("first occurrence materialized");
        assert_eq!(event.slot_state, SlotState::AssignedBooked);
        assert_eq!(event.start_at, start);
    }

    #[tokio::test]
    async fn denied_request_stays_denied() {
        let f = fixture().await;
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);

        let RequestOutcome::Pending { request: pending } = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await
        .unwrap() else {
            panic!("expected pending request");
        };

        let denied = deny_request(&f.pool, &f.staff, &pending.id, Some("no"))
            .await
            .unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);

        let again = deny_request(&f.pool, &f.staff, &pending.id, None).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn staff_from_another_agency_cannot_decide_requests() {
        let f = fixture().await;
        // Staff with no link to the location's agencies.
        let outsider = UserRepository::create(
            &f.pool, "out@x.test", "hash", "Oli", "Nash", "staff", None,
        )
        .await
        .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);

        let RequestOutcome::Pending { request: pending } = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await
        .unwrap() else {
            panic!("expected pending request");
        };

        let approved =
            approve_request(&f.pool, &f.sync, &outsider, &pending.id, None, now).await;
        assert!(matches!(approved, Err(AppError::Forbidden)));
        let denied = deny_request(&f.pool, &outsider, &pending.id, None).await;
        assert!(matches!(denied, Err(AppError::Forbidden)));

        let stored = BookingRequestRepository::find_by_id(&f.pool, &pending.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn cross_tenant_cancellation_is_refused() {
        let f = fixture().await;
        let outsider = UserRepository::create(
            &f.pool, "out@x.test", "hash", "Oli", "Nash", "staff", None,
        )
        .await
        .unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);
        let event = SlotEventRepository::insert(
            &f.pool,
            &f.location.id,
            &f.room.id,
            start,
            end,
            SlotState::AssignedBooked,
            None,
            Some(&f.provider.id),
            event_source::STAFF_MANUAL,
            None,
        )
        .await
        .unwrap();

        let cancel = cancel_event(
            &f.pool,
            &f.sync,
            &outsider,
            &event.id,
            CancelScope::Occurrence,
        )
        .await;
        assert!(matches!(cancel, Err(AppError::Forbidden)));
        let toggle =
            set_intake_flag(&f.pool, &outsider, &event.id, SessionKind::VirtualIntake, true)
                .await;
        assert!(matches!(toggle, Err(AppError::Forbidden)));

        let stored = SlotEventRepository::find_by_id(&f.pool, &event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.slot_state, SlotState::AssignedBooked);
    }

    #[tokio::test]
    async fn overlapping_windows_conflict_even_when_distinct() {
        let f = fixture().await;
        let day = NaiveDate::from_ymd_opt(2026, 9, 2).unwrap();
        let block_start = day.and_hms_opt(9, 0, 0).unwrap();
        // A three-hour block held directly in the store.
        SlotEventRepository::insert(
            &f.pool,
            &f.location.id,
            &f.room.id,
            block_start,
            block_start + chrono::Duration::hours(3),
            SlotState::AssignedBooked,
            None,
            Some(&f.provider.id),
            event_source::STAFF_MANUAL,
            None,
        )
        .await
        .unwrap();

        let other = UserRepository::create(
            &f.pool, "other@x.test", "hash", "Ona", "Diaz", "provider", None,
        )
        .await
        .unwrap();
        let booking_for = |start: NaiveDateTime| NewSlotBooking {
            location_id: f.location.id.clone(),
            room_id: f.room.id.clone(),
            start_at: start,
            end_at: start + chrono::Duration::hours(1),
            booked_provider_id: other.id.clone(),
            standing_assignment_id: None,
            booking_plan_id: None,
            recurrence_group_id: None,
            source: event_source::AUTO_BOOK.to_string(),
            notes: None,
            created_by: None,
            approved_by: None,
        };

        // An hour inside the block conflicts even though the windows differ.
        let inside =
            SlotEventRepository::book_exclusive(&f.pool, &booking_for(day.and_hms_opt(10, 0, 0).unwrap()))
                .await
                .unwrap();
        assert!(matches!(inside, BookOutcome::Conflict(_)));

        // Half-open windows: the hour ending exactly at the block is free.
        let adjacent =
            SlotEventRepository::book_exclusive(&f.pool, &booking_for(day.and_hms_opt(8, 0, 0).unwrap()))
                .await
                .unwrap();
        assert!(matches!(adjacent, BookOutcome::Booked(_)));
    }

    #[tokio::test]
    async fn concurrent_bookings_of_one_slot_produce_one_winner() {
        let f = fixture().await;
        let other = UserRepository::create(
            &f.pool, "other@x.test", "hash", "Ona", "Diaz", "provider", None,
        )
        .await
        .unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 14);
        let booking_for = |provider_id: &str| NewSlotBooking {
            location_id: f.location.id.clone(),
            room_id: f.room.id.clone(),
            start_at: start,
            end_at: end,
            booked_provider_id: provider_id.to_string(),
            standing_assignment_id: None,
            booking_plan_id: None,
            recurrence_group_id: None,
            source: event_source::AUTO_BOOK.to_string(),
            notes: None,
            created_by: None,
            approved_by: None,
        };

        let booking_a = booking_for(&f.provider.id);
        let booking_b = booking_for(&other.id);
        let (first, second) = tokio::join!(
            SlotEventRepository::book_exclusive(&f.pool, &booking_a),
            SlotEventRepository::book_exclusive(&f.pool, &booking_b),
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        let booked = outcomes
            .iter()
            .filter(|o| matches!(o, BookOutcome::Booked(_)))
            .count();
        assert_eq!(booked, 1);
        let conflicts = outcomes
            .iter()
            .filter(|o| matches!(o, BookOutcome::Conflict(_)))
            .count();
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn expired_blocking_credential_blocks_requests() {
        let f = fixture().await;
        UserRepository::add_compliance_document(
            &f.pool,
            &f.provider.id,
            "License",
            true,
            Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
        )
        .await
        .unwrap();

        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);

        let result = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Once),
            now,
        )
        .await;
        assert!(matches!(result, Err(AppError::ComplianceBlocked)));
    }

    #[tokio::test]
    async fn future_scope_cancel_takes_down_the_series() {
        let f = fixture().await;
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap();
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);

        let RequestOutcome::Pending { request: pending } = create_request(
            &f.pool,
            &f.sync,
            &f.location,
            &f.provider,
            request(&f, start, end, Recurrence::Weekly),
            now,
        )
        .await
        .unwrap() else {
            panic!("expected pending request");
        };
        let approved = approve_request(&f.pool, &f.sync, &f.staff, &pending.id, None, now)
            .await
            .unwrap();
        let event = approved.event.unwrap();
        let assignment_id = approved.standing_assignment_id.unwrap();

        let cancelled = cancel_event(
            &f.pool,
            &f.sync,
            &f.staff,
            &event.id,
            CancelScope::Future,
        )
        .await
        .unwrap();
        assert!(cancelled >= 1);

        let assignment = StandingAssignmentRepository::find_by_id(&f.pool, &assignment_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!assignment.is_active);

        let stored = SlotEventRepository::find_by_id(&f.pool, &event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.slot_state, SlotState::Cancelled);

        // The cell is open again.
        assert!(is_room_open_at(&f.pool, &f.room.id, start, end).await.unwrap());
    }

    #[tokio::test]
    async fn intake_flags_follow_the_booked_event() {
        let f = fixture().await;
        let (start, end) = slot(NaiveDate::from_ymd_opt(2026, 9, 2).unwrap(), 10);
        let event = SlotEventRepository::insert(
            &f.pool,
            &f.location.id,
            &f.room.id,
            start,
            end,
            SlotState::AssignedBooked,
            None,
            Some(&f.provider.id),
            event_source::STAFF_MANUAL,
            None,
        )
        .await
        .unwrap();

        set_intake_flag(&f.pool, &f.staff, &event.id, SessionKind::VirtualIntake, true)
            .await
            .unwrap();
        let slots = IntakeSlotRepository::list_active_for_location_window(
            &f.pool,
            &f.location.id,
            start,
            end,
        )
        .await
        .unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].session_kind, SessionKind::VirtualIntake);
        assert_eq!(slots[0].agency_id, f.agency_id);

        // Cancelling the occurrence retracts the marker.
        cancel_event(&f.pool, &f.sync, &f.staff, &event.id, CancelScope::Occurrence)
            .await
            .unwrap();
        let slots = IntakeSlotRepository::list_active_for_location_window(
            &f.pool,
            &f.location.id,
            start,
            end,
        )
        .await
        .unwrap();
        assert!(slots.is_empty());
    }
}
