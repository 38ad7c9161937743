use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::models::{
    event_source, AssignedFrequency, BookedFrequency, BookingPlan, LegacyRoomAssignment,
    Location, SessionKind, SlotEvent, SlotState, User,
};
use crate::db::repository::{
    BookingPlanRepository, IntakeSlotRepository, LegacyAssignmentRepository, RoomRepository,
    SlotEventRepository, StandingAssignmentRepository, UserRepository,
};
use crate::error::AppResult;
use crate::services::recurrence::{
    materialize_week, occurrence_on, slot_bounds, start_of_week, Occurrence,
};

/// Resolved display state of one grid cell. Ordering mirrors
/// [`SlotState`]: a booked cell beats a hold beats an availability beats
/// open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    Open,
    AssignedAvailable,
    AssignedTemporary,
    AssignedBooked,
}

impl From<SlotState> for CellState {
    fn from(state: SlotState) -> Self {
        match state {
            SlotState::Cancelled => CellState::Open,
            SlotState::AssignedAvailable => CellState::AssignedAvailable,
            SlotState::AssignedTemporary => CellState::AssignedTemporary,
            SlotState::AssignedBooked => CellState::AssignedBooked,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridLocation {
    pub id: String,
    pub name: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRoom {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One resolved room/day/hour cell. Open cells carry only the state; the
/// rest of the fields describe the occupant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSlot {
    pub room_id: String,
    pub date: NaiveDate,
    pub hour: u32,
    pub state: CellState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standing_assignment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_initials: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booked_provider_name: Option<String>,
    /// ONCE for any occupied cell without a recurring link; absent on open
    /// cells.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_badge: Option<String>,
    pub virtual_intake_enabled: bool,
    pub in_person_intake_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyGrid {
    pub location: GridLocation,
    pub week_start: NaiveDate,
    pub days: Vec<NaiveDate>,
    pub hours: Vec<u32>,
    pub rooms: Vec<GridRoom>,
    pub slots: Vec<GridSlot>,
}

fn frequency_strings(frequency: &str) -> (String, String, String) {
    let (label, badge) = match frequency {
        "WEEKLY" => ("Weekly", "W"),
        "BIWEEKLY" => ("Biweekly", "2W"),
        "MONTHLY" => ("Monthly", "M"),
        _ => ("Once", "1x"),
    };
    (frequency.to_string(), label.to_string(), badge.to_string())
}

/// Builds the weekly room grid for a location: materializes the requested
/// week, backfills any legacy rows in the window, then folds every
/// occupancy source into one state per room/hour cell.
pub async fn weekly_grid(
    pool: &SqlitePool,
    location: &Location,
    week_of: NaiveDate,
    grid_start_hour: u32,
    grid_end_hour: u32,
) -> AppResult<WeeklyGrid> {
    let week_start = start_of_week(week_of);
    let window_from = week_start.and_hms_opt(0, 0, 0).unwrap_or_default();
    let window_to = window_from + Duration::days(7);

    let summary = materialize_week(pool, &location.id, week_start).await?;
    debug!(location_id = %location.id, %week_start, written = summary.written, "materialized week");

    backfill_legacy_window(pool, &location.id, window_from, window_to).await?;

    let rooms = RoomRepository::list_active_for_location(pool, &location.id).await?;
    let events =
        SlotEventRepository::list_for_location_window(pool, &location.id, window_from, window_to)
            .await?;
    let intake_slots = IntakeSlotRepository::list_active_for_location_window(
        pool,
        &location.id,
        window_from,
        window_to,
    )
    .await?;

    // Events grouped per room; precedence decided per cell below. A cell is
    // matched by overlap so a multi-hour event covers each hour it spans.
    let mut by_room: HashMap<&str, Vec<&SlotEvent>> = HashMap::new();
    for event in &events {
        by_room
            .entry(event.room_id.as_str())
            .or_default()
            .push(event);
    }

    // What backfilling could not convert stays a live overlay. Open-ended
    // rows are the usual case here.
    let legacy_rows = LegacyAssignmentRepository::list_unbackfilled_for_location_window(
        pool,
        &location.id,
        window_from,
        window_to,
    )
    .await?;
    let mut legacy_by_room: HashMap<&str, Vec<&LegacyRoomAssignment>> = HashMap::new();
    for row in &legacy_rows {
        legacy_by_room
            .entry(row.room_id.as_str())
            .or_default()
            .push(row);
    }

    let mut intake_by_start: HashMap<(&str, NaiveDateTime), (bool, bool)> = HashMap::new();
    for slot in &intake_slots {
        let entry = intake_by_start
            .entry((slot.provider_id.as_str(), slot.start_at))
            .or_default();
        match slot.session_kind {
            SessionKind::VirtualIntake | SessionKind::VirtualRegular => entry.0 = true,
            SessionKind::InPersonIntake => entry.1 = true,
        }
    }

    let assignments =
        StandingAssignmentRepository::list_active_for_location(pool, &location.id).await?;
    let assignment_freq: HashMap<&str, AssignedFrequency> = assignments
        .iter()
        .map(|a| (a.id.as_str(), a.assigned_frequency))
        .collect();

    let mut providers: HashMap<String, User> = HashMap::new();
    let mut plans: HashMap<String, Option<BookingPlan>> = HashMap::new();

    let days: Vec<NaiveDate> = (0..7).map(|d| week_start + Duration::days(d)).collect();
    let hours: Vec<u32> = (grid_start_hour..grid_end_hour).collect();

    let mut slots = Vec::new();
    for date in &days {
        for hour in &hours {
            let Some((slot_start, slot_end)) = slot_bounds(*date, *hour as i64) else {
                continue;
            };
            for room in &rooms {
                let winner = by_room
                    .get(room.id.as_str())
                    .and_then(|events| {
                        events
                            .iter()
                            .filter(|e| {
                                e.slot_state.occupies()
                                    && e.start_at < slot_end
                                    && e.end_at > slot_start
                            })
                            .max_by_key(|e| e.slot_state)
                    })
                    .copied();

                if let Some(event) = winner {
                    let assigned = match event.assigned_provider_id.as_deref() {
                        Some(pid) => lookup_user(pool, &mut providers, pid).await?,
                        None => None,
                    };
                    let booked = match event.booked_provider_id.as_deref() {
                        Some(pid) => lookup_user(pool, &mut providers, pid).await?,
                        None => None,
                    };
                    let shown = booked.as_ref().or(assigned.as_ref());

                    let (virtual_intake, in_person_intake) = shown
                        .and_then(|u| intake_by_start.get(&(u.id.as_str(), event.start_at)))
                        .copied()
                        .unwrap_or((false, false));

                    let frequency =
                        resolve_frequency(pool, &mut plans, &assignment_freq, event).await?;
                    let (frequency, frequency_label, frequency_badge) =
                        frequency_strings(&frequency);

                    slots.push(GridSlot {
                        room_id: room.id.clone(),
                        date: *date,
                        hour: *hour,
                        state: event.slot_state.into(),
                        event_id: Some(event.id.clone()),
                        standing_assignment_id: event.standing_assignment_id.clone(),
                        booking_plan_id: event.booking_plan_id.clone(),
                        provider_id: shown.map(|u| u.id.clone()),
                        provider_initials: shown.map(|u| u.initials()),
                        assigned_provider_name: assigned.as_ref().map(|u| u.display_name()),
                        booked_provider_name: booked.as_ref().map(|u| u.display_name()),
                        frequency: Some(frequency),
                        frequency_label: Some(frequency_label),
                        frequency_badge: Some(frequency_badge),
                        virtual_intake_enabled: virtual_intake,
                        in_person_intake_enabled: in_person_intake,
                    });
                    continue;
                }

                let overlay = legacy_by_room
                    .get(room.id.as_str())
                    .and_then(|rows| {
                        rows.iter().find(|r| {
                            r.start_at < slot_end && r.end_at.map_or(true, |e| e > slot_start)
                        })
                    })
                    .copied();

                if let Some(row) = overlay {
                    let assigned =
                        lookup_user(pool, &mut providers, &row.assigned_user_id).await?;
                    let (frequency, frequency_label, frequency_badge) =
                        frequency_strings("ONCE");
                    slots.push(GridSlot {
                        room_id: room.id.clone(),
                        date: *date,
                        hour: *hour,
                        state: CellState::AssignedAvailable,
                        event_id: None,
                        standing_assignment_id: None,
                        booking_plan_id: None,
                        provider_id: assigned.as_ref().map(|u| u.id.clone()),
                        provider_initials: assigned.as_ref().map(|u| u.initials()),
                        assigned_provider_name: assigned.as_ref().map(|u| u.display_name()),
                        booked_provider_name: None,
                        frequency: Some(frequency),
                        frequency_label: Some(frequency_label),
                        frequency_badge: Some(frequency_badge),
                        virtual_intake_enabled: false,
                        in_person_intake_enabled: false,
                    });
                    continue;
                }

                slots.push(GridSlot {
                    room_id: room.id.clone(),
                    date: *date,
                    hour: *hour,
                    state: CellState::Open,
                    event_id: None,
                    standing_assignment_id: None,
                    booking_plan_id: None,
                    provider_id: None,
                    provider_initials: None,
                    assigned_provider_name: None,
                    booked_provider_name: None,
                    frequency: None,
                    frequency_label: None,
                    frequency_badge: None,
                    virtual_intake_enabled: false,
                    in_person_intake_enabled: false,
                });
            }
        }
    }

    Ok(WeeklyGrid {
        location: GridLocation {
            id: location.id.clone(),
            name: location.name.clone(),
            timezone: location.timezone.clone(),
        },
        week_start,
        days,
        hours,
        rooms: rooms
            .into_iter()
            .map(|r| GridRoom {
                id: r.id,
                name: r.name,
                room_number: r.room_number,
                label: r.label,
            })
            .collect(),
        slots,
    })
}

async fn lookup_user(
    pool: &SqlitePool,
    cache: &mut HashMap<String, User>,
    user_id: &str,
) -> AppResult<Option<User>> {
    if !cache.contains_key(user_id) {
        if let Some(user) = UserRepository::find_by_id(pool, user_id).await? {
            cache.insert(user_id.to_string(), user);
        }
    }
    Ok(cache.get(user_id).cloned())
}

/// Cadence for the badge: the booking plan's frequency on booked cells,
/// the standing assignment's otherwise, ONCE when no recurring link exists.
async fn resolve_frequency(
    pool: &SqlitePool,
    plan_cache: &mut HashMap<String, Option<BookingPlan>>,
    assignment_freq: &HashMap<&str, AssignedFrequency>,
    event: &SlotEvent,
) -> AppResult<String> {
    if event.slot_state == SlotState::AssignedBooked {
        if let Some(plan_id) = &event.booking_plan_id {
            if !plan_cache.contains_key(plan_id) {
                let plan = sqlx::query_as::<_, BookingPlan>(
                    "SELECT * FROM booking_plans WHERE id = ?",
                )
                .bind(plan_id)
                .fetch_optional(pool)
                .await?;
                plan_cache.insert(plan_id.clone(), plan);
            }
            if let Some(Some(plan)) = plan_cache.get(plan_id) {
                return Ok(match plan.booked_frequency {
                    BookedFrequency::Weekly => "WEEKLY",
                    BookedFrequency::Biweekly => "BIWEEKLY",
                    BookedFrequency::Monthly => "MONTHLY",
                }
                .to_string());
            }
        }
    }
    Ok(event
        .standing_assignment_id
        .as_deref()
        .and_then(|id| assignment_freq.get(id))
        .map(|f| match f {
            AssignedFrequency::Weekly => "WEEKLY",
            AssignedFrequency::Biweekly => "BIWEEKLY",
        })
        .unwrap_or("ONCE")
        .to_string())
}

/// Mirrors un-backfilled legacy assignment rows overlapping the window into
/// `slot_events`, marking each row so it is only converted once. Legacy
/// occupancy enters the store as `ASSIGNED_AVAILABLE`: the old table never
/// distinguished holds from confirmed bookings. Rows whose slot is already
/// occupied are pointed at the existing event instead. Open-ended rows
/// (`end_at` NULL) have no bounded slot to convert and stay live overlays.
pub async fn backfill_legacy_window(
    pool: &SqlitePool,
    location_id: &str,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> AppResult<u64> {
    let rows = LegacyAssignmentRepository::list_unbackfilled_for_location_window(
        pool,
        location_id,
        from,
        to,
    )
    .await?;

    let mut backfilled = 0u64;
    for row in rows {
        let Some(end_at) = row.end_at else {
            continue;
        };
        let existing =
            SlotEventRepository::list_occupying_overlaps(pool, &row.room_id, row.start_at, end_at)
                .await?;

        let event_id = match existing.first() {
            Some(event) => event.id.clone(),
            None => {
                let event = SlotEventRepository::insert(
                    pool,
                    location_id,
                    &row.room_id,
                    row.start_at,
                    end_at,
                    SlotState::AssignedAvailable,
                    Some(&row.assigned_user_id),
                    None,
                    event_source::LEGACY_BACKFILL,
                    None,
                )
                .await?;
                backfilled += 1;
                event.id
            }
        };
        LegacyAssignmentRepository::set_backfilled(pool, &row.id, &event_id).await?;
    }

    if backfilled > 0 {
        info!(location_id, backfilled, "backfilled legacy room assignments");
    }
    Ok(backfilled)
}

/// Whether a room is free for [start_at, end_at). Checks materialized
/// events first, then un-backfilled legacy rows, then the standing
/// assignments themselves so a not-yet-materialized claim still blocks the
/// slot.
pub async fn is_room_open_at(
    pool: &SqlitePool,
    room_id: &str,
    start_at: NaiveDateTime,
    end_at: NaiveDateTime,
) -> AppResult<bool> {
    let overlaps =
        SlotEventRepository::list_occupying_overlaps(pool, room_id, start_at, end_at).await?;
    if !overlaps.is_empty() {
        return Ok(false);
    }

    let legacy =
        LegacyAssignmentRepository::list_unbackfilled_for_room(pool, room_id, end_at).await?;
    for row in &legacy {
        // Open-ended rows block everything after their start.
        if row.start_at < end_at && row.end_at.map_or(true, |row_end| row_end > start_at) {
            return Ok(false);
        }
    }

    let date = start_at.date();
    let weekday = date.weekday().num_days_from_sunday() as i64;
    let hour = start_at.time().hour() as i64;
    let assignments =
        StandingAssignmentRepository::list_active_for_cell(pool, room_id, weekday, hour).await?;
    for assignment in &assignments {
        let plan = BookingPlanRepository::active_for_assignment(pool, &assignment.id).await?;
        if occurrence_on(assignment, plan.as_ref(), date) != Occurrence::NotApplicable {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Convenience wrapper for hour-long cells addressed by date and hour.
pub async fn is_room_open_for_hour(
    pool: &SqlitePool,
    room_id: &str,
    date: NaiveDate,
    hour: u32,
) -> AppResult<bool> {
    match slot_bounds(date, hour as i64) {
        Some((start_at, end_at)) => is_room_open_at(pool, room_id, start_at, end_at).await,
        None => Ok(false),
    }
}
