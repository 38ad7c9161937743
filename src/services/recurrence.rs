use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;
use tracing::warn;

use crate::db::models::{
    AssignedFrequency, BookedFrequency, BookingPlan, SlotState, StandingAssignment,
};
use crate::db::repository::{
    BookingPlanRepository, SlotEventRepository, StandingAssignmentRepository,
};
use crate::error::AppResult;

/// Plans never book past this many days from their start date, whatever
/// their `active_until_date` says.
pub const PLAN_HORIZON_DAYS: i64 = 365;

/// What a standing assignment contributes to a given calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    /// The assignment does not land on this date at all.
    NotApplicable,
    /// The assignment lands here but no plan books it.
    Available,
    /// The assignment lands here and the active plan books it.
    Booked,
}

/// Sunday-start week, matching the grid layout.
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

/// Whole weeks between the anchor's week and the date's week. Negative when
/// `date` precedes the anchor.
pub fn week_offset(anchor: NaiveDate, date: NaiveDate) -> i64 {
    (start_of_week(date) - start_of_week(anchor)).num_days() / 7
}

/// Ordinal week-of-month (0-based): the 1st-7th are week 0, 8th-14th week 1.
fn week_of_month(date: NaiveDate) -> u32 {
    (date.day() - 1) / 7
}

/// Whether an assignment lands on `date`: the weekday must match, the date
/// must not precede `available_since_date`, and a biweekly assignment only
/// lands on weeks at an even offset from its anchor date. An anchorless
/// biweekly assignment behaves as weekly.
pub fn assignment_applies_on(assignment: &StandingAssignment, date: NaiveDate) -> bool {
    if date.weekday().num_days_from_sunday() as i64 != assignment.weekday {
        return false;
    }
    if let Some(since) = assignment.available_since_date {
        if date < since {
            return false;
        }
    }
    match assignment.assigned_frequency {
        AssignedFrequency::Weekly => true,
        AssignedFrequency::Biweekly => match assignment.available_since_date {
            Some(anchor) => week_offset(anchor, date) % 2 == 0,
            None => true,
        },
    }
}

/// Whether a plan's cadence books `date`, ignoring the occurrence cap.
/// Assumes the underlying assignment already applies on `date`.
pub fn plan_books_on(plan: &BookingPlan, date: NaiveDate) -> bool {
    if date < plan.booking_start_date {
        return false;
    }
    if let Some(until) = plan.active_until_date {
        if date > until {
            return false;
        }
    }
    if (date - plan.booking_start_date).num_days() > PLAN_HORIZON_DAYS {
        return false;
    }
    match plan.booked_frequency {
        BookedFrequency::Weekly => true,
        BookedFrequency::Biweekly => week_offset(plan.booking_start_date, date) % 2 == 0,
        BookedFrequency::Monthly => week_of_month(date) == week_of_month(plan.booking_start_date),
    }
}

/// 1-based position of `date` among the plan's booked occurrences for this
/// assignment, or None when the plan does not book `date`. Walks week by
/// week from the plan start; bounded by the plan horizon.
pub fn occurrence_number(
    assignment: &StandingAssignment,
    plan: &BookingPlan,
    date: NaiveDate,
) -> Option<i64> {
    if !assignment_applies_on(assignment, date) || !plan_books_on(plan, date) {
        return None;
    }

    let mut count = 0i64;
    let mut cursor = plan.booking_start_date
        + Duration::days(
            (assignment.weekday
                - plan.booking_start_date.weekday().num_days_from_sunday() as i64)
                .rem_euclid(7),
        );
    while cursor <= date {
        if assignment_applies_on(assignment, cursor) && plan_books_on(plan, cursor) {
            count += 1;
            if cursor == date {
                return Some(count);
            }
        }
        cursor += Duration::days(7);
    }
    None
}

/// The one shared eligibility check: both the materializer and the live
/// availability lookup go through here, so a slot can never be "bookable"
/// by one code path and occupied by the other.
pub fn occurrence_on(
    assignment: &StandingAssignment,
    plan: Option<&BookingPlan>,
    date: NaiveDate,
) -> Occurrence {
    if !assignment.is_active || !assignment_applies_on(assignment, date) {
        return Occurrence::NotApplicable;
    }
    let Some(plan) = plan else {
        return Occurrence::Available;
    };
    match occurrence_number(assignment, plan, date) {
        Some(n) => match plan.occurrence_count {
            Some(cap) if n > cap => Occurrence::Available,
            _ => Occurrence::Booked,
        },
        None => Occurrence::Available,
    }
}

/// Summary of one materialization run.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct MaterializeSummary {
    pub written: u64,
    pub skipped: u64,
}

/// Expands every active standing assignment at a location into concrete
/// slot events for the week starting at `week_start` (a Sunday).
///
/// Idempotent: rows previously written by this function are refreshed in
/// place, and rows from any other source are never touched.
pub async fn materialize_week(
    pool: &SqlitePool,
    location_id: &str,
    week_start: NaiveDate,
) -> AppResult<MaterializeSummary> {
    let week_start = start_of_week(week_start);
    let assignments =
        StandingAssignmentRepository::list_active_for_location(pool, location_id).await?;

    let mut summary = MaterializeSummary::default();
    for assignment in &assignments {
        let date = week_start + Duration::days(assignment.weekday);
        let plan = BookingPlanRepository::active_for_assignment(pool, &assignment.id).await?;

        let state = match occurrence_on(assignment, plan.as_ref(), date) {
            Occurrence::NotApplicable => continue,
            Occurrence::Available => SlotState::AssignedAvailable,
            Occurrence::Booked => SlotState::AssignedBooked,
        };

        let Some((start_at, end_at)) = slot_bounds(date, assignment.hour) else {
            warn!(assignment_id = %assignment.id, hour = assignment.hour, "assignment hour out of range, skipping");
            summary.skipped += 1;
            continue;
        };

        let booked_provider = match state {
            SlotState::AssignedBooked => Some(assignment.provider_id.as_str()),
            _ => None,
        };

        let written = SlotEventRepository::upsert_materialized(
            pool,
            location_id,
            &assignment.room_id,
            start_at,
            end_at,
            state,
            &assignment.id,
            plan.as_ref().map(|p| p.id.as_str()),
            assignment.recurrence_group_id.as_deref(),
            &assignment.provider_id,
            booked_provider,
        )
        .await?;

        match written {
            Some(_) => summary.written += 1,
            // Conflicting row came from booking or backfill; leave it.
            None => summary.skipped += 1,
        }
    }

    Ok(summary)
}

/// Hour-long slot bounds for a local date and hour.
pub fn slot_bounds(date: NaiveDate, hour: i64) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = date.and_hms_opt(u32::try_from(hour).ok()?, 0, 0)?;
    Some((start, start + Duration::hours(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn assignment(weekday: i64, freq: AssignedFrequency, anchor: Option<NaiveDate>) -> StandingAssignment {
        let now = date(2026, 1, 1).and_hms_opt(0, 0, 0).unwrap();
        StandingAssignment {
            id: "a1".into(),
            location_id: "loc".into(),
            room_id: "room".into(),
            provider_id: "prov".into(),
            weekday,
            hour: 9,
            assigned_frequency: freq,
            recurrence_group_id: None,
            available_since_date: anchor,
            is_active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn plan(freq: BookedFrequency, start: NaiveDate, cap: Option<i64>) -> BookingPlan {
        let now = start.and_hms_opt(0, 0, 0).unwrap();
        BookingPlan {
            id: "p1".into(),
            standing_assignment_id: "a1".into(),
            booked_frequency: freq,
            booking_start_date: start,
            active_until_date: None,
            occurrence_count: cap,
            is_active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn week_starts_on_sunday() {
        // 2026-08-26 is a Wednesday.
        assert_eq!(start_of_week(date(2026, 8, 26)), date(2026, 8, 23));
        assert_eq!(start_of_week(date(2026, 8, 23)), date(2026, 8, 23));
    }

    #[test]
    fn biweekly_assignment_alternates_weeks() {
        // Anchor on a Monday; Monday assignments two weeks out land, one
        // week out do not.
        let anchor = date(2026, 8, 3);
        let a = assignment(1, AssignedFrequency::Biweekly, Some(anchor));
        assert!(assignment_applies_on(&a, anchor));
        assert!(!assignment_applies_on(&a, date(2026, 8, 10)));
        assert!(assignment_applies_on(&a, date(2026, 8, 17)));
        // Wrong weekday never applies.
        assert!(!assignment_applies_on(&a, date(2026, 8, 4)));
    }

    #[test]
    fn biweekly_parity_survives_anchor_before_week_start() {
        // Anchor mid-week; parity is computed on week starts, not raw days.
        let anchor = date(2026, 8, 5); // Wednesday
        let a = assignment(5, AssignedFrequency::Biweekly, Some(anchor));
        // Friday of the anchor week.
        assert!(assignment_applies_on(&a, date(2026, 8, 7)));
        assert!(!assignment_applies_on(&a, date(2026, 8, 14)));
        assert!(assignment_applies_on(&a, date(2026, 8, 21)));
    }

    #[test]
    fn assignment_waits_for_its_start_date() {
        // Tuesdays, first one on 2026-09-22. Earlier Tuesdays do not claim
        // the room even once the week is materialized.
        let a = assignment(2, AssignedFrequency::Weekly, Some(date(2026, 9, 22)));
        assert!(!assignment_applies_on(&a, date(2026, 8, 25)));
        assert!(!assignment_applies_on(&a, date(2026, 9, 15)));
        assert!(assignment_applies_on(&a, date(2026, 9, 22)));
        assert!(assignment_applies_on(&a, date(2026, 9, 29)));
    }

    #[test]
    fn weekly_plan_books_every_matching_week() {
        let p = plan(BookedFrequency::Weekly, date(2026, 8, 3), None);
        assert!(plan_books_on(&p, date(2026, 8, 3)));
        assert!(plan_books_on(&p, date(2026, 8, 10)));
        assert!(!plan_books_on(&p, date(2026, 8, 2)));
    }

    #[test]
    fn biweekly_plan_alternates() {
        let p = plan(BookedFrequency::Biweekly, date(2026, 8, 3), None);
        assert!(plan_books_on(&p, date(2026, 8, 3)));
        assert!(!plan_books_on(&p, date(2026, 8, 10)));
        assert!(plan_books_on(&p, date(2026, 8, 17)));
    }

    #[test]
    fn monthly_plan_matches_ordinal_week() {
        // Start on the second Monday of August 2026.
        let p = plan(BookedFrequency::Monthly, date(2026, 8, 10), None);
        assert_eq!(week_of_month(date(2026, 8, 10)), 1);
        // Second Monday of September.
        assert!(plan_books_on(&p, date(2026, 9, 14)));
        // First and third Mondays of September do not match.
        assert!(!plan_books_on(&p, date(2026, 9, 7)));
        assert!(!plan_books_on(&p, date(2026, 9, 21)));
    }

    #[test]
    fn plan_respects_until_and_horizon() {
        let mut p = plan(BookedFrequency::Weekly, date(2026, 1, 5), None);
        p.active_until_date = Some(date(2026, 2, 2));
        assert!(plan_books_on(&p, date(2026, 2, 2)));
        assert!(!plan_books_on(&p, date(2026, 2, 9)));

        let open = plan(BookedFrequency::Weekly, date(2026, 1, 5), None);
        assert!(plan_books_on(&open, date(2026, 12, 28)));
        assert!(!plan_books_on(&open, date(2027, 2, 1)));
    }

    #[test]
    fn occurrence_numbers_count_only_booked_dates() {
        let a = assignment(1, AssignedFrequency::Weekly, None);
        let p = plan(BookedFrequency::Biweekly, date(2026, 8, 3), None);
        assert_eq!(occurrence_number(&a, &p, date(2026, 8, 3)), Some(1));
        assert_eq!(occurrence_number(&a, &p, date(2026, 8, 10)), None);
        assert_eq!(occurrence_number(&a, &p, date(2026, 8, 17)), Some(2));
        assert_eq!(occurrence_number(&a, &p, date(2026, 8, 31)), Some(3));
    }

    #[test]
    fn occurrence_cap_reverts_to_available() {
        let a = assignment(1, AssignedFrequency::Weekly, None);
        let p = plan(BookedFrequency::Weekly, date(2026, 8, 3), Some(2));
        assert_eq!(occurrence_on(&a, Some(&p), date(2026, 8, 3)), Occurrence::Booked);
        assert_eq!(occurrence_on(&a, Some(&p), date(2026, 8, 10)), Occurrence::Booked);
        assert_eq!(
            occurrence_on(&a, Some(&p), date(2026, 8, 17)),
            Occurrence::Available
        );
    }

    #[tokio::test]
    async fn materialization_is_idempotent_and_preserves_bookings() {
        use crate::db::models::event_source;
        use crate::db::repository::{
            LocationRepository, RoomRepository, SlotEventRepository,
            StandingAssignmentRepository, UserRepository,
        };
        use crate::services::init::test_pool;

        let pool = test_pool().await;
        let location = LocationRepository::create(&pool, "Main Clinic", "America/New_York")
            .await
            .unwrap();
        let room = RoomRepository::create(&pool, &location.id, "101", Some(101), None)
            .await
            .unwrap();
        let provider = UserRepository::create(
            &pool, "p@x.test", "hash", "Pat", "Quinn", "provider", None,
        )
        .await
        .unwrap();
        // Tuesday 09:00, weekly.
        StandingAssignmentRepository::create(
            &pool,
            &location.id,
            &room.id,
            &provider.id,
            2,
            9,
            AssignedFrequency::Weekly,
            None,
            None,
            None,
        )
        .await
        .unwrap();

        let week = date(2026, 8, 23);
        let first = materialize_week(&pool, &location.id, week).await.unwrap();
        assert_eq!(first.written, 1);
        let second = materialize_week(&pool, &location.id, week).await.unwrap();
        assert_eq!(second.written, 1);

        let window_from = week.and_hms_opt(0, 0, 0).unwrap();
        let events = SlotEventRepository::list_for_location_window(
            &pool,
            &location.id,
            window_from,
            window_from + Duration::days(7),
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].slot_state, SlotState::AssignedAvailable);

        // A manual booking in the same cell survives re-materialization.
        SlotEventRepository::cancel(&pool, &events[0].id).await.unwrap();
        let (start, end) = slot_bounds(date(2026, 8, 25), 9).unwrap();
        sqlx::query("DELETE FROM slot_events").execute(&pool).await.unwrap();
        let booked = SlotEventRepository::insert(
            &pool,
            &location.id,
            &room.id,
            start,
            end,
            SlotState::AssignedBooked,
            None,
            Some(&provider.id),
            event_source::STAFF_MANUAL,
            None,
        )
        .await
        .unwrap();

        materialize_week(&pool, &location.id, week).await.unwrap();
        let stored = SlotEventRepository::find_by_id(&pool, &booked.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.slot_state, SlotState::AssignedBooked);
        assert_eq!(stored.source, event_source::STAFF_MANUAL);
    }

    #[test]
    fn no_plan_means_available() {
        let a = assignment(2, AssignedFrequency::Weekly, None);
        assert_eq!(occurrence_on(&a, None, date(2026, 8, 4)), Occurrence::Available);
        assert_eq!(
            occurrence_on(&a, None, date(2026, 8, 5)),
            Occurrence::NotApplicable
        );
    }
}
