use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::CalendarConfig;
use crate::db::models::{SlotEvent, SlotState};
use crate::db::repository::{
    LocationRepository, RoomRepository, SlotEventRepository, UserRepository,
};
use crate::error::AppResult;

/// Mirrors booked slots into the external workspace calendar.
///
/// Every call is best-effort: failures are recorded on the slot row as
/// `FAILED` with a reason and never bubble up into the booking workflow.
/// Nothing retries automatically; staff trigger retries explicitly.
#[derive(Clone)]
pub struct CalendarSyncService {
    client: reqwest::Client,
    config: CalendarConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum SyncOutcome {
    Synced { external_event_id: String },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySummary {
    pub attempted: u64,
    pub synced: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
struct EventDateTime {
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "timeZone")]
    time_zone: String,
}

#[derive(Debug, Serialize)]
struct EventAttendee {
    email: String,
    #[serde(rename = "resource")]
    is_resource: bool,
}

#[derive(Debug, Serialize)]
struct EventPayload {
    summary: String,
    start: EventDateTime,
    end: EventDateTime,
    attendees: Vec<EventAttendee>,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    id: String,
}

impl CalendarSyncService {
    pub fn new(config: CalendarConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn api(&self) -> Option<(&str, &str)> {
        match (self.config.base_url.as_deref(), self.config.api_token.as_deref()) {
            (Some(base), Some(token)) => Some((base, token)),
            _ => None,
        }
    }

    /// Pushes a booked slot to the provider's calendar, patching the
    /// existing external event when one is already linked.
    pub async fn upsert_booked_event(
        &self,
        pool: &SqlitePool,
        event_id: &str,
    ) -> AppResult<SyncOutcome> {
        let Some(event) = SlotEventRepository::find_by_id(pool, event_id).await? else {
            return Ok(SyncOutcome::Skipped {
                reason: "event not found".to_string(),
            });
        };

        if event.slot_state != SlotState::AssignedBooked {
            return self.fail(pool, &event.id, "slot is not booked").await;
        }

        let Some(provider_id) = event.booked_provider_id.as_deref() else {
            return self.fail(pool, &event.id, "booked slot has no provider").await;
        };
        let provider = UserRepository::find_by_id(pool, provider_id).await?;
        let Some(calendar_email) = provider.as_ref().and_then(|u| u.calendar_email.clone())
        else {
            return self
                .fail(pool, &event.id, "provider has no calendar address")
                .await;
        };

        let room = RoomRepository::find_by_id(pool, &event.room_id).await?;
        let Some(resource_email) = room.as_ref().and_then(|r| r.resource_email.clone()) else {
            return self
                .fail(pool, &event.id, "room has no calendar resource address")
                .await;
        };

        let Some((base, token)) = self.api() else {
            return self.fail(pool, &event.id, "calendar API not configured").await;
        };

        let location = LocationRepository::find_by_id(pool, &event.location_id).await?;
        let timezone = location.map(|l| l.timezone).unwrap_or_else(|| "UTC".to_string());
        let (start, end) = match (
            to_zoned(event.start_at, &timezone),
            to_zoned(event.end_at, &timezone),
        ) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return self
                    .fail(pool, &event.id, "slot time is invalid in location timezone")
                    .await
            }
        };

        let room_name = room.map(|r| r.name).unwrap_or_else(|| "Room".to_string());
        let payload = EventPayload {
            summary: format!("Room hold: {}", room_name),
            start: EventDateTime {
                date_time: start.to_rfc3339(),
                time_zone: timezone.clone(),
            },
            end: EventDateTime {
                date_time: end.to_rfc3339(),
                time_zone: timezone,
            },
            attendees: vec![EventAttendee {
                email: resource_email,
                is_resource: true,
            }],
        };

        let request = match &event.external_event_id {
            Some(external_id) => self.client.patch(format!(
                "{}/calendars/{}/events/{}",
                base, calendar_email, external_id
            )),
            None => self
                .client
                .post(format!("{}/calendars/{}/events", base, calendar_email)),
        };

        let response = request.bearer_auth(token).json(&payload).send().await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: EventResponse = match resp.json().await {
                    Ok(body) => body,
                    Err(err) => {
                        return self
                            .fail(pool, &event.id, &format!("malformed calendar response: {err}"))
                            .await
                    }
                };
                SlotEventRepository::mark_synced(pool, &event.id, &body.id, Some(&calendar_email))
                    .await?;
                info!(event_id = %event.id, external_event_id = %body.id, "slot synced to calendar");
                Ok(SyncOutcome::Synced {
                    external_event_id: body.id,
                })
            }
            Ok(resp) => {
                let reason = format!("calendar API returned {}", resp.status());
                self.fail(pool, &event.id, &reason).await
            }
            Err(err) => {
                let reason = format!("calendar API request failed: {err}");
                self.fail(pool, &event.id, &reason).await
            }
        }
    }

    /// Deletes the mirrored calendar event for a cancelled slot. A missing
    /// external event (404/410) counts as success.
    pub async fn cancel_booked_event(
        &self,
        pool: &SqlitePool,
        event: &SlotEvent,
    ) -> AppResult<SyncOutcome> {
        let (Some(external_id), Some(calendar_id)) = (
            event.external_event_id.as_deref(),
            event.external_calendar_id.as_deref(),
        ) else {
            return Ok(SyncOutcome::Skipped {
                reason: "no linked calendar event".to_string(),
            });
        };

        let Some((base, token)) = self.api() else {
            return self.fail(pool, &event.id, "calendar API not configured").await;
        };

        let response = self
            .client
            .delete(format!(
                "{}/calendars/{}/events/{}",
                base, calendar_id, external_id
            ))
            .bearer_auth(token)
            .send()
            .await;

        match response {
            Ok(resp)
                if resp.status().is_success()
                    || resp.status() == reqwest::StatusCode::NOT_FOUND
                    || resp.status() == reqwest::StatusCode::GONE =>
            {
                SlotEventRepository::clear_sync(pool, &event.id).await?;
                Ok(SyncOutcome::Synced {
                    external_event_id: external_id.to_string(),
                })
            }
            Ok(resp) => {
                let reason = format!("calendar API returned {}", resp.status());
                self.fail(pool, &event.id, &reason).await
            }
            Err(err) => {
                let reason = format!("calendar API request failed: {err}");
                self.fail(pool, &event.id, &reason).await
            }
        }
    }

    /// Re-attempts every failed sync for booked slots that have not started
    /// yet. Invoked from the staff-facing retry endpoint only.
    pub async fn retry_failed(
        &self,
        pool: &SqlitePool,
        now: NaiveDateTime,
    ) -> AppResult<RetrySummary> {
        let failed = SlotEventRepository::list_sync_failed(pool, now).await?;

        let mut summary = RetrySummary::default();
        for event in failed {
            summary.attempted += 1;
            match self.upsert_booked_event(pool, &event.id).await? {
                SyncOutcome::Synced { .. } => summary.synced += 1,
                _ => summary.failed += 1,
            }
        }
        info!(
            attempted = summary.attempted,
            synced = summary.synced,
            failed = summary.failed,
            "calendar sync retry pass finished"
        );
        Ok(summary)
    }

    async fn fail(
        &self,
        pool: &SqlitePool,
        event_id: &str,
        reason: &str,
    ) -> AppResult<SyncOutcome> {
        warn!(event_id, reason, "calendar sync failed");
        SlotEventRepository::mark_sync_failed(pool, event_id, reason).await?;
        Ok(SyncOutcome::Failed {
            reason: reason.to_string(),
        })
    }
}

fn to_zoned(local: NaiveDateTime, timezone: &str) -> Option<DateTime<Tz>> {
    let tz: Tz = timezone.parse().ok()?;
    local.and_local_timezone(tz).single()
}

#[allow(dead_code)]
fn to_utc(local: NaiveDateTime, timezone: &str) -> Option<DateTime<Utc>> {
    to_zoned(local, timezone).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{event_source, SyncStatus};
    use crate::services::init::test_pool;

    #[test]
    fn local_times_convert_through_the_location_timezone() {
        let local = chrono::NaiveDate::from_ymd_opt(2026, 8, 26)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let utc = to_utc(local, "America/New_York").unwrap();
        // EDT is UTC-4 in August.
        assert_eq!(utc.to_rfc3339(), "2026-08-26T13:00:00+00:00");
        assert!(to_zoned(local, "Not/AZone").is_none());
    }

    #[tokio::test]
    async fn sync_failure_never_unbooks_the_slot() {
        let pool = test_pool().await;
        let location = crate::db::repository::LocationRepository::create(
            &pool,
            "Main Clinic",
            "America/New_York",
        )
        .await
        .unwrap();
        let room =
            crate::db::repository::RoomRepository::create(&pool, &location.id, "101", Some(101), None)
                .await
                .unwrap();
        let provider = crate::db::repository::UserRepository::create(
            &pool, "p@x.test", "hash", "Pat", "Quinn", "provider", None,
        )
        .await
        .unwrap();

        let start = chrono::NaiveDate::from_ymd_opt(2026, 8, 26)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let event = SlotEventRepository::insert(
            &pool,
            &location.id,
            &room.id,
            start,
            start + chrono::Duration::hours(1),
            SlotState::AssignedBooked,
            None,
            Some(&provider.id),
            event_source::STAFF_MANUAL,
            None,
        )
        .await
        .unwrap();

        // No calendar address and no API configuration: sync fails.
        let sync = CalendarSyncService::new(crate::config::CalendarConfig {
            base_url: None,
            api_token: None,
            timeout_seconds: 1,
        })
        .unwrap();
        let outcome = sync.upsert_booked_event(&pool, &event.id).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));

        let stored = SlotEventRepository::find_by_id(&pool, &event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.slot_state, SlotState::AssignedBooked);
        assert_eq!(stored.sync_status, Some(SyncStatus::Failed));
        assert!(stored.sync_error.is_some());
    }
}
