use std::collections::HashMap;

use chrono::{Local, NaiveDate, Timelike};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, availability};

/// Optional conjunctive filters for booking listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingFilter {
    pub faculty: Option<Ulid>,
    pub status: Option<BookingStatus>,
    pub department: Option<Department>,
    pub hall: Option<Ulid>,
    pub event_date: Option<NaiveDate>,
}

impl BookingFilter {
    fn matches(&self, b: &Booking) -> bool {
        self.faculty.is_none_or(|f| b.faculty == f)
            && self.status.is_none_or(|s| b.status == s)
            && self.department.is_none_or(|d| b.department == d)
            && self.hall.is_none_or(|h| b.hall_id == h)
            && self.event_date.is_none_or(|d| b.event_date == d)
    }
}

impl Engine {
    // ── Profile directory ────────────────────────────────

    pub fn profile(&self, user_id: &Ulid) -> Option<Profile> {
        self.profiles.get(user_id).map(|p| p.clone())
    }

    pub fn profile_by_username(&self, username: &str) -> Option<Profile> {
        let user_id = *self.username_to_user.get(username)?.value();
        self.profile(&user_id)
    }

    /// The acting profile for a wire connection. Unknown logins may still
    /// provision and query, but anything requiring an actor stops here.
    pub fn require_profile(&self, username: &str) -> Result<Profile, EngineError> {
        self.profile_by_username(username)
            .ok_or_else(|| EngineError::Unauthorized(format!("no profile for user {username}")))
    }

    pub fn profiles_by_role(&self, role: Role) -> Vec<Profile> {
        self.profiles
            .iter()
            .filter(|p| p.role == role)
            .map(|p| p.clone())
            .collect()
    }

    pub fn hod_of(&self, department: Department) -> Option<Profile> {
        self.profiles
            .iter()
            .find(|p| p.role == Role::Hod && p.department == Some(department))
            .map(|p| p.clone())
    }

    // ── Availability ─────────────────────────────────────

    /// Availability query contract: pure read, no side effects. The wire
    /// layer turns any error from here into an unavailable verdict (fail
    /// closed) rather than a permissive one.
    pub async fn availability_for(
        &self,
        hall_id: Ulid,
        date: NaiveDate,
        slot: Slot,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        if slot.start >= slot.end {
            return Err(EngineError::Validation(
                "start time must be before end time".into(),
            ));
        }
        let hs = self
            .get_hall(&hall_id)
            .ok_or(EngineError::NotFound(hall_id))?;
        let guard = hs.read().await;
        Ok(availability::check(&guard, date, &slot, exclude))
    }

    // ── Listings ─────────────────────────────────────────

    pub async fn list_halls(&self) -> Vec<HallInfo> {
        let now = Local::now();
        let today = now.date_naive();
        let minute = (now.time().hour() * 60 + now.time().minute()) as Minute;

        let mut out = Vec::new();
        let ids: Vec<Ulid> = self.halls.iter().map(|e| *e.key()).collect();
        for id in ids {
            let Some(hs) = self.get_hall(&id) else { continue };
            let guard = hs.read().await;
            out.push(HallInfo {
                id: guard.id,
                name: guard.name.clone(),
                block: guard.block,
                hall_type: guard.hall_type,
                capacity: guard.capacity,
                equipment: guard.equipment,
                blocked: guard.admin.blocked,
                under_maintenance: guard.admin.under_maintenance,
                status_note: guard.admin.note.clone(),
                in_use: availability::current_booking(&guard, today, minute).is_some(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let hall_id = self.hall_of_booking(&id)?;
        let hs = self.get_hall(&hall_id)?;
        let guard = hs.read().await;
        guard.booking(id).cloned()
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let mut out = Vec::new();
        let ids: Vec<Ulid> = match filter.hall {
            Some(h) => vec![h],
            None => self.halls.iter().map(|e| *e.key()).collect(),
        };
        for id in ids {
            let Some(hs) = self.get_hall(&id) else { continue };
            let guard = hs.read().await;
            out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        out.sort_by_key(|b| (b.event_date, b.slot.start, b.id));
        out
    }

    pub fn approvals_for(&self, booking_id: Ulid) -> Vec<ApprovalRecord> {
        self.approvals
            .get(&booking_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// A user's notification rows, newest first.
    pub fn notifications_for(&self, user: Ulid) -> Vec<Notification> {
        let mut out = self
            .inboxes
            .get(&user)
            .map(|v| v.clone())
            .unwrap_or_default();
        out.reverse();
        out
    }

    // ── Statistics rollup ────────────────────────────────

    /// Total booking count plus top-5/bottom-5 usage for halls and
    /// departments over an optional date range. Every department of the
    /// fixed roster appears even with zero usage; rejected requests count
    /// toward the total but not toward usage (they never held the hall).
    pub async fn usage_stats(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> UsageStats {
        let in_range = |b: &Booking| {
            from.is_none_or(|f| b.event_date >= f) && to.is_none_or(|t| b.event_date <= t)
        };

        let mut total = 0u64;
        let mut hall_counts: Vec<(String, u64)> = Vec::new();
        let mut dept_counts: HashMap<Department, u64> =
            Department::ALL.iter().map(|d| (*d, 0)).collect();

        let ids: Vec<Ulid> = self.halls.iter().map(|e| *e.key()).collect();
        for id in ids {
            let Some(hs) = self.get_hall(&id) else { continue };
            let guard = hs.read().await;
            let mut used = 0u64;
            for b in guard.bookings.iter().filter(|b| in_range(b)) {
                total += 1;
                if b.status.occupies_slot() {
                    used += 1;
                    *dept_counts.entry(b.department).or_insert(0) += 1;
                }
            }
            hall_counts.push((guard.name.clone(), used));
        }

        let dept_rows: Vec<(String, u64)> = Department::ALL
            .iter()
            .map(|d| (d.as_str().to_string(), dept_counts[d]))
            .collect();

        UsageStats {
            total_bookings: total,
            halls: usage_table(hall_counts),
            departments: usage_table(dept_rows),
        }
    }
}

/// Top-5 (descending) and bottom-5 (ascending) slices of a usage count
/// list, ties broken by name for stable output.
fn usage_table(counts: Vec<(String, u64)>) -> UsageTable {
    let mut desc = counts.clone();
    desc.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut asc = counts;
    asc.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

    let row = |(name, count): (String, u64)| UsageRow { name, count };
    UsageTable {
        top: desc.into_iter().take(5).map(row).collect(),
        bottom: asc.into_iter().take(5).map(row).collect(),
    }
}
