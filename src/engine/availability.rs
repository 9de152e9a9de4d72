use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

// ── Availability Engine ──────────────────────────────────────────
//
// Pure read-side logic: no I/O, no clock except what the caller passes in.
// Consulted at booking creation and at hall-reassignment time; the approval
// state machine otherwise never calls back in here.

/// Answer "is this hall free for [date, slot)?" and expose the reason when
/// not.
///
/// `exclude` skips one booking id so a booking being moved during a hall
/// switch does not conflict with itself.
///
/// Administrative state wins over everything: a blocked or under-maintenance
/// hall is unavailable for every window regardless of date or time. After
/// that, any other same-date booking still alive in the approval pipeline
/// (anything not rejected) reserves its slot; two windows conflict iff they
/// overlap as half-open intervals, so back-to-back bookings never collide.
pub fn check(
    hall: &HallState,
    date: NaiveDate,
    slot: &Slot,
    exclude: Option<Ulid>,
) -> Availability {
    if hall.admin.is_out_of_service() {
        let reason = match &hall.admin.note {
            Some(note) if !note.trim().is_empty() => note.clone(),
            _ if hall.admin.under_maintenance => {
                format!("{} is under maintenance", hall.name)
            }
            _ => format!("{} is blocked for booking", hall.name),
        };
        return Availability::Unavailable {
            reason,
            conflict: None,
        };
    }

    for booking in hall.on_date(date) {
        if Some(booking.id) == exclude {
            continue;
        }
        if !booking.status.occupies_slot() {
            continue;
        }
        if booking.slot.overlaps(slot) {
            return Availability::Unavailable {
                reason: format!(
                    "already reserved for \"{}\" ({})",
                    booking.event_name, booking.slot
                ),
                conflict: Some(ConflictSummary {
                    event_name: booking.event_name.clone(),
                    slot: booking.slot,
                }),
            };
        }
    }

    Availability::Available
}

/// Wall-clock "currently in use" view for dashboards: the occupying booking
/// whose window covers the current minute, if any. Presentation only — this
/// never gates booking creation; only `check` does.
pub fn current_booking<'a>(
    hall: &'a HallState,
    today: NaiveDate,
    now: Minute,
) -> Option<&'a Booking> {
    hall.on_date(today)
        .find(|b| b.status.occupies_slot() && b.slot.contains_minute(now))
}
