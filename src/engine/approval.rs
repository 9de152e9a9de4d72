use serde_json::json;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Approval State Machine ───────────────────────────────────────
//
// pending_hod → pending_principal → approved, with rejected reachable from
// any pending state. Terminal states never move again; a rejected booking is
// dead and the faculty must file a new request. The pending_pro stage is
// legacy: historical rows can still drain out of it, but the current chain
// never enters it — principal approval finalizes, and PRO only receives
// visibility notifications.

/// Compute the successor state for an action, or refuse.
pub fn next_status(
    current: BookingStatus,
    action: ApprovalAction,
) -> Result<BookingStatus, EngineError> {
    if current.is_terminal() {
        return Err(EngineError::InvalidTransition {
            from: current,
            action,
        });
    }
    match action {
        ApprovalAction::Rejected => Ok(BookingStatus::Rejected),
        ApprovalAction::Approved => match current {
            BookingStatus::PendingHod => Ok(BookingStatus::PendingPrincipal),
            // Principal is the final approver; the PRO stage is bypassed.
            BookingStatus::PendingPrincipal => Ok(BookingStatus::Approved),
            // Legacy rows parked in pending_pro drain straight to approved.
            BookingStatus::PendingPro => Ok(BookingStatus::Approved),
            BookingStatus::Approved | BookingStatus::Rejected => unreachable!(),
        },
    }
}

/// May this profile act (approve or reject) on this booking right now?
///
/// HODs act only on pending_hod bookings of their own department; the
/// principal acts on pending_principal (and drains legacy pending_pro) for
/// any department. Nobody else transitions a booking.
pub fn authorize(profile: &Profile, booking: &Booking) -> Result<(), EngineError> {
    match booking.status {
        BookingStatus::PendingHod => {
            if profile.role != Role::Hod {
                return Err(EngineError::Unauthorized(format!(
                    "{} cannot act on a booking awaiting HOD approval",
                    profile.role
                )));
            }
            if profile.department != Some(booking.department) {
                return Err(EngineError::Unauthorized(format!(
                    "HOD of {} cannot act on a {} booking",
                    profile
                        .department
                        .map(|d| d.as_str())
                        .unwrap_or("no department"),
                    booking.department
                )));
            }
            Ok(())
        }
        BookingStatus::PendingPrincipal | BookingStatus::PendingPro => {
            if profile.role != Role::Principal {
                return Err(EngineError::Unauthorized(format!(
                    "{} cannot act on a booking awaiting principal approval",
                    profile.role
                )));
            }
            Ok(())
        }
        BookingStatus::Approved | BookingStatus::Rejected => {
            Err(EngineError::InvalidTransition {
                from: booking.status,
                action: ApprovalAction::Approved,
            })
        }
    }
}

/// Hall reassignment privilege: admins and approvers, and only while the
/// booking is still pending.
pub fn authorize_switch(profile: &Profile, booking: &Booking) -> Result<(), EngineError> {
    if !matches!(profile.role, Role::Admin | Role::Hod | Role::Principal) {
        return Err(EngineError::Unauthorized(format!(
            "{} cannot reassign halls",
            profile.role
        )));
    }
    if !booking.status.is_pending() {
        return Err(EngineError::Validation(format!(
            "cannot reassign a {} booking",
            booking.status
        )));
    }
    Ok(())
}

/// Rejection requires substance; approval carries no reason.
pub fn validate_reason(reason: &str) -> Result<String, EngineError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(EngineError::EmptyReason);
    }
    Ok(trimmed.to_string())
}

// ── Notification routing ─────────────────────────────────────────
//
// The single place that knows who hears about what. The engine resolves
// audiences to concrete user ids and fans out to the hub, the inbox and the
// email channel.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    User(Ulid),
    Role(Role),
    DepartmentHod(Department),
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub audience: Audience,
    pub title: String,
    pub message: String,
    pub kind: &'static str,
    pub payload: serde_json::Value,
}

fn payload(booking: &Booking, status: BookingStatus) -> serde_json::Value {
    json!({
        "booking_id": booking.id.to_string(),
        "hall_id": booking.hall_id.to_string(),
        "event_date": booking.event_date.to_string(),
        "status": status.as_str(),
    })
}

/// A new request lands on the desk of the department's HOD.
pub fn route_request(booking: &Booking, hall_name: &str) -> Vec<Notice> {
    vec![Notice {
        audience: Audience::DepartmentHod(booking.department),
        title: "New booking request".into(),
        message: format!(
            "{} requested {} on {} ({}) for \"{}\"",
            booking.organizer, hall_name, booking.event_date, booking.slot, booking.event_name
        ),
        kind: "booking_requested",
        payload: payload(booking, booking.status),
    }]
}

/// Who must hear about a status transition. The booking passed in still
/// carries its pre-transition fields; `new_status` is what it just became.
pub fn route_transition(
    booking: &Booking,
    new_status: BookingStatus,
    reason: Option<&str>,
) -> Vec<Notice> {
    match new_status {
        BookingStatus::PendingPrincipal => vec![Notice {
            audience: Audience::Role(Role::Principal),
            title: "Booking awaiting your approval".into(),
            message: format!(
                "\"{}\" ({}, {} {}) was cleared by the HOD and awaits principal approval",
                booking.event_name, booking.department, booking.event_date, booking.slot
            ),
            kind: "booking_pending_principal",
            payload: payload(booking, new_status),
        }],
        BookingStatus::Approved => vec![
            Notice {
                audience: Audience::User(booking.faculty),
                title: "Booking approved".into(),
                message: format!(
                    "Your booking \"{}\" on {} ({}) is fully approved",
                    booking.event_name, booking.event_date, booking.slot
                ),
                kind: "booking_approved",
                payload: payload(booking, new_status),
            },
            // PRO keeps downstream visibility of finalized bookings.
            Notice {
                audience: Audience::Role(Role::Pro),
                title: "Booking finalized".into(),
                message: format!(
                    "\"{}\" ({}) confirmed for {} {}",
                    booking.event_name, booking.department, booking.event_date, booking.slot
                ),
                kind: "booking_finalized",
                payload: payload(booking, new_status),
            },
        ],
        BookingStatus::Rejected => vec![Notice {
            audience: Audience::User(booking.faculty),
            title: "Booking rejected".into(),
            message: format!(
                "Your booking \"{}\" on {} was rejected: {}",
                booking.event_name,
                booking.event_date,
                reason.unwrap_or("no reason given")
            ),
            kind: "booking_rejected",
            payload: payload(booking, new_status),
        }],
        // No route re-enters the legacy PRO stage or the initial state.
        BookingStatus::PendingHod | BookingStatus::PendingPro => Vec::new(),
    }
}

/// Faculty learns their event moved to a different hall.
pub fn route_hall_change(booking: &Booking, old_hall: &str, new_hall: &str) -> Vec<Notice> {
    vec![Notice {
        audience: Audience::User(booking.faculty),
        title: "Hall changed".into(),
        message: format!(
            "Your booking \"{}\" on {} was moved from {} to {}",
            booking.event_name, booking.event_date, old_hall, new_hall
        ),
        kind: "hall_changed",
        payload: payload(booking, booking.status),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn booking(department: Department, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            hall_id: Ulid::new(),
            faculty: Ulid::new(),
            organizer: "Dr. Kumar".into(),
            department,
            institution: Institution::Aided,
            event_name: "Project Expo".into(),
            event_description: String::new(),
            event_date: "2030-03-10".parse().unwrap(),
            slot: Slot::new(600, 720),
            attendees: 80,
            equipment: Equipment::default(),
            hod_name: Some("Dr. Priya".into()),
            status,
            rejection_reason: None,
            original_hall_id: None,
            hall_changed_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn profile(role: Role, department: Option<Department>) -> Profile {
        Profile {
            user_id: Ulid::new(),
            username: "someone".into(),
            display_name: "Someone".into(),
            email: None,
            role,
            department,
        }
    }

    #[test]
    fn normal_approval_chain() {
        let s = next_status(BookingStatus::PendingHod, ApprovalAction::Approved).unwrap();
        assert_eq!(s, BookingStatus::PendingPrincipal);
        let s = next_status(s, ApprovalAction::Approved).unwrap();
        assert_eq!(s, BookingStatus::Approved);
    }

    #[test]
    fn rejection_from_any_pending_state() {
        for from in [
            BookingStatus::PendingHod,
            BookingStatus::PendingPrincipal,
            BookingStatus::PendingPro,
        ] {
            assert_eq!(
                next_status(from, ApprovalAction::Rejected).unwrap(),
                BookingStatus::Rejected
            );
        }
    }

    #[test]
    fn legacy_pro_stage_drains_to_approved() {
        assert_eq!(
            next_status(BookingStatus::PendingPro, ApprovalAction::Approved).unwrap(),
            BookingStatus::Approved
        );
    }

    #[test]
    fn terminal_states_never_move() {
        for from in [BookingStatus::Approved, BookingStatus::Rejected] {
            for action in [ApprovalAction::Approved, ApprovalAction::Rejected] {
                assert!(matches!(
                    next_status(from, action),
                    Err(EngineError::InvalidTransition { .. })
                ));
            }
        }
    }

    #[test]
    fn hod_acts_only_on_own_department() {
        let b = booking(Department::Cse, BookingStatus::PendingHod);

        let it_hod = profile(Role::Hod, Some(Department::It));
        assert!(matches!(
            authorize(&it_hod, &b),
            Err(EngineError::Unauthorized(_))
        ));

        let cse_hod = profile(Role::Hod, Some(Department::Cse));
        assert!(authorize(&cse_hod, &b).is_ok());
    }

    #[test]
    fn principal_acts_across_departments() {
        for dept in [Department::It, Department::Cse, Department::Mba] {
            let b = booking(dept, BookingStatus::PendingPrincipal);
            let principal = profile(Role::Principal, None);
            assert!(authorize(&principal, &b).is_ok());
        }
    }

    #[test]
    fn principal_cannot_preempt_hod_stage() {
        let b = booking(Department::It, BookingStatus::PendingHod);
        let principal = profile(Role::Principal, None);
        assert!(matches!(
            authorize(&principal, &b),
            Err(EngineError::Unauthorized(_))
        ));
    }

    #[test]
    fn faculty_pro_admin_never_transition() {
        for status in [BookingStatus::PendingHod, BookingStatus::PendingPrincipal] {
            let b = booking(Department::It, status);
            for role in [Role::Faculty, Role::Pro, Role::Admin] {
                let p = profile(role, Some(Department::It));
                assert!(matches!(
                    authorize(&p, &b),
                    Err(EngineError::Unauthorized(_))
                ));
            }
        }
    }

    #[test]
    fn acting_on_terminal_booking_is_invalid_transition() {
        let b = booking(Department::It, BookingStatus::Approved);
        let principal = profile(Role::Principal, None);
        assert!(matches!(
            authorize(&principal, &b),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn reason_must_have_substance() {
        assert!(matches!(validate_reason(""), Err(EngineError::EmptyReason)));
        assert!(matches!(
            validate_reason("   \t  "),
            Err(EngineError::EmptyReason)
        ));
        assert_eq!(
            validate_reason("  Hall double-booked for exam  ").unwrap(),
            "Hall double-booked for exam"
        );
    }

    #[test]
    fn switch_requires_privilege_and_pending_booking() {
        let b = booking(Department::It, BookingStatus::PendingPrincipal);
        for role in [Role::Admin, Role::Hod, Role::Principal] {
            assert!(authorize_switch(&profile(role, None), &b).is_ok());
        }
        for role in [Role::Faculty, Role::Pro] {
            assert!(matches!(
                authorize_switch(&profile(role, None), &b),
                Err(EngineError::Unauthorized(_))
            ));
        }
        let done = booking(Department::It, BookingStatus::Approved);
        assert!(matches!(
            authorize_switch(&profile(Role::Admin, None), &done),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn advance_routes_to_principal() {
        let b = booking(Department::It, BookingStatus::PendingHod);
        let notices = route_transition(&b, BookingStatus::PendingPrincipal, None);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].audience, Audience::Role(Role::Principal));
        assert_eq!(notices[0].kind, "booking_pending_principal");
    }

    #[test]
    fn final_approval_routes_to_faculty_and_pro() {
        let b = booking(Department::It, BookingStatus::PendingPrincipal);
        let notices = route_transition(&b, BookingStatus::Approved, None);
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].audience, Audience::User(b.faculty));
        assert_eq!(notices[1].audience, Audience::Role(Role::Pro));
    }

    #[test]
    fn rejection_routes_reason_to_faculty() {
        let b = booking(Department::It, BookingStatus::PendingPrincipal);
        let notices = route_transition(&b, BookingStatus::Rejected, Some("Hall double-booked for exam"));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].audience, Audience::User(b.faculty));
        assert!(notices[0].message.contains("Hall double-booked for exam"));
    }

    #[test]
    fn request_routes_to_department_hod() {
        let b = booking(Department::Mech, BookingStatus::PendingHod);
        let notices = route_request(&b, "Seminar Hall B1");
        assert_eq!(notices.len(), 1);
        assert_eq!(
            notices[0].audience,
            Audience::DepartmentHod(Department::Mech)
        );
        assert!(notices[0].message.contains("Seminar Hall B1"));
    }
}
