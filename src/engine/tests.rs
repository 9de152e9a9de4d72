use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use super::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("aula_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(path: &PathBuf) -> Engine {
    Engine::new(path.clone(), Arc::new(NotifyHub::new()), None).unwrap()
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn profile(username: &str, role: Role, department: Option<Department>) -> Profile {
    Profile {
        user_id: Ulid::new(),
        username: username.into(),
        display_name: format!("Dr. {username}"),
        email: Some(format!("{username}@college.edu")),
        role,
        department,
    }
}

/// A provisioned campus: two halls and the usual cast of actors.
struct Campus {
    engine: Engine,
    hall: Ulid,
    hall2: Ulid,
    faculty: Profile,
    hod_it: Profile,
    hod_cse: Profile,
    principal: Profile,
    pro: Profile,
    admin: Profile,
}

async fn campus(name: &str) -> Campus {
    let engine = new_engine(&test_wal_path(name));

    let hall = Ulid::new();
    engine
        .create_hall(
            hall,
            "Main Auditorium".into(),
            Block::A,
            HallType::Auditorium,
            200,
            Equipment {
                ac: true,
                mic: true,
                projector: true,
                audio: true,
            },
        )
        .await
        .unwrap();

    let hall2 = Ulid::new();
    engine
        .create_hall(
            hall2,
            "Seminar Hall B1".into(),
            Block::B,
            HallType::SmartClassroom,
            100,
            Equipment::default(),
        )
        .await
        .unwrap();

    let faculty = profile("rao", Role::Faculty, Some(Department::It));
    let hod_it = profile("priya", Role::Hod, Some(Department::It));
    let hod_cse = profile("kumar", Role::Hod, Some(Department::Cse));
    let principal = profile("nair", Role::Principal, None);
    let pro = profile("menon", Role::Pro, None);
    let admin = profile("office", Role::Admin, None);

    for p in [&faculty, &hod_it, &hod_cse, &principal, &pro, &admin] {
        engine.upsert_profile(p.clone()).await.unwrap();
    }

    Campus {
        engine,
        hall,
        hall2,
        faculty,
        hod_it,
        hod_cse,
        principal,
        pro,
        admin,
    }
}

fn request(hall: Ulid, date_s: &str, start: Minute, end: Minute) -> BookingRequest {
    BookingRequest {
        id: Ulid::new(),
        hall_id: hall,
        organizer: "Dr. Rao".into(),
        department: Department::It,
        institution: Institution::Aided,
        event_name: "Tech Symposium".into(),
        event_description: "Annual department symposium".into(),
        event_date: date(date_s),
        slot: Slot::new(start, end),
        attendees: 80,
        equipment: Equipment::default(),
    }
}

const TEN: Minute = 600;
const ELEVEN: Minute = 660;
const NOON: Minute = 720;

// ── Halls & profiles ─────────────────────────────────────

#[tokio::test]
async fn create_and_list_halls() {
    let c = campus("create_list_halls.wal").await;
    let halls = c.engine.list_halls().await;
    assert_eq!(halls.len(), 2);

    let main = halls.iter().find(|h| h.id == c.hall).unwrap();
    assert_eq!(main.name, "Main Auditorium");
    assert_eq!(main.block, Block::A);
    assert_eq!(main.capacity, 200);
    assert!(main.equipment.projector);
    assert!(!main.blocked);
    assert!(!main.in_use);
}

#[tokio::test]
async fn duplicate_hall_rejected() {
    let c = campus("dup_hall.wal").await;
    let result = c
        .engine
        .create_hall(
            c.hall,
            "Clone".into(),
            Block::C,
            HallType::Auditorium,
            10,
            Equipment::default(),
        )
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn hod_profile_requires_department() {
    let c = campus("hod_needs_dept.wal").await;
    let mut p = profile("lone", Role::Hod, None);
    p.department = None;
    assert!(matches!(
        c.engine.upsert_profile(p).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn username_collision_rejected() {
    let c = campus("username_collision.wal").await;
    let imposter = profile("rao", Role::Faculty, None);
    assert!(matches!(
        c.engine.upsert_profile(imposter).await,
        Err(EngineError::Validation(_))
    ));
}

// ── Booking creation ─────────────────────────────────────

#[tokio::test]
async fn request_booking_happy_path() {
    let c = campus("request_happy.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::PendingHod);
    assert_eq!(booking.faculty, c.faculty.user_id);
    // HOD name is frozen at request time.
    assert_eq!(booking.hod_name.as_deref(), Some("Dr. priya"));

    let stored = c.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored, booking);

    // The department HOD hears about it.
    let inbox = c.engine.notifications_for(c.hod_it.user_id);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, "booking_requested");
}

#[tokio::test]
async fn hod_name_snapshot_survives_renames() {
    let c = campus("hod_snapshot.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    let mut renamed = c.hod_it.clone();
    renamed.display_name = "Dr. Priya Varma".into();
    c.engine.upsert_profile(renamed).await.unwrap();

    let stored = c.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.hod_name.as_deref(), Some("Dr. priya"));
}

#[tokio::test]
async fn only_faculty_file_requests() {
    let c = campus("only_faculty.wal").await;
    let result = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.hod_it)
        .await;
    assert!(matches!(result, Err(EngineError::Unauthorized(_))));
}

#[tokio::test]
async fn retroactive_booking_refused() {
    let c = campus("retroactive.wal").await;
    let result = c
        .engine
        .request_booking(request(c.hall, "2000-01-01", TEN, ELEVEN), &c.faculty)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn window_outside_working_hours_refused() {
    let c = campus("outside_hours.wal").await;
    // 07:00–09:00 starts before opening
    let early = request(c.hall, "2030-01-15", 420, 540);
    assert!(matches!(
        c.engine.request_booking(early, &c.faculty).await,
        Err(EngineError::Validation(_))
    ));
    // 17:30–18:30 runs past closing
    let late = request(c.hall, "2030-01-15", 1050, 1110);
    assert!(matches!(
        c.engine.request_booking(late, &c.faculty).await,
        Err(EngineError::Validation(_))
    ));
    // Exactly 08:00–18:00 is fine
    let full_day = request(c.hall, "2030-01-15", 480, 1080);
    assert!(c.engine.request_booking(full_day, &c.faculty).await.is_ok());
}

#[tokio::test]
async fn inverted_window_refused() {
    let c = campus("inverted_window.wal").await;
    let mut req = request(c.hall, "2030-01-15", TEN, ELEVEN);
    req.slot = Slot { start: ELEVEN, end: TEN };
    assert!(matches!(
        c.engine.request_booking(req, &c.faculty).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn capacity_exceeded_refused_before_any_write() {
    let c = campus("capacity_refused.wal").await;
    let mut req = request(c.hall, "2030-01-15", TEN, ELEVEN);
    req.attendees = 500; // Main Auditorium seats 200
    assert!(matches!(
        c.engine.request_booking(req, &c.faculty).await,
        Err(EngineError::Validation(_))
    ));
    assert!(c.engine.list_bookings(&BookingFilter::default()).await.is_empty());
}

#[tokio::test]
async fn overlapping_request_refused_with_conflict() {
    let c = campus("overlap_refused.wal").await;
    c.engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    // 10:30–10:45 inside the occupied window
    let result = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", 630, 645), &c.faculty)
        .await;
    match result {
        Err(EngineError::Unavailable { conflict, .. }) => {
            let conflict = conflict.expect("conflicting booking summary");
            assert_eq!(conflict.event_name, "Tech Symposium");
            assert_eq!(conflict.slot, Slot::new(TEN, ELEVEN));
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn back_to_back_requests_both_accepted() {
    let c = campus("back_to_back.wal").await;
    c.engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    // 11:00–12:00 right after 10:00–11:00 — no overlap under half-open windows.
    c.engine
        .request_booking(request(c.hall, "2030-01-15", ELEVEN, NOON), &c.faculty)
        .await
        .unwrap();
}

#[tokio::test]
async fn blocked_hall_refuses_until_cleared() {
    let c = campus("blocked_hall.wal").await;
    c.engine
        .set_hall_status(c.hall, true, false, Some("exam week".into()), &c.admin)
        .await
        .unwrap();

    let result = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await;
    match result {
        Err(EngineError::Unavailable { reason, conflict }) => {
            assert_eq!(reason, "exam week");
            assert!(conflict.is_none());
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }

    c.engine
        .set_hall_status(c.hall, false, false, None, &c.admin)
        .await
        .unwrap();
    assert!(
        c.engine
            .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn hall_status_requires_admin() {
    let c = campus("status_admin_only.wal").await;
    for actor in [&c.faculty, &c.hod_it, &c.principal, &c.pro] {
        let result = c
            .engine
            .set_hall_status(c.hall, true, false, None, actor)
            .await;
        assert!(matches!(result, Err(EngineError::Unauthorized(_))));
    }
}

#[tokio::test]
async fn blocked_and_maintenance_mutually_exclusive() {
    let c = campus("status_exclusive.wal").await;
    let result = c
        .engine
        .set_hall_status(c.hall, true, true, None, &c.admin)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

// ── Approval chain ───────────────────────────────────────

#[tokio::test]
async fn hod_approval_advances_and_notifies_principal() {
    let c = campus("hod_advance.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    let next = c
        .engine
        .approve_booking(booking.id, &c.hod_it)
        .await
        .unwrap();
    assert_eq!(next, BookingStatus::PendingPrincipal);

    let stored = c.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::PendingPrincipal);

    let trail = c.engine.approvals_for(booking.id);
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, ApprovalAction::Approved);
    assert_eq!(trail[0].approver, c.hod_it.user_id);

    let inbox = c.engine.notifications_for(c.principal.user_id);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, "booking_pending_principal");
}

#[tokio::test]
async fn wrong_department_hod_cannot_act() {
    let c = campus("wrong_dept_hod.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    let result = c.engine.approve_booking(booking.id, &c.hod_cse).await;
    assert!(matches!(result, Err(EngineError::Unauthorized(_))));

    // No state change, no audit row.
    let stored = c.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::PendingHod);
    assert!(c.engine.approvals_for(booking.id).is_empty());
}

#[tokio::test]
async fn principal_finalizes_and_pro_sees_it() {
    let c = campus("principal_final.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    c.engine.approve_booking(booking.id, &c.hod_it).await.unwrap();
    let next = c
        .engine
        .approve_booking(booking.id, &c.principal)
        .await
        .unwrap();
    assert_eq!(next, BookingStatus::Approved);

    let trail = c.engine.approvals_for(booking.id);
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].approver, c.hod_it.user_id);
    assert_eq!(trail[1].approver, c.principal.user_id);

    // Faculty gets the final approval, PRO gets visibility.
    let faculty_inbox = c.engine.notifications_for(c.faculty.user_id);
    assert!(faculty_inbox.iter().any(|n| n.kind == "booking_approved"));
    let pro_inbox = c.engine.notifications_for(c.pro.user_id);
    assert!(pro_inbox.iter().any(|n| n.kind == "booking_finalized"));
}

#[tokio::test]
async fn principal_rejects_with_reason() {
    let c = campus("principal_reject.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine.approve_booking(booking.id, &c.hod_it).await.unwrap();

    let next = c
        .engine
        .reject_booking(booking.id, &c.principal, "Hall double-booked for exam")
        .await
        .unwrap();
    assert_eq!(next, BookingStatus::Rejected);

    let stored = c.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Rejected);
    assert_eq!(
        stored.rejection_reason.as_deref(),
        Some("Hall double-booked for exam")
    );

    let inbox = c.engine.notifications_for(c.faculty.user_id);
    let rejection = inbox
        .iter()
        .find(|n| n.kind == "booking_rejected")
        .expect("faculty notified of rejection");
    assert!(rejection.message.contains("Hall double-booked for exam"));
}

#[tokio::test]
async fn rejection_requires_reason() {
    let c = campus("reason_required.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    for empty in ["", "   ", "\t\n"] {
        let result = c.engine.reject_booking(booking.id, &c.hod_it, empty).await;
        assert!(matches!(result, Err(EngineError::EmptyReason)));
    }
    let stored = c.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::PendingHod);
}

#[tokio::test]
async fn terminal_states_are_final() {
    let c = campus("terminal_final.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine.approve_booking(booking.id, &c.hod_it).await.unwrap();
    c.engine
        .approve_booking(booking.id, &c.principal)
        .await
        .unwrap();

    // Approved is terminal for everyone.
    assert!(matches!(
        c.engine.approve_booking(booking.id, &c.principal).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        c.engine
            .reject_booking(booking.id, &c.principal, "late regret")
            .await,
        Err(EngineError::InvalidTransition { .. })
    ));
    // The audit trail did not grow.
    assert_eq!(c.engine.approvals_for(booking.id).len(), 2);
}

#[tokio::test]
async fn rejected_slot_becomes_bookable_again() {
    let c = campus("rejected_reusable.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine
        .reject_booking(booking.id, &c.hod_it, "clashes with council meet")
        .await
        .unwrap();

    // Rejection is final: the faculty files a new request instead.
    assert!(
        c.engine
            .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn legacy_pending_pro_booking_drains() {
    // Historical WAL data can still hold pending_pro rows; the principal
    // finalizes them under current policy.
    let path = test_wal_path("legacy_pro.wal");
    let hall = Ulid::new();
    let booking = Booking {
        id: Ulid::new(),
        hall_id: hall,
        faculty: Ulid::new(),
        organizer: "Dr. Rao".into(),
        department: Department::It,
        institution: Institution::Aided,
        event_name: "Old Convocation".into(),
        event_description: String::new(),
        event_date: date("2030-06-01"),
        slot: Slot::new(TEN, NOON),
        attendees: 100,
        equipment: Equipment::default(),
        hod_name: None,
        status: BookingStatus::PendingPro,
        rejection_reason: None,
        original_hall_id: None,
        hall_changed_by: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&Event::HallCreated {
            id: hall,
            name: "Main Auditorium".into(),
            block: Block::A,
            hall_type: HallType::Auditorium,
            capacity: 200,
            equipment: Equipment::default(),
        })
        .unwrap();
        wal.append(&Event::BookingRequested {
            booking: booking.clone(),
        })
        .unwrap();
    }

    let engine = new_engine(&path);
    let principal = profile("nair", Role::Principal, None);
    engine.upsert_profile(principal.clone()).await.unwrap();

    let next = engine.approve_booking(booking.id, &principal).await.unwrap();
    assert_eq!(next, BookingStatus::Approved);
}

// ── Hall reassignment ────────────────────────────────────

#[tokio::test]
async fn switch_hall_moves_booking() {
    let c = campus("switch_moves.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine.approve_booking(booking.id, &c.hod_it).await.unwrap();

    c.engine
        .switch_hall(booking.id, c.hall2, &c.admin, Some("projector fault".into()))
        .await
        .unwrap();

    let stored = c.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.hall_id, c.hall2);
    assert_eq!(stored.original_hall_id, Some(c.hall));
    assert_eq!(stored.hall_changed_by, Some(c.admin.user_id));
    // Reassignment never touches the approval state.
    assert_eq!(stored.status, BookingStatus::PendingPrincipal);

    // The old hall's slot is free again.
    assert!(
        c.engine
            .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
            .await
            .is_ok()
    );

    let inbox = c.engine.notifications_for(c.faculty.user_id);
    assert!(inbox.iter().any(|n| n.kind == "hall_changed"));
}

#[tokio::test]
async fn switch_refused_when_target_occupied() {
    let c = campus("switch_conflict.wal").await;
    // Hall2 already has an approved booking over the same window.
    let blocker = c
        .engine
        .request_booking(request(c.hall2, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine.approve_booking(blocker.id, &c.hod_it).await.unwrap();
    c.engine
        .approve_booking(blocker.id, &c.principal)
        .await
        .unwrap();

    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", 630, 690), &c.faculty)
        .await
        .unwrap();

    let result = c
        .engine
        .switch_hall(booking.id, c.hall2, &c.principal, None)
        .await;
    assert!(matches!(result, Err(EngineError::Unavailable { .. })));

    // Booking untouched.
    let stored = c.engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.hall_id, c.hall);
    assert!(stored.original_hall_id.is_none());
    assert_eq!(stored.status, BookingStatus::PendingHod);
}

#[tokio::test]
async fn switch_requires_privilege() {
    let c = campus("switch_privilege.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    for actor in [&c.faculty, &c.pro] {
        let result = c.engine.switch_hall(booking.id, c.hall2, actor, None).await;
        assert!(matches!(result, Err(EngineError::Unauthorized(_))));
    }
}

#[tokio::test]
async fn switch_to_same_hall_refused() {
    let c = campus("switch_same.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    let result = c.engine.switch_hall(booking.id, c.hall, &c.admin, None).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn switch_respects_target_capacity() {
    let c = campus("switch_capacity.wal").await;
    let mut req = request(c.hall, "2030-01-15", TEN, ELEVEN);
    req.attendees = 150; // fits Main Auditorium (200), not Seminar Hall B1 (100)
    let booking = c.engine.request_booking(req, &c.faculty).await.unwrap();

    let result = c.engine.switch_hall(booking.id, c.hall2, &c.admin, None).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn approved_booking_cannot_be_moved() {
    let c = campus("switch_approved.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine.approve_booking(booking.id, &c.hod_it).await.unwrap();
    c.engine
        .approve_booking(booking.id, &c.principal)
        .await
        .unwrap();

    let result = c.engine.switch_hall(booking.id, c.hall2, &c.admin, None).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn realtime_feed_delivers_on_transition() {
    let c = campus("realtime_feed.wal").await;
    let mut rx = c.engine.notify.subscribe(c.principal.user_id);

    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine.approve_booking(booking.id, &c.hod_it).await.unwrap();

    let delivered = rx.recv().await.unwrap();
    assert_eq!(delivered.recipient, c.principal.user_id);
    assert_eq!(delivered.kind, "booking_pending_principal");
    assert!(!delivered.read);
}

#[tokio::test]
async fn mark_notification_read() {
    let c = campus("mark_read.wal").await;
    let booking = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine
        .reject_booking(booking.id, &c.hod_it, "clashes with exams")
        .await
        .unwrap();

    let inbox = c.engine.notifications_for(c.faculty.user_id);
    let n = &inbox[0];
    assert!(!n.read);

    c.engine
        .mark_notification_read(c.faculty.user_id, n.id)
        .await
        .unwrap();
    let inbox = c.engine.notifications_for(c.faculty.user_id);
    assert!(inbox[0].read);

    // Another user's inbox does not contain this row.
    let result = c
        .engine
        .mark_notification_read(c.principal.user_id, n.id)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn audit_precedes_status_in_the_log() {
    let path = test_wal_path("audit_order.wal");
    let c = {
        let engine = new_engine(&path);
        let hall = Ulid::new();
        engine
            .create_hall(
                hall,
                "Main Auditorium".into(),
                Block::A,
                HallType::Auditorium,
                200,
                Equipment::default(),
            )
            .await
            .unwrap();
        let faculty = profile("rao", Role::Faculty, Some(Department::It));
        let hod = profile("priya", Role::Hod, Some(Department::It));
        engine.upsert_profile(faculty.clone()).await.unwrap();
        engine.upsert_profile(hod.clone()).await.unwrap();
        let booking = engine
            .request_booking(request(hall, "2030-01-15", TEN, ELEVEN), &faculty)
            .await
            .unwrap();
        engine.approve_booking(booking.id, &hod).await.unwrap();
        booking.id
    };

    let events = Wal::replay(&path).unwrap();
    let audit_pos = events
        .iter()
        .position(|e| matches!(e, Event::ApprovalRecorded { record } if record.booking_id == c))
        .expect("audit row in WAL");
    let status_pos = events
        .iter()
        .position(|e| matches!(e, Event::BookingStatusChanged { id, .. } if *id == c))
        .expect("status change in WAL");
    assert!(audit_pos < status_pos, "audit row must precede status change");
}

#[tokio::test]
async fn restart_replays_full_state() {
    let path = test_wal_path("restart_replay.wal");
    let booking_id;
    let faculty_id;
    {
        let engine = new_engine(&path);
        let hall = Ulid::new();
        let hall2 = Ulid::new();
        engine
            .create_hall(
                hall,
                "Main Auditorium".into(),
                Block::A,
                HallType::Auditorium,
                200,
                Equipment::default(),
            )
            .await
            .unwrap();
        engine
            .create_hall(
                hall2,
                "Seminar Hall B1".into(),
                Block::B,
                HallType::SmartClassroom,
                100,
                Equipment::default(),
            )
            .await
            .unwrap();
        let faculty = profile("rao", Role::Faculty, Some(Department::It));
        let hod = profile("priya", Role::Hod, Some(Department::It));
        let admin = profile("office", Role::Admin, None);
        for p in [&faculty, &hod, &admin] {
            engine.upsert_profile(p.clone()).await.unwrap();
        }
        faculty_id = faculty.user_id;

        let booking = engine
            .request_booking(request(hall, "2030-01-15", TEN, ELEVEN), &faculty)
            .await
            .unwrap();
        booking_id = booking.id;
        engine.approve_booking(booking.id, &hod).await.unwrap();
        engine
            .switch_hall(booking.id, hall2, &admin, Some("seating".into()))
            .await
            .unwrap();
    }

    let reopened = Engine::new(path.clone(), Arc::new(NotifyHub::new()), None).unwrap();

    let stored = reopened.get_booking(booking_id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::PendingPrincipal);
    assert!(stored.original_hall_id.is_some());

    assert_eq!(reopened.approvals_for(booking_id).len(), 1);
    assert!(reopened.profile_by_username("rao").is_some());
    assert!(!reopened.notifications_for(faculty_id).is_empty());
}

// ── Statistics ───────────────────────────────────────────

#[tokio::test]
async fn usage_stats_zero_fill_and_counts() {
    let c = campus("stats_counts.wal").await;

    // Two IT bookings, one of them rejected; one CSE booking.
    c.engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    let b2 = c
        .engine
        .request_booking(request(c.hall, "2030-01-15", ELEVEN, NOON), &c.faculty)
        .await
        .unwrap();
    c.engine
        .reject_booking(b2.id, &c.hod_it, "duplicate request")
        .await
        .unwrap();
    let mut cse = request(c.hall2, "2030-01-16", TEN, ELEVEN);
    cse.department = Department::Cse;
    c.engine.request_booking(cse, &c.faculty).await.unwrap();

    let stats = c.engine.usage_stats(None, None).await;
    // Total counts every request, rejected included.
    assert_eq!(stats.total_bookings, 3);

    // Department table zero-fills the whole roster.
    let mut seen: Vec<&str> = stats
        .departments
        .top
        .iter()
        .chain(stats.departments.bottom.iter())
        .map(|r| r.name.as_str())
        .collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), Department::ALL.len());

    let it_row = stats
        .departments
        .top
        .iter()
        .find(|r| r.name == "IT")
        .expect("IT in top table");
    // The rejected IT booking never held the hall.
    assert_eq!(it_row.count, 1);

    let top_hall = &stats.halls.top[0];
    assert_eq!(top_hall.count, 1);
}

#[tokio::test]
async fn usage_stats_date_range() {
    let c = campus("stats_range.wal").await;
    c.engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();
    c.engine
        .request_booking(request(c.hall, "2030-02-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    let january = c
        .engine
        .usage_stats(Some(date("2030-01-01")), Some(date("2030-01-31")))
        .await;
    assert_eq!(january.total_bookings, 1);

    let all = c.engine.usage_stats(None, None).await;
    assert_eq!(all.total_bookings, 2);
}

// ── Availability query ───────────────────────────────────

#[tokio::test]
async fn availability_query_reports_conflict_summary() {
    let c = campus("availability_query.wal").await;
    c.engine
        .request_booking(request(c.hall, "2030-01-15", TEN, ELEVEN), &c.faculty)
        .await
        .unwrap();

    let free = c
        .engine
        .availability_for(c.hall, date("2030-01-15"), Slot::new(ELEVEN, NOON), None)
        .await
        .unwrap();
    assert!(free.is_available());

    let busy = c
        .engine
        .availability_for(c.hall, date("2030-01-15"), Slot::new(630, 645), None)
        .await
        .unwrap();
    match busy {
        Availability::Unavailable { conflict, .. } => {
            assert_eq!(conflict.unwrap().event_name, "Tech Symposium");
        }
        Availability::Available => panic!("expected conflict"),
    }

    // Unknown hall is an error — the wire layer reads that as unavailable.
    assert!(matches!(
        c.engine
            .availability_for(Ulid::new(), date("2030-01-15"), Slot::new(TEN, ELEVEN), None)
            .await,
        Err(EngineError::NotFound(_))
    ));
}
