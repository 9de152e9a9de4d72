use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::approval::{self, Audience, Notice};
use super::availability;
use super::{Engine, EngineError, WalCommand, move_booking};

/// Input to `request_booking`. The acting faculty profile is passed
/// separately; everything here is caller-supplied form data.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub hall_id: Ulid,
    pub organizer: String,
    pub department: Department,
    pub institution: Institution,
    pub event_name: String,
    pub event_description: String,
    pub event_date: NaiveDate,
    pub slot: Slot,
    pub attendees: u32,
    pub equipment: Equipment,
}

impl Engine {
    pub async fn create_hall(
        &self,
        id: Ulid,
        name: String,
        block: Block,
        hall_type: HallType,
        capacity: u32,
        equipment: Equipment,
    ) -> Result<(), EngineError> {
        if self.halls.len() >= MAX_HALLS {
            return Err(EngineError::LimitExceeded("too many halls"));
        }
        if name.trim().is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::Validation("bad hall name".into()));
        }
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be positive".into()));
        }
        if self.halls.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::HallCreated {
            id,
            name: name.clone(),
            block,
            hall_type,
            capacity,
            equipment,
        };
        self.wal_append(&event).await?;
        let hs = HallState::new(id, name, block, hall_type, capacity, equipment);
        self.halls.insert(id, Arc::new(RwLock::new(hs)));
        Ok(())
    }

    /// Admin block/maintenance control. The two flags are mutually exclusive;
    /// a hall in either state refuses all new bookings until cleared.
    pub async fn set_hall_status(
        &self,
        id: Ulid,
        blocked: bool,
        under_maintenance: bool,
        note: Option<String>,
        actor: &Profile,
    ) -> Result<(), EngineError> {
        if actor.role != Role::Admin {
            return Err(EngineError::Unauthorized(format!(
                "{} cannot manage hall status",
                actor.role
            )));
        }
        if blocked && under_maintenance {
            return Err(EngineError::Validation(
                "blocked and under_maintenance are mutually exclusive".into(),
            ));
        }
        if let Some(ref n) = note
            && n.len() > MAX_NOTE_LEN {
                return Err(EngineError::LimitExceeded("status note too long"));
            }

        let hs = self.get_hall(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = hs.write().await;

        let event = Event::HallStatusChanged {
            id,
            blocked,
            under_maintenance,
            note,
            updated_by: actor.user_id,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn upsert_profile(&self, profile: Profile) -> Result<(), EngineError> {
        if profile.username.trim().is_empty() || profile.username.len() > MAX_USERNAME_LEN {
            return Err(EngineError::Validation("bad username".into()));
        }
        if profile.display_name.trim().is_empty() || profile.display_name.len() > MAX_NAME_LEN {
            return Err(EngineError::Validation("bad display name".into()));
        }
        if profile.role == Role::Hod && profile.department.is_none() {
            return Err(EngineError::Validation("HOD profile requires a department".into()));
        }
        if !self.profiles.contains_key(&profile.user_id) && self.profiles.len() >= MAX_PROFILES {
            return Err(EngineError::LimitExceeded("too many profiles"));
        }
        if let Some(existing) = self.username_to_user.get(&profile.username)
            && *existing.value() != profile.user_id {
                return Err(EngineError::Validation(format!(
                    "username {} already taken",
                    profile.username
                )));
            }

        let event = Event::ProfileUpserted {
            profile: profile.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_profile(profile);
        Ok(())
    }

    /// File a new booking request. Validation happens up front, the
    /// availability check runs under the hall's write lock, and the booking
    /// lands in `pending_hod` with the department HOD's name frozen onto it.
    pub async fn request_booking(
        &self,
        req: BookingRequest,
        faculty: &Profile,
    ) -> Result<Booking, EngineError> {
        if faculty.role != Role::Faculty {
            return Err(EngineError::Unauthorized(format!(
                "{} cannot file booking requests",
                faculty.role
            )));
        }
        if req.event_name.trim().is_empty() || req.event_name.len() > MAX_EVENT_NAME_LEN {
            return Err(EngineError::Validation("bad event name".into()));
        }
        if req.event_description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("event description too long"));
        }
        if req.organizer.trim().is_empty() || req.organizer.len() > MAX_NAME_LEN {
            return Err(EngineError::Validation("bad organizer name".into()));
        }
        if req.slot.start >= req.slot.end {
            return Err(EngineError::Validation(
                "start time must be before end time".into(),
            ));
        }
        if req.slot.start < DAY_START || req.slot.end > DAY_END {
            return Err(EngineError::Validation(format!(
                "bookings must fall within {}-{}",
                hhmm(DAY_START),
                hhmm(DAY_END)
            )));
        }
        if req.attendees == 0 {
            return Err(EngineError::Validation(
                "attendee count must be positive".into(),
            ));
        }
        if req.event_date < Local::now().date_naive() {
            return Err(EngineError::Validation(
                "event date cannot be in the past".into(),
            ));
        }
        if self.booking_to_hall.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let hs = self
            .get_hall(&req.hall_id)
            .ok_or(EngineError::NotFound(req.hall_id))?;
        let mut guard = hs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_HALL {
            return Err(EngineError::LimitExceeded("too many bookings on hall"));
        }
        if req.attendees > guard.capacity {
            return Err(EngineError::Validation(format!(
                "{} attendees exceed hall capacity {}",
                req.attendees, guard.capacity
            )));
        }

        match availability::check(&guard, req.event_date, &req.slot, None) {
            Availability::Available => {}
            Availability::Unavailable { reason, conflict } => {
                return Err(EngineError::Unavailable { reason, conflict });
            }
        }

        let now = Utc::now();
        let booking = Booking {
            id: req.id,
            hall_id: req.hall_id,
            faculty: faculty.user_id,
            organizer: req.organizer,
            department: req.department,
            institution: req.institution,
            event_name: req.event_name,
            event_description: req.event_description,
            event_date: req.event_date,
            slot: req.slot,
            attendees: req.attendees,
            equipment: req.equipment,
            hod_name: self.hod_of(req.department).map(|p| p.display_name),
            status: BookingStatus::PendingHod,
            rejection_reason: None,
            original_hall_id: None,
            hall_changed_by: None,
            created_at: now,
            updated_at: now,
        };

        let event = Event::BookingRequested {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_REQUESTED_TOTAL).increment(1);

        let hall_name = guard.name.clone();
        drop(guard);
        self.fan_out(approval::route_request(&booking, &hall_name)).await;

        Ok(booking)
    }

    pub async fn approve_booking(
        &self,
        booking_id: Ulid,
        actor: &Profile,
    ) -> Result<BookingStatus, EngineError> {
        self.transition(booking_id, actor, ApprovalAction::Approved, None)
            .await
    }

    pub async fn reject_booking(
        &self,
        booking_id: Ulid,
        actor: &Profile,
        reason: &str,
    ) -> Result<BookingStatus, EngineError> {
        let reason = approval::validate_reason(reason)?;
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("rejection reason too long"));
        }
        self.transition(booking_id, actor, ApprovalAction::Rejected, Some(reason))
            .await
    }

    /// One approval-chain step. The audit row is appended to the WAL before
    /// the status change; a crash in between leaves a trail without a
    /// transition, which is safe to retry.
    async fn transition(
        &self,
        booking_id: Ulid,
        actor: &Profile,
        action: ApprovalAction,
        reason: Option<String>,
    ) -> Result<BookingStatus, EngineError> {
        let (_hall_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .clone();

        let next = approval::next_status(booking.status, action)?;
        approval::authorize(actor, &booking)?;

        let now = Utc::now();
        let record = ApprovalRecord {
            id: Ulid::new(),
            booking_id,
            approver: actor.user_id,
            approver_name: actor.display_name.clone(),
            action,
            reason: reason.clone(),
            at: now,
        };

        // Audit first, status second.
        self.wal_append(&Event::ApprovalRecorded {
            record: record.clone(),
        })
        .await?;
        self.approvals.entry(booking_id).or_default().push(record);

        self.persist_and_apply(
            &mut guard,
            &Event::BookingStatusChanged {
                id: booking_id,
                status: next,
                reason: reason.clone(),
                at: now,
            },
        )
        .await?;
        metrics::counter!(
            crate::observability::TRANSITIONS_TOTAL,
            "action" => action.as_str()
        )
        .increment(1);

        drop(guard);
        self.fan_out(approval::route_transition(&booking, next, reason.as_deref()))
            .await;

        Ok(next)
    }

    /// Administrative hall reassignment. Status is untouched; the booking
    /// moves only if the target hall can take its window (the booking's own
    /// id is excluded so it never conflicts with itself).
    pub async fn switch_hall(
        &self,
        booking_id: Ulid,
        new_hall_id: Ulid,
        actor: &Profile,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let current_hall_id = self
            .hall_of_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if current_hall_id == new_hall_id {
            return Err(EngineError::Validation(
                "booking is already in that hall".into(),
            ));
        }
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("reason too long"));
            }

        let from_arc = self
            .get_hall(&current_hall_id)
            .ok_or(EngineError::NotFound(current_hall_id))?;
        let to_arc = self
            .get_hall(&new_hall_id)
            .ok_or(EngineError::NotFound(new_hall_id))?;

        // Acquire write locks in sorted order to prevent deadlocks.
        let (mut from_guard, mut to_guard) = if current_hall_id < new_hall_id {
            let f = from_arc.write_owned().await;
            let t = to_arc.write_owned().await;
            (f, t)
        } else {
            let t = to_arc.write_owned().await;
            let f = from_arc.write_owned().await;
            (f, t)
        };

        let booking = from_guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .clone();
        approval::authorize_switch(actor, &booking)?;

        if to_guard.bookings.len() >= MAX_BOOKINGS_PER_HALL {
            return Err(EngineError::LimitExceeded("too many bookings on hall"));
        }
        if booking.attendees > to_guard.capacity {
            return Err(EngineError::Validation(format!(
                "{} attendees exceed hall capacity {}",
                booking.attendees, to_guard.capacity
            )));
        }
        match availability::check(&to_guard, booking.event_date, &booking.slot, Some(booking_id)) {
            Availability::Available => {}
            Availability::Unavailable { reason, conflict } => {
                return Err(EngineError::Unavailable { reason, conflict });
            }
        }

        let at = Utc::now();
        let event = Event::HallReassigned {
            booking_id,
            from_hall: current_hall_id,
            to_hall: new_hall_id,
            changed_by: actor.user_id,
            reason,
            at,
        };
        self.wal_append(&event).await?;
        move_booking(
            &mut from_guard,
            &mut to_guard,
            booking_id,
            actor.user_id,
            at,
            &self.booking_to_hall,
        );
        metrics::counter!(crate::observability::HALL_SWITCHES_TOTAL).increment(1);

        let from_name = from_guard.name.clone();
        let to_name = to_guard.name.clone();
        drop(from_guard);
        drop(to_guard);
        self.fan_out(approval::route_hall_change(&booking, &from_name, &to_name))
            .await;

        Ok(())
    }

    pub async fn mark_notification_read(
        &self,
        recipient: Ulid,
        id: Ulid,
    ) -> Result<(), EngineError> {
        let owned = self
            .inboxes
            .get(&recipient)
            .is_some_and(|inbox| inbox.iter().any(|n| n.id == id));
        if !owned {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::NotificationRead { recipient, id })
            .await?;
        self.apply_notification_read(&recipient, &id);
        Ok(())
    }

    // ── Fan-out ──────────────────────────────────────────

    fn resolve_audience(&self, audience: &Audience) -> Vec<Profile> {
        match audience {
            Audience::User(id) => self.profiles.get(id).map(|p| p.clone()).into_iter().collect(),
            Audience::Role(role) => self.profiles_by_role(*role),
            Audience::DepartmentHod(dept) => self
                .profiles
                .iter()
                .filter(|p| p.role == Role::Hod && p.department == Some(*dept))
                .map(|p| p.clone())
                .collect(),
        }
    }

    /// Server-side notification fan-out. Strictly best-effort: a failed WAL
    /// append skips the persisted row but never the live broadcast, and
    /// nothing here can fail the transition that triggered it.
    pub(super) async fn fan_out(&self, notices: Vec<Notice>) {
        for notice in notices {
            for profile in self.resolve_audience(&notice.audience) {
                let notification = Notification {
                    id: Ulid::new(),
                    recipient: profile.user_id,
                    title: notice.title.clone(),
                    message: notice.message.clone(),
                    kind: notice.kind.to_string(),
                    payload: Some(notice.payload.clone()),
                    read: false,
                    created_at: Utc::now(),
                };
                match self
                    .wal_append(&Event::NotificationCreated {
                        notification: notification.clone(),
                    })
                    .await
                {
                    Ok(()) => self.apply_notification(notification.clone()),
                    Err(e) => {
                        tracing::warn!(
                            "notification for {} not persisted: {e}",
                            profile.user_id
                        );
                    }
                }
                self.notify.send(&notification);
                if let (Some(mailer), Some(email)) = (&self.mailer, &profile.email) {
                    mailer.dispatch(email, &notification.title, &notification.message);
                }
            }
        }
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Bookings are re-emitted whole, so status,
    /// rejection reasons and reassignment history survive as-is.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let hall_ids: Vec<Ulid> = self.halls.iter().map(|e| *e.key()).collect();
        let mut bookings: Vec<Booking> = Vec::new();
        for id in hall_ids {
            let entry = match self.halls.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let hs = entry.value().clone();
            let guard = hs.try_read().expect("compact: uncontended read");

            events.push(Event::HallCreated {
                id: guard.id,
                name: guard.name.clone(),
                block: guard.block,
                hall_type: guard.hall_type,
                capacity: guard.capacity,
                equipment: guard.equipment,
            });
            if guard.admin.is_out_of_service() || guard.admin.updated_at.is_some() {
                events.push(Event::HallStatusChanged {
                    id: guard.id,
                    blocked: guard.admin.blocked,
                    under_maintenance: guard.admin.under_maintenance,
                    note: guard.admin.note.clone(),
                    updated_by: guard.admin.updated_by.unwrap_or_else(Ulid::nil),
                    at: guard.admin.updated_at.unwrap_or_else(Utc::now),
                });
            }
            bookings.extend(guard.bookings.iter().cloned());
        }

        for profile in self.profiles.iter() {
            events.push(Event::ProfileUpserted {
                profile: profile.clone(),
            });
        }
        for booking in bookings {
            events.push(Event::BookingRequested { booking });
        }
        for entry in self.approvals.iter() {
            for record in entry.value() {
                events.push(Event::ApprovalRecorded {
                    record: record.clone(),
                });
            }
        }
        // Notifications re-emit whole; the stored struct already carries its
        // read flag.
        for inbox in self.inboxes.iter() {
            for notification in inbox.value() {
                events.push(Event::NotificationCreated {
                    notification: notification.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
