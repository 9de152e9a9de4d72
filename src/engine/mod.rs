mod approval;
mod availability;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use approval::{Audience, Notice};
pub use availability::{check as check_availability, current_booking};
pub use error::EngineError;
pub use mutations::BookingRequest;
pub use queries::BookingFilter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::email::Mailer;
use crate::limits::MAX_INBOX_LEN;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedHallState = Arc<RwLock<HallState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub halls: DashMap<Ulid, SharedHallState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) mailer: Option<Arc<Mailer>>,
    /// Reverse lookup: booking id → hall id (bookings move on reassignment).
    pub(super) booking_to_hall: DashMap<Ulid, Ulid>,
    pub(super) profiles: DashMap<Ulid, Profile>,
    pub(super) username_to_user: DashMap<String, Ulid>,
    /// Append-only audit trail per booking.
    pub(super) approvals: DashMap<Ulid, Vec<ApprovalRecord>>,
    /// Persisted notification rows per recipient.
    pub(super) inboxes: DashMap<Ulid, Vec<Notification>>,
}

/// Apply a hall-scoped event directly to a HallState (no locking — caller
/// holds the lock). Engine-scoped events are handled by the engine itself.
fn apply_to_hall(hs: &mut HallState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingRequested { booking } => {
            index.insert(booking.id, booking.hall_id);
            hs.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, reason, at } => {
            if let Some(b) = hs.booking_mut(*id) {
                b.status = *status;
                b.rejection_reason = reason.clone();
                b.updated_at = *at;
            }
        }
        Event::HallStatusChanged {
            blocked,
            under_maintenance,
            note,
            updated_by,
            at,
            ..
        } => {
            hs.admin = HallAdminState {
                blocked: *blocked,
                under_maintenance: *under_maintenance,
                note: note.clone(),
                updated_at: Some(*at),
                updated_by: Some(*updated_by),
            };
        }
        _ => {}
    }
}

/// Move a booking between two hall states (reassignment). The first move
/// records where the booking originally lived.
fn move_booking(
    from: &mut HallState,
    to: &mut HallState,
    booking_id: Ulid,
    changed_by: Ulid,
    at: chrono::DateTime<chrono::Utc>,
    index: &DashMap<Ulid, Ulid>,
) {
    if let Some(mut b) = from.remove_booking(booking_id) {
        if b.original_hall_id.is_none() {
            b.original_hall_id = Some(from.id);
        }
        b.hall_id = to.id;
        b.hall_changed_by = Some(changed_by);
        b.updated_at = at;
        to.insert_booking(b);
        index.insert(booking_id, to.id);
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        mailer: Option<Arc<Mailer>>,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            halls: DashMap::new(),
            wal_tx,
            notify,
            mailer,
            booking_to_hall: DashMap::new(),
            profiles: DashMap::new(),
            username_to_user: DashMap::new(),
            approvals: DashMap::new(),
            inboxes: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::HallCreated {
                id,
                name,
                block,
                hall_type,
                capacity,
                equipment,
            } => {
                let hs = HallState::new(*id, name.clone(), *block, *hall_type, *capacity, *equipment);
                self.halls.insert(*id, Arc::new(RwLock::new(hs)));
            }
            Event::ProfileUpserted { profile } => {
                self.apply_profile(profile.clone());
            }
            Event::ApprovalRecorded { record } => {
                self.approvals
                    .entry(record.booking_id)
                    .or_default()
                    .push(record.clone());
            }
            Event::NotificationCreated { notification } => {
                self.apply_notification(notification.clone());
            }
            Event::NotificationRead { recipient, id } => {
                self.apply_notification_read(recipient, id);
            }
            Event::HallReassigned {
                booking_id,
                from_hall,
                to_hall,
                changed_by,
                at,
                ..
            } => {
                if let (Some(from), Some(to)) =
                    (self.get_hall(from_hall), self.get_hall(to_hall))
                {
                    let mut from_guard = from.try_write().expect("replay: uncontended write");
                    let mut to_guard = to.try_write().expect("replay: uncontended write");
                    move_booking(
                        &mut from_guard,
                        &mut to_guard,
                        *booking_id,
                        *changed_by,
                        *at,
                        &self.booking_to_hall,
                    );
                }
            }
            other => {
                if let Some(hall_id) = self.event_hall_id(other)
                    && let Some(entry) = self.halls.get(&hall_id) {
                        let hs_arc = entry.clone();
                        let mut guard = hs_arc.try_write().expect("replay: uncontended write");
                        apply_to_hall(&mut guard, other, &self.booking_to_hall);
                    }
            }
        }
    }

    /// Resolve which hall a hall-scoped event belongs to.
    fn event_hall_id(&self, event: &Event) -> Option<Ulid> {
        match event {
            Event::BookingRequested { booking } => Some(booking.hall_id),
            Event::HallStatusChanged { id, .. } => Some(*id),
            Event::BookingStatusChanged { id, .. } => self.hall_of_booking(id),
            _ => None,
        }
    }

    pub(super) fn apply_profile(&self, profile: Profile) {
        // A rename must not leave the old login name pointing anywhere.
        if let Some(old) = self.profiles.get(&profile.user_id)
            && old.username != profile.username {
                self.username_to_user.remove(&old.username);
            }
        self.username_to_user
            .insert(profile.username.clone(), profile.user_id);
        self.profiles.insert(profile.user_id, profile);
    }

    pub(super) fn apply_notification(&self, notification: Notification) {
        let mut inbox = self.inboxes.entry(notification.recipient).or_default();
        if inbox.len() >= MAX_INBOX_LEN {
            inbox.remove(0);
        }
        inbox.push(notification);
    }

    pub(super) fn apply_notification_read(&self, recipient: &Ulid, id: &Ulid) {
        if let Some(mut inbox) = self.inboxes.get_mut(recipient)
            && let Some(n) = inbox.iter_mut().find(|n| n.id == *id) {
                n.read = true;
            }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_hall(&self, id: &Ulid) -> Option<SharedHallState> {
        self.halls.get(id).map(|e| e.value().clone())
    }

    pub fn hall_of_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_hall.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call for hall-scoped events.
    pub(super) async fn persist_and_apply(
        &self,
        hs: &mut HallState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_hall(hs, event, &self.booking_to_hall);
        Ok(())
    }

    /// Lookup booking → hall, get hall, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<HallState>), EngineError> {
        let hall_id = self
            .hall_of_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let hs = self
            .get_hall(&hall_id)
            .ok_or(EngineError::NotFound(hall_id))?;
        let guard = hs.write_owned().await;
        Ok((hall_id, guard))
    }
}
