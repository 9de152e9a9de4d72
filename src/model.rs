use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight — the only intra-day time type.
pub type Minute = u16;

/// Parse `"HH:MM"` (or `"HH:MM:SS"`, seconds ignored) into a minute-of-day.
pub fn minute_from_hhmm(s: &str) -> Option<Minute> {
    let mut parts = s.splitn(3, ':');
    let h: u16 = parts.next()?.parse().ok()?;
    let m: u16 = parts.next()?.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Format a minute-of-day as `"HH:MM"`.
pub fn hhmm(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Half-open wall-clock window `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Minute,
    pub end: Minute,
}

impl Slot {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, m: Minute) -> bool {
        self.start <= m && m < self.end
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", hhmm(self.start), hhmm(self.end))
    }
}

// ── Enumerations ─────────────────────────────────────────────────

/// Location group a hall belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    A,
    B,
    C,
    D,
    E,
}

impl Block {
    pub fn as_str(&self) -> &'static str {
        match self {
            Block::A => "A",
            Block::B => "B",
            Block::C => "C",
            Block::D => "D",
            Block::E => "E",
        }
    }
}

impl std::str::FromStr for Block {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(Block::A),
            "B" => Ok(Block::B),
            "C" => Ok(Block::C),
            "D" => Ok(Block::D),
            "E" => Ok(Block::E),
            other => Err(format!("unknown block: {other}")),
        }
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HallType {
    Auditorium,
    SmartClassroom,
}

impl HallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HallType::Auditorium => "auditorium",
            HallType::SmartClassroom => "smart_classroom",
        }
    }
}

impl std::str::FromStr for HallType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auditorium" => Ok(HallType::Auditorium),
            "smart_classroom" => Ok(HallType::SmartClassroom),
            other => Err(format!("unknown hall type: {other}")),
        }
    }
}

impl std::fmt::Display for HallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed departmental roster. Statistics always report every entry,
/// zero-filled when a department has no bookings in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Department {
    Cse,
    It,
    Ece,
    Eee,
    Mech,
    Civil,
    Aids,
    Mba,
}

impl Department {
    pub const ALL: [Department; 8] = [
        Department::Cse,
        Department::It,
        Department::Ece,
        Department::Eee,
        Department::Mech,
        Department::Civil,
        Department::Aids,
        Department::Mba,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Cse => "CSE",
            Department::It => "IT",
            Department::Ece => "ECE",
            Department::Eee => "EEE",
            Department::Mech => "MECH",
            Department::Civil => "CIVIL",
            Department::Aids => "AIDS",
            Department::Mba => "MBA",
        }
    }
}

impl std::str::FromStr for Department {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CSE" => Ok(Department::Cse),
            "IT" => Ok(Department::It),
            "ECE" => Ok(Department::Ece),
            "EEE" => Ok(Department::Eee),
            "MECH" => Ok(Department::Mech),
            "CIVIL" => Ok(Department::Civil),
            "AIDS" => Ok(Department::Aids),
            "MBA" => Ok(Department::Mba),
            other => Err(format!("unknown department: {other}")),
        }
    }
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Institution {
    Aided,
    SelfFinancing,
}

impl Institution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Institution::Aided => "aided",
            Institution::SelfFinancing => "self_financing",
        }
    }
}

impl std::str::FromStr for Institution {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aided" => Ok(Institution::Aided),
            "self_financing" => Ok(Institution::SelfFinancing),
            other => Err(format!("unknown institution type: {other}")),
        }
    }
}

impl std::fmt::Display for Institution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Faculty,
    Hod,
    Principal,
    /// Historical final approver; a read-only downstream viewer under
    /// current policy.
    Pro,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Faculty => "faculty",
            Role::Hod => "hod",
            Role::Principal => "principal",
            Role::Pro => "pro",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "faculty" => Ok(Role::Faculty),
            "hod" => Ok(Role::Hod),
            "principal" => Ok(Role::Principal),
            "pro" => Ok(Role::Pro),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking lifecycle. `PendingPro` is retained so historical rows stay
/// representable, but the current approval chain bypasses it — principal
/// approval finalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    PendingHod,
    PendingPrincipal,
    PendingPro,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Approved | BookingStatus::Rejected)
    }

    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Any booking still alive in the approval pipeline reserves its slot;
    /// only a rejected booking frees it.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, BookingStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingHod => "pending_hod",
            BookingStatus::PendingPrincipal => "pending_principal",
            BookingStatus::PendingPro => "pending_pro",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending_hod" => Ok(BookingStatus::PendingHod),
            "pending_principal" => Ok(BookingStatus::PendingPrincipal),
            "pending_pro" => Ok(BookingStatus::PendingPro),
            "approved" => Ok(BookingStatus::Approved),
            "rejected" => Ok(BookingStatus::Rejected),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Halls ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Equipment {
    pub ac: bool,
    pub mic: bool,
    pub projector: bool,
    pub audio: bool,
}

/// Administrative block/maintenance flags. Blocked and under-maintenance are
/// mutually exclusive in practice: setting one clears the other.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HallAdminState {
    pub blocked: bool,
    pub under_maintenance: bool,
    pub note: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<Ulid>,
}

impl HallAdminState {
    pub fn is_out_of_service(&self) -> bool {
        self.blocked || self.under_maintenance
    }
}

#[derive(Debug, Clone)]
pub struct HallState {
    pub id: Ulid,
    pub name: String,
    pub block: Block,
    pub hall_type: HallType,
    /// Seat count; bookings may not exceed it.
    pub capacity: u32,
    pub equipment: Equipment,
    pub admin: HallAdminState,
    /// All bookings on this hall, sorted by `(event_date, slot.start)`.
    pub bookings: Vec<Booking>,
}

impl HallState {
    pub fn new(
        id: Ulid,
        name: String,
        block: Block,
        hall_type: HallType,
        capacity: u32,
        equipment: Equipment,
    ) -> Self {
        Self {
            id,
            name,
            block,
            hall_type,
            capacity,
            equipment,
            admin: HallAdminState::default(),
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by `(event_date, slot.start)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.event_date, booking.slot.start);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.event_date, b.slot.start))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Remove a booking by id.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings on a given date, in slot order. Binary search skips all
    /// earlier dates.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        let lo = self.bookings.partition_point(|b| b.event_date < date);
        self.bookings[lo..]
            .iter()
            .take_while(move |b| b.event_date == date)
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub hall_id: Ulid,
    /// Requesting faculty member (owner).
    pub faculty: Ulid,
    pub organizer: String,
    pub department: Department,
    pub institution: Institution,
    pub event_name: String,
    pub event_description: String,
    pub event_date: NaiveDate,
    pub slot: Slot,
    pub attendees: u32,
    pub equipment: Equipment,
    /// Name of the department's HOD, frozen at request time.
    pub hod_name: Option<String>,
    pub status: BookingStatus,
    /// Present iff `status == Rejected`.
    pub rejection_reason: Option<String>,
    /// Set on the first administrative hall reassignment.
    pub original_hall_id: Option<Ulid>,
    pub hall_changed_by: Option<Ulid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Profiles ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Ulid,
    /// Login name carried on the wire connection.
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub role: Role,
    /// Required for HODs; optional elsewhere.
    pub department: Option<Department>,
}

// ── Approval audit log ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalAction {
    Approved,
    Rejected,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approved => "approved",
            ApprovalAction::Rejected => "rejected",
        }
    }
}

/// One immutable audit row per approval/rejection decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub approver: Ulid,
    pub approver_name: String,
    pub action: ApprovalAction,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

// ── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub recipient: Ulid,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub payload: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    HallCreated {
        id: Ulid,
        name: String,
        block: Block,
        hall_type: HallType,
        capacity: u32,
        equipment: Equipment,
    },
    HallStatusChanged {
        id: Ulid,
        blocked: bool,
        under_maintenance: bool,
        note: Option<String>,
        updated_by: Ulid,
        at: DateTime<Utc>,
    },
    ProfileUpserted {
        profile: Profile,
    },
    BookingRequested {
        booking: Booking,
    },
    /// Audit row. Always appended before the matching status change so a
    /// crash leaves a trail without a transition, never the reverse.
    ApprovalRecorded {
        record: ApprovalRecord,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    HallReassigned {
        booking_id: Ulid,
        from_hall: Ulid,
        to_hall: Ulid,
        changed_by: Ulid,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    NotificationCreated {
        notification: Notification,
    },
    NotificationRead {
        recipient: Ulid,
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HallInfo {
    pub id: Ulid,
    pub name: String,
    pub block: Block,
    pub hall_type: HallType,
    pub capacity: u32,
    pub equipment: Equipment,
    pub blocked: bool,
    pub under_maintenance: bool,
    pub status_note: Option<String>,
    /// Wall-clock view: an occupying booking covers the current minute.
    pub in_use: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictSummary {
    pub event_name: String,
    pub slot: Slot,
}

/// Outcome of an availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable {
        reason: String,
        conflict: Option<ConflictSummary>,
    },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRow {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageTable {
    pub top: Vec<UsageRow>,
    pub bottom: Vec<UsageRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub total_bookings: u64,
    pub halls: UsageTable,
    pub departments: UsageTable,
}
