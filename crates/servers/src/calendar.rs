//! Meeting-room calendar bound to the simulated clock.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use trainee_clock::{VirtualClock, parse_datetime};

use crate::{BackendServer, MEETING_CALENDAR, lock};

/// Optional seed file, relative to the task root.
const SEED_FILE: &str = "calendar.json";

const MEETING_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub name: String,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Meeting {
    pub room_name: String,
    pub applicant: String,
    pub attendees: Vec<String>,
    #[serde(serialize_with = "serialize_minute")]
    pub start: NaiveDateTime,
    #[serde(serialize_with = "serialize_minute")]
    pub end: NaiveDateTime,
    #[serde(skip)]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attended_by: Vec<String>,
}

impl Meeting {
    fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start < end && start < self.end
    }

    fn includes(&self, agent: &str) -> bool {
        self.applicant == agent || self.attendees.iter().any(|a| a == agent)
    }
}

/// Result of attending a meeting.
#[derive(Debug, Clone)]
pub struct Attendance {
    pub meeting: Meeting,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarSeed {
    #[serde(default)]
    rooms: Vec<Room>,
    #[serde(default)]
    meetings: Vec<MeetingSeed>,
}

#[derive(Debug, Deserialize)]
struct MeetingSeed {
    room_name: String,
    applicant: String,
    #[serde(default)]
    attendees: Vec<String>,
    start: String,
    end: String,
    #[serde(default)]
    notes: Option<String>,
}

pub struct MeetingCalendar {
    rooms: Vec<Room>,
    meetings: Mutex<Vec<Meeting>>,
    clock: Option<Arc<VirtualClock>>,
}

impl MeetingCalendar {
    /// Load rooms and pre-scheduled meetings from `<task_root>/calendar.json`,
    /// falling back to a default set of rooms when the file is absent.
    pub fn load(task_root: &Path, clock: Option<Arc<VirtualClock>>) -> Result<Self> {
        let path = task_root.join(SEED_FILE);
        let seed = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("malformed {}", path.display()))?
        } else {
            CalendarSeed::default()
        };

        let rooms = if seed.rooms.is_empty() { default_rooms() } else { seed.rooms };
        let mut meetings = Vec::with_capacity(seed.meetings.len());
        for m in seed.meetings {
            let (start, end) = parse_span(&m.start, &m.end)?;
            meetings.push(Meeting {
                room_name: m.room_name,
                applicant: m.applicant,
                attendees: m.attendees,
                start,
                end,
                notes: m.notes,
                attended_by: Vec::new(),
            });
        }
        Ok(Self::new(rooms, meetings, clock))
    }

    pub fn new(rooms: Vec<Room>, meetings: Vec<Meeting>, clock: Option<Arc<VirtualClock>>) -> Self {
        Self {
            rooms,
            meetings: Mutex::new(meetings),
            clock,
        }
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn meetings(&self) -> Vec<Meeting> {
        lock(&self.meetings).clone()
    }

    pub fn available_rooms(&self, start: &str, end: &str) -> Result<Vec<Room>> {
        let (start, end) = parse_span(start, end)?;
        let meetings = lock(&self.meetings);
        Ok(self
            .rooms
            .iter()
            .filter(|room| {
                !meetings
                    .iter()
                    .any(|m| m.room_name == room.name && m.overlaps(start, end))
            })
            .cloned()
            .collect())
    }

    pub fn book(
        &self,
        applicant: &str,
        attendees: Vec<String>,
        room_name: &str,
        start: &str,
        end: &str,
    ) -> Result<Meeting> {
        let (start, end) = parse_span(start, end)?;
        let room = self.room(room_name)?;
        if let Some(clock) = &self.clock {
            if start < clock.now() {
                bail!("cannot book a meeting in the past (current time is {})", clock.format());
            }
        }

        let mut attendees: Vec<String> = attendees
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty() && a != applicant)
            .collect();
        attendees.dedup();
        if attendees.len() + 1 > room.capacity {
            bail!(
                "{} holds {} people but {} were invited",
                room.name,
                room.capacity,
                attendees.len() + 1
            );
        }

        let mut meetings = lock(&self.meetings);
        if let Some(clash) = meetings
            .iter()
            .find(|m| m.room_name == room.name && m.overlaps(start, end))
        {
            bail!(
                "{} is already booked from {} to {}",
                room.name,
                clash.start.format(MEETING_FORMAT),
                clash.end.format(MEETING_FORMAT)
            );
        }

        let meeting = Meeting {
            room_name: room.name.clone(),
            applicant: applicant.to_string(),
            attendees,
            start,
            end,
            notes: None,
            attended_by: Vec::new(),
        };
        meetings.push(meeting.clone());
        Ok(meeting)
    }

    /// Attend a meeting.  The simulated clock jumps to the meeting's end.
    pub fn attend(&self, agent: &str, room_name: &str, start: &str, end: &str) -> Result<Attendance> {
        let (start, end) = parse_span(start, end)?;
        let mut meetings = lock(&self.meetings);
        let meeting = meetings
            .iter_mut()
            .find(|m| m.room_name == room_name && m.start == start && m.end == end)
            .ok_or_else(|| anyhow::anyhow!("no meeting in {room_name} at that time"))?;
        if !meeting.includes(agent) {
            bail!("{agent} is not invited to this meeting");
        }
        if let Some(clock) = &self.clock {
            if clock.now() >= meeting.end {
                bail!("the meeting has already ended (current time is {})", clock.format());
            }
            clock.advance_to(meeting.end);
        }
        if !meeting.attended_by.iter().any(|a| a == agent) {
            meeting.attended_by.push(agent.to_string());
        }
        Ok(Attendance {
            notes: meeting.notes.clone(),
            meeting: meeting.clone(),
        })
    }

    pub fn cancel(&self, applicant: &str, room_name: &str, start: &str, end: &str) -> Result<Meeting> {
        let (start, end) = parse_span(start, end)?;
        let mut meetings = lock(&self.meetings);
        let index = meetings
            .iter()
            .position(|m| m.room_name == room_name && m.start == start && m.end == end)
            .ok_or_else(|| anyhow::anyhow!("no meeting in {room_name} at that time"))?;
        if meetings[index].applicant != applicant {
            bail!("only {} can cancel this meeting", meetings[index].applicant);
        }
        Ok(meetings.remove(index))
    }

    fn room(&self, name: &str) -> Result<&Room> {
        self.rooms
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow::anyhow!("room '{name}' does not exist"))
    }
}

impl BackendServer for MeetingCalendar {
    fn name(&self) -> &'static str {
        MEETING_CALENDAR
    }
}

fn default_rooms() -> Vec<Room> {
    [("Room A", 6), ("Room B", 10), ("Board Room", 20)]
        .into_iter()
        .map(|(name, capacity)| Room {
            name: name.to_string(),
            capacity,
        })
        .collect()
}

fn parse_span(start: &str, end: &str) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let start_at = parse_datetime(start)
        .ok_or_else(|| anyhow::anyhow!("invalid start time '{start}', expected YYYY-MM-DD HH:MM"))?;
    let end_at = parse_datetime(end)
        .ok_or_else(|| anyhow::anyhow!("invalid end time '{end}', expected YYYY-MM-DD HH:MM"))?;
    if end_at <= start_at {
        bail!("end time must be after start time");
    }
    Ok((start_at, end_at))
}

fn serialize_minute<S: serde::Serializer>(at: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&at.format(MEETING_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn clock_at(raw: &str) -> Arc<VirtualClock> {
        Arc::new(VirtualClock::starting_at(parse_datetime(raw).unwrap(), BTreeMap::new(), 1.0))
    }

    fn calendar(clock: Option<Arc<VirtualClock>>) -> MeetingCalendar {
        MeetingCalendar::new(default_rooms(), Vec::new(), clock)
    }

    #[test]
    fn booking_removes_room_from_availability() {
        let cal = calendar(None);
        cal.book("Alice", vec!["Bob".into()], "Room A", "2024-01-01 10:00", "2024-01-01 11:00")
            .unwrap();
        let free = cal.available_rooms("2024-01-01 10:30", "2024-01-01 12:00").unwrap();
        assert!(free.iter().all(|r| r.name != "Room A"));
        assert_eq!(free.len(), 2);

        // Back-to-back is not an overlap.
        let later = cal.available_rooms("2024-01-01 11:00", "2024-01-01 12:00").unwrap();
        assert_eq!(later.len(), 3);
    }

    #[test]
    fn double_booking_is_rejected() {
        let cal = calendar(None);
        cal.book("Alice", vec![], "Room B", "2024-01-01 10:00", "2024-01-01 11:00").unwrap();
        let err = cal
            .book("Bob", vec![], "Room B", "2024-01-01 10:30", "2024-01-01 11:30")
            .unwrap_err();
        assert!(err.to_string().contains("already booked"));
    }

    #[test]
    fn past_bookings_are_rejected_when_clock_runs() {
        let cal = calendar(Some(clock_at("2024-01-01 12:00")));
        assert!(cal.book("Alice", vec![], "Room A", "2024-01-01 09:00", "2024-01-01 10:00").is_err());
        assert!(cal.book("Alice", vec![], "Room A", "2024-01-01 13:00", "2024-01-01 14:00").is_ok());
    }

    #[test]
    fn capacity_and_time_order_are_checked() {
        let cal = MeetingCalendar::new(
            vec![Room { name: "Booth".into(), capacity: 2 }],
            Vec::new(),
            None,
        );
        let crowd = vec!["Bob".into(), "Carol".into()];
        assert!(cal.book("Alice", crowd, "Booth", "2024-01-01 10:00", "2024-01-01 11:00").is_err());
        assert!(cal.book("Alice", vec![], "Booth", "2024-01-01 11:00", "2024-01-01 10:00").is_err());
        assert!(cal.book("Alice", vec![], "Nowhere", "2024-01-01 10:00", "2024-01-01 11:00").is_err());
    }

    #[test]
    fn attending_moves_clock_to_meeting_end() {
        let clock = clock_at("2024-01-01 09:00");
        let cal = calendar(Some(clock.clone()));
        cal.book("Alice", vec!["Bob".into()], "Room A", "2024-01-01 10:00", "2024-01-01 10:45")
            .unwrap();

        assert!(cal.attend("Carol", "Room A", "2024-01-01 10:00", "2024-01-01 10:45").is_err());
        let attended = cal.attend("Bob", "Room A", "2024-01-01 10:00", "2024-01-01 10:45").unwrap();
        assert_eq!(attended.meeting.attended_by, vec!["Bob"]);
        assert_eq!(clock.format(), "2024-01-01 10:45:00");

        // Over now.
        assert!(cal.attend("Alice", "Room A", "2024-01-01 10:00", "2024-01-01 10:45").is_err());
    }

    #[test]
    fn only_applicant_can_cancel() {
        let cal = calendar(None);
        cal.book("Alice", vec!["Bob".into()], "Room A", "2024-01-01 10:00", "2024-01-01 11:00")
            .unwrap();
        assert!(cal.cancel("Bob", "Room A", "2024-01-01 10:00", "2024-01-01 11:00").is_err());
        cal.cancel("Alice", "Room A", "2024-01-01 10:00", "2024-01-01 11:00").unwrap();
        assert!(cal.meetings().is_empty());
    }

    #[test]
    fn loads_seed_file_with_notes() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SEED_FILE),
            r#"{"rooms": [{"name": "Lab", "capacity": 4}],
                "meetings": [{"room_name": "Lab", "applicant": "Bob", "attendees": ["Alice"],
                              "start": "2024-01-01 14:00", "end": "2024-01-01 15:00",
                              "notes": "Ship on Friday."}]}"#,
        )
        .unwrap();
        let cal = MeetingCalendar::load(dir.path(), None).unwrap();
        assert_eq!(cal.rooms().len(), 1);
        let attended = cal.attend("Alice", "Lab", "2024-01-01 14:00", "2024-01-01 15:00").unwrap();
        assert_eq!(attended.notes.as_deref(), Some("Ship on Friday."));
    }

    #[test]
    fn meeting_serializes_minutes() {
        let cal = calendar(None);
        let meeting = cal
            .book("Alice", vec![], "Room A", "2024-01-01 10:00", "2024-01-01 11:00")
            .unwrap();
        let json = serde_json::to_value(&meeting).unwrap();
        assert_eq!(json["start"], "2024-01-01 10:00");
        assert!(json.get("notes").is_none());
    }
}
