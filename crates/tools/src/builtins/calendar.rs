//! `calendar_tool`: meeting-room booking.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use trainee_servers::{Backends, MeetingCalendar, ServerError};

use crate::{ParamDecl, ParamType, Tool, ToolArgs, ToolOutput, ToolSignature};

pub fn tools(backends: &Backends) -> Result<Vec<Box<dyn Tool>>, ServerError> {
    let calendar = backends.calendar()?;
    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(GetAvailableRooms { calendar: calendar.clone() }),
        Box::new(BookMeeting { calendar: calendar.clone() }),
        Box::new(AttendMeeting { calendar: calendar.clone() }),
        Box::new(CancelMeeting { calendar }),
    ];
    Ok(tools)
}

fn span(sig: ToolSignature) -> ToolSignature {
    sig.param(ParamDecl::required("start", ParamType::String))
        .param(ParamDecl::required("end", ParamType::String))
}

pub struct GetAvailableRooms {
    calendar: Arc<MeetingCalendar>,
}

#[async_trait]
impl Tool for GetAvailableRooms {
    fn signature(&self) -> ToolSignature {
        span(ToolSignature::new(
            "GetAvailableRooms",
            r#"List the meeting rooms that are free for the whole of a time span.

            Args:
                start: Start time, formatted as YYYY-MM-DD HH:MM.
                end: End time, formatted as YYYY-MM-DD HH:MM."#,
        ))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let rooms = self.calendar.available_rooms(args.str("start")?, args.str("end")?)?;
        ToolOutput::json(json!({ "available_rooms": rooms }))
    }
}

pub struct BookMeeting {
    calendar: Arc<MeetingCalendar>,
}

#[async_trait]
impl Tool for BookMeeting {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "BookMeeting",
            r#"Book a meeting room and invite attendees.

            Args:
                applicant: Your own user name.
                attendees: A user name or a list of user names to invite.
                room_name: Name of the room to book.
                start: Start time, formatted as YYYY-MM-DD HH:MM.
                end: End time, formatted as YYYY-MM-DD HH:MM."#,
        )
        .param(ParamDecl::required("applicant", ParamType::String))
        .param(ParamDecl::required(
            "attendees",
            ParamType::OneOf(vec![ParamType::String, ParamType::array_of(ParamType::String)]),
        ))
        .param(ParamDecl::required("room_name", ParamType::String))
        .param(ParamDecl::required("start", ParamType::String))
        .param(ParamDecl::required("end", ParamType::String))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let meeting = self.calendar.book(
            args.str("applicant")?,
            args.string_list("attendees")?,
            args.str("room_name")?,
            args.str("start")?,
            args.str("end")?,
        )?;
        ToolOutput::json(json!({ "status": "booked", "meeting": meeting }))
    }
}

pub struct AttendMeeting {
    calendar: Arc<MeetingCalendar>,
}

#[async_trait]
impl Tool for AttendMeeting {
    fn signature(&self) -> ToolSignature {
        span(
            ToolSignature::new(
                "AttendMeeting",
                r#"Attend a meeting you are invited to.  Time passes until the meeting ends.

                Args:
                    agent_name: Your own user name.
                    room_name: Room the meeting takes place in.
                    start: Start time of the meeting, formatted as YYYY-MM-DD HH:MM.
                    end: End time of the meeting, formatted as YYYY-MM-DD HH:MM."#,
            )
            .param(ParamDecl::required("agent_name", ParamType::String))
            .param(ParamDecl::required("room_name", ParamType::String)),
        )
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let attended = self.calendar.attend(
            args.str("agent_name")?,
            args.str("room_name")?,
            args.str("start")?,
            args.str("end")?,
        )?;
        match attended.notes {
            Some(notes) => Ok(ToolOutput::attach(format!(
                "[Meeting in {}] {notes}",
                attended.meeting.room_name
            ))),
            None => ToolOutput::json(json!({ "status": "attended", "meeting": attended.meeting })),
        }
    }
}

pub struct CancelMeeting {
    calendar: Arc<MeetingCalendar>,
}

#[async_trait]
impl Tool for CancelMeeting {
    fn signature(&self) -> ToolSignature {
        span(
            ToolSignature::new(
                "CancelMeeting",
                r#"Cancel a meeting you booked.

                Args:
                    applicant: Your own user name.
                    room_name: Room the meeting was booked in.
                    start: Start time of the meeting, formatted as YYYY-MM-DD HH:MM.
                    end: End time of the meeting, formatted as YYYY-MM-DD HH:MM."#,
            )
            .param(ParamDecl::required("applicant", ParamType::String))
            .param(ParamDecl::required("room_name", ParamType::String)),
        )
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let meeting = self.calendar.cancel(
            args.str("applicant")?,
            args.str("room_name")?,
            args.str("start")?,
            args.str("end")?,
        )?;
        ToolOutput::json(json!({ "status": "cancelled", "meeting": meeting }))
    }
}
