//! Backend "virtual servers" that hold the simulated office's state.
//!
//! Tools never own state themselves; they are bound to one or more of these
//! long-lived handles.  The orchestrator creates one handle per dependency
//! name declared in the scenario and closes all of them at the end of a run.

mod calendar;
mod chat;
mod cloud_disk;
mod monitor;
mod sandbox;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{info, warn};

use trainee_clock::VirtualClock;
use trainee_config::AgentsConfig;

pub use calendar::{Attendance, MeetingCalendar, Meeting, Room};
pub use chat::{ChatGroup, ChatServer, ChatState, Delivery, DirectMessage, GroupMessage, HISTORY_FILE as CHAT_HISTORY_FILE};
pub use cloud_disk::{CloudDisk, CopyReceipt, DiskArea, DiskEntry};
pub use monitor::{HealthReport, MonitorSnapshot, PageLoadSample, ServiceStatus, WebsiteMonitor};
pub use sandbox::{CommandOutcome, Sandbox};

pub const CHAT_SERVER: &str = "chat_server";
pub const MEETING_CALENDAR: &str = "meeting_calendar";
pub const CLOUD_DISK: &str = "cloud_disk";
pub const SANDBOX: &str = "sandbox";
pub const WEBSITE_MONITOR: &str = "website_monitor";

/// Every backend name `Backends::create` understands.
pub const KNOWN_SERVERS: &[&str] = &[CHAT_SERVER, MEETING_CALENDAR, CLOUD_DISK, SANDBOX, WEBSITE_MONITOR];

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unknown backend server '{0}'")]
    UnknownServer(String),
    #[error("backend server '{0}' is not available")]
    Missing(&'static str),
    #[error("backend server '{server}' failed to start: {reason}")]
    Start { server: &'static str, reason: String },
}

/// Lifecycle shared by all backend servers.
pub trait BackendServer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Flush and release resources.  Called once per run.
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Everything a server may need at construction time.
pub struct ServerContext<'a> {
    pub task_root: &'a Path,
    pub clock: Option<Arc<VirtualClock>>,
    pub agents: &'a AgentsConfig,
}

impl ServerContext<'_> {
    pub fn workspace(&self) -> PathBuf {
        self.task_root.join("workspace")
    }
}

/// Typed set of backend handles.  Tool modules pull the handles they need
/// from here; a handle that was never created is a missing dependency.
#[derive(Default)]
pub struct Backends {
    pub chat_server: Option<Arc<ChatServer>>,
    pub meeting_calendar: Option<Arc<MeetingCalendar>>,
    pub cloud_disk: Option<Arc<CloudDisk>>,
    pub sandbox: Option<Arc<Sandbox>>,
    pub website_monitor: Option<Arc<WebsiteMonitor>>,
}

impl Backends {
    /// Create one handle per name.  An unknown name is a configuration
    /// error; a known server that fails to start is logged and left out.
    pub fn build(names: &[String], ctx: &ServerContext<'_>) -> Result<Self, ServerError> {
        let mut backends = Self::default();
        for name in names {
            match backends.create(name, ctx) {
                Ok(()) => info!(server = %name, "backend server started"),
                Err(err @ ServerError::UnknownServer(_)) => return Err(err),
                Err(err) => warn!(server = %name, error = %err, "skipping backend server"),
            }
        }
        Ok(backends)
    }

    pub fn create(&mut self, name: &str, ctx: &ServerContext<'_>) -> Result<(), ServerError> {
        match name {
            CHAT_SERVER => {
                let server = ChatServer::new(ctx.agents, ctx.clock.clone(), ctx.task_root.join(chat::HISTORY_FILE));
                self.chat_server = Some(Arc::new(server));
            }
            MEETING_CALENDAR => {
                let server = MeetingCalendar::load(ctx.task_root, ctx.clock.clone())
                    .map_err(|e| start_error(MEETING_CALENDAR, e))?;
                self.meeting_calendar = Some(Arc::new(server));
            }
            CLOUD_DISK => {
                let server = CloudDisk::new(ctx.task_root).map_err(|e| start_error(CLOUD_DISK, e))?;
                self.cloud_disk = Some(Arc::new(server));
            }
            SANDBOX => {
                let server = Sandbox::new(ctx.workspace()).map_err(|e| start_error(SANDBOX, e))?;
                self.sandbox = Some(Arc::new(server));
            }
            WEBSITE_MONITOR => {
                let server = WebsiteMonitor::load(ctx.task_root.join(monitor::SNAPSHOT_FILE))
                    .map_err(|e| start_error(WEBSITE_MONITOR, e))?;
                self.website_monitor = Some(Arc::new(server));
            }
            other => return Err(ServerError::UnknownServer(other.to_string())),
        }
        Ok(())
    }

    pub fn chat(&self) -> Result<Arc<ChatServer>, ServerError> {
        require(&self.chat_server, CHAT_SERVER)
    }

    pub fn calendar(&self) -> Result<Arc<MeetingCalendar>, ServerError> {
        require(&self.meeting_calendar, MEETING_CALENDAR)
    }

    pub fn cloud_disk(&self) -> Result<Arc<CloudDisk>, ServerError> {
        require(&self.cloud_disk, CLOUD_DISK)
    }

    pub fn sandbox(&self) -> Result<Arc<Sandbox>, ServerError> {
        require(&self.sandbox, SANDBOX)
    }

    pub fn monitor(&self) -> Result<Arc<WebsiteMonitor>, ServerError> {
        require(&self.website_monitor, WEBSITE_MONITOR)
    }

    /// Names of the handles currently held.
    pub fn running(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for (present, name) in [
            (self.chat_server.is_some(), CHAT_SERVER),
            (self.meeting_calendar.is_some(), MEETING_CALENDAR),
            (self.cloud_disk.is_some(), CLOUD_DISK),
            (self.sandbox.is_some(), SANDBOX),
            (self.website_monitor.is_some(), WEBSITE_MONITOR),
        ] {
            if present {
                names.push(name);
            }
        }
        names
    }

    /// Close every held handle and drop it.  Handles are taken out of the
    /// set, so a second call closes nothing.
    pub fn close_all(&mut self) {
        let servers: Vec<Arc<dyn BackendServer>> = [
            self.chat_server.take().map(|s| s as Arc<dyn BackendServer>),
            self.meeting_calendar.take().map(|s| s as Arc<dyn BackendServer>),
            self.cloud_disk.take().map(|s| s as Arc<dyn BackendServer>),
            self.sandbox.take().map(|s| s as Arc<dyn BackendServer>),
            self.website_monitor.take().map(|s| s as Arc<dyn BackendServer>),
        ]
        .into_iter()
        .flatten()
        .collect();

        for server in servers {
            match server.close() {
                Ok(()) => info!(server = server.name(), "backend server closed"),
                Err(e) => warn!(server = server.name(), error = %e, "backend server close failed"),
            }
        }
    }
}

fn require<T>(slot: &Option<Arc<T>>, name: &'static str) -> Result<Arc<T>, ServerError> {
    slot.clone().ok_or(ServerError::Missing(name))
}

fn start_error(server: &'static str, err: anyhow::Error) -> ServerError {
    ServerError::Start {
        server,
        reason: format!("{err:#}"),
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timestamp for a state change: simulated time when a clock is running,
/// local time otherwise.
pub(crate) fn stamp(clock: Option<&VirtualClock>) -> String {
    match clock {
        Some(c) => c.format(),
        None => chrono::Local::now()
            .format(trainee_clock::DEFAULT_FORMAT)
            .to_string(),
    }
}
