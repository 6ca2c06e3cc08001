//! `website_monitor`: read-only service health and performance data.

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;

use trainee_servers::{Backends, ServerError, WebsiteMonitor};

use crate::{ParamDecl, ParamType, Tool, ToolArgs, ToolOutput, ToolSignature};

pub fn tools(backends: &Backends) -> Result<Vec<Box<dyn Tool>>, ServerError> {
    let monitor = backends.monitor()?;
    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(ListMonitoredServices { monitor: monitor.clone() }),
        Box::new(GetRealTimeSystemHealth { monitor: monitor.clone() }),
        Box::new(GetErrorLogs { monitor: monitor.clone() }),
        Box::new(GetPerformanceSummary { monitor: monitor.clone() }),
        Box::new(GetHistoricalLoadTimes { monitor }),
    ];
    Ok(tools)
}

pub struct ListMonitoredServices {
    monitor: Arc<WebsiteMonitor>,
}

#[async_trait]
impl Tool for ListMonitoredServices {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new("ListMonitoredServices", "List the services under monitoring.")
    }

    async fn call(&self, _args: ToolArgs) -> Result<ToolOutput> {
        let services: Vec<_> = self
            .monitor
            .services()
            .iter()
            .map(|s| json!({ "server_id": s.server_id, "name": s.name }))
            .collect();
        ToolOutput::json(json!({ "services": services }))
    }
}

pub struct GetRealTimeSystemHealth {
    monitor: Arc<WebsiteMonitor>,
}

#[async_trait]
impl Tool for GetRealTimeSystemHealth {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "GetRealTimeSystemHealth",
            "Current status, CPU and memory usage of every monitored service.",
        )
    }

    async fn call(&self, _args: ToolArgs) -> Result<ToolOutput> {
        ToolOutput::json(self.monitor.health())
    }
}

pub struct GetErrorLogs {
    monitor: Arc<WebsiteMonitor>,
}

#[async_trait]
impl Tool for GetErrorLogs {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "GetErrorLogs",
            r#"Fetch the most recent error log lines of a service.

            Args:
                server_id: Id of the service, as returned by ListMonitoredServices.
                lines: Number of lines to return."#,
        )
        .param(ParamDecl::required("server_id", ParamType::String))
        .param(ParamDecl::with_default("lines", ParamType::Integer, 20))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let lines = args.i64("lines")?;
        if lines < 0 {
            bail!("lines must not be negative");
        }
        let server_id = args.str("server_id")?;
        let logs = self.monitor.error_logs(server_id, lines as usize)?;
        ToolOutput::json(json!({ "server_id": server_id, "logs": logs }))
    }
}

pub struct GetPerformanceSummary {
    monitor: Arc<WebsiteMonitor>,
}

#[async_trait]
impl Tool for GetPerformanceSummary {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "GetPerformanceSummary",
            r#"Summarise request volume and latency over a time window.

            Args:
                time_window: Window to summarise, e.g. last_24_hours."#,
        )
        .param(ParamDecl::with_default("time_window", ParamType::String, "last_24_hours"))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let window = args.str("time_window")?;
        let summary = self.monitor.performance(window)?;
        ToolOutput::json(json!({ "time_window": window, "summary": summary }))
    }
}

pub struct GetHistoricalLoadTimes {
    monitor: Arc<WebsiteMonitor>,
}

#[async_trait]
impl Tool for GetHistoricalLoadTimes {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "GetHistoricalLoadTimes",
            r#"Average page load times over a time window.

            Args:
                time_window: Window to report, e.g. last_7_days.
                page_url: Restrict the report to one page."#,
        )
        .param(ParamDecl::with_default("time_window", ParamType::String, "last_7_days"))
        .param(ParamDecl::optional(
            "page_url",
            ParamType::OneOf(vec![ParamType::String, ParamType::Null]),
        ))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let window = args.str("time_window")?;
        let samples = self
            .monitor
            .historical_load_times(window, args.opt_str("page_url")?);
        ToolOutput::json(json!({ "time_window": window, "samples": samples }))
    }
}
