//! Static catalog of tool modules.
//!
//! A module is a named group of tools sharing backend dependencies.  The
//! scenario lists modules by name; [`discover`] builds each one against the
//! running backends and registers its tools in declaration order.

use tracing::{info, warn};

use trainee_servers::{Backends, CHAT_SERVER, CLOUD_DISK, MEETING_CALENDAR, SANDBOX, ServerError, WEBSITE_MONITOR};

use crate::builtins::{calculator, calendar, cloud_disk, message, monitor, sandbox};
use crate::{Tool, ToolRegistry};

pub struct ToolModule {
    pub name: &'static str,
    /// Backend servers the module's tools are bound to.
    pub dependencies: &'static [&'static str],
    pub build: fn(&Backends) -> Result<Vec<Box<dyn Tool>>, ServerError>,
}

pub static CATALOG: &[ToolModule] = &[
    ToolModule {
        name: "message_tool",
        dependencies: &[CHAT_SERVER],
        build: message::tools,
    },
    ToolModule {
        name: "calendar_tool",
        dependencies: &[MEETING_CALENDAR],
        build: calendar::tools,
    },
    ToolModule {
        name: "cloud_disk_tool",
        dependencies: &[CLOUD_DISK],
        build: cloud_disk::tools,
    },
    ToolModule {
        name: "sandbox_tool",
        dependencies: &[SANDBOX],
        build: sandbox::tools,
    },
    ToolModule {
        name: "website_monitor",
        dependencies: &[WEBSITE_MONITOR],
        build: monitor::tools,
    },
    ToolModule {
        name: "calculator_tool",
        dependencies: &[],
        build: calculator::tools,
    },
];

pub fn find_module(name: &str) -> Option<&'static ToolModule> {
    CATALOG.iter().find(|m| m.name == name)
}

/// Build a registry from the named modules.  A module that is unknown or
/// whose dependencies are missing is logged and skipped; the rest still
/// register.
pub fn discover(module_names: &[String], backends: &Backends) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    for name in module_names {
        let Some(module) = find_module(name) else {
            warn!(module = %name, "unknown tool module, skipping");
            continue;
        };
        match (module.build)(backends) {
            Ok(tools) => {
                let count = tools.len();
                for tool in tools {
                    registry.register(tool);
                }
                info!(module = module.name, tools = count, "tool module loaded");
            }
            Err(e) => warn!(module = module.name, error = %e, "tool module failed to load, skipping"),
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParamDefault;
    use std::path::Path;
    use tempfile::TempDir;
    use trainee_config::AgentsConfig;
    use trainee_servers::ServerContext;

    fn backends(root: &Path, names: &[&str]) -> Backends {
        let agents = AgentsConfig::default();
        let ctx = ServerContext {
            task_root: root,
            clock: None,
            agents: &agents,
        };
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        Backends::build(&names, &ctx).unwrap()
    }

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn registers_in_module_order() {
        let dir = TempDir::new().unwrap();
        let b = backends(dir.path(), &[CHAT_SERVER]);
        let reg = discover(&modules(&["calculator_tool", "message_tool"]), &b);
        let names = reg.names();
        assert_eq!(names[0], "Calculate");
        assert_eq!(names[1], "ListUsers");
        assert!(names.contains(&"SendMessage"));
    }

    #[test]
    fn missing_dependency_and_unknown_module_are_skipped() {
        let dir = TempDir::new().unwrap();
        let b = backends(dir.path(), &[]);
        let reg = discover(&modules(&["message_tool", "teleporter", "calculator_tool"]), &b);
        assert_eq!(reg.names(), vec!["Calculate"]);
    }

    #[test]
    fn every_module_builds_with_its_dependencies() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("website_monitor.json"),
            r#"{"services": []}"#,
        )
        .unwrap();
        let b = backends(dir.path(), &[CHAT_SERVER, MEETING_CALENDAR, CLOUD_DISK, SANDBOX, WEBSITE_MONITOR]);
        for module in CATALOG {
            let tools = (module.build)(&b).unwrap();
            assert!(!tools.is_empty(), "{} has no tools", module.name);
        }
        let all: Vec<String> = CATALOG.iter().map(|m| m.name.to_string()).collect();
        assert_eq!(discover(&all, &b).len(), 20);
    }

    #[test]
    fn required_params_are_those_without_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("website_monitor.json"),
            r#"{"services": []}"#,
        )
        .unwrap();
        let b = backends(dir.path(), &[CHAT_SERVER, MEETING_CALENDAR, CLOUD_DISK, SANDBOX, WEBSITE_MONITOR]);
        let all: Vec<String> = CATALOG.iter().map(|m| m.name.to_string()).collect();
        let reg = discover(&all, &b);
        for name in reg.names() {
            let tool = reg.lookup(name).unwrap();
            let expected: Vec<&str> = tool
                .signature()
                .params
                .iter()
                .filter(|p| p.default == ParamDefault::Required)
                .map(|p| p.name.as_str())
                .collect();
            assert_eq!(tool.spec().required(), expected, "{name}");
            assert_eq!(tool.spec().parameters_schema()["required"], serde_json::json!(expected), "{name}");
        }
    }
}
