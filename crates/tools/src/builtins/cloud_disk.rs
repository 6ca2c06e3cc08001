//! `cloud_disk_tool`: browse the shared disk and pull files into the workspace.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use trainee_servers::{Backends, CloudDisk, DiskArea, ServerError};

use crate::{ParamDecl, ParamType, Tool, ToolArgs, ToolOutput, ToolSignature};

pub fn tools(backends: &Backends) -> Result<Vec<Box<dyn Tool>>, ServerError> {
    let disk = backends.cloud_disk()?;
    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(ListArea {
            disk: disk.clone(),
            area: DiskArea::Cloud,
        }),
        Box::new(ListArea {
            disk: disk.clone(),
            area: DiskArea::Workspace,
        }),
        Box::new(CopyToWorkspace { disk }),
    ];
    Ok(tools)
}

/// `ListCloudDisk` or `ListWorkspace`, depending on `area`.
pub struct ListArea {
    disk: Arc<CloudDisk>,
    area: DiskArea,
}

#[async_trait]
impl Tool for ListArea {
    fn signature(&self) -> ToolSignature {
        let (name, doc) = match self.area {
            DiskArea::Cloud => (
                "ListCloudDisk",
                r#"List files and folders on the shared cloud disk.

                Args:
                    path: Folder to list, relative to the disk root. Empty for the root."#,
            ),
            DiskArea::Workspace => (
                "ListWorkspace",
                r#"List files and folders in your workspace.

                Args:
                    path: Folder to list, relative to the workspace root. Empty for the root."#,
            ),
        };
        ToolSignature::new(name, doc).param(ParamDecl::with_default("path", ParamType::String, ""))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let path = args.str("path")?;
        let entries = self.disk.list(self.area, path)?;
        ToolOutput::json(json!({ "path": path, "entries": entries }))
    }
}

pub struct CopyToWorkspace {
    disk: Arc<CloudDisk>,
}

#[async_trait]
impl Tool for CopyToWorkspace {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "CopyToWorkspace",
            r#"Copy a file or folder from the cloud disk into your workspace.

            Args:
                src_path: Path on the cloud disk.
                dst_path: Destination in the workspace. Defaults to the same relative path."#,
        )
        .param(ParamDecl::required("src_path", ParamType::String))
        .param(ParamDecl::optional("dst_path", ParamType::String))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let receipt = self
            .disk
            .copy_to_workspace(args.str("src_path")?, args.opt_str("dst_path")?)?;
        ToolOutput::json(json!({ "status": "copied", "copy": receipt }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::{json as as_json, run};
    use tempfile::TempDir;
    use trainee_config::AgentsConfig;
    use trainee_servers::{CLOUD_DISK, ServerContext};

    fn backends(dir: &TempDir) -> Backends {
        let agents = AgentsConfig::default();
        let ctx = ServerContext {
            task_root: dir.path(),
            clock: None,
            agents: &agents,
        };
        Backends::build(&[CLOUD_DISK.to_string()], &ctx).unwrap()
    }

    fn tool(b: &Backends, name: &str) -> Box<dyn Tool> {
        tools(b)
            .unwrap()
            .into_iter()
            .find(|t| t.signature().name == name)
            .unwrap()
    }

    #[tokio::test]
    async fn copy_then_list_workspace() {
        let dir = TempDir::new().unwrap();
        let b = backends(&dir);
        std::fs::write(dir.path().join("cloud_disk/brief.md"), "# Brief").unwrap();

        let listed = as_json(run(tool(&b, "ListCloudDisk"), json!({"path": ""})).await.unwrap());
        assert_eq!(listed["entries"][0]["name"], "brief.md");

        run(tool(&b, "CopyToWorkspace"), json!({"src_path": "brief.md"})).await.unwrap();
        let ws = as_json(run(tool(&b, "ListWorkspace"), json!({"path": "."})).await.unwrap());
        assert_eq!(ws["entries"][0]["path"], "brief.md");
    }

    #[test]
    fn path_default_is_advertised() {
        let dir = TempDir::new().unwrap();
        let sig = tool(&backends(&dir), "ListWorkspace").signature();
        let schema = crate::ToolSpec::from_signature(&sig).parameters_schema();
        assert_eq!(schema["properties"]["path"]["default"], "");
        assert_eq!(schema["required"], json!([]));
    }
}
