//! Shared cloud disk plus the agent's private workspace.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::{BackendServer, CLOUD_DISK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskArea {
    Cloud,
    Workspace,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskEntry {
    pub name: String,
    pub is_dir: bool,
    /// Path relative to the area root, `/`-separated.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopyReceipt {
    pub source: String,
    pub destination: String,
    pub bytes: u64,
}

pub struct CloudDisk {
    cloud_root: PathBuf,
    workspace_root: PathBuf,
}

impl CloudDisk {
    /// `<task_root>/cloud_disk` is the shared disk and `<task_root>/workspace`
    /// the agent's workspace.  Both are created when missing.
    pub fn new(task_root: &Path) -> Result<Self> {
        let cloud_root = task_root.join("cloud_disk");
        let workspace_root = task_root.join("workspace");
        for dir in [&cloud_root, &workspace_root] {
            fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
        }
        Ok(Self {
            cloud_root,
            workspace_root,
        })
    }

    pub fn root(&self, area: DiskArea) -> &Path {
        match area {
            DiskArea::Cloud => &self.cloud_root,
            DiskArea::Workspace => &self.workspace_root,
        }
    }

    /// Entries of a directory, directories first, then by name.
    pub fn list(&self, area: DiskArea, rel_path: &str) -> Result<Vec<DiskEntry>> {
        let root = self.root(area);
        let dir = checked_path(root, rel_path)?;
        if !dir.is_dir() {
            bail!("'{rel_path}' is not a directory");
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("cannot list '{rel_path}'"))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type()?.is_dir();
            entries.push(DiskEntry {
                path: relative(root, &entry.path()),
                name,
                is_dir,
            });
        }
        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(entries)
    }

    /// Copy a file (or a directory tree) from the cloud disk into the
    /// workspace.  The destination defaults to the source's relative path.
    pub fn copy_to_workspace(&self, src_path: &str, dst_path: Option<&str>) -> Result<CopyReceipt> {
        let src = checked_path(&self.cloud_root, src_path)?;
        if !src.exists() {
            bail!("'{src_path}' does not exist on the cloud disk");
        }
        let dst_rel = dst_path.filter(|p| !p.trim().is_empty()).unwrap_or(src_path);
        let dst = checked_path(&self.workspace_root, dst_rel)?;
        if dst == normalize_path(&self.workspace_root) && src.is_file() {
            bail!("destination must name a file inside the workspace");
        }

        let bytes = copy_tree(&src, &dst)?;
        Ok(CopyReceipt {
            source: relative(&self.cloud_root, &src),
            destination: relative(&self.workspace_root, &dst),
            bytes,
        })
    }
}

impl BackendServer for CloudDisk {
    fn name(&self) -> &'static str {
        CLOUD_DISK
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let file_type = fs::symlink_metadata(src)
        .with_context(|| format!("cannot read {}", src.display()))?
        .file_type();
    if file_type.is_symlink() {
        bail!("refusing to copy symbolic link {}", src.display());
    }
    if file_type.is_dir() {
        fs::create_dir_all(dst).with_context(|| format!("cannot create {}", dst.display()))?;
        let mut total = 0;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            total += copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(total)
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst).with_context(|| format!("cannot copy to {}", dst.display()))
    }
}

fn relative(root: &Path, path: &Path) -> String {
    let root = normalize_path(root);
    let path = normalize_path(path);
    path.strip_prefix(&root)
        .unwrap_or(&path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexically resolve `.` and `..` without touching the filesystem, so
/// destinations that do not exist yet can still be checked.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Resolve `rel_path` under `root`, refusing anything that escapes it.
fn checked_path(root: &Path, rel_path: &str) -> Result<PathBuf> {
    let rel = rel_path.trim().trim_start_matches('/');
    let normalized = normalize_path(&root.join(rel));
    if !normalized.starts_with(normalize_path(root)) {
        bail!("path escapes disk boundary: {rel_path}");
    }
    Ok(normalized)
}
