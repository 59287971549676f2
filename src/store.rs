//! Plan store: durable persistence of project documents.
//!
//! One pretty-printed JSON document per project, stored under a
//! configurable directory. The documents are deliberately human-editable;
//! an operator may add or remove tasks and dependencies between runs, so
//! the compiler re-validates every loaded project regardless of where it
//! came from.

use crate::core::Project;
use crate::error::{Error, Result};
use crate::alog_debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Persists projects as JSON documents in a directory.
#[derive(Debug, Clone)]
pub struct PlanStore {
    dir: PathBuf,
}

impl PlanStore {
    /// Create a store rooted at the given directory.
    ///
    /// The directory is created on first save, not here.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for a given project name.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(name)))
    }

    /// Serialize the full project graph to its document.
    ///
    /// The write is atomic at the filesystem level: the document is
    /// written to a temporary sibling first, then renamed over the
    /// target, so a crash mid-save never corrupts a checkpoint.
    pub fn save(&self, project: &Project) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&project.name);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(project)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        alog_debug!("Saved project {:?} to {}", project.name, path.display());
        Ok(path)
    }

    /// Load a project document by name.
    ///
    /// # Errors
    /// `PlanNotFound` if no document with that name exists.
    pub fn load(&self, name: &str) -> Result<Project> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(Error::PlanNotFound(name.to_string()));
        }
        let project: Project = serde_json::from_str(&fs::read_to_string(&path)?)?;
        alog_debug!("Loaded project {:?} from {}", name, path.display());
        Ok(project)
    }

    /// Names of all stored plans.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Reduce a project name to a safe file stem.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
