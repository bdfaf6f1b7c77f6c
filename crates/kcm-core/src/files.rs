//! Diff-and-write for files kcm owns
//!
//! Values, manifests and the deletion ledger are only ever written through a
//! [`FileChangeSet`], so a dry run logs exactly the diff a real run would
//! apply. A missing file compares as empty.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use console::style;
use similar::{ChangeTag, TextDiff};

use crate::error::{CoreError, Result};

/// Permissions of every file written by kcm
#[cfg(unix)]
const FILE_MODE: u32 = 0o660;

/// A pending write (or removal) of one file
#[derive(Debug, Clone)]
pub struct FileChangeSet {
    path: PathBuf,
    exists: bool,
    current: String,
    /// `None` removes the file
    proposed: Option<String>,
}

impl FileChangeSet {
    /// Propose new content for `path`
    pub fn new(path: impl Into<PathBuf>, proposed: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let (exists, current) = read_current(&path)?;
        Ok(Self {
            path,
            exists,
            current,
            proposed: Some(proposed.into()),
        })
    }

    /// Propose removing `path`
    pub fn removal(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (exists, current) = read_current(&path)?;
        Ok(Self {
            path,
            exists,
            current,
            proposed: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_removal(&self) -> bool {
        self.proposed.is_none()
    }

    pub fn has_changes(&self) -> bool {
        match &self.proposed {
            Some(proposed) => *proposed != self.current,
            None => self.exists,
        }
    }

    fn proposed_str(&self) -> &str {
        self.proposed.as_deref().unwrap_or_default()
    }

    /// Unified diff without colours
    pub fn diff_plain(&self) -> String {
        if !self.has_changes() {
            return String::new();
        }
        let name = self.path.display().to_string();
        TextDiff::from_lines(self.current.as_str(), self.proposed_str())
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{}", name), &format!("b/{}", name))
            .to_string()
    }

    /// Unified diff coloured for a terminal
    pub fn diff(&self) -> String {
        if !self.has_changes() {
            return String::new();
        }

        let name = self.path.display().to_string();
        let diff = TextDiff::from_lines(self.current.as_str(), self.proposed_str());
        let mut out = String::new();
        let _ = writeln!(out, "{}", style(format!("--- a/{}", name)).for_stderr().bold());
        let _ = writeln!(out, "{}", style(format!("+++ b/{}", name)).for_stderr().bold());

        for group in diff.grouped_ops(3) {
            let (first, last) = match (group.first(), group.last()) {
                (Some(first), Some(last)) => (first, last),
                _ => continue,
            };
            let old = first.old_range().start..last.old_range().end;
            let new = first.new_range().start..last.new_range().end;
            let header = format!(
                "@@ -{},{} +{},{} @@",
                old.start + 1,
                old.len(),
                new.start + 1,
                new.len()
            );
            let _ = writeln!(out, "{}", style(header).for_stderr().cyan());

            for op in &group {
                for change in diff.iter_changes(op) {
                    let line = change.value().trim_end_matches('\n');
                    let rendered = match change.tag() {
                        ChangeTag::Delete => style(format!("-{}", line)).for_stderr().red(),
                        ChangeTag::Insert => style(format!("+{}", line)).for_stderr().green(),
                        ChangeTag::Equal => style(format!(" {}", line)).for_stderr().dim(),
                    };
                    let _ = writeln!(out, "{}", rendered);
                }
            }
        }
        out
    }

    /// Write (or remove) the file atomically
    pub fn apply(&self) -> Result<()> {
        let Some(proposed) = &self.proposed else {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CoreError::file(&self.path, e)),
            };
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| CoreError::file(&parent, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| CoreError::file(&parent, e))?;
        tmp.write_all(proposed.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| CoreError::file(tmp.path(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(FILE_MODE))
                .map_err(|e| CoreError::file(tmp.path(), e))?;
        }

        tmp.persist(&self.path)
            .map_err(|e| CoreError::file(&self.path, e.error))?;
        Ok(())
    }

    /// Log the diff and, unless `dry_run`, apply it
    ///
    /// Returns whether anything changed.
    pub fn commit(&self, dry_run: bool) -> Result<bool> {
        if !self.has_changes() {
            tracing::debug!(path = %self.path.display(), "no changes");
            return Ok(false);
        }

        tracing::info!(
            path = %self.path.display(),
            dry_run,
            removal = self.is_removal(),
            "file changes:\n{}",
            self.diff()
        );

        if !dry_run {
            self.apply()?;
        }
        Ok(true)
    }
}

fn read_current(path: &Path) -> Result<(bool, String)> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok((true, content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((false, String::new())),
        Err(e) => Err(CoreError::file(path, e)),
    }
}
