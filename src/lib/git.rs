//! Shallow clones of git repositories through the `git` executable.

use std::path::Path;

use crate::error::Error;

#[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq, Clone, Hash)]
pub enum GitReference {
    #[serde(rename = "branch")]
    Branch(String),
    #[serde(rename = "tag")]
    Tag(String),
    #[serde(rename = "rev")]
    Rev(String),
}

/// A git remote to clone, optionally at a branch, tag or commit.
#[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq, Clone, Hash)]
pub struct Git {
    #[serde(rename = "git")]
    url: String,
    #[serde(flatten)]
    reference: Option<GitReference>,
    #[serde(default)]
    recursive: bool,
}

impl Git {
    pub fn new<S: Into<String>>(url: S, reference: Option<GitReference>, recursive: bool) -> Self {
        Self {
            url: url.into(),
            reference,
            recursive,
        }
    }

    pub fn upstream(&self) -> &str {
        &self.url
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// The selected branch or tag name, if any.
    pub fn branch_name(&self) -> Option<&str> {
        match self.reference.as_ref() {
            Some(GitReference::Branch(name)) | Some(GitReference::Tag(name)) => Some(name),
            _ => None,
        }
    }

    pub fn commit_sha(&self) -> Option<&str> {
        match self.reference.as_ref() {
            Some(GitReference::Rev(commit_sha)) => Some(commit_sha),
            _ => None,
        }
    }

    /// Clone the repository into `dir`, which must be missing or empty.
    pub fn fetch<P: AsRef<Path>>(&self, dir: P) -> Result<(), Error> {
        let dir = dir.as_ref();
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut git = self.clone_command(dir);
        tracing::info!(url = %self.url, dir = %dir.display(), "cloning");
        let output = git.output()?;
        if output.status.success() {
            return Ok(());
        }
        let command = std::iter::once(git.get_program())
            .chain(git.get_args())
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        Err(Error::Subprocess {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn clone_command(&self, into: &Path) -> std::process::Command {
        let mut git = std::process::Command::new("git");
        git.args(["clone", "--depth", "1", "--no-tags"]);
        if let Some(branch) = self.branch_name() {
            git.args(["--branch", branch]);
        } else if let Some(commit_sha) = self.commit_sha() {
            git.args(["--revision", commit_sha]);
        }
        if self.recursive {
            git.args(["--recurse-submodules", "--shallow-submodules"]);
        }
        git.arg(&self.url).arg(into);
        git.stdin(std::process::Stdio::null());
        git
    }
}

impl std::fmt::Display for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)?;
        if let Some(reference) = &self.reference {
            match reference {
                GitReference::Branch(branch) => write!(f, " (branch: {branch})")?,
                GitReference::Tag(tag) => write!(f, " (tag: {tag})")?,
                GitReference::Rev(rev) => write!(f, " (rev: {rev})")?,
            }
        }
        if self.recursive {
            write!(f, " [recursive]")?;
        }
        Ok(())
    }
}
