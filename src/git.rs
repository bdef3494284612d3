//! Git queries and push used by the sync reconciler.
//!
//! Everything shells out to the `git` binary in a given directory. All
//! operations except [`Vcs::push`] are read-only.

use std::path::PathBuf;
use std::process::{Command, Output};

/// One unpushed commit, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub short_sha: String,
    pub subject: String,
}

impl std::fmt::Display for CommitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.short_sha, self.subject)
    }
}

/// The version-control operations the reconciler depends on.
pub trait Vcs {
    /// Top of the working tree, or `None` when not inside a repository.
    fn repo_root(&self) -> Result<Option<PathBuf>, GitError>;

    /// Current branch name, or `None` when HEAD is detached.
    fn current_branch(&self) -> Result<Option<String>, GitError>;

    /// Upstream of `branch` (e.g. `origin/feature-x`), or `None` if unset.
    fn upstream(&self, branch: &str) -> Result<Option<String>, GitError>;

    /// Remote configured for `branch` via `branch.<name>.remote`.
    fn branch_remote(&self, branch: &str) -> Result<Option<String>, GitError>;

    /// Branch on the remote that `branch` merges from (`branch.<name>.merge`),
    /// without the `refs/heads/` prefix.
    fn merge_branch(&self, branch: &str) -> Result<Option<String>, GitError>;

    /// Commits in `upstream..HEAD`, oldest first.
    fn unpushed_commits(&self, upstream: &str) -> Result<Vec<CommitSummary>, GitError>;

    /// Push local `branch` to `remote_branch` on `remote`. Never forces.
    fn push(&self, remote: &str, branch: &str, remote_branch: &str) -> Result<(), GitError>;
}

/// [`Vcs`] backed by the `git` command line.
pub struct GitCli {
    dir: PathBuf,
}

impl GitCli {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn git(&self, args: &[&str]) -> Result<Output, GitError> {
        tracing::debug!(dir = %self.dir.display(), ?args, "running git");
        Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .map_err(|e| GitError::Spawn { source: e })
    }
}

fn stdout_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn failure(args: &[&str], output: &Output) -> GitError {
    GitError::Command {
        args: args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

impl Vcs for GitCli {
    fn repo_root(&self) -> Result<Option<PathBuf>, GitError> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        let output = self.git(&["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            // "not a git repository" (or a bare repo without a work tree)
            return Ok(None);
        }
        let root = stdout_line(&output);
        Ok((!root.is_empty()).then(|| PathBuf::from(root)))
    }

    fn current_branch(&self) -> Result<Option<String>, GitError> {
        // symbolic-ref exits 1 quietly on a detached HEAD.
        let output = self.git(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let branch = stdout_line(&output);
        Ok((!branch.is_empty()).then_some(branch))
    }

    fn upstream(&self, branch: &str) -> Result<Option<String>, GitError> {
        let spec = format!("{branch}@{{upstream}}");
        let output = self.git(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", spec.as_str()])?;
        if !output.status.success() {
            return Ok(None);
        }
        let upstream = stdout_line(&output);
        Ok((!upstream.is_empty()).then_some(upstream))
    }

    fn branch_remote(&self, branch: &str) -> Result<Option<String>, GitError> {
        let key = format!("branch.{branch}.remote");
        let output = self.git(&["config", "--get", key.as_str()])?;
        // `git config --get` exits 1 when the key is unset.
        if !output.status.success() {
            return Ok(None);
        }
        let remote = stdout_line(&output);
        Ok((!remote.is_empty()).then_some(remote))
    }

    fn merge_branch(&self, branch: &str) -> Result<Option<String>, GitError> {
        let key = format!("branch.{branch}.merge");
        let output = self.git(&["config", "--get", key.as_str()])?;
        if !output.status.success() {
            return Ok(None);
        }
        let merge = stdout_line(&output);
        let merge = merge.strip_prefix("refs/heads/").unwrap_or(&merge);
        Ok((!merge.is_empty()).then(|| merge.to_string()))
    }

    fn unpushed_commits(&self, upstream: &str) -> Result<Vec<CommitSummary>, GitError> {
        let range = format!("{upstream}..HEAD");
        let args = ["log", "--reverse", "--format=%h %s", range.as_str()];
        let output = self.git(&args)?;
        if !output.status.success() {
            return Err(failure(&args, &output));
        }
        let commits = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| match line.split_once(' ') {
                Some((sha, subject)) => CommitSummary {
                    short_sha: sha.to_string(),
                    subject: subject.to_string(),
                },
                None => CommitSummary {
                    short_sha: line.to_string(),
                    subject: String::new(),
                },
            })
            .collect();
        Ok(commits)
    }

    fn push(&self, remote: &str, branch: &str, remote_branch: &str) -> Result<(), GitError> {
        let refspec = push_refspec(branch, remote_branch);
        let args = ["push", remote, refspec.as_str()];
        let output = self.git(&args)?;
        if !output.status.success() {
            return Err(failure(&args, &output));
        }
        Ok(())
    }
}

/// `branch` alone when the names agree, otherwise `branch:remote_branch`.
pub fn push_refspec(branch: &str, remote_branch: &str) -> String {
    if branch == remote_branch {
        branch.to_string()
    } else {
        format!("{branch}:{remote_branch}")
    }
}

/// Errors from running git.
#[derive(Debug)]
pub enum GitError {
    /// The git binary could not be started.
    Spawn { source: std::io::Error },
    /// git ran and exited non-zero.
    Command { args: String, stderr: String },
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::Spawn { source } => write!(f, "failed to run git: {source}"),
            GitError::Command { args, stderr } if stderr.is_empty() => {
                write!(f, "git {args} failed")
            }
            GitError::Command { args, stderr } => write!(f, "git {args} failed: {stderr}"),
        }
    }
}

impl std::error::Error for GitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GitError::Spawn { source } => Some(source),
            GitError::Command { .. } => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;
    use std::process::Command;

    pub fn run_git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// A work tree cloned from a bare "origin", with one pushed commit on `main`.
    pub struct Fixture {
        pub _root: tempfile::TempDir,
        pub remote: std::path::PathBuf,
        pub work: std::path::PathBuf,
    }

    impl Fixture {
        pub fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let remote = root.path().join("origin.git");
            let work = root.path().join("work");
            std::fs::create_dir(&remote).unwrap();
            std::fs::create_dir(&work).unwrap();

            run_git(&remote, &["init", "--bare", "--initial-branch=main"]);
            run_git(&work, &["init", "--initial-branch=main"]);
            run_git(&work, &["config", "user.name", "test-user"]);
            run_git(&work, &["config", "user.email", "test@example.com"]);
            run_git(&work, &["config", "commit.gpgsign", "false"]);
            run_git(
                &work,
                &["remote", "add", "origin", remote.to_str().unwrap()],
            );
            run_git(&work, &["commit", "--allow-empty", "-m", "initial"]);
            run_git(&work, &["push", "-u", "origin", "main"]);

            Self {
                _root: root,
                remote,
                work,
            }
        }

        pub fn commit(&self, message: &str) {
            run_git(&self.work, &["commit", "--allow-empty", "-m", message]);
        }
    }
}
