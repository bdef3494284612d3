/// Sync reconciler: make sure commits on the current branch don't sit unpushed.
///
/// One pass, at most one push. Anything outside the tool's control (not a
/// repository, detached HEAD, no upstream) is a soft skip that still exits 0.
use crate::git::{push_refspec, CommitSummary, GitError, Vcs};
use crate::output::Reporter;
use std::io::Write;

/// Terminal result of one reconciler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    InSync,
    Pushed,
    /// Dry run found commits it would have pushed.
    WouldPush,
    NoUpstream,
    NotARepo,
    DetachedHead,
    PushFailed,
}

impl PushOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            PushOutcome::PushFailed => 1,
            _ => 0,
        }
    }
}

/// What the reconciler learned about the branch before acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub branch: String,
    pub upstream: Option<String>,
    pub unpushed: Vec<CommitSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Remote to fall back on when neither branch config nor upstream names one.
    pub default_remote: String,
    pub dry_run: bool,
}

/// Hard failures: the comparison itself could not be made.
#[derive(Debug)]
pub enum SyncError {
    Query { what: &'static str, source: GitError },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Query { what, source } => write!(f, "failed to {what}: {source}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Query { source, .. } => Some(source),
        }
    }
}

fn query<T>(what: &'static str, result: Result<T, GitError>) -> Result<T, SyncError> {
    result.map_err(|source| SyncError::Query { what, source })
}

/// Pick the remote for `branch`: its configured remote, else the remote part
/// of its upstream, else the default.
fn resolve_remote<V: Vcs>(
    vcs: &V,
    branch: &str,
    upstream: Option<&str>,
    default_remote: &str,
) -> Result<String, SyncError> {
    if let Some(remote) = query("read branch remote", vcs.branch_remote(branch))? {
        return Ok(remote);
    }
    if let Some((remote, _)) = upstream.and_then(|u| u.split_once('/')) {
        return Ok(remote.to_string());
    }
    Ok(default_remote.to_string())
}

/// Pick the branch on `remote` that `branch` tracks: its merge ref, else the
/// upstream name without the `<remote>/` prefix, else the local name.
fn resolve_remote_branch<V: Vcs>(
    vcs: &V,
    branch: &str,
    upstream: Option<&str>,
    remote: &str,
) -> Result<String, SyncError> {
    if let Some(merge) = query("read branch merge ref", vcs.merge_branch(branch))? {
        return Ok(merge);
    }
    let prefix = format!("{remote}/");
    if let Some(name) = upstream.and_then(|u| u.strip_prefix(prefix.as_str())) {
        return Ok(name.to_string());
    }
    Ok(branch.to_string())
}

/// Run one reconciliation pass and report progress to `out`.
pub fn reconcile<V: Vcs, W: Write>(
    vcs: &V,
    options: &SyncOptions,
    out: &mut Reporter<W>,
) -> Result<PushOutcome, SyncError> {
    let Some(root) = query("locate repository", vcs.repo_root())? else {
        out.info("Not inside a git repository, nothing to check");
        return Ok(PushOutcome::NotARepo);
    };
    tracing::debug!(root = %root.display(), "repository found");

    let Some(branch) = query("read current branch", vcs.current_branch())? else {
        out.warn("HEAD is detached, skipping sync check");
        return Ok(PushOutcome::DetachedHead);
    };
    out.info(&format!("Checking branch {branch}"));

    let upstream = query("read upstream", vcs.upstream(&branch))?;
    let Some(upstream) = upstream else {
        let remote = resolve_remote(vcs, &branch, None, &options.default_remote)?;
        out.warn(&format!(
            "Branch {branch} has no upstream. Set one with: git push -u {remote} {branch}"
        ));
        return Ok(PushOutcome::NoUpstream);
    };
    out.info(&format!("Upstream: {upstream}"));

    let unpushed = match vcs.unpushed_commits(&upstream) {
        Ok(commits) => commits,
        Err(e) => {
            out.error(&format!("Could not compare {branch} with {upstream}: {e}"));
            return Err(SyncError::Query {
                what: "compare with upstream",
                source: e,
            });
        }
    };

    let state = SyncState {
        branch,
        upstream: Some(upstream),
        unpushed,
    };
    push_if_ahead(vcs, options, state, out)
}

fn push_if_ahead<V: Vcs, W: Write>(
    vcs: &V,
    options: &SyncOptions,
    state: SyncState,
    out: &mut Reporter<W>,
) -> Result<PushOutcome, SyncError> {
    let SyncState {
        branch,
        upstream,
        unpushed,
    } = state;
    let upstream_name = upstream.as_deref().unwrap_or_default();

    if unpushed.is_empty() {
        out.success(&format!("Branch {branch} is in sync with {upstream_name}"));
        return Ok(PushOutcome::InSync);
    }

    let noun = if unpushed.len() == 1 { "commit" } else { "commits" };
    out.warn(&format!(
        "Found {} unpushed {noun} on {branch}:",
        unpushed.len()
    ));
    for commit in &unpushed {
        out.info(&format!("  {commit}"));
    }

    let remote = resolve_remote(vcs, &branch, upstream.as_deref(), &options.default_remote)?;
    let remote_branch = resolve_remote_branch(vcs, &branch, upstream.as_deref(), &remote)?;
    let refspec = push_refspec(&branch, &remote_branch);

    if options.dry_run {
        out.info(&format!("Dry run: would push {branch} to {remote}/{remote_branch}"));
        return Ok(PushOutcome::WouldPush);
    }

    out.info(&format!("Pushing {branch} to {remote}/{remote_branch}..."));
    match vcs.push(&remote, &branch, &remote_branch) {
        Ok(()) => {
            out.success("Push completed successfully");
            Ok(PushOutcome::Pushed)
        }
        Err(e) => {
            tracing::warn!(error = %e, %branch, %remote, %remote_branch, "push failed");
            out.error(&format!("Push failed: {e}"));
            out.error(&format!(
                "Resolve manually, e.g.: git push --force-with-lease {remote} {refspec}"
            ));
            Ok(PushOutcome::PushFailed)
        }
    }
}
