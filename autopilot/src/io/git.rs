//! Git adapter for branch lifecycle and step commands.
//!
//! A thin, explicit wrapper around `git` subprocess calls. Every call goes
//! through the engine's [`CommandRunner`] so tests can script git.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandRunner, CommandSpec, ProcessOutput};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    /// Unmerged (conflicted) entry: `DD`, `AU`, `UD`, `UA`, `DU`, `AA`, `UU`.
    pub fn is_unmerged(&self) -> bool {
        matches!(
            self.code.as_str(),
            "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU"
        )
    }
}

/// Git commands bound to one working directory.
pub struct Git<'a> {
    workdir: PathBuf,
    runner: &'a dyn CommandRunner,
    timeout: Duration,
}

impl<'a> Git<'a> {
    pub fn new(workdir: impl Into<PathBuf>, runner: &'a dyn CommandRunner, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            runner,
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Full SHA of `HEAD`.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Fail if the worktree has conflicted files; checkouts would carry them along.
    #[instrument(skip_all)]
    pub fn ensure_no_unmerged(&self) -> Result<()> {
        let unmerged: Vec<StatusEntry> = self
            .status_porcelain()?
            .into_iter()
            .filter(StatusEntry::is_unmerged)
            .collect();
        if unmerged.is_empty() {
            return Ok(());
        }
        warn!(unmerged_count = unmerged.len(), "worktree has unmerged files");
        let mut msg = String::from("working tree has unmerged files:\n");
        for entry in unmerged {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Check whether a local branch exists.
    ///
    /// Only exit code 1 means "missing"; timeouts and other failures are
    /// errors.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let branch = branch_arg(branch)?;
        let reference = format!("refs/heads/{branch}");
        let args = ["show-ref", "--verify", "--quiet", reference.as_str()];
        let out = self.run(&args)?;
        if out.timed_out {
            return Err(anyhow!("git {} timed out", args.join(" ")));
        }
        match out.exit_code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(anyhow!(
                "git {} exited with {code:?}: {}",
                args.join(" "),
                out.stderr.trim()
            )),
        }
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        let branch = branch_arg(branch)?;
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        let branch = branch_arg(branch)?;
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!out.stdout.trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Merge `branch` into the current branch, always creating a merge commit.
    #[instrument(skip_all, fields(branch))]
    pub fn merge_no_ff(&self, branch: &str) -> Result<()> {
        let branch = branch_arg(branch)?;
        debug!(branch, "merging");
        self.run_checked(&["merge", "--no-ff", "--no-edit", branch])?;
        Ok(())
    }

    /// Delete a fully merged local branch.
    #[instrument(skip_all, fields(branch))]
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        let branch = branch_arg(branch)?;
        debug!(branch, "deleting branch");
        self.run_checked(&["branch", "-d", branch])?;
        Ok(())
    }

    /// One-line log of commits in `since..HEAD`.
    pub fn log_since(&self, since: &str) -> Result<String> {
        let range = format!("{since}..HEAD");
        self.run_capture(&["log", "--oneline", "--no-decorate", &range])
    }

    /// Files touched in `since..HEAD`, in git's order.
    pub fn diff_names_since(&self, since: &str) -> Result<Vec<String>> {
        let range = format!("{since}..HEAD");
        let out = self.run_capture(&["diff", "--name-only", &range])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Patch text for a single commit, or `None` if the object is unknown.
    pub fn show_patch(&self, sha: &str) -> Result<Option<String>> {
        let out = self.run(&["show", "--stat", "--patch", "--no-color", sha])?;
        if out.success() {
            Ok(Some(out.stdout))
        } else {
            debug!(sha, "commit not found");
            Ok(None)
        }
    }

    /// Run arbitrary git arguments; a non-zero exit is an error.
    pub fn run_raw(&self, args: &[String]) -> Result<ProcessOutput> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&args)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_checked(args)?.stdout)
    }

    fn run_checked(&self, args: &[&str]) -> Result<ProcessOutput> {
        let output = self.run(args)?;
        if output.timed_out {
            return Err(anyhow!("git {} timed out", args.join(" ")));
        }
        if !output.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<ProcessOutput> {
        let spec = CommandSpec::new("git", &self.workdir, self.timeout).args(args.iter().copied());
        self.runner.run(&spec)
    }
}

/// Branch names reach git as bare arguments; one starting with `-` would be
/// read as an option.
fn branch_arg(branch: &str) -> Result<&str> {
    let trimmed = branch.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.chars().any(char::is_whitespace) {
        return Err(anyhow!("invalid branch name '{branch}'"));
    }
    Ok(trimmed)
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn unmerged_entries_block_checkout() {
        let runner = ScriptedRunner::new();
        runner.on("git status", ScriptedRunner::ok(" M src/a.rs\nUU src/b.rs\n"));
        let git = Git::new("/repo", &runner, Duration::from_secs(5));
        let err = git.ensure_no_unmerged().unwrap_err();
        assert!(err.to_string().contains("UU src/b.rs"));
        assert!(!err.to_string().contains("src/a.rs"));
    }

    #[test]
    fn failing_git_reports_stderr() {
        let runner = ScriptedRunner::new();
        runner.on("git checkout", ScriptedRunner::fail(1, "error: pathspec 'x'"));
        let git = Git::new("/repo", &runner, Duration::from_secs(5));
        let err = git.checkout_branch("x").unwrap_err();
        assert!(err.to_string().contains("git checkout x failed: error: pathspec"));
    }

    #[test]
    fn branch_exists_follows_exit_code() {
        let runner = ScriptedRunner::new();
        runner.on("git show-ref --verify --quiet refs/heads/AI-1", ScriptedRunner::ok(""));
        runner.on("git show-ref", ScriptedRunner::fail(1, ""));
        let git = Git::new("/repo", &runner, Duration::from_secs(5));
        assert!(git.branch_exists("AI-1").expect("exists"));
        assert!(!git.branch_exists("AI-2").expect("exists"));
    }

    #[test]
    fn branch_probe_failures_are_errors() {
        let runner = ScriptedRunner::new();
        runner.on(
            "git show-ref --verify --quiet refs/heads/AI-1",
            ProcessOutput {
                timed_out: true,
                ..ProcessOutput::default()
            },
        );
        runner.on("git show-ref", ScriptedRunner::fail(128, "fatal: not a git repository"));
        let git = Git::new("/repo", &runner, Duration::from_secs(5));
        let err = git.branch_exists("AI-1").unwrap_err();
        assert!(err.to_string().contains("timed out"));
        let err = git.branch_exists("AI-2").unwrap_err();
        assert!(err.to_string().contains("not a git repository"));
    }

    #[test]
    fn option_like_branch_names_never_reach_git() {
        let runner = ScriptedRunner::new();
        let git = Git::new("/repo", &runner, Duration::from_secs(5));
        for name in ["--orphan", "-f", "", "two words"] {
            assert!(git.checkout_branch(name).is_err());
            assert!(git.checkout_new_branch(name).is_err());
            assert!(git.merge_no_ff(name).is_err());
            assert!(git.delete_branch(name).is_err());
            assert!(git.branch_exists(name).is_err());
        }
        assert!(runner.calls().is_empty());
    }
}
