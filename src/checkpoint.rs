//! Git-backed checkpoints.
//!
//! The review loop snapshots the work tree before each cycle and after each
//! pass so a bad rework round can be rolled back. The git CLI is not
//! involved; everything goes through libgit2.

use anyhow::{Context, Result};
use git2::{Delta, DiffOptions, Repository, ResetType, Signature};
use std::path::{Path, PathBuf};

/// Files and line counts changed since a checkpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileChangeSummary {
    pub files_added: Vec<PathBuf>,
    pub files_modified: Vec<PathBuf>,
    pub files_deleted: Vec<PathBuf>,
    pub lines_added: u32,
    pub lines_removed: u32,
}

impl FileChangeSummary {
    pub fn total_files(&self) -> usize {
        self.files_added.len() + self.files_modified.len() + self.files_deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_files() == 0
    }

    /// Every touched path.
    pub fn all_paths(&self) -> Vec<PathBuf> {
        self.files_added
            .iter()
            .chain(&self.files_modified)
            .chain(&self.files_deleted)
            .cloned()
            .collect()
    }
}

/// Snapshot/rollback manager over one repository.
pub struct CheckpointManager {
    repo: Repository,
}

impl CheckpointManager {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Create a snapshot commit of the full work tree; returns the commit id.
    pub fn checkpoint(&self, label: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now("foreman", "foreman@localhost")?;
        let message = format!("[foreman] checkpoint: {label}");

        // Unborn branch: the first checkpoint is the initial commit.
        let commit_id = if let Some(parent) = self.head_commit() {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?
        } else {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])?
        };

        tracing::debug!(label, commit = %commit_id, "checkpoint created");
        Ok(commit_id.to_string())
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Hard-reset the work tree to a checkpoint.
    pub fn rollback_to(&self, checkpoint_id: &str) -> Result<()> {
        let oid = git2::Oid::from_str(checkpoint_id).context("Invalid checkpoint id")?;
        let commit = self
            .repo
            .find_commit(oid)
            .context("Checkpoint commit not found")?;
        self.repo
            .reset(commit.as_object(), ResetType::Hard, None)
            .context("Failed to reset to checkpoint")?;
        tracing::info!(checkpoint = checkpoint_id, "rolled back to checkpoint");
        Ok(())
    }

    /// Summarize work-tree changes since a checkpoint.
    pub fn changes_since(&self, checkpoint_id: &str) -> Result<FileChangeSummary> {
        let oid = git2::Oid::from_str(checkpoint_id).context("Invalid checkpoint id")?;
        let commit = self
            .repo
            .find_commit(oid)
            .context("Checkpoint commit not found")?;
        let tree = commit.tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true);
        opts.show_untracked_content(true);
        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))?;

        let mut summary = FileChangeSummary::default();
        diff.foreach(
            &mut |delta, _progress| {
                if let Some(path) = delta.new_file().path() {
                    let path = path.to_path_buf();
                    match delta.status() {
                        Delta::Added | Delta::Untracked => summary.files_added.push(path),
                        Delta::Modified => summary.files_modified.push(path),
                        Delta::Deleted => summary.files_deleted.push(path),
                        _ => {}
                    }
                }
                true
            },
            None,
            None,
            Some(&mut |_delta, _hunk, line| {
                match line.origin() {
                    '+' => summary.lines_added += 1,
                    '-' => summary.lines_removed += 1,
                    _ => {}
                }
                true
            }),
        )?;

        Ok(summary)
    }
}
