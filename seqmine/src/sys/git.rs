//! Git collaborator over libgit2.

use std::path::Path;

use anyhow::{Context, Result};
use git2::{DiffOptions, Repository, Signature, StatusOptions};

pub struct GitClient;

impl GitClient {
    /// Messages of the `n` most recent commits, newest first.
    pub fn log(folder: &Path, n: usize) -> Result<Vec<(String, String)>> {
        let repo = Repository::open(folder).context("opening repository")?;
        let mut walk = repo.revwalk()?;
        walk.push_head()?;
        let mut result = Vec::new();
        for oid in walk.take(n) {
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            result.push((
                oid.to_string(),
                commit.summary().unwrap_or("").to_string(),
            ));
        }
        Ok(result)
    }

    /// Paths changed in the working tree.
    pub fn status(folder: &Path) -> Result<Vec<String>> {
        let repo = Repository::open(folder).context("opening repository")?;
        let mut options = StatusOptions::new();
        options.include_untracked(true);
        let statuses = repo.statuses(Some(&mut options))?;
        Ok(statuses
            .iter()
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect())
    }

    /// Paths changed by the given commit relative to its first parent.
    pub fn diff_tree(folder: &Path, sha: &str) -> Result<Vec<String>> {
        let repo = Repository::open(folder).context("opening repository")?;
        let commit = repo.find_commit(git2::Oid::from_str(sha)?)?;
        let tree = commit.tree()?;
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
        let diff = repo.diff_tree_to_tree(
            parent_tree.as_ref(),
            Some(&tree),
            Some(&mut DiffOptions::new()),
        )?;
        let mut result = Vec::new();
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path() {
                result.push(path.to_string_lossy().into_owned());
            }
        }
        Ok(result)
    }

    pub fn clone_repo(url: &str, folder: &Path) -> Result<()> {
        git2::build::RepoBuilder::new()
            .clone(url, folder)
            .with_context(|| format!("cloning {}", url))?;
        Ok(())
    }

    /// Stage all changes in the working tree.
    pub fn add_all(folder: &Path) -> Result<()> {
        let repo = Repository::open(folder).context("opening repository")?;
        let mut index = repo.index()?;
        index.add_all(["*"], git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        Ok(())
    }

    pub fn commit(folder: &Path, message: &str) -> Result<()> {
        let repo = Repository::open(folder).context("opening repository")?;
        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let signature = repo
            .signature()
            .or_else(|_| Signature::now("seqmine", "seqmine@localhost"))?;
        let parent = repo
            .head()
            .ok()
            .and_then(|h| h.target())
            .and_then(|oid| repo.find_commit(oid).ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        Ok(())
    }

    pub fn push(folder: &Path) -> Result<()> {
        let repo = Repository::open(folder).context("opening repository")?;
        let mut remote = repo.find_remote("origin")?;
        let head = repo.head()?;
        let refspec = head
            .name()
            .map(|name| format!("{}:{}", name, name))
            .context("detached head")?;
        remote.push(&[refspec.as_str()], None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_commit_log_status_roundtrip() {
        let dir = std::env::temp_dir().join(format!("seqmine-git-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        Repository::init(&dir).expect("init repository");
        std::fs::write(dir.join("a.txt"), "one\n").expect("writes");
        GitClient::add_all(&dir).expect("stages");
        GitClient::commit(&dir, "first").expect("commits");
        std::fs::write(dir.join("b.txt"), "two\n").expect("writes");
        GitClient::add_all(&dir).expect("stages");
        GitClient::commit(&dir, "second").expect("commits");

        let log = GitClient::log(&dir, 10).expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1, "second");
        assert_eq!(log[1].1, "first");

        let changed = GitClient::diff_tree(&dir, &log[0].0).expect("diff");
        assert_eq!(changed, vec!["b.txt".to_string()]);

        std::fs::write(dir.join("c.txt"), "three\n").expect("writes");
        let status = GitClient::status(&dir).expect("status");
        assert!(status.contains(&"c.txt".to_string()));

        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
