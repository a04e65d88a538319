//! Request-scoped cache of remote branch heads and checkouts

use appstage_core::{Error, Result};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Direction, FetchOptions, Remote, Repository};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::auth::{remote_callbacks, GitAuthConfig, GitCredentials};
use crate::url::parse_github_url;

/// A checked out source folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    /// Root of the cloned repository
    pub dir: PathBuf,
    /// Folder inside the repository, empty or ending in `/`
    pub folder: String,
    pub commit_message: String,
    pub hash: String,
}

impl Checkout {
    /// Directory holding the requested folder
    pub fn source_dir(&self) -> PathBuf {
        if self.folder.is_empty() {
            self.dir.clone()
        } else {
            self.dir.join(&self.folder)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    repo: String,
    branch: String,
    commit: String,
    auth: String,
}

#[derive(Debug, Clone)]
struct ClonedRepo {
    dir: PathBuf,
    commit_message: String,
    hash: String,
}

/// Memoizes git lookups for one request; checkouts are removed on drop
pub struct RepoCache {
    config: GitAuthConfig,
    root: Option<TempDir>,
    shas: HashMap<CacheKey, String>,
    checkouts: HashMap<CacheKey, ClonedRepo>,
}

impl RepoCache {
    pub fn new(config: GitAuthConfig) -> Result<Self> {
        let root = tempfile::Builder::new()
            .prefix("appstage_git_")
            .tempdir()
            .map_err(|e| Error::git(format!("error creating checkout directory: {}", e)))?;
        debug!("Repo cache root {}", root.path().display());

        Ok(Self {
            config,
            root: Some(root),
            shas: HashMap::new(),
            checkouts: HashMap::new(),
        })
    }

    /// Directory holding the checkouts, `None` after cleanup
    pub fn root(&self) -> Option<&Path> {
        self.root.as_ref().map(|r| r.path())
    }

    /// Commit id at the head of `branch`, read from the remote without cloning
    pub async fn get_sha(&mut self, source_url: &str, branch: &str, auth_name: &str) -> Result<String> {
        let auth = self.config.effective_name(auth_name).to_string();
        let (repo, _) = parse_github_url(source_url, &auth)?;
        let repo = self.config.rewrite_url(&repo);
        self.remote_sha(repo, branch, auth).await
    }

    async fn remote_sha(&mut self, repo: String, branch: &str, auth: String) -> Result<String> {
        let key = CacheKey {
            repo: repo.clone(),
            branch: branch.to_string(),
            commit: String::new(),
            auth: auth.clone(),
        };
        if let Some(sha) = self.shas.get(&key) {
            return Ok(sha.clone());
        }

        let credentials = self.config.load(&auth)?;
        let branch_name = branch.to_string();
        let what = format!("listing refs of {} branch {}", repo, branch);
        let sha = self
            .run_blocking(what, move || {
                list_branch_sha(&repo, &branch_name, credentials)
            })
            .await?;

        debug!("Branch {} of {} is at {}", branch, key.repo, sha);
        self.shas.insert(key, sha.clone());
        Ok(sha)
    }

    /// Check out `source_url` at `branch`, or at `commit` when one is given
    pub async fn checkout_repo(
        &mut self,
        source_url: &str,
        branch: &str,
        commit: &str,
        auth_name: &str,
    ) -> Result<Checkout> {
        let auth = self.config.effective_name(auth_name).to_string();
        let (repo, folder) = parse_github_url(source_url, &auth)?;
        let repo = self.config.rewrite_url(&repo);
        self.checkout(repo, folder, branch, commit, auth).await
    }

    async fn checkout(
        &mut self,
        repo: String,
        folder: String,
        branch: &str,
        commit: &str,
        auth: String,
    ) -> Result<Checkout> {
        let key = CacheKey {
            repo: repo.clone(),
            branch: branch.to_string(),
            commit: commit.to_string(),
            auth: auth.clone(),
        };
        if let Some(cloned) = self.checkouts.get(&key) {
            return Ok(Checkout {
                dir: cloned.dir.clone(),
                folder,
                commit_message: cloned.commit_message.clone(),
                hash: cloned.hash.clone(),
            });
        }

        let root = self
            .root()
            .ok_or_else(|| Error::git("repo cache has been cleaned up"))?;
        let target = tempfile::Builder::new()
            .prefix("repo_")
            .tempdir_in(root)
            .map_err(|e| Error::git(format!("error creating checkout directory: {}", e)))?
            .into_path();

        let credentials = self.config.load(&auth)?;
        let (dir, branch_name, commit_id) = (target.clone(), branch.to_string(), commit.to_string());
        let what = format!("cloning {} branch {} commit {:?}", key.repo, branch, commit);
        let (commit_message, hash) = self
            .run_blocking(what, move || {
                clone_repo(&repo, &dir, &branch_name, &commit_id, credentials)
            })
            .await?;

        info!(
            "Checked out {} branch {} at {}",
            key.repo,
            branch,
            hash
        );
        let cloned = ClonedRepo {
            dir: target,
            commit_message,
            hash,
        };
        self.checkouts.insert(key, cloned.clone());

        Ok(Checkout {
            dir: cloned.dir,
            folder,
            commit_message: cloned.commit_message,
            hash: cloned.hash,
        })
    }

    async fn run_blocking<T, F>(&self, what: String, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match tokio::time::timeout(self.config.timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::git(format!("{} failed: {}", what, e))),
            Err(_) => Err(Error::Timeout(format!(
                "{} did not finish within {:?}",
                what, self.config.timeout
            ))),
        }
    }

    /// Remove every checkout; later calls fail
    pub fn cleanup(&mut self) {
        self.shas.clear();
        self.checkouts.clear();
        if let Some(root) = self.root.take() {
            let path = root.path().to_path_buf();
            if let Err(e) = root.close() {
                warn!("Failed to remove repo cache {}: {}", path.display(), e);
            }
        }
    }
}

fn is_network_url(repo: &str) -> bool {
    ["http://", "https://", "ssh://", "git://", "git@"]
        .iter()
        .any(|prefix| repo.starts_with(prefix))
}

fn fetch_options(repo: &str, credentials: Option<GitCredentials>) -> FetchOptions<'static> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(remote_callbacks(credentials));
    // the local transport cannot do shallow fetches
    if is_network_url(repo) {
        options.depth(1);
    }
    options
}

fn list_branch_sha(repo: &str, branch: &str, credentials: Option<GitCredentials>) -> Result<String> {
    let list_error = |e: git2::Error| Error::git(format!("could not list remote refs: {}", e));

    let mut remote = Remote::create_detached(repo).map_err(list_error)?;
    let connection = remote
        .connect_auth(Direction::Fetch, Some(remote_callbacks(credentials)), None)
        .map_err(list_error)?;

    let wanted = format!("refs/heads/{}", branch);
    let sha = connection
        .list()
        .map_err(list_error)?
        .iter()
        .find(|head| head.name() == wanted)
        .map(|head| head.oid().to_string());

    sha.ok_or_else(|| Error::git(format!("branch {:?} not found", branch)))
}

fn clone_repo(
    repo: &str,
    target: &Path,
    branch: &str,
    commit: &str,
    credentials: Option<GitCredentials>,
) -> Result<(String, String)> {
    let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", branch);

    let mut builder = RepoBuilder::new();
    builder
        .branch(branch)
        .fetch_options(fetch_options(repo, credentials.clone()));
    builder.remote_create(|repository, name, url| repository.remote_with_fetch(name, url, &refspec));

    let repository = builder
        .clone(repo, target)
        .map_err(|e| Error::git(format!("error checking out branch {}: {}", branch, e)))?;

    if !commit.is_empty() {
        checkout_commit(&repository, repo, commit, credentials).map_err(|e| {
            Error::git(format!(
                "error checking out branch {} commit {}: {}",
                branch, commit, e
            ))
        })?;
    }

    let head = repository
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|e| Error::git(format!("error reading head of branch {}: {}", branch, e)))?;
    let message = head.message().unwrap_or_default().trim_end().to_string();
    Ok((message, head.id().to_string()))
}

fn checkout_commit(
    repository: &Repository,
    repo: &str,
    commit: &str,
    credentials: Option<GitCredentials>,
) -> std::result::Result<(), git2::Error> {
    if repository.revparse_single(commit).is_err() {
        debug!("Commit {} not in clone of {}, fetching it", commit, repo);
        let mut remote = repository.find_remote("origin")?;
        remote.fetch(&[commit], Some(&mut fetch_options(repo, credentials)), None)?;
    }

    let target = repository.revparse_single(commit)?.peel_to_commit()?;
    repository.checkout_tree(target.as_object(), Some(CheckoutBuilder::new().force()))?;
    repository.set_head_detached(target.id())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{RepositoryInitOptions, Signature};
    use std::fs;

    struct Fixture {
        dir: TempDir,
        repo: Repository,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut opts = RepositoryInitOptions::new();
            opts.initial_head("main");
            let repo = Repository::init_opts(dir.path(), &opts).unwrap();
            Self { dir, repo }
        }

        fn url(&self) -> String {
            self.dir.path().to_string_lossy().to_string()
        }

        fn commit(&self, file: &str, content: &str, message: &str) -> String {
            let path = self.dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();

            let mut index = self.repo.index().unwrap();
            index.add_path(Path::new(file)).unwrap();
            index.write().unwrap();
            let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::now("test", "test@example.com").unwrap();
            let parent = self
                .repo
                .head()
                .ok()
                .and_then(|h| h.peel_to_commit().ok());
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
                .unwrap()
                .to_string()
        }
    }

    #[tokio::test]
    async fn test_remote_sha_of_branch() {
        let fixture = Fixture::new();
        let first = fixture.commit("app/app.toml", "loads = []\n", "first");

        let mut cache = RepoCache::new(GitAuthConfig::default()).unwrap();
        let sha = cache
            .remote_sha(fixture.url(), "main", String::new())
            .await
            .unwrap();
        assert_eq!(sha, first);

        // cached for the rest of the request
        fixture.commit("app/app.toml", "loads = [\"fs\"]\n", "second");
        let again = cache
            .remote_sha(fixture.url(), "main", String::new())
            .await
            .unwrap();
        assert_eq!(again, first);

        let err = cache
            .remote_sha(fixture.url(), "develop", String::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("branch \"develop\" not found"));
    }

    #[tokio::test]
    async fn test_checkout_branch_head() {
        let fixture = Fixture::new();
        fixture.commit("app/app.toml", "loads = []\n", "first");
        let head = fixture.commit("app/index.html", "<h1>hi</h1>", "add index");

        let mut cache = RepoCache::new(GitAuthConfig::default()).unwrap();
        let checkout = cache
            .checkout(fixture.url(), "app/".to_string(), "main", "", String::new())
            .await
            .unwrap();

        assert_eq!(checkout.hash, head);
        assert_eq!(checkout.commit_message, "add index");
        assert!(checkout.source_dir().join("index.html").exists());
        assert!(checkout.dir.starts_with(cache.root().unwrap()));
    }

    #[tokio::test]
    async fn test_checkout_specific_commit() {
        let fixture = Fixture::new();
        let first = fixture.commit("app/app.toml", "version = 1\n", "first");
        fixture.commit("app/app.toml", "version = 2\n", "second");

        let mut cache = RepoCache::new(GitAuthConfig::default()).unwrap();
        let checkout = cache
            .checkout(fixture.url(), "app/".to_string(), "main", &first, String::new())
            .await
            .unwrap();

        assert_eq!(checkout.hash, first);
        let content = fs::read_to_string(checkout.source_dir().join("app.toml")).unwrap();
        assert_eq!(content, "version = 1\n");
    }

    #[tokio::test]
    async fn test_checkout_errors_name_branch_and_commit() {
        let fixture = Fixture::new();
        fixture.commit("app.toml", "", "first");

        let mut cache = RepoCache::new(GitAuthConfig::default()).unwrap();
        let err = cache
            .checkout(fixture.url(), String::new(), "missing", "", String::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("error checking out branch missing"));

        let bogus = "0123456789abcdef0123456789abcdef01234567";
        let err = cache
            .checkout(fixture.url(), String::new(), "main", bogus, String::new())
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains(&format!("error checking out branch main commit {}", bogus)));
    }

    #[tokio::test]
    async fn test_timeout_names_repo_branch_and_commit() {
        // accepts connections but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let repo = format!("http://{}/org/repo", listener.local_addr().unwrap());
        let config = GitAuthConfig {
            timeout: std::time::Duration::from_millis(200),
            ..Default::default()
        };

        let mut cache = RepoCache::new(config).unwrap();
        let commit = "0123456789abcdef0123456789abcdef01234567";
        let err = cache
            .checkout_repo(&repo, "release", commit, "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        let message = err.to_string();
        assert!(message.contains(&repo), "{}", message);
        assert!(message.contains("branch release"), "{}", message);
        assert!(message.contains(commit), "{}", message);

        let err = cache.get_sha(&repo, "release", "").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.to_string().contains(&format!("{} branch release", repo)));
        drop(listener);
    }

    #[tokio::test]
    async fn test_rewritten_url_reads_mirror() {
        let fixture = Fixture::new();
        let head = fixture.commit("blog/app.toml", "loads = []\n", "first");
        let config = GitAuthConfig {
            url_rewrites: vec![("https://git.test/org/repo".to_string(), fixture.url())],
            ..Default::default()
        };

        let mut cache = RepoCache::new(config).unwrap();
        let sha = cache
            .get_sha("git.test/org/repo/blog", "main", "")
            .await
            .unwrap();
        assert_eq!(sha, head);
        let checkout = cache
            .checkout_repo("git.test/org/repo/blog", "main", "", "")
            .await
            .unwrap();
        assert_eq!(checkout.hash, head);
        assert!(checkout.source_dir().join("app.toml").exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_root() {
        let fixture = Fixture::new();
        fixture.commit("app.toml", "", "first");

        let mut cache = RepoCache::new(GitAuthConfig::default()).unwrap();
        cache
            .checkout(fixture.url(), String::new(), "main", "", String::new())
            .await
            .unwrap();
        let root = cache.root().unwrap().to_path_buf();
        assert!(root.exists());

        cache.cleanup();
        assert!(!root.exists());
        assert!(cache.root().is_none());
    }

    #[tokio::test]
    async fn test_drop_removes_root() {
        let cache = RepoCache::new(GitAuthConfig::default()).unwrap();
        let root = cache.root().unwrap().to_path_buf();
        drop(cache);
        assert!(!root.exists());
    }
}
