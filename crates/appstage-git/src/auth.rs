//! Git auth profiles and libgit2 credential callbacks

use appstage_core::{
    Error, GitAuthEntry, Result, ServerConfig, DEFAULT_GIT_TIMEOUT_SECS, DEFAULT_GIT_USER,
};
use git2::{Cred, RemoteCallbacks};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Attempts before giving up on a remote that keeps rejecting the key
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// Git settings taken from the server config
#[derive(Debug, Clone)]
pub struct GitAuthConfig {
    pub default_git_auth: String,
    pub profiles: HashMap<String, GitAuthEntry>,
    pub timeout: Duration,
    /// `(prefix, replacement)` pairs, longest prefix first
    pub url_rewrites: Vec<(String, String)>,
}

impl Default for GitAuthConfig {
    fn default() -> Self {
        Self {
            default_git_auth: String::new(),
            profiles: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_GIT_TIMEOUT_SECS),
            url_rewrites: Vec::new(),
        }
    }
}

impl From<&ServerConfig> for GitAuthConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            default_git_auth: config.security.default_git_auth.clone(),
            profiles: config.git_auth.clone(),
            timeout: Duration::from_secs(config.system.git_timeout_secs),
            url_rewrites: sorted_rewrites(&config.git_url_rewrites),
        }
    }
}

fn sorted_rewrites(rewrites: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut sorted: Vec<(String, String)> = rewrites
        .iter()
        .map(|(prefix, to)| (prefix.clone(), to.clone()))
        .collect();
    sorted.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// SSH key credentials resolved from a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCredentials {
    pub user: String,
    pub key_file: PathBuf,
    pub passphrase: Option<String>,
}

impl GitAuthConfig {
    /// Profile name actually used for `auth_name`
    pub fn effective_name<'a>(&'a self, auth_name: &'a str) -> &'a str {
        if auth_name.is_empty() {
            &self.default_git_auth
        } else {
            auth_name
        }
    }

    /// Repository url to fetch from, after applying the longest matching rewrite
    pub fn rewrite_url(&self, repo: &str) -> String {
        for (prefix, replacement) in &self.url_rewrites {
            if let Some(rest) = repo.strip_prefix(prefix.as_str()) {
                return format!("{}{}", replacement, rest);
            }
        }
        repo.to_string()
    }

    /// Load the credentials of a profile; `None` means anonymous access
    pub fn load(&self, auth_name: &str) -> Result<Option<GitCredentials>> {
        let name = self.effective_name(auth_name);
        if name.is_empty() {
            return Ok(None);
        }

        let entry = self.profiles.get(name).ok_or_else(|| {
            Error::git(format!("git auth entry {} not found in server config", name))
        })?;

        std::fs::read(&entry.key_file_path).map_err(|e| {
            Error::git(format!(
                "error reading git key {}: {}",
                entry.key_file_path.display(),
                e
            ))
        })?;

        let user = if entry.user_id.is_empty() {
            DEFAULT_GIT_USER.to_string()
        } else {
            entry.user_id.clone()
        };

        Ok(Some(GitCredentials {
            user,
            key_file: entry.key_file_path.clone(),
            passphrase: (!entry.password.is_empty()).then(|| entry.password.clone()),
        }))
    }
}

/// Remote callbacks answering credential requests with the given key
pub(crate) fn remote_callbacks(credentials: Option<GitCredentials>) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0;
    callbacks.credentials(move |_url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }

        match &credentials {
            Some(creds) if allowed.is_ssh_key() => Cred::ssh_key(
                username_from_url.unwrap_or(&creds.user),
                None,
                &creds.key_file,
                creds.passphrase.as_deref(),
            ),
            Some(creds) if allowed.is_username() => Cred::username(&creds.user),
            _ => Cred::default(),
        }
    });
    callbacks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn config_with(entry: GitAuthEntry) -> GitAuthConfig {
        let mut profiles = HashMap::new();
        profiles.insert("deploy".to_string(), entry);
        GitAuthConfig {
            default_git_auth: String::new(),
            profiles,
            timeout: Duration::from_secs(5),
            url_rewrites: Vec::new(),
        }
    }

    #[test]
    fn test_no_profile_is_anonymous() {
        let config = GitAuthConfig::default();
        assert_eq!(config.load("").unwrap(), None);
    }

    #[test]
    fn test_missing_profile() {
        let config = GitAuthConfig::default();
        let err = config.load("nope").unwrap_err();
        assert!(err
            .to_string()
            .contains("git auth entry nope not found in server config"));
    }

    #[test]
    fn test_unreadable_key() {
        let config = config_with(GitAuthEntry {
            key_file_path: PathBuf::from("/nonexistent/id_ed25519"),
            ..Default::default()
        });
        let err = config.load("deploy").unwrap_err();
        assert!(err
            .to_string()
            .contains("error reading git key /nonexistent/id_ed25519"));
    }

    #[test]
    fn test_default_profile_and_user() {
        let key = NamedTempFile::new().unwrap();
        let mut config = config_with(GitAuthEntry {
            key_file_path: key.path().to_path_buf(),
            password: "secret".to_string(),
            ..Default::default()
        });
        config.default_git_auth = "deploy".to_string();

        let creds = config.load("").unwrap().unwrap();
        assert_eq!(creds.user, "git");
        assert_eq!(creds.passphrase.as_deref(), Some("secret"));
        assert_eq!(config.effective_name(""), "deploy");
    }

    #[test]
    fn test_url_rewrites_use_longest_prefix() {
        let mut server = ServerConfig::default();
        server
            .git_url_rewrites
            .insert("https://github.com/".to_string(), "/srv/mirror/".to_string());
        server.git_url_rewrites.insert(
            "https://github.com/org/".to_string(),
            "/srv/org-mirror/".to_string(),
        );
        let config = GitAuthConfig::from(&server);

        assert_eq!(
            config.rewrite_url("https://github.com/org/repo"),
            "/srv/org-mirror/repo"
        );
        assert_eq!(
            config.rewrite_url("https://github.com/other/repo"),
            "/srv/mirror/other/repo"
        );
        assert_eq!(
            config.rewrite_url("git@github.com:org/repo.git"),
            "git@github.com:org/repo.git"
        );
    }
}
