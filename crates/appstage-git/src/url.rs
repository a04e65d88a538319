//! Splitting a source url into repository and folder

use appstage_core::{Error, Result};

/// Split `url` into the clone url of its repository and the folder inside it
///
/// The folder is returned with a trailing `/`, or empty for the repo root.
/// When `auth_name` is set, https urls are turned into ssh urls so the key
/// from the auth profile can be used.
pub fn parse_github_url(url: &str, auth_name: &str) -> Result<(String, String)> {
    let mut url = url.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }

    if url.starts_with("git@") {
        let parts: Vec<&str> = url.splitn(3, '/').collect();
        if parts.len() < 3 {
            return Err(Error::git(format!(
                "invalid github url: {}, expected git@github.com:orgName/repoName or \
                 git@github.com:orgName/repoName/folder",
                url
            )));
        }
        return Ok((format!("{}/{}", parts[0], parts[1]), parts[2].to_string()));
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("https://{}", url);
    }

    let invalid = || {
        Error::git(format!(
            "invalid github url: {}, expected github.com/orgName/repoName or \
             github.com/orgName/repoName/folder",
            url
        ))
    };

    let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
    let (host, path) = rest.split_once('/').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }

    // path is "org/repo/folder..." once the leading "/" is split off
    let parts: Vec<&str> = path.splitn(3, '/').collect();
    if parts.len() < 3 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(invalid());
    }
    let (org, repo, folder) = (parts[0], parts[1], parts[2]);

    let repo_url = if auth_name.is_empty() {
        format!("{}://{}/{}/{}", scheme, host, org, repo)
    } else {
        format!(
            "git@{}:{}/{}.git",
            host,
            org,
            repo.trim_end_matches(".git")
        )
    };
    Ok((repo_url, folder.to_string()))
}
