//! App path parsing and `domain:path` glob matching

use glob::{MatchOptions, Pattern};

use crate::constants::RESERVED_PATH_MARKER;
use crate::error::{Error, Result};
use crate::types::AppPathDomain;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Parse `domain:path` (or just `path`) into an app key
pub fn parse_app_path(input: &str) -> Result<AppPathDomain> {
    let (domain, path) = match input.split_once(':') {
        Some((domain, path)) => {
            if path.contains(':') {
                return Err(Error::InvalidPath(format!(
                    "{}, expected one \":\"",
                    input
                )));
            }
            (domain, path)
        }
        None => ("", input),
    };

    let path = normalize_path(path);
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(format!(
            "{}, expected path to start with \"/\"",
            input
        )));
    }
    Ok(AppPathDomain::new(domain, path))
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Reject paths that could escape their prefix or collide with internal apps
pub fn validate_path_for_create(path: &str) -> Result<()> {
    if path.contains("/..") {
        return Err(Error::InvalidPath("path cannot contain '/..'".to_string()));
    }
    if path.contains("../") {
        return Err(Error::InvalidPath("path cannot contain '../'".to_string()));
    }
    if path.contains("/./") {
        return Err(Error::InvalidPath("path cannot contain '/./'".to_string()));
    }
    if path.ends_with("/.") {
        return Err(Error::InvalidPath("path cannot end with '/.'".to_string()));
    }
    let last = path.rsplit('/').next().unwrap_or_default();
    if last.contains(RESERVED_PATH_MARKER) {
        return Err(Error::InvalidPath(format!(
            "last section of path cannot contain {}, reserved for internal apps",
            RESERVED_PATH_MARKER
        )));
    }
    Ok(())
}

/// Compiled `domain:path` glob
///
/// `""` and `all` match every app. Without a domain part only apps with an
/// empty domain match.
#[derive(Debug, Clone)]
pub struct AppGlob {
    domain: Option<Pattern>,
    path: Pattern,
    path_recursive: bool,
}

impl AppGlob {
    pub fn parse(glob: &str) -> Result<Self> {
        let glob = if glob.is_empty() || glob.eq_ignore_ascii_case("all") {
            "*:**"
        } else {
            glob
        };

        let parts: Vec<&str> = glob.split(':').collect();
        let (domain, path) = match parts.as_slice() {
            [path] => ("", *path),
            [domain, path] => (*domain, *path),
            _ => {
                return Err(Error::InvalidGlob(
                    "path glob has to be in the format of domain:path".to_string(),
                ))
            }
        };

        let path = match path {
            "*" => "/*",
            "" => "/",
            other => other,
        };

        let path_pattern = Pattern::new(path)
            .map_err(|e| Error::InvalidGlob(format!("invalid path glob app value {}: {}", path, e)))?;
        let domain_pattern = if domain.is_empty() {
            None
        } else {
            Some(Pattern::new(&format!("/{}", domain)).map_err(|e| {
                Error::InvalidGlob(format!("invalid path glob domain value {}: {}", domain, e))
            })?)
        };

        Ok(Self {
            domain: domain_pattern,
            path: path_pattern,
            path_recursive: path.ends_with("/**"),
        })
    }

    pub fn matches(&self, app: &AppPathDomain) -> bool {
        let path_match = self.path.matches_with(&app.path, MATCH_OPTIONS)
            || (self.path_recursive
                && self.path.matches_with(&format!("{}/", app.path), MATCH_OPTIONS));
        if !path_match {
            return false;
        }

        match &self.domain {
            None => app.domain.is_empty(),
            Some(domain) => domain.matches_with(&format!("/{}", app.domain), MATCH_OPTIONS),
        }
    }

    /// Keep the items whose key matches
    pub fn filter<'a, T, F>(&self, items: &'a [T], key: F) -> Vec<&'a T>
    where
        F: Fn(&T) -> AppPathDomain,
    {
        items.iter().filter(|item| self.matches(&key(item))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apd(domain: &str, path: &str) -> AppPathDomain {
        AppPathDomain::new(domain, path)
    }

    fn matching(glob: &str, apps: &[AppPathDomain]) -> Vec<AppPathDomain> {
        let glob = AppGlob::parse(glob).unwrap();
        glob.filter(apps, |a| a.clone()).into_iter().cloned().collect()
    }

    #[test]
    fn test_parse_app_path() {
        assert_eq!(parse_app_path("/app/").unwrap(), apd("", "/app"));
        assert_eq!(parse_app_path("example.com:/app").unwrap(), apd("example.com", "/app"));
        assert_eq!(parse_app_path("example.com:").unwrap(), apd("example.com", "/"));
        assert!(parse_app_path("app").is_err());
        assert!(parse_app_path("a:b:/c").is_err());
    }

    #[test]
    fn test_validate_path_for_create() {
        assert!(validate_path_for_create("/app/x").is_ok());
        assert!(validate_path_for_create("/app/../x").is_err());
        assert!(validate_path_for_create("/app/./x").is_err());
        assert!(validate_path_for_create("/app/.").is_err());
        assert!(validate_path_for_create("/app_cl_stage").is_err());
        assert!(validate_path_for_create("/x_cl_/app").is_ok());
    }

    #[test]
    fn test_glob_star_matches_empty_domain_only() {
        let apps = vec![apd("", "/app"), apd("mydomain", "/app")];
        assert_eq!(matching("*", &apps), vec![apd("", "/app")]);
        assert_eq!(matching(":*", &apps), vec![apd("", "/app")]);
        assert!(matching("*", &[apd("mydomain", "/app")]).is_empty());
    }

    #[test]
    fn test_glob_path_patterns() {
        let apps = vec![
            apd("mydomain", "/abc"),
            apd("", "/abc"),
            apd("", "/abc2"),
            apd("", "/abc/def"),
            apd("", "/abc/def/xyz"),
        ];
        assert_eq!(matching("/abc*", &apps), vec![apd("", "/abc"), apd("", "/abc2")]);
        assert_eq!(matching("/abc/*", &apps), vec![apd("", "/abc/def")]);
        assert_eq!(
            matching("/abc/**", &apps),
            vec![apd("", "/abc"), apd("", "/abc/def"), apd("", "/abc/def/xyz")]
        );
    }

    #[test]
    fn test_glob_all() {
        let apps = vec![apd("", "/app1"), apd("mydomain", "/app2/def")];
        assert_eq!(matching("all", &apps), apps);
        assert_eq!(matching("", &apps), apps);
        assert_eq!(matching("*:**", &apps), apps);
        assert_eq!(matching("*:*", &apps), vec![apd("", "/app1")]);
    }

    #[test]
    fn test_glob_domain_pattern() {
        let apps = vec![
            apd("testdomain", "/app1"),
            apd("mydomain", "/app/def"),
            apd("mydomain.test", "/app2/def"),
        ];
        assert_eq!(
            matching("mydomain*:**", &apps),
            vec![apd("mydomain", "/app/def"), apd("mydomain.test", "/app2/def")]
        );
    }

    #[test]
    fn test_glob_errors() {
        let err = AppGlob::parse("a:b:c").unwrap_err();
        assert!(err.to_string().contains("domain:path"));
        assert!(AppGlob::parse(":[]").is_err());
    }
}
