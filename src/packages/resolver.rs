// src/packages/resolver.rs

//! Batched package version queries
//!
//! One external command covers every requested package, e.g.
//! `apt list nginx postgresql-12`. For each name the output is scanned for
//! `<name> ... <version> ... [` and the last match wins, so a package that
//! is listed once per architecture still resolves to a single version.
//! If the command fails or times out, every name in the batch is `Error`.

use crate::process::{DEFAULT_TIMEOUT, ProcessRunner};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Default package listing command (Debian/Ubuntu)
pub const DEFAULT_QUERY_COMMAND: &str = "apt list";

/// Resolved version of a single package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionResult {
    Installed(String),
    NotInstalled,
    Error,
}

impl VersionResult {
    pub fn version(&self) -> Option<&str> {
        match self {
            VersionResult::Installed(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for VersionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionResult::Installed(v) => f.write_str(v),
            VersionResult::NotInstalled => f.write_str("[not installed]"),
            VersionResult::Error => f.write_str("[error]"),
        }
    }
}

/// Resolves installed package versions through a package manager command
#[derive(Debug, Clone)]
pub struct PackageVersionResolver {
    runner: ProcessRunner,
    query_command: String,
    timeout: Duration,
}

impl Default for PackageVersionResolver {
    fn default() -> Self {
        Self::new(ProcessRunner::default())
    }
}

impl PackageVersionResolver {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            query_command: DEFAULT_QUERY_COMMAND.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a different listing command; package names are appended to it
    pub fn with_query_command(mut self, command: impl Into<String>) -> Self {
        self.query_command = command.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resolve_one(&self, name: &str) -> VersionResult {
        self.resolve_many([name])
            .remove(name)
            .unwrap_or(VersionResult::Error)
    }

    /// Resolve a set of packages with a single command invocation
    pub fn resolve_many<I, S>(&self, names: I) -> BTreeMap<String, VersionResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut results = BTreeMap::new();
        let mut batch = BTreeSet::new();

        for name in names {
            let name = name.as_ref();
            if is_valid_package_name(name) {
                batch.insert(name.to_string());
            } else {
                warn!("Refusing to query invalid package name: {:?}", name);
                results.insert(name.to_string(), VersionResult::Error);
            }
        }

        if batch.is_empty() {
            return results;
        }

        let command = format!(
            "{} {}",
            self.query_command,
            batch.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
        );

        let output = self
            .runner
            .run(&command, self.timeout)
            .and_then(|result| result.into_stdout());

        match output {
            Ok(stdout) => {
                results.extend(parse_versions(&stdout, &batch));
            }
            Err(e) => {
                warn!("Error while retrieving versions of packages {:?}: {}", batch, e);
                results.extend(batch.into_iter().map(|name| (name, VersionResult::Error)));
            }
        }

        results
    }
}

/// Extract versions for `names` from package manager output
///
/// Pure function: the same output always yields the same mapping.
pub fn parse_versions<S: AsRef<str>>(
    output: &str,
    names: impl IntoIterator<Item = S>,
) -> BTreeMap<String, VersionResult> {
    names
        .into_iter()
        .map(|name| {
            let name = name.as_ref();
            let result = match extract_version(output, name) {
                Some(version) => VersionResult::Installed(version),
                None => VersionResult::NotInstalled,
            };
            debug!("Package {} resolved to {}", name, result);
            (name.to_string(), result)
        })
        .collect()
}

fn extract_version(output: &str, name: &str) -> Option<String> {
    let pattern = format!(r"{}.*\s(\d\S*)\s.*\[", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;

    re.captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .last()
        .map(|m| m.as_str().to_string())
}

fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-' | ':' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apt_list_line() {
        let output = "Listing...\nnginx/stable 1.18.0-0ubuntu1 amd64 [installed]\n";
        let versions = parse_versions(output, ["nginx"]);

        assert_eq!(
            versions["nginx"],
            VersionResult::Installed("1.18.0-0ubuntu1".to_string())
        );
    }

    #[test]
    fn test_parse_last_match_wins() {
        let output = "\
libfoo/stable 1.0-1 i386 [installed]
libfoo/stable 1.0-2 amd64 [installed]
";
        let versions = parse_versions(output, ["libfoo"]);

        assert_eq!(versions["libfoo"].version(), Some("1.0-2"));
    }

    #[test]
    fn test_parse_missing_package() {
        let output = "Listing...\nnginx/stable 1.18.0-0ubuntu1 amd64 [installed]\n";
        let versions = parse_versions(output, ["nginx", "apache2"]);

        assert_eq!(versions["apache2"], VersionResult::NotInstalled);
        assert!(matches!(versions["nginx"], VersionResult::Installed(_)));
    }

    #[test]
    fn test_parse_requires_bracket_marker() {
        let output = "nginx/stable 1.18.0-0ubuntu1 amd64\n";
        let versions = parse_versions(output, ["nginx"]);

        assert_eq!(versions["nginx"], VersionResult::NotInstalled);
    }

    #[test]
    fn test_package_name_is_literal() {
        // "." in the name must not match arbitrary characters
        let output = "python3x10/stable 3.10.6-1 amd64 [installed]\n";
        let versions = parse_versions(output, ["python3.10"]);

        assert_eq!(versions["python3.10"], VersionResult::NotInstalled);
    }

    #[test]
    fn test_display_sentinels() {
        assert_eq!(VersionResult::NotInstalled.to_string(), "[not installed]");
        assert_eq!(VersionResult::Error.to_string(), "[error]");
        assert_eq!(VersionResult::Installed("1.2".into()).to_string(), "1.2");
    }

    #[test]
    fn test_resolve_many_with_fake_query() {
        let resolver = PackageVersionResolver::default()
            .with_query_command("printf 'nginx/stable 1.18.0 amd64 [installed]\\n' #");

        let versions = resolver.resolve_many(["nginx", "apache2"]);

        assert_eq!(versions["nginx"].version(), Some("1.18.0"));
        assert_eq!(versions["apache2"], VersionResult::NotInstalled);
    }

    #[test]
    fn test_failed_query_marks_whole_batch() {
        let resolver = PackageVersionResolver::default()
            .with_query_command("printf 'nginx/stable 1.18.0 amd64 [installed]\\n'; exit 1 #");

        let versions = resolver.resolve_many(["nginx", "apache2"]);

        assert_eq!(versions["nginx"], VersionResult::Error);
        assert_eq!(versions["apache2"], VersionResult::Error);
    }

    #[test]
    fn test_timed_out_query_marks_whole_batch() {
        let resolver = PackageVersionResolver::default()
            .with_query_command("printf 'nginx/stable 1.18.0 amd64 [installed]\\n'; sleep 5 #")
            .with_timeout(Duration::from_millis(200));

        let versions = resolver.resolve_many(["nginx", "apache2"]);

        assert!(versions.values().all(|v| *v == VersionResult::Error));
    }

    #[test]
    fn test_invalid_name_is_error_without_query() {
        let resolver = PackageVersionResolver::default().with_query_command("exit 1 #");

        assert_eq!(resolver.resolve_one("nginx; rm -rf /"), VersionResult::Error);
        assert_eq!(resolver.resolve_one("--installed"), VersionResult::Error);
    }

    #[test]
    fn test_resolve_one() {
        let resolver = PackageVersionResolver::default()
            .with_query_command("printf 'apache2/jammy 2.4.52-1ubuntu4 amd64 [installed]\\n' #");

        assert_eq!(
            resolver.resolve_one("apache2"),
            VersionResult::Installed("2.4.52-1ubuntu4".to_string())
        );
    }
}
