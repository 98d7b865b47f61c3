use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::thread;
use tracing::{debug, error, info, warn};

use crate::app::ports::HttpClientPort;
use crate::config::FetchSettings;
use crate::constants::{is_http_url, LOCAL_SOURCE_PREFIX, REPO_ROOT_MARKER};
use crate::error::FetchError;

/// Raw text of remote documents fetched successfully during this run.
///
/// Owned by the fetcher; entries are never invalidated.
#[derive(Debug, Default)]
pub struct FetchCache {
    entries: HashMap<String, String>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(url).map(String::as_str)
    }

    pub fn insert(&mut self, url: &str, body: String) {
        self.entries.insert(url.to_string(), body);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walks upward from `start` until a directory containing `.git` is found.
/// Falls back to `start` itself.
pub fn find_repo_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join(REPO_ROOT_MARKER).exists())
        .unwrap_or(start)
        .to_path_buf()
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves a repo-relative path, refusing anything that lands outside `repo_root`.
pub fn resolve_local(repo_root: &Path, relative: &str) -> Result<PathBuf, FetchError> {
    let candidate = normalize_lexically(&repo_root.join(relative));
    if !candidate.starts_with(repo_root) {
        return Err(FetchError::Forbidden(relative.to_string()));
    }
    // Symlinks inside the repo must not lead out of it either
    if let (Ok(real), Ok(real_root)) = (candidate.canonicalize(), repo_root.canonicalize()) {
        if !real.starts_with(&real_root) {
            return Err(FetchError::Forbidden(relative.to_string()));
        }
    }
    Ok(candidate)
}

fn validate_json(location: &str, text: &str) -> Result<(), FetchError> {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|_| ())
        .map_err(|source| FetchError::InvalidJson {
            location: location.to_string(),
            source,
        })
}

/// Retrieves JSON text from `local:` paths or http(s) URLs.
pub struct Fetcher {
    http: Box<dyn HttpClientPort>,
    settings: FetchSettings,
    repo_root: PathBuf,
    cache: FetchCache,
}

impl Fetcher {
    pub fn new(http: Box<dyn HttpClientPort>, settings: FetchSettings, repo_root: PathBuf) -> Self {
        Self {
            http,
            settings,
            repo_root,
            cache: FetchCache::new(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    /// Fetches `source`, returning text that is known to parse as JSON.
    ///
    /// `allow_local` gates `local:` sources; remote-only callers pass `false`.
    pub fn fetch(&mut self, source: &str, allow_local: bool) -> Result<String, FetchError> {
        if let Some(relative) = source.strip_prefix(LOCAL_SOURCE_PREFIX) {
            if !allow_local {
                error!(source, "Local source not permitted here");
                return Err(FetchError::UnsupportedSource(source.to_string()));
            }
            return self.fetch_local(relative);
        }
        if is_http_url(source) {
            return self.fetch_remote(source);
        }
        Err(FetchError::UnsupportedSource(source.to_string()))
    }

    fn fetch_local(&self, relative: &str) -> Result<String, FetchError> {
        let path = resolve_local(&self.repo_root, relative).map_err(|e| {
            error!("Forbidden local path outside repo: {}", relative);
            e
        })?;
        if !path.is_file() {
            return Err(FetchError::NotFound(path));
        }
        let data = fs::read_to_string(&path).map_err(|source| FetchError::Read {
            path: path.clone(),
            source,
        })?;
        validate_json(&path.display().to_string(), &data)?;
        debug!(path = %path.display(), "Read local source");
        Ok(data)
    }

    fn fetch_remote(&mut self, url: &str) -> Result<String, FetchError> {
        if let Some(cached) = self.cache.get(url) {
            debug!(url, "Serving from fetch cache");
            return Ok(cached.to_string());
        }

        info!("Fetching {}", url);
        let attempts = self.settings.retries.max(1);
        let mut last = String::new();
        for attempt in 0..attempts {
            let result = self
                .http
                .get(url, self.settings.timeout())
                .and_then(|body| validate_json(url, &body).map(|_| body).map_err(|e| e.to_string()));
            match result {
                Ok(body) => {
                    self.cache.insert(url, body.clone());
                    return Ok(body);
                }
                Err(e) => {
                    last = e;
                    if attempt + 1 < attempts {
                        let wait = self.settings.backoff(attempt);
                        warn!(
                            "Fetch failed for {}: {}; retrying in {:.1}s...",
                            url,
                            last,
                            wait.as_secs_f64()
                        );
                        thread::sleep(wait);
                    } else {
                        warn!("Fetch failed for {}: {}", url, last);
                    }
                }
            }
        }

        error!("Permanent failure fetching {}: {}", url, last);
        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    /// Replays canned responses and counts calls.
    struct ScriptedHttp {
        responses: RefCell<VecDeque<Result<String, String>>>,
        calls: Rc<RefCell<u32>>,
    }

    impl HttpClientPort for ScriptedHttp {
        fn get(&self, _url: &str, _timeout: Duration) -> Result<String, String> {
            *self.calls.borrow_mut() += 1;
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err("connection refused".to_string()))
        }
    }

    fn fast_settings(retries: u32) -> FetchSettings {
        FetchSettings {
            retries,
            backoff_unit: Duration::ZERO,
            ..FetchSettings::default()
        }
    }

    fn fetcher(responses: Vec<Result<String, String>>, root: &Path) -> (Fetcher, Rc<RefCell<u32>>) {
        let calls = Rc::new(RefCell::new(0));
        let http = ScriptedHttp {
            responses: RefCell::new(responses.into()),
            calls: calls.clone(),
        };
        (
            Fetcher::new(Box::new(http), fast_settings(4), root.to_path_buf()),
            calls,
        )
    }

    #[test]
    fn repo_root_is_found_by_walking_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_repo_root(&nested), dir.path());
    }

    #[test]
    fn repo_root_falls_back_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("x");
        fs::create_dir_all(&nested).unwrap();
        // Walk may find a marker above the temp dir on some hosts; only assert when it does not
        let found = find_repo_root(&nested);
        assert!(found == nested || !found.starts_with(dir.path()));
    }

    #[test]
    fn traversal_outside_root_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_local(dir.path(), "../../etc/passwd").unwrap_err();
        assert!(matches!(err, FetchError::Forbidden(_)));
        let err = resolve_local(dir.path(), "/etc/passwd").unwrap_err();
        assert!(matches!(err, FetchError::Forbidden(_)));
    }

    #[test]
    fn sibling_prefix_directory_is_not_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(dir.path().join("repo2")).unwrap();
        fs::create_dir_all(&root).unwrap();
        let err = resolve_local(&root, "../repo2/a.json").unwrap_err();
        assert!(matches!(err, FetchError::Forbidden(_)));
    }

    #[test]
    fn local_fetch_reads_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"id":"X"}"#).unwrap();
        let (mut fetcher, _) = fetcher(vec![], dir.path());
        let text = fetcher.fetch("local:./sub/../a.json", true).unwrap();
        assert!(text.contains("\"X\""));
    }

    #[test]
    fn local_fetch_rejects_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{nope").unwrap();
        let (mut fetcher, _) = fetcher(vec![], dir.path());
        assert!(matches!(
            fetcher.fetch("local:missing.json", true),
            Err(FetchError::NotFound(_))
        ));
        assert!(matches!(
            fetcher.fetch("local:bad.json", true),
            Err(FetchError::InvalidJson { .. })
        ));
    }

    #[test]
    fn local_fetch_can_be_disallowed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut fetcher, _) = fetcher(vec![], dir.path());
        assert!(matches!(
            fetcher.fetch("local:a.json", false),
            Err(FetchError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn remote_fetch_retries_until_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let (mut fetcher, calls) = fetcher(
            vec![
                Err("timeout".to_string()),
                Ok("<html>".to_string()),
                Ok(r#"{"ok":true}"#.to_string()),
            ],
            dir.path(),
        );
        let body = fetcher.fetch("https://example.org/codemeta.json", false).unwrap();
        assert_eq!(body, r#"{"ok":true}"#);
        assert_eq!(*calls.borrow(), 3);
    }

    #[test]
    fn remote_fetch_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (mut fetcher, calls) = fetcher(vec![Ok("{}".to_string())], dir.path());
        fetcher.fetch("https://example.org/m.json", false).unwrap();
        fetcher.fetch("https://example.org/m.json", false).unwrap();
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(fetcher.cache().len(), 1);
    }

    #[test]
    fn remote_fetch_gives_up_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let (mut fetcher, calls) = fetcher(vec![], dir.path());
        let err = fetcher.fetch("http://example.org/down", false).unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 4, .. }));
        assert_eq!(*calls.borrow(), 4);
        assert!(fetcher.cache().is_empty());
    }

    #[test]
    fn unknown_scheme_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut fetcher, _) = fetcher(vec![], dir.path());
        assert!(matches!(
            fetcher.fetch("ftp://example.org/x.json", true),
            Err(FetchError::UnsupportedSource(_))
        ));
    }
}
