// Desktop shell load targets and navigation boundary
//
// The shell may only display the dev server origin or packaged local files,
// and never opens new windows.

use reqwest::Url;
use std::path::{Path, PathBuf};

/// Where the UI dev server listens in development
pub const DEV_SERVER_URL: &str = "http://localhost:5173";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    Development,
    Production,
}

impl ShellMode {
    /// `development` (any case) selects development; anything else, or nothing, is production
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("development") => ShellMode::Development,
            _ => ShellMode::Production,
        }
    }

    /// Read `NODE_ENV`, falling back to `APP_ENV`
    pub fn from_env() -> Self {
        let value = std::env::var("NODE_ENV")
            .or_else(|_| std::env::var("APP_ENV"))
            .ok();
        Self::from_env_value(value.as_deref())
    }
}

/// What the shell window loads at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    DevServer(String),
    PackagedFile(PathBuf),
}

impl LoadTarget {
    /// Dev server in development, `<dist_dir>/index.html` in production
    pub fn for_mode(mode: ShellMode, dist_dir: &Path) -> Self {
        match mode {
            ShellMode::Development => LoadTarget::DevServer(DEV_SERVER_URL.to_string()),
            ShellMode::Production => LoadTarget::PackagedFile(dist_dir.join("index.html")),
        }
    }

    /// URL form of the target; `None` for a relative packaged path
    pub fn url(&self) -> Option<Url> {
        match self {
            LoadTarget::DevServer(url) => Url::parse(url).ok(),
            LoadTarget::PackagedFile(path) => Url::from_file_path(path).ok(),
        }
    }
}

/// Navigation allow-list for the shell window
#[derive(Debug, Clone)]
pub struct NavigationPolicy {
    dev_server: Option<Url>,
}

impl NavigationPolicy {
    pub fn new(dev_server: &str) -> Self {
        Self {
            dev_server: Url::parse(dev_server).ok(),
        }
    }

    /// Whether the window may navigate to `target`
    ///
    /// Only the dev server's origin and `file:` URLs are allowed; anything
    /// that does not parse is rejected.
    pub fn allows(&self, target: &str) -> bool {
        match Url::parse(target) {
            Ok(url) if url.scheme() == "file" => true,
            Ok(url) => self
                .dev_server
                .as_ref()
                .is_some_and(|dev| url.origin() == dev.origin()),
            Err(_) => false,
        }
    }

    /// New windows are never created
    pub fn allows_new_window(&self, _target: &str) -> bool {
        false
    }
}

impl Default for NavigationPolicy {
    fn default() -> Self {
        Self::new(DEV_SERVER_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_env_value() {
        assert_eq!(
            ShellMode::from_env_value(Some("development")),
            ShellMode::Development
        );
        assert_eq!(
            ShellMode::from_env_value(Some("Development ")),
            ShellMode::Development
        );
        assert_eq!(
            ShellMode::from_env_value(Some("production")),
            ShellMode::Production
        );
        assert_eq!(ShellMode::from_env_value(None), ShellMode::Production);
    }

    #[test]
    fn test_load_targets() {
        let dist = Path::new("/opt/portfolio/frontend/dist");

        let dev = LoadTarget::for_mode(ShellMode::Development, dist);
        assert_eq!(dev.url().unwrap().as_str(), "http://localhost:5173/");

        let prod = LoadTarget::for_mode(ShellMode::Production, dist);
        assert_eq!(
            prod,
            LoadTarget::PackagedFile(PathBuf::from("/opt/portfolio/frontend/dist/index.html"))
        );
        #[cfg(unix)]
        assert_eq!(
            prod.url().unwrap().as_str(),
            "file:///opt/portfolio/frontend/dist/index.html"
        );
    }

    #[test]
    fn test_navigation_allows_dev_origin_and_files() {
        let policy = NavigationPolicy::default();
        assert!(policy.allows("http://localhost:5173/"));
        assert!(policy.allows("http://localhost:5173/portfolio/holdings?tab=2"));
        assert!(policy.allows("file:///opt/portfolio/frontend/dist/index.html"));
    }

    #[test]
    fn test_navigation_rejects_other_origins() {
        let policy = NavigationPolicy::default();
        assert!(!policy.allows("https://example.com/"));
        assert!(!policy.allows("http://localhost:3001/api/health"));
        assert!(!policy.allows("https://localhost:5173/"));
        assert!(!policy.allows("http://127.0.0.1:5173/"));
        assert!(!policy.allows("not a url"));
    }

    #[test]
    fn test_new_windows_are_denied() {
        let policy = NavigationPolicy::default();
        assert!(!policy.allows_new_window("http://localhost:5173/"));
        assert!(!policy.allows_new_window("https://example.com/"));
    }
}
