use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::settings::{Settings, SettingsOverrides};
use crate::control::ConfigHandle;
use crate::error::Result;

/// Watches the settings file and pushes edits into a [`ConfigHandle`].
///
/// A file that fails to parse or validate is reported and ignored; the
/// loop keeps running on the last good config.
pub struct FileConfigProvider {
    path: PathBuf,
    handle: ConfigHandle,
    overrides: SettingsOverrides,
    poll: Duration,
    last_seen: Option<Stamp>,
}

/// Modification time plus length: a file caught half-written keeps its
/// mtime on coarse filesystems but not its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>, handle: ConfigHandle, overrides: SettingsOverrides) -> Self {
        let path = path.into();
        let last_seen = stamp(&path);
        Self {
            path,
            handle,
            overrides,
            poll: Duration::from_secs(2),
            last_seen,
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Re-read the file if it changed since the last look.
    ///
    /// `Ok(true)` when a new config was published.
    pub fn reload(&mut self) -> Result<bool> {
        let current = stamp(&self.path);
        if current.is_none() || current == self.last_seen {
            return Ok(false);
        }
        self.last_seen = current;

        let mut settings = Settings::load_from(&self.path)?;
        self.overrides.apply(&mut settings);
        let config = settings.to_limiter_config()?;
        if config == self.handle.current() {
            return Ok(false);
        }
        self.handle.update(config)?;
        Ok(true)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        debug!(path = %self.path.display(), "watching settings file");
        let mut interval = tokio::time::interval(self.poll);
        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.reload() {
                        Ok(true) => info!(path = %self.path.display(), "settings reloaded"),
                        Ok(false) => {}
                        Err(e) => warn!("keeping previous settings, {}", e),
                    }
                }
            }
        }
    }
}

fn stamp(path: &Path) -> Option<Stamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some(Stamp {
        modified: meta.modified().ok()?,
        len: meta.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TameError;
    use crate::limiter::LimiterConfig;

    fn temp_settings(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tame-provider-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("config.toml")
    }

    /// Rewrites the file and forces a new mtime even on coarse filesystems.
    fn rewrite(path: &Path, content: &str, provider: &mut FileConfigProvider) {
        std::fs::write(path, content).unwrap();
        provider.last_seen = None;
    }

    #[test]
    fn test_reload_publishes_changes() {
        let path = temp_settings("publish");
        Settings::default().save_to(&path).unwrap();
        let handle = ConfigHandle::new(LimiterConfig::default()).unwrap();
        let mut provider =
            FileConfigProvider::new(&path, handle.clone(), SettingsOverrides::default());

        assert!(!provider.reload().unwrap());

        rewrite(&path, "volume_cap = 0.4\n", &mut provider);
        assert!(provider.reload().unwrap());
        assert_eq!(handle.current().cap, 0.4);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_file_keeps_previous_config() {
        let path = temp_settings("invalid");
        Settings::default().save_to(&path).unwrap();
        let handle = ConfigHandle::new(LimiterConfig::default()).unwrap();
        let mut provider =
            FileConfigProvider::new(&path, handle.clone(), SettingsOverrides::default());

        rewrite(&path, "volume_cap = -2.0\n", &mut provider);
        assert!(matches!(provider.reload(), Err(TameError::InvalidConfig { .. })));
        rewrite(&path, "volume_cap = [", &mut provider);
        assert!(matches!(provider.reload(), Err(TameError::Parse(_))));
        assert_eq!(handle.current(), LimiterConfig::default());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_overrides_survive_reload() {
        let path = temp_settings("overrides");
        Settings::default().save_to(&path).unwrap();
        let handle = ConfigHandle::new(LimiterConfig::default()).unwrap();
        let overrides = SettingsOverrides { volume_cap: Some(0.3), ..Default::default() };
        let mut provider = FileConfigProvider::new(&path, handle.clone(), overrides);

        rewrite(&path, "volume_cap = 0.9\nhold_ms = 400\n", &mut provider);
        assert!(provider.reload().unwrap());
        let config = handle.current();
        assert_eq!(config.cap, 0.3);
        assert_eq!(config.hold, Duration::from_millis(400));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_partial_write_with_same_mtime_is_picked_up() {
        let path = temp_settings("partial");
        Settings::default().save_to(&path).unwrap();
        let handle = ConfigHandle::new(LimiterConfig::default()).unwrap();
        let mut provider =
            FileConfigProvider::new(&path, handle.clone(), SettingsOverrides::default());

        rewrite(&path, "volume_cap = 0.", &mut provider);
        assert!(matches!(provider.reload(), Err(TameError::Parse(_))));
        let half_written = provider.last_seen.unwrap().modified;

        // the finished file lands within the same mtime tick
        std::fs::write(&path, "volume_cap = 0.45\n").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(half_written)
            .unwrap();

        assert!(provider.reload().unwrap());
        assert_eq!(handle.current().cap, 0.45);
        let _ = std::fs::remove_file(&path);
    }
}
