//! [SettingsStore] backed by a TOML file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use super::{BackupSettings, ConfigError, SettingsStore};

/// Settings stored in a TOML file.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_relative() {
            log::debug!(target: "settings", "settings path is relative: {}", path.display());
        }

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BackupSettings, ConfigError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.write_template();
                return Err(ConfigError::Missing(self.path.clone()));
            }
            Err(e) => return Err(ConfigError::Unreadable(e)),
        };

        Ok(toml::from_str(&raw)?)
    }

    /// Credentials can't be defaulted, so the template only gives the admin a starting point.
    fn write_template(&self) {
        log::debug!(
            target: "settings",
            "Writing settings template to {} because it doesn't exist yet",
            self.path.display()
        );
        let written = toml::to_string_pretty(&BackupSettings::template())
            .map_err(io::Error::other)
            .and_then(|template| fs::write(&self.path, template));
        if let Err(e) = written {
            log::warn!(
                target: "settings",
                "Writing settings template to {} failed: {e}",
                self.path.display()
            );
        }
    }

    fn write(&self, settings: &BackupSettings) -> Result<(), ConfigError> {
        let serialized = toml::to_string_pretty(settings)?;

        // replace in one step so a crash never leaves truncated settings behind
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);
        fs::write(&tmp, serialized).map_err(ConfigError::Unwritable)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ConfigError::Unwritable(e)
        })
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<BackupSettings, ConfigError> {
        let settings = self.read()?;
        settings.validate()?;
        log::trace!(target: "settings", "Loaded settings: {settings:?}");

        Ok(settings)
    }

    fn store_last_backup_time(&mut self, at: NaiveDateTime) -> Result<(), ConfigError> {
        let mut settings = self.read()?;
        if let Some(previous) = settings.last_backup_time.filter(|previous| *previous > at) {
            log::warn!(
                target: "settings",
                "Refusing to move last backup time backwards from {previous} to {at}"
            );
            return Ok(());
        }

        settings.last_backup_time = Some(at);
        self.write(&settings)?;
        log::debug!(target: "settings", "Stored last backup time: {at}");

        Ok(())
    }
}
