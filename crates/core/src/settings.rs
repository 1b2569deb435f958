use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::columns::{PseudoColumns, ROW_NUMBER_COLUMN};
use crate::edit_session::ApplyPolicy;
use crate::sql_render::SqlDialect;

pub const CONFIG_DIR_ENV: &str = "TABLEDIT_CONFIG_DIR";

pub const DEFAULT_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disabled,
    #[default]
    Prefer,
    Require,
    VerifyIdentity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    EnvVar,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tls_mode: TlsMode,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub keyring_service: Option<String>,
    #[serde(default)]
    pub keyring_account: Option<String>,
    #[serde(default)]
    pub tls_ca_cert_path: Option<String>,
    #[serde(default)]
    pub tls_client_cert_path: Option<String>,
    #[serde(default)]
    pub tls_client_key_path: Option<String>,
    #[serde(default)]
    pub tls_accept_invalid_certs: bool,
    /// Read-only profiles can browse and plan but never apply edits.
    #[serde(default)]
    pub read_only: bool,
}

fn default_port() -> u16 {
    3306
}

impl ConnectionProfile {
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: default_port(),
            user: user.into(),
            database: None,
            tls_mode: TlsMode::Prefer,
            password_source: PasswordSource::EnvVar,
            keyring_service: None,
            keyring_account: None,
            tls_ca_cert_path: None,
            tls_client_cert_path: None,
            tls_client_key_path: None,
            tls_accept_invalid_certs: false,
            read_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EditorSettings {
    pub dialect: SqlDialect,
    pub pseudo_columns: Vec<String>,
    pub apply_policy: ApplyPolicy,
    pub page_size: usize,
    pub audit: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::MySql,
            pseudo_columns: vec![ROW_NUMBER_COLUMN.to_string()],
            apply_policy: ApplyPolicy::StopOnFirstFailure,
            page_size: DEFAULT_PAGE_SIZE,
            audit: true,
        }
    }
}

impl EditorSettings {
    #[must_use]
    pub fn pseudo_columns(&self) -> PseudoColumns {
        PseudoColumns::from_names(self.pseudo_columns.iter().cloned())
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    editor: EditorSettings,
    #[serde(default)]
    profiles: Vec<ConnectionProfile>,
}

impl SettingsDocument {
    fn normalize(&mut self) {
        let mut by_name = BTreeMap::new();
        for profile in self.profiles.drain(..) {
            by_name.insert(profile.name.clone(), profile);
        }
        self.profiles = by_name.into_values().collect();
        if self.editor.page_size == 0 {
            self.editor.page_size = DEFAULT_PAGE_SIZE;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
    editor: EditorSettings,
    profiles: Vec<ConnectionProfile>,
}

impl FileSettings {
    pub fn load_default() -> Result<Self, SettingsError> {
        Self::load_from_path(default_settings_path()?)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file missing, using defaults");
            return Ok(Self {
                path,
                editor: EditorSettings::default(),
                profiles: Vec::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;

        let mut doc: SettingsDocument = if raw.trim().is_empty() {
            SettingsDocument::default()
        } else {
            toml::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?
        };
        doc.normalize();

        Ok(Self {
            path,
            editor: doc.editor,
            profiles: doc.profiles,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn editor(&self) -> &EditorSettings {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut EditorSettings {
        &mut self.editor
    }

    #[must_use]
    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    pub fn upsert_profile(&mut self, profile: ConnectionProfile) {
        if let Some(existing) = self
            .profiles
            .iter_mut()
            .find(|existing| existing.name == profile.name)
        {
            *existing = profile;
        } else {
            self.profiles.push(profile);
            self.profiles.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        }
    }

    #[must_use]
    pub fn delete_profile(&mut self, name: &str) -> bool {
        let original_len = self.profiles.len();
        self.profiles.retain(|profile| profile.name != name);
        self.profiles.len() != original_len
    }

    pub fn persist(&self) -> Result<(), SettingsError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SettingsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = SettingsDocument {
            editor: self.editor.clone(),
            profiles: self.profiles.clone(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| SettingsError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    if let Some(custom) = env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(custom).join("settings.toml"));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("tabledit").join("settings.toml"))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{ConnectionProfile, EditorSettings, FileSettings, PasswordSource, TlsMode};
    use crate::columns::ROW_NUMBER_COLUMN;
    use crate::edit_session::ApplyPolicy;
    use crate::sql_render::SqlDialect;

    #[test]
    fn missing_file_loads_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let settings = FileSettings::load_from_path(temp_dir.path().join("settings.toml"))
            .expect("failed to load settings");

        assert!(settings.profiles().is_empty());
        assert_eq!(settings.editor(), &EditorSettings::default());
        assert!(settings.editor().pseudo_columns().contains(ROW_NUMBER_COLUMN));
    }

    #[test]
    fn parses_editor_section_and_deduplicates_profiles() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r##"
[editor]
dialect = "postgres"
pseudo_columns = ["#", "_rowid"]
apply_policy = "continue_on_failure"
page_size = 0

[[profiles]]
name = "staging"
host = "db.internal"
user = "editor"

[[profiles]]
name = "local"
host = "127.0.0.1"
user = "root"
password_source = "keyring"

[[profiles]]
name = "staging"
host = "db2.internal"
user = "editor"
port = 3307
read_only = true
"##,
        )
        .expect("failed to write settings");

        let settings = FileSettings::load_from_path(&path).expect("failed to load settings");
        let editor = settings.editor();
        assert_eq!(editor.dialect, SqlDialect::Postgres);
        assert_eq!(editor.apply_policy, ApplyPolicy::ContinueOnFailure);
        assert_eq!(editor.page_size, 200);
        assert!(editor.pseudo_columns().contains("_rowid"));
        assert!(!editor.pseudo_columns().contains(ROW_NUMBER_COLUMN));

        let names = settings
            .profiles()
            .iter()
            .map(|profile| profile.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["local", "staging"]);
        let staging = settings.profile("staging").expect("staging profile");
        assert_eq!(staging.host, "db2.internal");
        assert_eq!(staging.port, 3307);
        assert!(staging.read_only);
        let local = settings.profile("local").expect("local profile");
        assert_eq!(local.port, 3306);
        assert_eq!(local.password_source, PasswordSource::Keyring);
    }

    #[test]
    fn upsert_persist_reload_and_delete_profile() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = FileSettings::load_from_path(&path).expect("failed to load settings");
        let mut profile = ConnectionProfile::new("local", "127.0.0.1", "root");
        profile.database = Some("app".to_string());
        profile.tls_mode = TlsMode::Require;
        settings.upsert_profile(profile.clone());
        settings.editor_mut().dialect = SqlDialect::Sqlite;
        settings.persist().expect("failed to persist settings");

        let mut reloaded = FileSettings::load_from_path(&path).expect("failed to reload");
        assert_eq!(reloaded.profile("local"), Some(&profile));
        assert_eq!(reloaded.editor().dialect, SqlDialect::Sqlite);

        assert!(reloaded.delete_profile("local"));
        assert!(!reloaded.delete_profile("local"));
        reloaded.persist().expect("failed to persist deletion");

        let reloaded = FileSettings::load_from_path(path).expect("failed final reload");
        assert!(reloaded.profiles().is_empty());
    }
}
