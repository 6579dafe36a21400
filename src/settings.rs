//! Typed view of the settings stored in `config.redb`.

use std::path::{Path, PathBuf};

use crate::{
    config_db::ConfigDb,
    data_dir::DataDir,
    dedup::DedupKey,
    error::{Error, Result},
    walker::{DEFAULT_SKIP_PATTERNS, SkipPatterns},
};

pub const METADATA_STORE: &str = "metadata_store";
pub const DICTIONARY_DIR: &str = "dictionary_dir";
pub const MODEL: &str = "model";
pub const SOURCE_LANGUAGE: &str = "source_language";
pub const DEDUP_KEY: &str = "dedup_key";
pub const SKIP_PATTERNS: &str = "skip_patterns";

/// Every recognised setting key.
pub const KEYS: &[&str] = &[
    METADATA_STORE,
    DICTIONARY_DIR,
    MODEL,
    SOURCE_LANGUAGE,
    DEDUP_KEY,
    SKIP_PATTERNS,
];

/// Value of `metadata_store` that turns the store off.
pub const STORE_DISABLED: &str = "none";

const DEFAULT_SOURCE_LANGUAGE: &str = "zh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSetting {
    /// `~/Zotero` when it exists.
    Auto,
    Disabled,
    Dir(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub metadata_store: StoreSetting,
    pub dictionary_dir: Option<PathBuf>,
    /// Only the stored value; the env var and `--model` are applied by
    /// `ModelManager::resolve`.
    pub model: Option<String>,
    pub source_language: String,
    pub dedup_key: DedupKey,
    pub skip_patterns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metadata_store: StoreSetting::Auto,
            dictionary_dir: None,
            model: None,
            source_language: DEFAULT_SOURCE_LANGUAGE.to_string(),
            dedup_key: DedupKey::default(),
            skip_patterns: DEFAULT_SKIP_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Settings {
    pub fn load(db: &ConfigDb) -> Result<Self> {
        let mut settings = Self::default();
        for key in KEYS {
            if let Some(value) = db.get_setting(key)? {
                settings.apply(key, &value)?;
            }
        }
        Ok(settings)
    }

    /// Check a key/value pair without storing it.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        Self::default().apply(key, value)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            METADATA_STORE => {
                self.metadata_store = match value {
                    "" => StoreSetting::Auto,
                    STORE_DISABLED => StoreSetting::Disabled,
                    dir => StoreSetting::Dir(PathBuf::from(dir)),
                };
            }
            DICTIONARY_DIR => {
                self.dictionary_dir = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            MODEL => {
                self.model = (!value.is_empty()).then(|| value.to_string());
            }
            SOURCE_LANGUAGE => {
                if value.is_empty() || !value.chars().all(|c| c.is_ascii_lowercase()) {
                    return Err(Error::Config(format!(
                        "invalid source language '{value}' (expected a code such as zh)"
                    )));
                }
                self.source_language = value.to_string();
            }
            DEDUP_KEY => {
                self.dedup_key = value.parse()?;
            }
            SKIP_PATTERNS => {
                let patterns: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
                SkipPatterns::new(&patterns)?;
                self.skip_patterns = patterns;
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown setting '{other}' (known: {})",
                    KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Directory holding `zotero.sqlite`, if the store is in use.
    pub fn metadata_store_dir(&self) -> Option<PathBuf> {
        match &self.metadata_store {
            StoreSetting::Disabled => None,
            StoreSetting::Dir(dir) => Some(dir.clone()),
            StoreSetting::Auto => std::env::var_os("HOME")
                .map(|home| Path::new(&home).join("Zotero"))
                .filter(|dir| dir.join("zotero.sqlite").is_file()),
        }
    }

    pub fn dictionary_dir(&self, data_dir: &DataDir) -> PathBuf {
        self.dictionary_dir
            .clone()
            .unwrap_or_else(|| data_dir.dictionary_dir())
    }

    pub fn skip(&self) -> Result<SkipPatterns> {
        SkipPatterns::new(&self.skip_patterns)
    }

    /// `(key, display value)` pairs for `config show`.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let store = match &self.metadata_store {
            StoreSetting::Auto => "auto".to_string(),
            StoreSetting::Disabled => STORE_DISABLED.to_string(),
            StoreSetting::Dir(dir) => dir.display().to_string(),
        };
        vec![
            (METADATA_STORE, store),
            (
                DICTIONARY_DIR,
                self.dictionary_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| "default".to_string()),
            ),
            (MODEL, self.model.clone().unwrap_or_else(|| "default".to_string())),
            (SOURCE_LANGUAGE, self.source_language.clone()),
            (DEDUP_KEY, self.dedup_key.strategy().name().to_string()),
            (SKIP_PATTERNS, self.skip_patterns.join(",")),
        ]
    }
}
