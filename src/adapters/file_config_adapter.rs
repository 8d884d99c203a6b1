//! INI file configuration adapter.
//!
//! Keys and section names are case sensitive so node ids and variable names
//! survive as written. A trailing ` ; comment` or ` # comment` is dropped.

use crate::domain::error::TradeflowError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TradeflowError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn from_string(content: &str) -> Result<Self, TradeflowError> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, file: &str) -> Result<Self, TradeflowError> {
        let mut config = Ini::new_cs();
        config
            .read(content.to_string())
            .map_err(|reason| TradeflowError::ConfigParse {
                file: file.to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }

    fn strip_inline_comment(value: &str) -> &str {
        let cut = [" ;", " #", "\t;", "\t#"]
            .iter()
            .filter_map(|marker| value.find(marker))
            .min()
            .unwrap_or(value.len());
        value[..cut].trim()
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get(section, key)
            .map(|v| Self::strip_inline_comment(&v).to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_string(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_string(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }

    fn sections(&self) -> Vec<String> {
        let mut sections = self.config.sections();
        sections.sort();
        sections
    }

    fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .config
            .get_map_ref()
            .get(section)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}
