//! Database location resolution.

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const DEFAULT_DB_FILE: &str = "observations.db";

/// Where the observation store lives.
#[derive(Debug, Clone)]
pub struct Config {
    database: PathBuf,
}

impl Config {
    /// `--database` wins, then `DATABASE_URL`, then the platform data dir.
    pub fn resolve(database: Option<PathBuf>) -> Result<Self> {
        let env = std::env::var(DATABASE_URL_ENV).ok();
        Self::resolve_from(database, env.as_deref())
    }

    pub fn resolve_from(database: Option<PathBuf>, database_url: Option<&str>) -> Result<Self> {
        let database = match (database, clean_env(database_url)) {
            (Some(path), _) => path,
            (None, Some(url)) => sqlite_path(url)?,
            (None, None) => default_database()?,
        };

        if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
        Ok(Self { database })
    }

    pub fn database(&self) -> &Path {
        &self.database
    }
}

/// Hosting dashboards mask secrets (`rwxp••••`); such values are unusable.
pub fn clean_env(value: Option<&str>) -> Option<&str> {
    let value = value?.trim();
    if value.is_empty() || value.contains("••••") || value.contains('…') {
        return None;
    }
    Some(value)
}

fn sqlite_path(url: &str) -> Result<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if path.contains("://") {
        bail!("{} must point at a SQLite database, got '{}'", DATABASE_URL_ENV, url);
    }
    if path.is_empty() {
        bail!("{} has an empty SQLite path", DATABASE_URL_ENV);
    }
    Ok(PathBuf::from(path))
}

fn default_database() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "jwst-archive")
        .context("Could not determine data directory")?;
    Ok(proj_dirs.data_dir().join(DEFAULT_DB_FILE))
}
