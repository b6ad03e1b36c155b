use std::path::PathBuf;

use chrono_tz::Tz;
use rusqlite::Connection;
use serde::Deserialize;

use crate::config::AttendConfig;
use crate::session::Session;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub session: Option<Session>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: AttendConfig,
    /// Reference time zone for the open workspace.
    pub tz: Tz,
}

impl AppState {
    pub fn new(config: AttendConfig, tz: Tz) -> Self {
        Self {
            workspace: None,
            db: None,
            config,
            tz,
        }
    }
}
