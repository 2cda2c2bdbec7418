use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Shared admission token. `None` means handshakes are accepted
    /// unconditionally.
    pub remote_control_token: Option<String>,
    pub room_auto_create_on_join: bool,
    pub allow_same_machine_remote: bool,
    pub remote_debug: bool,
    /// Local zip served by `/downloads/host-app-win.zip`.
    pub host_app_zip: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| {
                    "http://localhost:5173,http://127.0.0.1:5173".to_string()
                })
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            remote_control_token: env::var("REMOTE_CONTROL_TOKEN")
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            room_auto_create_on_join: env::var("ROOM_AUTO_CREATE_ON_JOIN")
                .map(|v| v != "0")
                .unwrap_or(true),
            allow_same_machine_remote: env::var("ALLOW_SAME_MACHINE_REMOTE")
                .map(|v| v == "1")
                .unwrap_or(false),
            remote_debug: env::var("REMOTE_DEBUG").map(|v| v == "1").unwrap_or(false),
            host_app_zip: env::var("HOST_APP_ZIP").ok().map(PathBuf::from),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
            remote_control_token: None,
            room_auto_create_on_join: true,
            allow_same_machine_remote: false,
            remote_debug: false,
            host_app_zip: None,
        }
    }
}
