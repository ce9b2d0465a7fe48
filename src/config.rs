use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_SESSION_SECRET: &str = "quill-insecure-session-secret-change-me";
pub const DEFAULT_TOKEN_SECRET: &str = "quill-insecure-token-secret-change-me";

#[derive(Parser, Debug)]
#[command(name = "quill", about = "A multi-user blogging server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub api: ApiConfig,
    pub identity: IdentityConfig,
    pub feed: FeedConfig,
    pub posts: PostsConfig,
    pub media: MediaConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    /// URL prefix under which stored objects are served
    pub public_base: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
    pub session_secret: String,
    pub secure_cookie: bool,
}

/// Shared basic-auth credential required on every `/api` route.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub route_username: String,
    pub route_password: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IdentityConfig {
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    pub issuer: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub home_page_size: usize,
    pub initial_page_size: usize,
    pub page_size: usize,
    pub max_page_size: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PostsConfig {
    pub username_patch_limit: usize,
    pub heart_delete_batch: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MediaConfig {
    pub max_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            public_base: "/media".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "__session".to_string(),
            session_hours: 720,
            session_secret: DEFAULT_SESSION_SECRET.to_string(),
            secure_cookie: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            route_username: "quill".to_string(),
            route_password: "quill".to_string(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            token_secret: DEFAULT_TOKEN_SECRET.to_string(),
            token_ttl_minutes: 60,
            issuer: "quill-identity".to_string(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            home_page_size: 6,
            initial_page_size: 5,
            page_size: 1,
            max_page_size: 50,
        }
    }
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            username_patch_limit: 500,
            heart_delete_batch: 4,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli)?;
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("quill.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("uploads"));
        }

        Ok(config)
    }

    /// Config rooted at `data_dir` with every other value defaulted.
    pub fn for_data_dir(data_dir: &std::path::Path) -> Self {
        let mut config = Config::default();
        config.database.path = Some(data_dir.join("quill.db"));
        config.storage.path = Some(data_dir.join("uploads"));
        config
    }

    pub fn data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
        match cli.data_dir.clone() {
            Some(dir) => Ok(dir),
            None => dirs::home_dir()
                .map(|home| home.join(".quill"))
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory")),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("quill.db"))
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("uploads"))
    }

    /// Names of secrets still set to their built-in defaults.
    pub fn default_secrets(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.auth.session_secret == DEFAULT_SESSION_SECRET {
            names.push("auth.session_secret");
        }
        if self.identity.token_secret == DEFAULT_TOKEN_SECRET {
            names.push("identity.token_secret");
        }
        let api = ApiConfig::default();
        if self.api.route_username == api.route_username
            && self.api.route_password == api.route_password
        {
            names.push("api.route_password");
        }
        names
    }
}
