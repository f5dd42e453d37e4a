use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use axum_extra::extract::cookie::Key;
use diesel::{
    SqliteConnection,
    r2d2::{ConnectionManager, Pool},
};
use diesel_migrations::MigrationHarness;
use serde::Deserialize;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{
    MIGRATIONS,
    auth::{
        login::{do_login, do_logout, me},
        password::do_set_password,
    },
    groups::{
        export::download_groups_not_passed,
        view::{all_groups, do_create_group, group_by_id, group_members, my_group},
    },
    presentations::{
        files::{do_upload, download},
        manage::{
            do_auto_create, do_toggle_active, do_update_description,
            do_update_feedback,
        },
        rating::do_rate_presentation,
        view::{
            active_presentations, group_presentations, my_group_presentations,
            presentation_details,
        },
    },
    state::{AppState, DbPool, tx_commit},
    storage::ObjectStore,
    students::{do_change_group, do_reset_password, list_students},
    validation::MAX_UPLOAD_BYTES,
};

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_PATH_VAR: &str = "PRESDESK_CONFIG";

/// Server configuration. Read from an optional TOML file, then overridden
/// field by field from the environment.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    /// Cookie signing and encryption key. Must be at least 64 bytes; a random
    /// key is used otherwise, which signs everyone out on restart.
    pub secret_key: Option<String>,
    pub storage_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub static_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            secret_key: None,
            storage_dir: PathBuf::from("./storage"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            static_dir: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Toml(toml::de::Error),
    BadValue { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => {
                write!(f, "could not read {}: {e}", path.display())
            }
            ConfigError::Toml(e) => write!(f, "invalid configuration file: {e}"),
            ConfigError::BadValue { var, value } => {
                write!(f, "invalid value for `{var}`: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn load() -> Result<Config, ConfigError> {
        let file = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::Io(path, e))?;
                Some(text)
            }
            Err(_) => None,
        };

        Config::from_sources(file.as_deref(), |var| std::env::var(var).ok())
    }

    /// Builds a configuration from the text of a TOML file (if any) and an
    /// environment lookup. Environment values win.
    pub fn from_sources(
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Config, ConfigError> {
        let mut config = match file {
            Some(text) => toml::from_str(text).map_err(ConfigError::Toml)?,
            None => Config::default(),
        };

        if let Some(url) = env("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(secret) = env("SECRET_KEY") {
            config.secret_key = Some(secret);
        }
        if let Some(dir) = env("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(addr) = env("BIND_ADDR") {
            config.bind_addr =
                addr.parse().map_err(|_| ConfigError::BadValue {
                    var: "BIND_ADDR",
                    value: addr.clone(),
                })?;
        }
        if let Some(dir) = env("STATIC_DIR") {
            config.static_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    pub fn key(&self) -> Key {
        make_key(self.secret_key.as_deref())
    }
}

pub fn make_key(secret: Option<&str>) -> Key {
    match secret {
        Some(secret) if secret.len() >= 64 => Key::from(secret.as_bytes()),
        Some(_) => {
            tracing::warn!(
                "SECRET_KEY is shorter than 64 bytes; using a random key instead"
            );
            Key::generate()
        }
        None => {
            tracing::warn!("SECRET_KEY is not set; sessions will not survive a restart");
            Key::generate()
        }
    }
}

/// Opens the database pool and brings the schema up to date. An in-memory
/// database only exists per connection, so it gets a pool of one.
pub fn make_pool(database_url: &str) -> Result<DbPool, Box<dyn std::error::Error + Send + Sync>> {
    tracing::info!("Using database at {database_url}");

    let pool: DbPool = Pool::builder()
        .max_size(if database_url == ":memory:" { 1 } else { 10 })
        .build(ConnectionManager::<SqliteConnection>::new(database_url))?;

    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)?;

    Ok(pool)
}

pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/login", post(do_login))
        .route("/logout", post(do_logout))
        .route("/me", get(me))
        .route("/set-password", post(do_set_password))
        .route("/students", get(list_students))
        .route("/students/:id/reset-password", post(do_reset_password))
        .route("/students/:id/group", put(do_change_group))
        .route("/groups", post(do_create_group))
        .route("/groups/my-group", get(my_group))
        .route("/groups/all-group", get(all_groups))
        .route("/groups/group/:group_id", get(group_by_id))
        .route("/groups/members/:group_id", get(group_members))
        .route("/groups/not-passed", get(download_groups_not_passed))
        .route(
            "/groups/not-passed/download",
            get(download_groups_not_passed),
        )
        .route("/presentations/active", get(active_presentations))
        .route("/presentations/my-group", get(my_group_presentations))
        .route("/presentations/group/:group_id", get(group_presentations))
        .route("/presentations/group/:group_id/auto", post(do_auto_create))
        .route("/presentations/details/:id", get(presentation_details))
        .route("/presentations/:id/rate", post(do_rate_presentation))
        .route("/presentations/:id/description", put(do_update_description))
        .route("/presentations/:id/feedback", put(do_update_feedback))
        .route("/presentations/:id/toggle-active", put(do_toggle_active))
        .route("/presentations/:id/download", get(download))
        .route(
            "/upload-ppt",
            // multipart framing on top of the largest accepted file
            post(do_upload)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024)),
        );

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn(tx_commit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The full application: the API plus, if configured, the static client.
pub fn make_app(config: &Config) -> Result<Router, Box<dyn std::error::Error + Send + Sync>> {
    let state = AppState {
        pool: make_pool(&config.database_url)?,
        key: config.key(),
        storage: ObjectStore::new(&config.storage_dir),
    };

    let app = create_app(state);
    Ok(match &config.static_dir {
        Some(dir) => serve_static(app, dir),
        None => app,
    })
}

fn serve_static(app: Router, dir: &Path) -> Router {
    tracing::info!("Serving static files from {}", dir.display());
    app.fallback_service(ServeDir::new(dir))
}
