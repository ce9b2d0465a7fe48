use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::{IdentityProvider, LocalIdentity, SessionCodec};
use crate::blog::{BlogRepository, SqliteBlogRepository};
use crate::config::Config;
use crate::storage::{FsObjectStore, ObjectStore};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repo: Arc<dyn BlogRepository>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Set when accounts live in this server; mounts the `/identity` routes
    pub local_identity: Option<Arc<LocalIdentity>>,
    pub storage: Arc<dyn ObjectStore>,
    pub sessions: SessionCodec,
}

impl AppState {
    /// State backed by SQLite, local accounts and the uploads directory.
    pub fn local(pool: DbPool, config: Config) -> Self {
        let identity = Arc::new(LocalIdentity::new(pool.clone(), &config.identity));
        let storage = FsObjectStore::new(config.uploads_path(), config.storage.public_base.clone());

        Self {
            repo: Arc::new(SqliteBlogRepository::new(pool)),
            identity: identity.clone(),
            local_identity: Some(identity),
            storage: Arc::new(storage),
            sessions: SessionCodec::new(&config.auth),
            config,
        }
    }
}
