pub mod domain;
pub mod repository;

pub use domain::Username;
pub use repository::{BlogRepository, RepositoryError, SqliteBlogRepository};
