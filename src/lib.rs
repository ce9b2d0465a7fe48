// Library exports for quill
// This allows integration tests and the API client to use quill modules

pub mod auth;
pub mod blog;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod feed;
pub mod routes;
pub mod state;
pub mod storage;
