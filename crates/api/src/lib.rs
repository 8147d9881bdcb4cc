//! HTTP API layer for the query engine.

pub mod extractors;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::{
    website_directory, AppState, DomainCache, InMemoryWebsiteDirectory, RemoteWebsiteDirectory,
    WebsiteDirectory,
};
