pub mod error;
pub mod models;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod secret;
pub mod security;
pub mod service;
pub mod settings;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
pub use service::BoardService;
