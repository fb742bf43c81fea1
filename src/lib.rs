pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod leaves;
pub mod mailer;
pub mod models;
pub mod notifications;
pub mod push;
pub mod routes;
pub mod schema;
pub mod signing;
pub mod state;
pub mod storage;
pub mod types;
pub mod utils {
    pub mod json;
}
pub mod workers;

pub use workers::{default_handlers, Worker};
