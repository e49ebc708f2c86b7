pub mod admin;
pub mod auth;
pub mod responses;
pub mod router;
pub mod state;
pub mod uploads;
pub mod users;

pub use responses::{ApiJson, ApiRejection, json_error};
pub use state::AppState;
