mod auth;
mod users;

pub use users::{add_certificate, record_download, update_user_password};
