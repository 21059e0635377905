mod auth_session_store;
mod user_repo;

pub use auth_session_store::*;
pub use user_repo::*;
