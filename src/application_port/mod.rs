mod auth_service;
mod handle_store;
mod session;
mod transport;

pub use auth_service::*;
pub use handle_store::*;
pub use session::*;
pub use transport::*;
