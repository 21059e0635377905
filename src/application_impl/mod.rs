mod auth_service_impl;
mod handle_store_file;
mod handle_store_memory;
mod reqwest_transport;
mod session_coordinator;
mod transport_fake;

pub use auth_service_impl::*;
pub use handle_store_file::*;
pub use handle_store_memory::*;
pub use reqwest_transport::*;
pub use session_coordinator::*;
pub use transport_fake::*;
