mod error;
mod handler;
mod router;

pub use error::{ApiErrorCode, recover_error};
pub use handler::{CookiePolicy, REFRESH_COOKIE};
pub use router::routes;
