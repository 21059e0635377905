mod envelope;
mod token;
mod user;

pub use envelope::*;
pub use token::*;
pub use user::*;
