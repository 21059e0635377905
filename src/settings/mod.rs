//! TOML settings loaded through `config`, with the file path taken from the
//! command line. See `bin/settings_demo.rs` for manual verification.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
