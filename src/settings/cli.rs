use super::Parser;

#[derive(Parser, Debug)]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,
}

#[derive(Parser, Debug)]
pub struct DemoCli {
    #[arg(long)]
    pub settings: Option<String>,
    #[arg(long, default_value = "cashier")]
    pub username: String,
    #[arg(long, default_value = "cashier-password")]
    pub password: String,
    /// Register the account before logging in.
    #[arg(long)]
    pub register: bool,
    /// Number of concurrent calls issued after login.
    #[arg(long, default_value_t = 4)]
    pub fan_out: usize,
}
