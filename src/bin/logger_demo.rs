use shopkeep_session::logger::*;

fn main() -> anyhow::Result<()> {
    let logger = Logger::new_bootstrap()?;
    trace!("bootstrap trace log");
    debug!("bootstrap debug log");
    info!(filter = %logger.current_filter()?, "bootstrap info log");

    let config = LogConfig {
        filter: "debug,shopkeep_session=trace".to_string(),
    };
    logger.reload_from_config(&config)?;
    trace!("application trace log");
    debug!("application debug log");
    info!(filter = %logger.current_filter()?, "application info log");

    let bad = LogConfig {
        filter: "=[".to_string(),
    };
    warn!(rejected = logger.reload_from_config(&bad).is_err(), "malformed filter");

    Ok(())
}
