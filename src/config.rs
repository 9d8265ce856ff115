//! Config handling

use std::time::Duration;

use tracing::log::LevelFilter;

use crate::cli::CliOptions;
use crate::download::platform_opener;
use crate::generation::{AggregationPolicy, ClientConfig, ClientError};

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

/// Builds the service connection settings from the CLI.
pub fn client_config(cli: &CliOptions) -> Result<ClientConfig, ClientError> {
    let config = ClientConfig::new(&cli.api_url)?;
    Ok(match cli.timeout_secs {
        Some(secs) if secs > 0 => config.with_timeout(Duration::from_secs(secs)),
        _ => config,
    })
}

/// How a batch is judged: all-or-nothing unless `--allow-partial` was given.
pub fn aggregation_policy(cli: &CliOptions) -> AggregationPolicy {
    if cli.allow_partial {
        AggregationPolicy::PartialSuccess
    } else {
        AggregationPolicy::AllOrNothing
    }
}

/// Opener for remote references: the `--opener` flag, else the platform default.
pub fn opener(cli: &CliOptions) -> Option<&str> {
    cli.opener.as_deref().or(platform_opener())
}
