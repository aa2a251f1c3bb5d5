//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise `reel_relay=info,sqlx=warn`, or
//! `reel_relay=debug` with `--verbose`. Logs go to stderr so command output
//! on stdout stays clean.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "reel_relay=info,sqlx=warn";
const VERBOSE_FILTER: &str = "reel_relay=debug,sqlx=warn";

pub fn init(verbose: bool, json: bool) -> Result<()> {
    let filter = build_filter(verbose)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}

fn build_filter(verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    Ok(EnvFilter::try_new(directives)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new(VERBOSE_FILTER).is_ok());
    }
}
