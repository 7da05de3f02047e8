use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const PIPELINE_DIRECTIVE: &str = "dsrs_adapters=debug";
static SUBSCRIBER_INSTALLED: Mutex<bool> = Mutex::new(false);

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid tracing filter directive `{directive}`: {source}")]
    InvalidFilter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs a process-global subscriber that prints pipeline transitions,
/// requests and raw completions.
///
/// `RUST_LOG` overrides the `dsrs_adapters=debug` default; an unparsable
/// `RUST_LOG` is reported rather than ignored. Calls after the first
/// successful install return `Ok` without touching the subscriber.
pub fn init_tracing() -> Result<(), TelemetryInitError> {
    let mut installed = SUBSCRIBER_INSTALLED
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if *installed {
        return Ok(());
    }

    let directive = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(pipeline_filter(directive.as_deref())?)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    *installed = true;
    Ok(())
}

/// Builds the filter for `directive`, or for the crate default when the
/// directive is absent or blank.
fn pipeline_filter(directive: Option<&str>) -> Result<EnvFilter, TelemetryInitError> {
    let directive = directive
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(PIPELINE_DIRECTIVE);
    EnvFilter::try_new(directive).map_err(|source| TelemetryInitError::InvalidFilter {
        directive: directive.to_string(),
        source,
    })
}

/// Cuts `value` to at most `max_chars` characters, on a char boundary.
pub fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((cutoff, _)) => &value[..cutoff],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("", 3), "");
    }

    #[test]
    fn repeated_init_is_a_no_op() {
        assert!(init_tracing().is_ok());
        assert!(init_tracing().is_ok());
        tracing::debug!("subscriber installed");
    }

    #[rstest]
    #[case::absent(None, "dsrs_adapters=debug")]
    #[case::blank(Some("  "), "dsrs_adapters=debug")]
    #[case::override_(Some("dsrs_adapters=trace"), "dsrs_adapters=trace")]
    fn filter_falls_back_to_the_crate_default(#[case] directive: Option<&str>, #[case] expected: &str) {
        let filter = pipeline_filter(directive).unwrap();
        assert_eq!(filter.to_string(), EnvFilter::new(expected).to_string());
    }

    #[test]
    fn unparsable_directive_is_reported() {
        let err = pipeline_filter(Some("dsrs_adapters=loudest")).unwrap_err();
        assert!(matches!(
            &err,
            TelemetryInitError::InvalidFilter { directive, .. } if directive == "dsrs_adapters=loudest"
        ));
    }
}
