//! Tracing setup
//!
//! One global subscriber writing to stderr. `BRANCHLINE_LOG` overrides the
//! configured filter.

use crate::config::LoggingConfig;
use crate::error::LoggingError;
use tracing_subscriber::filter::Filtered;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Environment variable that overrides `LoggingConfig::filter`
pub const LOG_ENV_VAR: &str = "BRANCHLINE_LOG";

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;
type BranchlineSubscriber = Layered<Filtered<OutputLayer, EnvFilter, Registry>, Registry>;

/// Install the global tracing subscriber
///
/// # Errors
/// - `LoggingError::Filter` if the configured filter does not parse
/// - `LoggingError::Init` if a global subscriber is already installed
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    build_subscriber(config, std::io::stderr)?.try_init()?;
    Ok(())
}

// The filter sits on the output layer itself so events below it never
// reach the writer.
fn build_subscriber<W>(
    config: &LoggingConfig,
    writer: W,
) -> Result<BranchlineSubscriber, LoggingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = build_filter(config)?;
    let output = build_output_layer(config.json, writer).with_filter(filter);
    Ok(Registry::default().with(output))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_env(LOG_ENV_VAR) {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::builder().parse(&config.filter)?),
    }
}

fn build_output_layer<W>(json: bool, writer: W) -> OutputLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(writer)
                .with_target(true),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured_output(config: &LoggingConfig) -> String {
        let capture = Capture::default();
        let sink = capture.clone();
        let subscriber = build_subscriber(config, move || sink.clone()).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("page drafted");
            tracing::error!("rewrite failed");
        });
        capture.contents()
    }

    #[test]
    fn rejects_bad_filter() {
        let config = LoggingConfig {
            filter: "branchline=notalevel".to_string(),
            json: false,
        };
        if std::env::var_os(LOG_ENV_VAR).is_none() {
            assert!(matches!(build_filter(&config), Err(LoggingError::Filter(_))));
        }
    }

    #[test]
    fn events_below_filter_are_not_written() {
        if std::env::var_os(LOG_ENV_VAR).is_some() {
            return;
        }
        let output = captured_output(&LoggingConfig {
            filter: "error".to_string(),
            json: false,
        });
        assert!(!output.contains("page drafted"), "{output}");
        assert!(output.contains("rewrite failed"), "{output}");
    }

    #[test]
    fn json_output_honours_filter() {
        if std::env::var_os(LOG_ENV_VAR).is_some() {
            return;
        }
        let output = captured_output(&LoggingConfig {
            filter: "error".to_string(),
            json: true,
        });
        assert!(!output.contains("page drafted"), "{output}");
        assert!(output.contains("\"rewrite failed\""), "{output}");
    }

    #[test]
    fn second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(LoggingError::Init(_))));
    }
}
