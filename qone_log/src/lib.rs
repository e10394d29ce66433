use std::path::Path;

use anyhow::Result;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// Handle that swaps the active level filter at runtime.
pub type ReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Installed logging state. Keep it alive for the life of the process: dropping
/// it flushes and stops the background file writer.
pub struct Logging {
    handle: ReloadHandle,
    _guard: Option<WorkerGuard>,
}

impl Logging {
    /// Replace the filter, e.g. `"debug"` or `"qone_exec=trace,info"`.
    pub fn set_filter(&self, directives: &str) -> Result<()> {
        self.handle.reload(EnvFilter::try_new(directives)?)?;
        Ok(())
    }
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Initialize logging. `RUST_LOG` wins over `level` when set.
///
/// With `dir` set, events go to hourly-rolled JSON files `qone.log.*` in that
/// directory; otherwise human-readable lines go to stderr.
pub fn init(level: Level, dir: Option<&Path>) -> Result<Logging> {
    let (filter_layer, handle) = reload::Layer::new(filter(level));
    let registry = tracing_subscriber::registry().with(filter_layer);

    let guard = match dir {
        Some(dir) => {
            let file_appender = RollingFileAppender::new(Rotation::HOURLY, dir, "qone.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            registry
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .json()
                        .with_current_span(false)
                        .with_span_list(false),
                )
                .try_init()?;
            Some(guard)
        }
        None => {
            registry
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .try_init()?;
            None
        }
    };
    Ok(Logging { handle, _guard: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_changes_at_runtime() {
        let logging = init(Level::WARN, None).unwrap();

        logging.set_filter("warn").unwrap();
        assert!(!tracing::enabled!(Level::INFO));
        assert!(tracing::enabled!(Level::WARN));

        logging.set_filter("debug").unwrap();
        assert!(tracing::enabled!(Level::DEBUG));

        assert!(logging.set_filter("qone=verbose").is_err());
        assert!(tracing::enabled!(Level::DEBUG));
    }
}
