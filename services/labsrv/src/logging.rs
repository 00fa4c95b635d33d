//! Logging Bootstrap
//!
//! tracing-subscriber with an environment filter. With a log directory
//! configured, output goes to a daily-rolling file through a non-blocking
//! writer; the returned guard must stay alive for the process lifetime or
//! buffered lines are lost on exit.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "labsrv.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        },
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        },
    }
}
