use std::fs::{create_dir_all, metadata};

use fern::{
    colors::{Color, ColoredLevelConfig},
    DateBased, Dispatch,
};
use log::LevelFilter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error(transparent)]
    LogError(#[from] log::SetLoggerError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Install the process-wide logger.
///
/// Records go to stdout and, when `path` is given, to a file per day inside
/// that directory. The core only uses the `log` facade, so calling this is
/// left to the host process.
pub fn init_logger(level: LevelFilter, path: Option<&str>) -> Result<(), LoggerInitError> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::BrightBlack);

    let stdout = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] - ({}) - {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                colors.color(record.level()),
                record.file_static().unwrap_or("*"),
                message
            ))
        })
        .chain(std::io::stdout());

    let mut logger = Dispatch::new().level(level).chain(stdout);
    if let Some(path) = path {
        if metadata(path).is_err() {
            create_dir_all(path)?;
        }

        logger = logger.chain(
            Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "{} [{}] - ({}) - {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        record.level(),
                        record.file_static().unwrap_or("*"),
                        message
                    ))
                })
                .chain(DateBased::new(path, "%Y-%m-%d-pixcast.log")),
        );
    }

    logger.apply()?;
    Ok(())
}

/// Route panic messages to the logger, so that they end up in the log file
/// too.
pub fn enable_panic_logger() {
    std::panic::set_hook(Box::new(|info| {
        log::error!(
            "panic: location={:?}, message={:?}, thread={:?}",
            info.location(),
            info.payload()
                .downcast_ref::<&str>()
                .map(|it| Some(it.to_string()))
                .unwrap_or_else(|| info.payload().downcast_ref::<String>().cloned()),
            std::thread::current().name(),
        );
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_is_installed_once() {
        let path = std::env::temp_dir().join(format!("pixcast-logger-{}", std::process::id()));
        let path = path.to_str().unwrap();

        init_logger(LevelFilter::Debug, Some(path)).unwrap();
        log::info!("logger test");
        assert!(metadata(path).unwrap().is_dir());

        assert!(matches!(
            init_logger(LevelFilter::Debug, None),
            Err(LoggerInitError::LogError(_))
        ));

        std::fs::remove_dir_all(path).unwrap();
    }
}
