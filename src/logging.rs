use std::path::Path;

use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Could not create log file {}: {reason}", .path.display())]
    LogFile {
        path: std::path::PathBuf,
        reason: String,
    },
    #[error("Invalid logging configuration: {0}")]
    Config(String),
    #[error("A logger was already initialized")]
    AlreadyInitialized,
}

/// Log to stderr at `level` and, if `log_file` is given, to that file at DEBUG or finer.
///
/// Any existing log file is overwritten.
pub fn init_logging(level: log::LevelFilter, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] in {M})} - {m}{n}",
        )))
        .target(Target::Stderr)
        .build();

    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");
    let mut root_level = level;

    if let Some(path) = log_file {
        let file_level = level.max(log::LevelFilter::Debug);
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "{d(%Y-%m-%d %H:%M:%S)} [{l}] from line {L} in {M} - {m}{n}",
            )))
            .append(false)
            .build(path)
            .map_err(|e| LoggingError::LogFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        builder = builder.appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(file_level)))
                .build("file", Box::new(file)),
        );
        root = root.appender("file");
        root_level = file_level;
    }

    let config = builder
        .build(root.build(root_level))
        .map_err(|e| LoggingError::Config(e.to_string()))?;

    log4rs::init_config(config).map_err(|_| LoggingError::AlreadyInitialized)?;
    Ok(())
}
