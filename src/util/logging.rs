//! Console and log file output.
//!
//! Records go to the console through [env_logger]. Every record the console
//! accepts is also appended to the log file as
//! `YYYY-mm-dd HH:MM:SS [LEVEL] message`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Local};
use derive_more::{Display, Error, From};
use log::{LevelFilter, Log, Metadata, Record};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Display, Error, From)]
pub enum LoggingError {
    #[display("Opening the log file failed: {_0}")]
    #[from]
    Open(io::Error),
    #[display("Installing the logger failed: {_0}")]
    #[from]
    Install(log::SetLoggerError),
}

struct TeeLogger {
    console: env_logger::Logger,
    file: Option<Mutex<File>>,
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.console.matches(record) {
            return;
        }
        self.console.log(record);

        if let Some(file) = &self.file {
            let line = file_line(record, Local::now());
            if let Ok(mut file) = file.lock() {
                // nowhere left to report a failing log file
                let _ = writeln!(file, "{line}");
            }
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(Ok(mut file)) = self.file.as_ref().map(Mutex::lock) {
            let _ = file.flush();
        }
    }
}

fn file_line(record: &Record, now: DateTime<Local>) -> String {
    format!(
        "{} [{}] {}",
        now.format(TIMESTAMP_FORMAT),
        record.level(),
        record.args()
    )
}

/// Install the global logger.
///
/// The level defaults to `info`, `RUST_LOG` refines it and `verbose`
/// overrides the default for all targets.
pub fn init(verbose: Option<LevelFilter>, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    if let Some(level) = verbose {
        builder.filter_level(level);
    }
    let console = builder.build();
    let max_level = console.filter();

    let file = log_file
        .map(|path| OpenOptions::new().create(true).append(true).open(path))
        .transpose()?
        .map(Mutex::new);

    log::set_boxed_logger(Box::new(TeeLogger { console, file }))?;
    log::set_max_level(max_level);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use log::Level;

    #[test]
    fn file_lines_carry_timestamp_and_level() {
        let now = Local.with_ymd_and_hms(2024, 1, 5, 3, 0, 7).unwrap();

        let line = file_line(
            &Record::builder()
                .args(format_args!("Upload successful"))
                .level(Level::Warn)
                .target("remote::s3")
                .build(),
            now,
        );

        assert_eq!(line, "2024-01-05 03:00:07 [WARN] Upload successful");
    }
}
