//! Structured logging setup. Mirrors the host application's `log4rs`
//! configuration pattern: one rolling file appender per database name.

use std::fs;

/// Initialize logging from a `log4rs.yaml` in the working directory, if
/// present. Intended for hosts that already manage their own log4rs config.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    log4rs::init_file("log4rs.yaml", Default::default())?;
    Ok(())
}

/// Initialize logging into a database-scoped folder: `{db_name}_logs/tinydb.log`.
/// Creates the folder if missing. Safe to call once per process; a second
/// call returns an error from `log4rs::init_config` rather than panicking.
pub fn init_for_db(db_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    use log::LevelFilter;
    use log4rs::append::file::FileAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let log_dir = format!("{db_name}_logs");
    fs::create_dir_all(&log_dir)?;
    let logfile = format!("{log_dir}/tinydb.log");
    let encoder = Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}"));
    let file_appender = FileAppender::builder().encoder(encoder).build(logfile)?;
    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    Ok(())
}
