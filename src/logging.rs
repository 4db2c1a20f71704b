use log::LevelFilter;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender, Append},
    config::{Appender, Config, Root},
    encode::json::JsonEncoder,
};
use std::env;
use std::str::FromStr;

use anyhow::anyhow;
use once_cell::sync::OnceCell;

pub struct Logger;

pub static LOGGER_ENABLED: OnceCell<bool> = OnceCell::new();

#[macro_export]
macro_rules! logger {
    ($level:ident, $($arg:tt)+) => {
        if let Some(true) = $crate::logging::LOGGER_ENABLED.get() {
            ::log::$level!($($arg)+);
        }
    };
}

impl Logger {
    /// `RUST_LOG` でレベル、`LOG_PATH` があればファイル、なければ標準出力に JSON で出す
    pub fn init() -> Result<(), anyhow::Error> {
        let level_filter =
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))?;

        let appender: Box<dyn Append> = match env::var("LOG_PATH") {
            Ok(log_path) => Box::new(
                FileAppender::builder()
                    .append(true)
                    .encoder(Box::new(JsonEncoder::new()))
                    .build(log_path)?,
            ),
            Err(_) => Box::new(
                ConsoleAppender::builder()
                    .encoder(Box::new(JsonEncoder::new()))
                    .build(),
            ),
        };

        let config = Config::builder()
            .appender(Appender::builder().build("operator", appender))
            .build(Root::builder().appender("operator").build(level_filter))?;

        log4rs::init_config(config)?;

        LOGGER_ENABLED
            .set(true)
            .map_err(|_| anyhow!("logger is already enabled"))?;

        Ok(())
    }
}
