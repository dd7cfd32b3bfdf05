/// `DEBUG`のレコードを`format!`と同じ書式で書き込む。
///
/// ```no_run
/// # let logger = logroll::Logger::new(logroll::Config::default()).unwrap();
/// logroll::debug!(logger, "connected to {}", "db-1");
/// ```
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)+) => {
        $logger.debug(::std::format_args!($($arg)+))
    };
}

/// `INFO`のレコードを書き込む。
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)+) => {
        $logger.info(::std::format_args!($($arg)+))
    };
}

/// `WARN`のレコードを書き込む。
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)+) => {
        $logger.warn(::std::format_args!($($arg)+))
    };
}

/// `ERROR`のレコードを書き込む。
#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)+) => {
        $logger.error(::std::format_args!($($arg)+))
    };
}

/// `FATAL`のレコードを書き込み、プロセスを終了する。
#[macro_export]
macro_rules! fatal {
    ($logger:expr, $($arg:tt)+) => {
        $logger.fatal(::std::format_args!($($arg)+))
    };
}
