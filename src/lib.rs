//! Rolling Log Sink
//!
//! ----------------------------------------------------------------------------
//!
//! このクレートには、レベル付きのログをローカルディスクに書き込む`Logger`構造体が
//! 含まれている。`Logger`は、ホストプロセスに組み込んで使うことを目的としている。
//!
//! `Logger`は、アクティブファイル（`<file_name>.log`）が指定されたサイズを超えるとき、
//! ファイルを`<file_name>_<YYYYMMDD_HHMMSS>.log`に切り替える。圧縮を有効にした場合は
//! `<file_name>_<YYYYMMDD_HHMMSS>.log.gz`に書き出す。
//!
//! また、`Logger`は、1時間ごとにログディレクトリを走査して、残しておく最大ファイル数と
//! 保持期間を超えたファイルを古いものから削除する。アーカイブの一覧はメモリに持たない。
//!
//! `Logger`は`tracing_subscriber::fmt::MakeWriter`を実装しているので、
//! `tracing_subscriber`の出力先としても使える。
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use logroll::{Config, LogLevel, Logger};
//!
//! # fn main() -> logroll::Result<()> {
//! let config = Config::new("/var/log/myapp", "myapp")
//!     .with_max_size(10 * 1024 * 1024)
//!     .with_max_backups(5)
//!     .with_max_age(Duration::from_secs(3 * 24 * 60 * 60))
//!     .with_level(LogLevel::Info);
//! let logger = Logger::new(config)?;
//!
//! logroll::info!(logger, "listening on port {}", 8080);
//! logger.warn("cache is cold");
//! logger.close()?;
//! # Ok(())
//! # }
//! ```

mod appenders;
pub mod archive;
mod clock;
mod config;
mod encoder;
mod error;
mod level;
mod logger;
mod macros;
mod naming;
pub mod retention;
mod scheduler;
mod sink;

pub use appenders::{CleanupReport, RotatingWriter, RotationPolicy, Written};
pub use clock::Clock;
pub use config::{
    Config, ErrorHandler, DEFAULT_FILE_NAME, DEFAULT_LOG_DIR, DEFAULT_MAX_AGE,
    DEFAULT_MAX_BACKUPS, DEFAULT_MAX_SIZE, DEFAULT_SYNC_INTERVAL,
};
pub use encoder::{JsonEncoder, PlainEncoder, Record, RecordEncoder};
pub use error::{Error, Result};
pub use level::LogLevel;
pub use logger::{LogWriter, Logger, FATAL_SYNC_TIMEOUT};
pub use naming::SegmentNamer;
pub use retention::{RetentionDecision, RetentionPolicy};
pub use sink::FanOut;
