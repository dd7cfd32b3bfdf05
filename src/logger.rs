use std::{
    fmt, fs, io,
    path::PathBuf,
    process,
    sync::{
        atomic::{AtomicU8, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::{Duration, SystemTime},
};

use parking_lot::Mutex;
use tracing::Metadata;
use tracing_subscriber::fmt::MakeWriter;

use crate::{
    scheduler::{Scheduler, CLEANUP_INTERVAL},
    CleanupReport, Clock, Config, Error, ErrorHandler, JsonEncoder, LogLevel, PlainEncoder,
    Record, RecordEncoder, Result, RetentionPolicy, RotatingWriter, RotationPolicy,
    SegmentNamer,
};

/// 致命的終了時に同期を待つ最大時間
pub const FATAL_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// レベル付きのレコードをログディレクトリに書き込むロガー
///
/// 書き込み、ローテーション、同期、古いファイルの削除、クローズは、すべて1つのロックで
/// 直列化される。バックグラウンドでは、1時間ごとの削除と`sync_interval`ごとの同期の
/// 2つのタスクが動く。
///
/// 書き込みを止めずに吸収したエラーは、ロックを解放してからエラーハンドラに渡す。
/// そのため、エラーハンドラから同じロガーに書き込んでもデッドロックしない。
pub struct Logger {
    shared: Arc<Shared>,
    scheduler: Mutex<Scheduler>,
}

struct Shared {
    writer: Mutex<RotatingWriter>,
    level: AtomicU8,
    encoder: Box<dyn RecordEncoder>,
    clock: Clock,
    error_handler: ErrorHandler,
}

impl Shared {
    fn report(&self, err: &Error) {
        (self.error_handler)(err)
    }

    fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level()
    }

    /// ロックを取って`f`を実行し、解放してから溜まったエラーを報告する。
    fn with_writer<T>(&self, f: impl FnOnce(&mut RotatingWriter) -> T) -> T {
        let mut writer = self.writer.lock();
        let result = f(&mut writer);
        let pending = writer.take_pending();
        drop(writer);

        for err in &pending {
            if matches!(err, Error::Archive { .. } | Error::Rename { .. }) {
                tracing::warn!(error = %err, "rotation failed, appending to the original segment");
            }
            self.report(err);
        }

        result
    }

    fn encode(&self, level: LogLevel, message: &dyn fmt::Display) -> Result<Vec<u8>> {
        let record = Record {
            time: self.clock.now(),
            level,
            message,
        };
        let mut buf = Vec::with_capacity(128);
        self.encoder.encode(&record, &mut buf)?;

        Ok(buf)
    }

    fn append(&self, bytes: &[u8]) -> Result<usize> {
        let written = self.with_writer(|writer| writer.write(bytes))?;
        if let Some(archive) = &written.rotated {
            tracing::debug!(archive = %archive.display(), "rotated log segment");
        }

        Ok(written.bytes)
    }

    fn log(&self, level: LogLevel, message: &dyn fmt::Display) {
        if !self.enabled(level) {
            return;
        }

        let result = self
            .encode(level, message)
            .and_then(|record| self.append(&record));
        if let Err(err) = result {
            self.report(&err);
        }
    }

    fn flush(&self) -> Result<()> {
        self.with_writer(RotatingWriter::flush)
    }

    fn sync(&self) -> Result<()> {
        self.with_writer(RotatingWriter::sync)
    }

    fn cleanup(&self) -> Result<CleanupReport> {
        let report = self.with_writer(|writer| writer.cleanup(SystemTime::now()))?;
        if !report.deleted.is_empty() {
            tracing::debug!(
                deleted = report.deleted.len(),
                kept = report.kept,
                "removed old log segments"
            );
            self.log(
                LogLevel::Debug,
                &format_args!("cleaned up {} old log files", report.deleted.len()),
            );
        }

        Ok(report)
    }
}

fn default_error_handler() -> ErrorHandler {
    Arc::new(|err: &Error| eprintln!("logroll error: {err}"))
}

impl Logger {
    /// `Logger`を作成する。
    ///
    /// ログディレクトリを作成し、アクティブファイルを開き（なければ作成し）、
    /// バックグラウンドタスクを起動する。いずれかに失敗した場合はエラーを返却し、
    /// 起動済みのタスクは停止する。
    ///
    /// # 引数
    ///
    /// * config: ロガーの設定。
    ///
    /// # 戻り値
    ///
    /// `Logger`インスタンス。
    pub fn new(mut config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.log_dir).map_err(|source| Error::CreateDir {
            path: config.log_dir.clone(),
            source,
        })?;

        let clock = Clock::local();
        let mut writer = RotatingWriter::open(
            SegmentNamer::new(&config.log_dir, config.file_name.clone()),
            RotationPolicy {
                max_size: config.max_size,
                compress: config.compress,
            },
            RetentionPolicy {
                max_age: config.max_age,
                max_backups: config.max_backups,
            },
            clock,
        )?;
        if let Some(output) = config.output.take() {
            writer = writer.with_secondary(output);
        } else if config.enable_stdout {
            writer = writer.with_secondary(Box::new(io::stdout()));
        }
        let active_path = writer.active_path();

        let encoder: Box<dyn RecordEncoder> = match config.encoder.take() {
            Some(encoder) => encoder,
            None if config.json_format => Box::new(JsonEncoder),
            None => Box::new(PlainEncoder),
        };

        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            level: AtomicU8::new(config.level as u8),
            encoder,
            clock,
            error_handler: config
                .error_handler
                .take()
                .unwrap_or_else(default_error_handler),
        });

        let mut scheduler = Scheduler::new();
        let cleanup = Arc::clone(&shared);
        scheduler
            .spawn_periodic("logroll-cleanup", CLEANUP_INTERVAL, move || {
                if let Err(err) = cleanup.cleanup() {
                    cleanup.report(&err);
                }
            })
            .map_err(Error::Spawn)?;
        if let Some(interval) = config.sync_interval {
            let sync = Arc::clone(&shared);
            scheduler
                .spawn_periodic("logroll-sync", interval, move || {
                    if let Err(err) = sync.sync() {
                        sync.report(&err);
                    }
                })
                .map_err(Error::Spawn)?;
        }

        tracing::debug!(path = %active_path.display(), level = %config.level, "opened log segment");

        Ok(Self {
            shared,
            scheduler: Mutex::new(scheduler),
        })
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message)
    }

    /// 指定したレベルでレコードを書き込む。最低レベル未満の場合は整形もしない。
    ///
    /// 書き込みのエラーはエラーハンドラに渡し、呼び出し元には返却しない。
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        self.shared.log(level, &message)
    }

    /// `FATAL`のレコードを書き込み、同期してからプロセスを終了する。
    ///
    /// 書き込みと同期は別スレッドで行い、[`FATAL_SYNC_TIMEOUT`]まで待つ。
    /// ロックが解放されない場合も、時間切れを報告して終了する。
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        if let Err(err) = self.write_fatal(&message, FATAL_SYNC_TIMEOUT) {
            tracing::warn!(error = %err, "fatal record may not be durable");
            self.shared.report(&err);
        }
        process::exit(1)
    }

    fn write_fatal(&self, message: &dyn fmt::Display, timeout: Duration) -> Result<()> {
        let record = self.shared.encode(LogLevel::Fatal, message)?;
        self.run_bounded(timeout, move |shared| {
            shared.append(&record)?;
            shared.sync()
        })
    }

    /// 同期して、最大`timeout`だけ完了を待つ。
    ///
    /// 時間切れの場合は`Error::SyncTimeout`を返却する。同期そのものは別スレッドで続く。
    pub fn sync_timeout(&self, timeout: Duration) -> Result<()> {
        self.run_bounded(timeout, Shared::sync)
    }

    fn run_bounded<F>(&self, timeout: Duration, task: F) -> Result<()>
    where
        F: FnOnce(&Shared) -> Result<()> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("logroll-bounded-sync".to_string())
            .spawn(move || {
                let _ = tx.send(task(shared.as_ref()));
            })
            .map_err(Error::Spawn)?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::SyncTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::SyncAborted),
        }
    }

    pub fn set_level(&self, level: LogLevel) {
        self.shared.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self) -> LogLevel {
        self.shared.level()
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.shared.enabled(level)
    }

    /// バッファをフラッシュして、アクティブファイルをディスクに同期する。
    pub fn sync(&self) -> Result<()> {
        self.shared.sync()
    }

    /// 保持条件を満たさないアーカイブをすぐに削除する。
    pub fn cleanup(&self) -> Result<CleanupReport> {
        self.shared.cleanup()
    }

    /// サイズにかかわらずローテーションする。
    pub fn rotate(&self) -> Result<PathBuf> {
        let archive = self.shared.with_writer(RotatingWriter::rotate)?;
        tracing::debug!(archive = %archive.display(), "rotated log segment");

        Ok(archive)
    }

    pub fn active_path(&self) -> PathBuf {
        self.shared.writer.lock().active_path()
    }

    /// バックグラウンドタスクを止め、同期してアクティブファイルを閉じる。
    ///
    /// 最初に発生したエラーを返却する。2回目以降は何もしない。
    pub fn close(&self) -> Result<()> {
        self.scheduler.lock().shutdown();
        let result = self.shared.with_writer(RotatingWriter::close);
        tracing::debug!("closed log");

        result
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if self.shared.writer.lock().is_closed() {
            return;
        }
        if let Err(err) = self.close() {
            self.shared.report(&err);
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("clock", &self.shared.clock)
            .finish_non_exhaustive()
    }
}

/// `tracing_subscriber::fmt`のレイヤーから`Logger`に書き込むためのライター
///
/// 整形済みのバイト列をそのまま書き込む。最低レベル未満のイベントは捨てる。
pub struct LogWriter<'a> {
    shared: &'a Shared,
    enabled: bool,
}

impl io::Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.enabled {
            return Ok(buf.len());
        }
        self.shared.append(buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.shared.flush().map_err(io::Error::other)
    }
}

impl<'a> MakeWriter<'a> for Logger {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            shared: &self.shared,
            enabled: true,
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        LogWriter {
            shared: &self.shared,
            enabled: self.shared.enabled(LogLevel::from(*meta.level())),
        }
    }
}
