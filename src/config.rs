use std::{
    fmt,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{Error, LogLevel, RecordEncoder, Result};

/// 内部エラーを受け取るコールバック
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const DEFAULT_FILE_NAME: &str = "myapp";
pub const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_MAX_BACKUPS: usize = 10;
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(100);

/// ロガーの設定
///
/// 構築後は変更されない。無制限を表す値は`None`で指定する。
/// `with_*`メソッドに`0`を渡した場合も無制限として扱う。
pub struct Config {
    /// ログファイルを作成するディレクトリ
    pub log_dir: PathBuf,
    /// ログファイル名の接頭語
    pub file_name: String,
    /// 1ファイルの最大サイズ（バイト）
    pub max_size: Option<u64>,
    /// アーカイブを残す期間
    pub max_age: Option<Duration>,
    /// 残すアーカイブの最大数
    pub max_backups: Option<usize>,
    /// 出力する最低レベル
    pub level: LogLevel,
    /// 標準出力にも出力する
    pub enable_stdout: bool,
    /// 定期的に同期する間隔
    pub sync_interval: Option<Duration>,
    /// ローテーションしたファイルをgzip圧縮する
    pub compress: bool,
    /// JSON形式で出力する
    pub json_format: bool,
    pub(crate) output: Option<Box<dyn Write + Send>>,
    pub(crate) error_handler: Option<ErrorHandler>,
    pub(crate) encoder: Option<Box<dyn RecordEncoder>>,
}

impl Config {
    /// 既定値から、ディレクトリとファイル名の接頭語だけを変えた設定を作成する。
    pub fn new(log_dir: impl AsRef<Path>, file_name: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.as_ref().to_path_buf(),
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = (bytes > 0).then_some(bytes);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = (!max_age.is_zero()).then_some(max_age);
        self
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = (max_backups > 0).then_some(max_backups);
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_stdout(mut self, enable: bool) -> Self {
        self.enable_stdout = enable;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_json_format(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }

    /// 追加の出力先を指定する。指定した場合は`enable_stdout`より優先する。
    pub fn with_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.output = Some(Box::new(output));
        self
    }

    /// 内部エラーのコールバックを指定する。未指定の場合は標準エラー出力に書き出す。
    pub fn with_error_handler(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// レコードの変換方法を指定する。指定した場合は`json_format`より優先する。
    pub fn with_encoder(mut self, encoder: impl RecordEncoder + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    /// 設定値を検証する。
    pub fn validate(&self) -> Result<()> {
        if self.file_name.is_empty() {
            return Err(Error::InvalidConfig("file name must not be empty".to_string()));
        }
        if self.file_name.contains(['/', '\\']) {
            return Err(Error::InvalidConfig(format!(
                "file name must not contain a path separator: {}",
                self.file_name
            )));
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "log directory must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            file_name: DEFAULT_FILE_NAME.to_string(),
            max_size: Some(DEFAULT_MAX_SIZE),
            max_age: Some(DEFAULT_MAX_AGE),
            max_backups: Some(DEFAULT_MAX_BACKUPS),
            level: LogLevel::Info,
            enable_stdout: false,
            sync_interval: Some(DEFAULT_SYNC_INTERVAL),
            compress: true,
            json_format: false,
            output: None,
            error_handler: None,
            encoder: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("log_dir", &self.log_dir)
            .field("file_name", &self.file_name)
            .field("max_size", &self.max_size)
            .field("max_age", &self.max_age)
            .field("max_backups", &self.max_backups)
            .field("level", &self.level)
            .field("enable_stdout", &self.enable_stdout)
            .field("sync_interval", &self.sync_interval)
            .field("compress", &self.compress)
            .field("json_format", &self.json_format)
            .field("output", &self.output.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(PathBuf::from("./logs"), config.log_dir);
        assert_eq!("myapp", config.file_name);
        assert_eq!(Some(100 * 1024 * 1024), config.max_size);
        assert_eq!(Some(Duration::from_secs(604_800)), config.max_age);
        assert_eq!(Some(10), config.max_backups);
        assert_eq!(LogLevel::Info, config.level);
        assert_eq!(Some(Duration::from_millis(100)), config.sync_interval);
        assert!(config.compress);
        assert!(!config.json_format);
        assert!(!config.enable_stdout);
    }

    #[test]
    fn test_zero_means_unlimited() {
        let config = Config::new("/tmp/logs", "app")
            .with_max_size(0)
            .with_max_age(Duration::ZERO)
            .with_max_backups(0)
            .with_sync_interval(Duration::ZERO);

        assert_eq!(None, config.max_size);
        assert_eq!(None, config.max_age);
        assert_eq!(None, config.max_backups);
        assert_eq!(None, config.sync_interval);
    }

    #[test]
    fn test_validate_rejects_bad_file_names() {
        assert!(Config::new("/tmp/logs", "app").validate().is_ok());
        assert!(matches!(
            Config::new("/tmp/logs", "").validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::new("/tmp/logs", "nested/app").validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::new("", "app").validate(),
            Err(Error::InvalidConfig(_))
        ));
    }
}
