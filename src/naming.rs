use std::path::{Path, PathBuf};

use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

use crate::Result;

/// アーカイブファイル名に埋め込むタイムスタンプの書式（`YYYYMMDD_HHMMSS`）
const ARCHIVE_STAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]");

const LOG_SUFFIX: &str = ".log";
const GZIP_SUFFIX: &str = ".gz";

/// ログディレクトリとファイル名の接頭語から、セグメントのパスを決定する。
///
/// - アクティブファイル: `<dir>/<prefix>.log`
/// - 非圧縮アーカイブ: `<dir>/<prefix>_<YYYYMMDD_HHMMSS>.log`
/// - 圧縮アーカイブ: `<dir>/<prefix>_<YYYYMMDD_HHMMSS>.log.gz`
#[derive(Debug, Clone)]
pub struct SegmentNamer {
    directory: PathBuf,
    prefix: String,
}

impl SegmentNamer {
    /// `SegmentNamer`を作成する。
    ///
    /// # 引数
    ///
    /// * directory: ログファイルを作成するディレクトリ。
    /// * prefix: ファイル名の接頭語。
    pub fn new(directory: impl AsRef<Path>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            prefix: prefix.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// アクティブファイルの名前（`<prefix>.log`）を返却する。
    pub fn active_file_name(&self) -> String {
        format!("{}{}", self.prefix, LOG_SUFFIX)
    }

    pub fn active_path(&self) -> PathBuf {
        self.directory.join(self.active_file_name())
    }

    /// アーカイブファイルの名前を作成して、返却する。
    ///
    /// 同じ秒に複数回ローテーションした場合に備えて、`sequence`が1以上のときは
    /// タイムスタンプの後ろに`_<sequence>`を付ける。
    ///
    /// # 引数
    ///
    /// * timestamp: ローテーションした時刻。
    /// * compressed: gzip圧縮する場合は`true`。
    /// * sequence: 同一秒内の通し番号。
    ///
    /// # 戻り値
    ///
    /// アーカイブファイル名。
    pub fn archive_file_name(
        &self,
        timestamp: &OffsetDateTime,
        compressed: bool,
        sequence: u32,
    ) -> Result<String> {
        let stamp = timestamp.format(ARCHIVE_STAMP)?;
        let mut name = format!("{}_{}", self.prefix, stamp);
        if sequence > 0 {
            name.push_str(&format!("_{sequence}"));
        }
        name.push_str(LOG_SUFFIX);
        if compressed {
            name.push_str(GZIP_SUFFIX);
        }

        Ok(name)
    }

    /// まだ存在しないアーカイブファイルのパスを返却する。
    ///
    /// 既存のアーカイブを上書きしないように、空いている通し番号が見つかるまで探す。
    pub fn archive_path(&self, timestamp: &OffsetDateTime, compressed: bool) -> Result<PathBuf> {
        let mut sequence = 0;
        loop {
            let path = self
                .directory
                .join(self.archive_file_name(timestamp, compressed, sequence)?);
            if !path.exists() {
                return Ok(path);
            }
            sequence += 1;
        }
    }
}
