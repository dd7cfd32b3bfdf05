use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// ロガー内部で発生するエラー
#[derive(Error, Debug)]
pub enum Error {
    /// 設定値が不正
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// ログディレクトリを作成できなかった
    #[error("failed to create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    /// アクティブセグメントを開けなかった
    #[error("failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to write to log file: {0}")]
    Write(#[source] io::Error),

    #[error("failed to flush log file: {0}")]
    Flush(#[source] io::Error),

    /// 標準出力や利用者指定の出力先への書き込みに失敗した
    #[error("failed to write to secondary output: {0}")]
    Secondary(#[source] io::Error),

    #[error("failed to compress {from} into {to}: {source}")]
    Archive {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to delete {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("failed to list log directory {path}: {source}")]
    ListDir { path: PathBuf, source: io::Error },

    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("failed to encode JSON record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// バックグラウンドスレッドを起動できなかった
    #[error("failed to spawn background task: {0}")]
    Spawn(#[source] io::Error),

    /// 致命的終了時の同期が制限時間内に終わらなかった
    #[error("log sync timed out after {0:?}")]
    SyncTimeout(Duration),

    #[error("log sync task terminated before reporting a result")]
    SyncAborted,

    /// `close`後に書き込もうとした
    #[error("log writer is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
