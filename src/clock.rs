use time::{OffsetDateTime, UtcOffset};

/// 固定のUTCオフセットを持つ壁時計
///
/// `time`クレートはマルチスレッド環境でローカルオフセットを取得できないことがあるため、
/// ロガー構築時に一度だけオフセットを取得して保持する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    offset: UtcOffset,
}

impl Clock {
    /// ホストのローカルオフセットを使う時計を作成する。取得できない場合はUTC。
    pub fn local() -> Self {
        Self::with_offset(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
    }

    pub fn utc() -> Self {
        Self::with_offset(UtcOffset::UTC)
    }

    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }

    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::local()
    }
}
