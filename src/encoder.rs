use std::{fmt, io::Write};

use serde::Serialize;
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    OffsetDateTime,
};

use crate::{LogLevel, Result};

const PLAIN_STAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

/// 出力前の1件のレコード
pub struct Record<'a> {
    pub time: OffsetDateTime,
    pub level: LogLevel,
    pub message: &'a dyn fmt::Display,
}

/// レコードをバイト列に変換する。
///
/// 実装は`buf`の末尾に、改行で終わる1行分のバイト列を追加する。
pub trait RecordEncoder: Send + Sync {
    fn encode(&self, record: &Record<'_>, buf: &mut Vec<u8>) -> Result<()>;
}

/// `[YYYY-MM-DD HH:MM:SS.mmm] [LEVEL] message`形式のテキスト
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainEncoder;

impl RecordEncoder for PlainEncoder {
    fn encode(&self, record: &Record<'_>, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(b'[');
        record.time.format_into(buf, PLAIN_STAMP)?;
        writeln!(buf, "] [{}] {}", record.level, record.message)?;

        Ok(())
    }
}

/// `time`、`level`、`message`を持つ1行1オブジェクトのJSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

#[derive(Serialize)]
struct JsonRecord<'a> {
    time: String,
    level: &'static str,
    message: &'a str,
}

impl RecordEncoder for JsonEncoder {
    fn encode(&self, record: &Record<'_>, buf: &mut Vec<u8>) -> Result<()> {
        let message = record.message.to_string();
        let json = JsonRecord {
            time: record.time.format(&Rfc3339)?,
            level: record.level.as_str(),
            message: &message,
        };
        serde_json::to_writer(&mut *buf, &json)?;
        buf.push(b'\n');

        Ok(())
    }
}
