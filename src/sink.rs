use std::io::{self, Write};

/// 主ファイル以外の出力先の集合
///
/// 書き込むたびに登録順にすべての出力先に同じバイト列を渡す。
/// 1つの出力先が失敗しても残りの出力先には書き込み、失敗は呼び出し側に返却する。
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn Write + Send>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn Write + Send>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// すべての出力先に`buf`を書き込み、失敗したものの一覧を返却する。
    pub fn write_all(&mut self, buf: &[u8]) -> Vec<io::Error> {
        self.sinks
            .iter_mut()
            .filter_map(|sink| sink.write_all(buf).err())
            .collect()
    }

    pub fn flush(&mut self) -> Vec<io::Error> {
        self.sinks
            .iter_mut()
            .filter_map(|sink| sink.flush().err())
            .collect()
    }
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOut")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
