//! 古いセグメントの検出と削除判定
//!
//! アーカイブの一覧はメモリに保持せず、毎回ディレクトリを走査して求める。
//! そのため、プロセスを再起動しても同じ判定結果になる。

use std::{
    ffi::OsStr,
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use regex::Regex;

/// ログファイル名の接頭語に一致するファイル名のパターン
///
/// `<prefix>.log`、`<prefix>_*.log`、`<prefix>_*.log.gz`に一致する。
#[derive(Debug, Clone)]
pub struct SegmentPattern(Regex);

impl SegmentPattern {
    pub fn new(prefix: &str) -> Self {
        let pattern = format!(r"^{}(?:\.log|_.*\.log(?:\.gz)?)$", regex::escape(prefix));
        Self(Regex::new(&pattern).expect(
            "Unable to build a segment name pattern; this is a bug in logroll",
        ))
    }

    pub fn is_match(&self, file_name: &str) -> bool {
        self.0.is_match(file_name)
    }
}

/// 削除候補のファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl Candidate {
    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }
}

/// ディレクトリ内のログファイルを列挙して、更新日時の新しい順に並べて返却する。
///
/// 通常のファイル以外（ディレクトリやシンボリックリンク）は対象外。
/// 更新日時が同じファイルはディレクトリの列挙順になる。
///
/// # 引数
///
/// * directory: ログディレクトリ。
/// * pattern: 対象とするファイル名のパターン。
pub fn scan(directory: &Path, pattern: &SegmentPattern) -> io::Result<Vec<Candidate>> {
    let mut candidates: Vec<Candidate> = fs::read_dir(directory)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name();
            if !pattern.is_match(name.to_str()?) {
                return None;
            }
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            let modified = metadata.modified().ok()?;
            Some(Candidate {
                path: entry.path(),
                modified,
            })
        })
        .collect();

    // 安定ソートなので同時刻のファイルは列挙順を保つ
    candidates.sort_by(|a, b| b.modified.cmp(&a.modified));

    Ok(candidates)
}

/// 1ファイルごとの判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    Keep,
    Delete,
}

/// 古いセグメントを削除する条件。`None`は無制限。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// 更新日時からの経過時間の上限
    pub max_age: Option<Duration>,
    /// アクティブファイルを除いて残すファイル数の上限
    pub max_backups: Option<usize>,
}

impl RetentionPolicy {
    /// 新しい順で`index`番目（アクティブファイルを除く、0始まり）のファイルを判定する。
    pub fn decide(&self, index: usize, age: Duration) -> RetentionDecision {
        let expired = self.max_age.is_some_and(|max_age| age > max_age);
        let surplus = self.max_backups.is_some_and(|max| index >= max);

        if expired || surplus {
            RetentionDecision::Delete
        } else {
            RetentionDecision::Keep
        }
    }

    /// 新しい順に並んだ候補それぞれについて判定する。
    ///
    /// アクティブファイルは常に対象外で、結果にも含めない。
    /// 更新日時が未来のファイルは経過時間0として扱う。
    ///
    /// # 引数
    ///
    /// * candidates: [`scan`]が返却した、新しい順の候補。
    /// * active_file_name: アクティブファイルの名前。
    /// * now: 判定の基準時刻。
    pub fn plan<'a>(
        &self,
        candidates: &'a [Candidate],
        active_file_name: &str,
        now: SystemTime,
    ) -> Vec<(&'a Candidate, RetentionDecision)> {
        candidates
            .iter()
            .filter(|candidate| candidate.file_name() != Some(OsStr::new(active_file_name)))
            .enumerate()
            .map(|(index, candidate)| {
                let age = now.duration_since(candidate.modified).unwrap_or_default();
                (candidate, self.decide(index, age))
            })
            .collect()
    }
}
