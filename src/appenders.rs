use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    mem,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{
    archive,
    retention::{self, RetentionDecision, RetentionPolicy, SegmentPattern},
    sink::FanOut,
    Clock, Error, Result, SegmentNamer,
};

/// ファイルを切り替える条件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationPolicy {
    /// 1ファイルの最大サイズ（バイト）。`None`は無制限。
    pub max_size: Option<u64>,
    /// 切り替えたファイルをgzip圧縮する
    pub compress: bool,
}

/// 1回の書き込みの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    /// 主ファイルに書き込んだバイト数
    pub bytes: usize,
    /// 書き込みの前にローテーションした場合、そのアーカイブのパス
    pub rotated: Option<PathBuf>,
}

/// 古いセグメントの削除結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<PathBuf>,
    pub kept: usize,
}

/// 書き込み中のファイル
struct ActiveSegment {
    file: BufWriter<File>,
    /// 開いてから書き込んだバイト数。開いた時点の既存ファイルのサイズから始まる。
    size: u64,
}

impl ActiveSegment {
    fn open(path: &Path) -> Result<Self> {
        let open_error = |source| Error::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = create_writer(path).map_err(open_error)?;
        let size = file.metadata().map_err(open_error)?.len();

        Ok(Self {
            file: BufWriter::new(file),
            size,
        })
    }

    /// `buf`を書き込む。途中で失敗した場合も、書き込めた分だけサイズに加算する。
    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        let result = loop {
            if written == buf.len() {
                break Ok(written);
            }
            match self.file.write(&buf[written..]) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };
        self.size += written as u64;

        result
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()
    }
}

/// サイズでファイルを切り替えながら、ログディレクトリに書き込むライター
///
/// 排他制御は行わない。書き込み、ローテーション、同期、削除、クローズは
/// 呼び出し側が1つのロックで直列化する。
///
/// 書き込みを止めずに吸収したエラー（ローテーション中のフラッシュ失敗、追加の出力先の失敗、
/// ファイルごとの削除失敗）は内部に溜め、[`RotatingWriter::take_pending`]で取り出す。
pub struct RotatingWriter {
    namer: SegmentNamer,
    pattern: SegmentPattern,
    rotation: RotationPolicy,
    retention: RetentionPolicy,
    clock: Clock,
    active: Option<ActiveSegment>,
    secondary: FanOut,
    pending: Vec<Error>,
    closed: bool,
}

impl RotatingWriter {
    /// アクティブファイルを開いて（なければ作成して）、`RotatingWriter`を作成する。
    ///
    /// # 引数
    ///
    /// * namer: セグメントのパスを決めるもの。
    /// * rotation: ファイルを切り替える条件。
    /// * retention: 古いファイルを削除する条件。
    /// * clock: アーカイブ名のタイムスタンプに使う時計。
    ///
    /// # 戻り値
    ///
    /// `RotatingWriter`インスタンス。アクティブファイルを開けない場合はエラー。
    pub fn open(
        namer: SegmentNamer,
        rotation: RotationPolicy,
        retention: RetentionPolicy,
        clock: Clock,
    ) -> Result<Self> {
        let active = ActiveSegment::open(&namer.active_path())?;
        let pattern = SegmentPattern::new(namer.prefix());

        Ok(Self {
            namer,
            pattern,
            rotation,
            retention,
            clock,
            active: Some(active),
            secondary: FanOut::new(),
            pending: Vec::new(),
            closed: false,
        })
    }

    /// 主ファイルと同じバイト列を書き込む出力先を追加する。
    pub fn with_secondary(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.secondary.push(sink);
        self
    }

    pub fn namer(&self) -> &SegmentNamer {
        &self.namer
    }

    pub fn active_path(&self) -> PathBuf {
        self.namer.active_path()
    }

    /// アクティブファイルのサイズ。ファイルを開いていない場合は`None`。
    pub fn current_size(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.size)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 溜まっているエラーを取り出す。
    pub fn take_pending(&mut self) -> Vec<Error> {
        mem::take(&mut self.pending)
    }

    /// レコードを書き込む。
    ///
    /// 書き込むとファイルの最大サイズを超える場合は、書き込む前にローテーションする。
    /// ローテーションに失敗した場合はエラーを溜め、元のファイルに書き込みを続ける。
    /// 追加の出力先への書き込みは、主ファイルの成否にかかわらず行う。
    pub fn write(&mut self, record: &[u8]) -> Result<Written> {
        if self.closed {
            return Err(Error::Closed);
        }

        let mut rotated = None;
        if self.ensure_active().is_ok() && self.should_rotate(record.len()) {
            match self.rotate() {
                Ok(path) => rotated = Some(path),
                Err(err) => self.pending.push(err),
            }
        }

        let primary = self
            .ensure_active()
            .and_then(|active| active.append(record).map_err(Error::Write));

        for err in self.secondary.write_all(record) {
            self.pending.push(Error::Secondary(err));
        }

        Ok(Written {
            bytes: primary?,
            rotated,
        })
    }

    fn ensure_active(&mut self) -> Result<&mut ActiveSegment> {
        let active = match self.active.take() {
            Some(active) => active,
            None => ActiveSegment::open(&self.namer.active_path())?,
        };

        Ok(self.active.insert(active))
    }

    /// 空のファイルはローテーションしない。
    fn should_rotate(&self, len: usize) -> bool {
        match (&self.active, self.rotation.max_size) {
            (Some(active), Some(max_size)) => {
                active.size > 0 && active.size.saturating_add(len as u64) > max_size
            }
            _ => false,
        }
    }

    /// アクティブファイルを閉じてアーカイブし、新しいアクティブファイルを開く。
    ///
    /// 1. バッファをフラッシュして同期する。失敗しても続行する。
    /// 2. ファイルを閉じる。
    /// 3. 圧縮する場合はgzipファイルに書き出して元のファイルを削除し、
    ///    圧縮しない場合はアーカイブ名に変更する。
    /// 4. アクティブファイルを開き直す。
    ///
    /// 3に失敗した場合は元のファイルを開き直してエラーを返却する。
    ///
    /// # 戻り値
    ///
    /// アーカイブのパス。
    pub fn rotate(&mut self) -> Result<PathBuf> {
        if self.closed {
            return Err(Error::Closed);
        }

        if let Some(active) = self.active.take() {
            self.retire(active);
        }

        let active_path = self.namer.active_path();
        let archived = self
            .namer
            .archive_path(&self.clock.now(), self.rotation.compress)
            .and_then(|archive_path| {
                self.archive(&active_path, &archive_path)?;
                Ok(archive_path)
            });

        match archived {
            Ok(archive_path) => {
                self.active = Some(ActiveSegment::open(&active_path)?);
                Ok(archive_path)
            }
            Err(err) => {
                match ActiveSegment::open(&active_path) {
                    Ok(active) => self.active = Some(active),
                    Err(reopen) => self.pending.push(reopen),
                }
                Err(err)
            }
        }
    }

    fn retire(&mut self, mut active: ActiveSegment) {
        if let Err(err) = active.sync() {
            self.pending.push(Error::Flush(err));
        }
    }

    fn archive(&mut self, from: &Path, to: &Path) -> Result<()> {
        if self.rotation.compress {
            archive::compress_file(from, to).map_err(|source| Error::Archive {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })?;
            if let Err(source) = fs::remove_file(from) {
                self.pending.push(Error::Remove {
                    path: from.to_path_buf(),
                    source,
                });
            }
        } else {
            fs::rename(from, to).map_err(|source| Error::Rename {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })?;
        }

        Ok(())
    }

    /// バッファの内容をファイルと追加の出力先に書き出す。ディスクへの同期はしない。
    pub fn flush(&mut self) -> Result<()> {
        for err in self.secondary.flush() {
            self.pending.push(Error::Secondary(err));
        }
        match self.active.as_mut() {
            Some(active) => active.file.flush().map_err(Error::Flush),
            None => Ok(()),
        }
    }

    /// バッファをフラッシュして、アクティブファイルをディスクに同期する。
    pub fn sync(&mut self) -> Result<()> {
        for err in self.secondary.flush() {
            self.pending.push(Error::Secondary(err));
        }
        match self.active.as_mut() {
            Some(active) => active.sync().map_err(Error::Flush),
            None => Ok(()),
        }
    }

    /// 同期してアクティブファイルを閉じる。以降の書き込みは`Error::Closed`になる。
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        for err in self.secondary.flush() {
            self.pending.push(Error::Secondary(err));
        }
        match self.active.take() {
            Some(mut active) => active.sync().map_err(Error::Flush),
            None => Ok(()),
        }
    }

    /// 保持条件を満たさないアーカイブを削除する。
    ///
    /// ディレクトリを読めない場合はエラー。ファイルごとの削除失敗は溜めて続行する。
    pub fn cleanup(&mut self, now: SystemTime) -> Result<CleanupReport> {
        let directory = self.namer.directory();
        let candidates =
            retention::scan(directory, &self.pattern).map_err(|source| Error::ListDir {
                path: directory.to_path_buf(),
                source,
            })?;

        let active_file_name = self.namer.active_file_name();
        let mut report = CleanupReport::default();
        for (candidate, decision) in self.retention.plan(&candidates, &active_file_name, now) {
            match decision {
                RetentionDecision::Keep => report.kept += 1,
                RetentionDecision::Delete => match fs::remove_file(&candidate.path) {
                    Ok(()) => report.deleted.push(candidate.path.clone()),
                    Err(source) => self.pending.push(Error::Remove {
                        path: candidate.path.clone(),
                        source,
                    }),
                },
            }
        }

        Ok(report)
    }
}

impl fmt::Debug for RotatingWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingWriter")
            .field("namer", &self.namer)
            .field("rotation", &self.rotation)
            .field("retention", &self.retention)
            .field("current_size", &self.current_size())
            .field("secondary", &self.secondary)
            .field("closed", &self.closed)
            .finish()
    }
}

/// ライターを作成する。
///
/// 追記モードで開き、ファイルがなければ作成する。
/// 開けなかった場合は親ディレクトリを作成してから開き直す。
///
/// # 引数
///
/// * path: ログファイルパス。
///
/// # 戻り値
///
/// `File`インスタンス。
fn create_writer(path: &Path) -> io::Result<File> {
    let mut open_options = OpenOptions::new();
    open_options.append(true).create(true);

    let new_file = open_options.open(path);
    if new_file.is_err() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            return open_options.open(path);
        }
    }

    new_file
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use flate2::read::GzDecoder;

    use super::*;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn open_writer(dir: &Path, max_size: Option<u64>, compress: bool) -> RotatingWriter {
        RotatingWriter::open(
            SegmentNamer::new(dir, "app"),
            RotationPolicy { max_size, compress },
            RetentionPolicy::default(),
            Clock::utc(),
        )
        .unwrap()
    }

    fn archives(dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.file_name().unwrap() != "app.log")
            .collect();
        paths.sort();
        paths
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed pipe"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_create_writer_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.log");

        create_writer(&path).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_open_resumes_size_of_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.log"), b"0123456789").unwrap();

        let mut writer = open_writer(dir.path(), Some(100), false);
        assert_eq!(Some(10), writer.current_size());

        writer.write(b"abc").unwrap();
        writer.sync().unwrap();
        assert_eq!(Some(13), writer.current_size());
        assert_eq!(b"0123456789abc".to_vec(), fs::read(dir.path().join("app.log")).unwrap());
    }

    #[test]
    fn test_rotates_once_before_crossing_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = open_writer(dir.path(), Some(10), false);

        assert_eq!(None, writer.write(b"12345").unwrap().rotated);
        assert_eq!(None, writer.write(b"67890").unwrap().rotated);
        let written = writer.write(b"abc").unwrap();
        writer.sync().unwrap();

        let archive = written.rotated.expect("write should have rotated");
        assert_eq!(b"1234567890".to_vec(), fs::read(&archive).unwrap());
        assert_eq!(b"abc".to_vec(), fs::read(writer.active_path()).unwrap());
        assert_eq!(Some(3), writer.current_size());
        assert_eq!(vec![archive], archives(dir.path()));
    }

    #[test]
    fn test_empty_segment_is_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = open_writer(dir.path(), Some(4), false);

        let written = writer.write(b"much longer than four bytes").unwrap();

        assert_eq!(None, written.rotated);
        assert!(archives(dir.path()).is_empty());
    }

    #[test]
    fn test_compressed_rotation_preserves_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = open_writer(dir.path(), Some(32), true);
        writer.write(b"first line\n").unwrap();
        writer.write(b"second line\n").unwrap();

        let archive = writer.write(b"third line, new segment\n").unwrap().rotated.unwrap();

        assert!(archive.to_str().unwrap().ends_with(".log.gz"));
        let mut decoded = Vec::new();
        GzDecoder::new(File::open(&archive).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(b"first line\nsecond line\n".to_vec(), decoded);
        assert_eq!(vec![archive], archives(dir.path()));
    }

    #[test]
    fn test_same_second_rotations_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = open_writer(dir.path(), None, false);

        for i in 0..3 {
            writer.write(format!("segment {i}\n").as_bytes()).unwrap();
            writer.rotate().unwrap();
        }

        let contents: Vec<_> = archives(dir.path())
            .iter()
            .map(|path| fs::read_to_string(path).unwrap())
            .collect();
        assert_eq!(3, contents.len());
        for i in 0..3 {
            assert!(contents.contains(&format!("segment {i}\n")));
        }
    }

    #[test]
    fn test_failed_archive_reopens_active_segment() {
        let dir = tempfile::tempdir().unwrap();
        for compress in [false, true] {
            let mut writer = open_writer(dir.path(), None, compress);
            writer.write(b"lost\n").unwrap();
            fs::remove_file(writer.active_path()).unwrap();

            let err = writer.rotate().unwrap_err();
            if compress {
                assert!(matches!(err, Error::Archive { .. }));
            } else {
                assert!(matches!(err, Error::Rename { .. }));
            }

            writer.write(b"still writing\n").unwrap();
            writer.sync().unwrap();
            assert_eq!(
                "still writing\n",
                fs::read_to_string(writer.active_path()).unwrap()
            );
            writer.close().unwrap();
            fs::remove_file(dir.path().join("app.log")).unwrap();
        }
    }

    #[test]
    fn test_secondary_sinks_receive_records_and_failures_are_pending() {
        let dir = tempfile::tempdir().unwrap();
        let captured = Captured::default();
        let mut writer = open_writer(dir.path(), None, false)
            .with_secondary(Box::new(Broken))
            .with_secondary(Box::new(captured.clone()));

        let written = writer.write(b"hello\n").unwrap();
        writer.sync().unwrap();

        assert_eq!(6, written.bytes);
        assert_eq!(b"hello\n".to_vec(), *captured.0.lock().unwrap());
        assert_eq!(b"hello\n".to_vec(), fs::read(writer.active_path()).unwrap());
        let pending = writer.take_pending();
        assert_eq!(1, pending.len());
        assert!(matches!(pending[0], Error::Secondary(_)));
        assert!(writer.take_pending().is_empty());
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = open_writer(dir.path(), None, false);
        writer.write(b"before close\n").unwrap();

        writer.close().unwrap();

        assert!(matches!(writer.write(b"after\n"), Err(Error::Closed)));
        assert!(matches!(writer.rotate(), Err(Error::Closed)));
        assert!(writer.close().is_ok());
        assert_eq!(
            "before close\n",
            fs::read_to_string(dir.path().join("app.log")).unwrap()
        );
    }

    #[test]
    fn test_cleanup_keeps_newest_backups_and_active_file() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        for (i, name) in ["app_1.log", "app_2.log.gz", "app_3.log", "other_1.log"]
            .iter()
            .enumerate()
        {
            let file = File::create(dir.path().join(name)).unwrap();
            file.set_modified(now - (i as u32 + 1) * HOUR).unwrap();
        }
        let mut writer = RotatingWriter::open(
            SegmentNamer::new(dir.path(), "app"),
            RotationPolicy::default(),
            RetentionPolicy {
                max_age: None,
                max_backups: Some(1),
            },
            Clock::utc(),
        )
        .unwrap();
        File::options()
            .write(true)
            .open(writer.active_path())
            .unwrap()
            .set_modified(now - 10 * HOUR)
            .unwrap();

        let report = writer.cleanup(now).unwrap();

        assert_eq!(1, report.kept);
        assert_eq!(2, report.deleted.len());
        assert!(dir.path().join("app.log").exists());
        assert!(dir.path().join("app_1.log").exists());
        assert!(!dir.path().join("app_2.log.gz").exists());
        assert!(!dir.path().join("app_3.log").exists());
        assert!(dir.path().join("other_1.log").exists());
    }

    #[test]
    fn test_cleanup_removes_expired_archives() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let fresh = dir.path().join("app_fresh.log");
        let stale = dir.path().join("app_stale.log.gz");
        File::create(&fresh).unwrap().set_modified(now - HOUR).unwrap();
        File::create(&stale).unwrap().set_modified(now - 48 * HOUR).unwrap();
        let mut writer = RotatingWriter::open(
            SegmentNamer::new(dir.path(), "app"),
            RotationPolicy::default(),
            RetentionPolicy {
                max_age: Some(24 * HOUR),
                max_backups: None,
            },
            Clock::utc(),
        )
        .unwrap();

        let report = writer.cleanup(now).unwrap();

        assert_eq!(vec![stale.clone()], report.deleted);
        assert!(fresh.exists());
        assert!(!stale.exists());
        // 2回目は何も削除しない
        assert!(writer.cleanup(now).unwrap().deleted.is_empty());
    }
}
