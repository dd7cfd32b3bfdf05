use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::Path,
};

use flate2::{write::GzEncoder, Compression};

/// ファイルをgzip圧縮して、別のファイルに書き出す。
///
/// 圧縮に失敗した場合は作りかけの出力ファイルを削除する。元のファイルは削除しない。
///
/// # 引数
///
/// * src: 圧縮するファイルのパス。
/// * dst: gzipファイルのパス。既存のファイルは上書きしない。
pub fn compress_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let reader = BufReader::new(File::open(src)?);
    let outfile = File::options().write(true).create_new(true).open(dst)?;

    let result = write_gzip(reader, outfile);
    if result.is_err() {
        let _ = fs::remove_file(dst);
    }

    result
}

fn write_gzip(mut reader: BufReader<File>, outfile: File) -> io::Result<u64> {
    let mut encoder = GzEncoder::new(BufWriter::new(outfile), Compression::default());
    let copied = io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(copied)
}
