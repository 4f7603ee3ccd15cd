// =============================================================================
// Session archive — rotating gzip logs of raw trades and depth states
// =============================================================================
//
// Each exchange session gets its own directory named after the session's
// connect time; inside it, one trades file and one depth file per archived
// pair. Files are newline-delimited JSON, gzip-compressed.
//
// Appends write one gzip member per batch (open, compress, close), so a file
// accumulated across many ticks is a multi-member gzip stream; readers must
// use a multi-member decoder.
// =============================================================================

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Directory holding one session's archive files.
pub fn session_dir(data_store_dir: &str, connect_time: i64) -> PathBuf {
    Path::new(data_store_dir).join(connect_time.to_string())
}

/// Path of the trades log for `pair` within a session.
pub fn trades_path(data_store_dir: &str, connect_time: i64, pair: &str) -> PathBuf {
    session_dir(data_store_dir, connect_time).join(format!("{connect_time}_{pair}_trades.txt.gz"))
}

/// Path of the depth log for `pair` within a session.
pub fn depth_path(data_store_dir: &str, connect_time: i64, pair: &str) -> PathBuf {
    session_dir(data_store_dir, connect_time).join(format!("{connect_time}_{pair}_depth.txt.gz"))
}

/// Append a batch of JSON lines to a gzip log, creating the file and its
/// parent directory on first use.
pub fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create archive dir {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open archive file {}", path.display()))?;

    let mut encoder = GzEncoder::new(file, Compression::default());
    for line in lines {
        encoder
            .write_all(line.as_bytes())
            .context("failed to write archive line")?;
        encoder
            .write_all(b"\n")
            .context("failed to write archive newline")?;
    }
    encoder.finish().context("failed to finish gzip member")?;

    Ok(())
}

/// Open a gzip log for line-by-line reading across all gzip members.
pub fn open_lines(path: &Path) -> Result<Lines<BufReader<MultiGzDecoder<File>>>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open archive file {}", path.display()))?;
    Ok(BufReader::new(MultiGzDecoder::new(file)).lines())
}

/// Read the last non-empty line of a gzip log.
///
/// Recovers the final record for replay progress accounting; the whole
/// stream is scanned because gzip members cannot be seek-read backwards.
pub fn last_line(path: &Path) -> Result<String> {
    let mut last = None;
    for line in open_lines(path)? {
        let line = line.context("failed to read archive line")?;
        if !line.is_empty() {
            last = Some(line);
        }
    }
    last.with_context(|| format!("archive file {} has no records", path.display()))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_session_layout() {
        let trades = trades_path("data", 1_514_764_800_000, "btcusdt");
        assert_eq!(
            trades,
            Path::new("data/1514764800000/1514764800000_btcusdt_trades.txt.gz")
        );
        let depth = depth_path("data", 1_514_764_800_000, "btcusdt");
        assert_eq!(
            depth,
            Path::new("data/1514764800000/1514764800000_btcusdt_depth.txt.gz")
        );
    }

    #[test]
    fn append_and_read_across_gzip_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("log.txt.gz");

        append_lines(&path, &["{\"a\":1}".to_string(), "{\"a\":2}".to_string()]).unwrap();
        append_lines(&path, &["{\"a\":3}".to_string()]).unwrap();

        let lines: Vec<String> = open_lines(&path).unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["{\"a\":1}", "{\"a\":2}", "{\"a\":3}"]);
    }

    #[test]
    fn last_line_returns_final_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt.gz");

        append_lines(&path, &["first".to_string()]).unwrap();
        append_lines(&path, &["second".to_string(), "third".to_string()]).unwrap();

        assert_eq!(last_line(&path).unwrap(), "third");
    }

    #[test]
    fn empty_batch_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt.gz");
        append_lines(&path, &[]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn last_line_errors_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt.gz");
        assert!(last_line(&path).is_err());
    }
}
