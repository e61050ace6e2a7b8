//! Compression of raw database dumps.
//!
//! An artifact is a gzip file with a single member: the raw dump. The member
//! name is stored in the gzip header.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};

/// A successfully compressed dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedDump {
    pub path: PathBuf,
    /// Size of the raw dump in bytes.
    pub raw_len: u64,
    /// Size of the artifact in bytes.
    pub compressed_len: u64,
}

/// Compresses the raw dump at `dump` into a new artifact at `artifact`.
///
/// The raw dump is removed in any case. On failure the partial artifact is
/// removed as well.
pub fn compress(dump: &Path, artifact: &Path) -> io::Result<ArchivedDump> {
    let res = write_archive(dump, artifact);

    if let Err(e) = fs::remove_file(dump) {
        log::warn!(target: "backup::archive", "Removing raw dump {} failed: {e}", dump.display());
    }

    match res {
        Ok(archived) => Ok(archived),
        Err(e) => {
            // AlreadyExists means the artifact isn't ours
            if e.kind() != io::ErrorKind::AlreadyExists {
                let _ = fs::remove_file(artifact);
            }
            Err(e)
        }
    }
}

fn write_archive(dump: &Path, artifact: &Path) -> io::Result<ArchivedDump> {
    let entry_name = dump
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "dump has no file name"))?;

    let mut reader = BufReader::new(File::open(dump)?);
    let artifact_file = File::create_new(artifact)?;
    log::trace!(target: "backup::archive", "Compress {} into {}", dump.display(), artifact.display());

    let mut encoder = GzBuilder::new()
        .filename(entry_name)
        .write(BufWriter::new(artifact_file), Compression::default());
    let raw_len = io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()?;

    let compressed_len = fs::metadata(artifact)?.len();
    log::debug!(target: "backup::archive", "Compressed {raw_len} bytes into {compressed_len} bytes");

    Ok(ArchivedDump {
        path: artifact.to_path_buf(),
        raw_len,
        compressed_len,
    })
}

/// Reads the single entry of the artifact at `artifact`.
///
/// Returns the entry name and its decompressed content.
pub fn read_entry(artifact: &Path) -> io::Result<(String, Vec<u8>)> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(artifact)?));
    let mut content = Vec::new();
    decoder.read_to_end(&mut content)?;

    let entry_name = decoder
        .header()
        .and_then(|header| header.filename())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .unwrap_or_default();

    Ok((entry_name, content))
}
