//! Destinations that accumulated field and file data is written into.
//!
//! A [`Field`] buffers a form field's value in memory. A [`File`] buffers a
//! file upload's bytes either in memory or, once the configured threshold is
//! exceeded, in a spooled temporary file on disk — mirroring the reference
//! implementation's `BytesIO` / `tempfile.TemporaryFile` split.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{FileError, FormParserError};

/// A uniform write destination for part/field bodies, implemented by
/// [`Field`] and [`File`] and wrapped transparently by the streaming
/// content-transfer-encoding decoders (see [`crate::decode`]), so a decoder
/// never needs to know what it is ultimately writing into.
pub trait Sink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), FormParserError>;
    fn finalize_sink(&mut self) -> Result<(), FormParserError>;
}

/// A form field's value.
///
/// Three states rather than `Option<Vec<u8>>` because "no bytes were ever
/// written" (`Unset`) and "an explicit empty/null value was written"
/// (`Null`) are observably different to a caller: a field present in the
/// body with no `=` (e.g. bare `flag` in a querystring) surfaces as `Null`,
/// never `Unset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// No data event has been received yet.
    Unset,
    /// The field was present but has no value.
    Null,
    /// Accumulated bytes.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Returns the accumulated bytes, or an empty slice for `Unset`/`Null`.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FieldValue::Unset | FieldValue::Null => &[],
            FieldValue::Bytes(b) => b,
        }
    }
}

/// A simple in-memory field sink: a name plus an accumulated [`FieldValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: Vec<u8>,
    value: FieldValue,
}

impl Field {
    pub fn new(name: impl Into<Vec<u8>>) -> Self {
        Field {
            name: name.into(),
            value: FieldValue::Unset,
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Appends bytes to the field's value, promoting `Unset`/`Null` to
    /// `Bytes` on first write.
    pub fn write(&mut self, data: &[u8]) {
        match &mut self.value {
            FieldValue::Bytes(buf) => buf.extend_from_slice(data),
            FieldValue::Unset | FieldValue::Null => {
                let mut buf = Vec::with_capacity(data.len());
                buf.extend_from_slice(data);
                self.value = FieldValue::Bytes(buf);
            }
        }
    }

    /// Marks the field as present-but-empty if no data has been written yet.
    pub fn mark_seen(&mut self) {
        if matches!(self.value, FieldValue::Unset) {
            self.value = FieldValue::Null;
        }
    }

    pub fn finalize(&mut self) {
        self.mark_seen();
    }
}

impl Sink for Field {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), FormParserError> {
        self.write(data);
        Ok(())
    }

    fn finalize_sink(&mut self) -> Result<(), FormParserError> {
        self.finalize();
        Ok(())
    }
}

/// Backing storage for a [`File`]'s bytes.
enum FileStorage {
    Memory(Vec<u8>),
    Disk { file: fs::File, path: PathBuf },
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStorage::Memory(buf) => f.debug_tuple("Memory").field(&buf.len()).finish(),
            FileStorage::Disk { path, .. } => f.debug_tuple("Disk").field(path).finish(),
        }
    }
}

/// Where to spool a [`File`]'s bytes once it outgrows memory.
#[derive(Debug, Clone)]
pub struct FileSpoolConfig {
    /// Byte threshold past which an in-memory buffer is spilled to disk.
    pub max_memory_size: u64,
    /// Directory spooled files are created in. `None` uses the platform
    /// temporary directory.
    pub upload_dir: Option<PathBuf>,
    /// Keep the original upload's filename when spooling (sanitized against
    /// path traversal), instead of a randomly generated one.
    pub keep_filename: bool,
    /// Keep the original upload's extension when generating a random name.
    pub keep_extensions: bool,
    /// Delete the spooled file when the [`File`] handle is dropped.
    pub delete_tmp: bool,
}

impl Default for FileSpoolConfig {
    fn default() -> Self {
        FileSpoolConfig {
            max_memory_size: 1024 * 1024,
            upload_dir: None,
            keep_filename: false,
            keep_extensions: false,
            delete_tmp: true,
        }
    }
}

/// A file upload's name, accumulated bytes, and spooling state.
#[derive(Debug)]
pub struct File {
    field_name: Vec<u8>,
    file_name: Option<Vec<u8>>,
    content_type: Option<Vec<u8>>,
    config: FileSpoolConfig,
    storage: FileStorage,
    size: u64,
}

impl File {
    pub fn new(
        field_name: impl Into<Vec<u8>>,
        file_name: Option<Vec<u8>>,
        config: FileSpoolConfig,
    ) -> Self {
        File {
            field_name: field_name.into(),
            file_name,
            content_type: None,
            config,
            storage: FileStorage::Memory(Vec::new()),
            size: 0,
        }
    }

    pub fn field_name(&self) -> &[u8] {
        &self.field_name
    }

    pub fn file_name(&self) -> Option<&[u8]> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&[u8]> {
        self.content_type.as_deref()
    }

    /// Records the part's declared `Content-Type`, if any. Set by the
    /// coordinator at `headers_finished`, before any data is written.
    pub fn set_content_type(&mut self, content_type: Option<Vec<u8>>) {
        self.content_type = content_type;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The path of the spooled file on disk, if this file has been (or
    /// started as) disk-backed.
    pub fn on_disk_path(&self) -> Option<&Path> {
        match &self.storage {
            FileStorage::Disk { path, .. } => Some(path),
            FileStorage::Memory(_) => None,
        }
    }

    /// Appends bytes, spilling from memory to disk once
    /// `config.max_memory_size` is exceeded.
    pub fn write(&mut self, data: &[u8]) -> Result<(), FileError> {
        self.size += data.len() as u64;

        let should_spill = matches!(&self.storage, FileStorage::Memory(_))
            && self.size > self.config.max_memory_size;
        if should_spill {
            let existing = match &mut self.storage {
                FileStorage::Memory(buf) => std::mem::take(buf),
                FileStorage::Disk { .. } => unreachable!(),
            };
            self.spill_to_disk(&existing)?;
        }

        match &mut self.storage {
            FileStorage::Memory(buf) => buf.extend_from_slice(data),
            FileStorage::Disk { file, path } => {
                file.write_all(data).map_err(|e| {
                    FileError::new(format!("failed writing to {}", path.display()), e)
                })?;
            }
        }

        Ok(())
    }

    fn spill_to_disk(&mut self, existing: &[u8]) -> Result<(), FileError> {
        let path = self.spool_path();
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| FileError::new(format!("failed to create {}", path.display()), e))?;
        file.write_all(existing)
            .map_err(|e| FileError::new(format!("failed writing to {}", path.display()), e))?;
        self.storage = FileStorage::Disk { file, path };
        Ok(())
    }

    fn spool_path(&self) -> PathBuf {
        let dir = self
            .config
            .upload_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        if self.config.keep_filename {
            if let Some(name) = &self.file_name {
                return dir.join(sanitize_basename(name));
            }
        }

        let extension = if self.config.keep_extensions {
            self.file_name
                .as_ref()
                .and_then(|n| Path::new(&String::from_utf8_lossy(n).into_owned()).extension().map(|e| e.to_owned()))
        } else {
            None
        };

        let mut name = format!("streamform-{}", random_suffix());
        if let Some(ext) = extension {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        dir.join(name)
    }

    /// Flushes any buffered writer state. Memory-backed files need no
    /// action; disk-backed files are already durable after each `write`.
    pub fn finalize(&mut self) -> Result<(), FileError> {
        if let FileStorage::Disk { file, path } = &mut self.storage {
            file.flush()
                .map_err(|e| FileError::new(format!("failed flushing {}", path.display()), e))?;
        }
        Ok(())
    }

    /// Reads the whole file back into memory, rewinding a disk-backed file
    /// first. Intended for tests and small-file callers; large uploads
    /// should read via [`File::on_disk_path`] instead.
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        match &mut self.storage {
            FileStorage::Memory(buf) => Ok(buf.clone()),
            FileStorage::Disk { file, .. } => {
                file.seek(SeekFrom::Start(0))?;
                let mut out = Vec::new();
                file.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

impl Sink for File {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), FormParserError> {
        self.write(data).map_err(FormParserError::from)
    }

    fn finalize_sink(&mut self) -> Result<(), FormParserError> {
        self.finalize().map_err(FormParserError::from)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.config.delete_tmp {
            if let FileStorage::Disk { path, .. } = &self.storage {
                let _ = fs::remove_file(path);
            }
        }
    }
}

/// Strips directory components from an untrusted upload filename so it can
/// be safely joined onto a server-controlled directory. Handles both `/`
/// and `\` separators since the bytes may have come from any client OS.
fn sanitize_basename(name: &[u8]) -> String {
    let as_str = String::from_utf8_lossy(name);
    let base = as_str
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("");
    if base.is_empty() || base == "." || base == ".." {
        "unnamed".to_string()
    } else {
        base.to_string()
    }
}

fn random_suffix() -> String {
    // No cryptographic property is needed here; uniqueness under concurrent
    // uploads is what matters. `tempfile`'s own generator is used instead of
    // a hand-rolled one.
    let named = tempfile::Builder::new()
        .prefix("")
        .tempfile()
        .ok();
    match named {
        Some(f) => {
            let name = f
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            name
        }
        None => "tmp".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_starts_unset() {
        let f = Field::new("name");
        assert_eq!(f.value(), &FieldValue::Unset);
    }

    #[test]
    fn field_write_accumulates() {
        let mut f = Field::new("name");
        f.write(b"hello");
        f.write(b" world");
        assert_eq!(f.value().as_bytes(), b"hello world");
    }

    #[test]
    fn field_mark_seen_without_write_is_null() {
        let mut f = Field::new("flag");
        f.mark_seen();
        assert_eq!(f.value(), &FieldValue::Null);
    }

    #[test]
    fn field_mark_seen_after_write_keeps_bytes() {
        let mut f = Field::new("name");
        f.write(b"x");
        f.mark_seen();
        assert_eq!(f.value().as_bytes(), b"x");
    }

    #[test]
    fn file_stays_in_memory_below_threshold() {
        let config = FileSpoolConfig {
            max_memory_size: 1024,
            ..Default::default()
        };
        let mut file = File::new("upload", Some(b"a.txt".to_vec()), config);
        file.write(b"small").unwrap();
        assert!(file.on_disk_path().is_none());
        assert_eq!(file.read_to_vec().unwrap(), b"small");
    }

    #[test]
    fn file_spills_to_disk_past_threshold() {
        let config = FileSpoolConfig {
            max_memory_size: 4,
            ..Default::default()
        };
        let mut file = File::new("upload", Some(b"a.txt".to_vec()), config);
        file.write(b"0123456789").unwrap();
        assert!(file.on_disk_path().is_some());
        assert_eq!(file.read_to_vec().unwrap(), b"0123456789");
    }

    #[test]
    fn sanitize_basename_strips_leading_slash() {
        assert_eq!(sanitize_basename(b"/etc/passwd"), "passwd");
        assert_eq!(sanitize_basename(b"C:\\Users\\bob\\file.txt"), "file.txt");
        assert_eq!(sanitize_basename(b".."), "unnamed");
    }
}
