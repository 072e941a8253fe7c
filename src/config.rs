//! Tunables shared across the three parsers and the sink layer.

use std::path::PathBuf;

/// Configuration for a [`crate::form::FormParser`].
#[derive(Debug, Clone)]
pub struct FormParserConfig {
    /// Cap on total bytes fed to the underlying parser. `u64::MAX` means no
    /// cap.
    pub max_body_size: u64,
    /// Byte count above which a [`crate::sink::File`] spills to disk.
    pub max_memory_file_size: u64,
    /// Directory for spilled files. `None` uses the OS temp directory.
    pub upload_dir: Option<PathBuf>,
    /// Use the declared filename when spilling, instead of a generated one.
    pub upload_keep_filename: bool,
    /// Preserve the filename extension on a generated spill path.
    pub upload_keep_extensions: bool,
    /// Fail with [`crate::error::FormParserError::BadContentTransferEncoding`]
    /// on an unrecognized `Content-Transfer-Encoding` instead of passing the
    /// part through unchanged.
    pub upload_error_on_bad_cte: bool,
    /// Remove spilled temp files once their [`crate::sink::File`] is
    /// dropped.
    pub upload_delete_tmp: bool,
    /// Reject malformed querystring bodies (duplicate separators, chunks
    /// with no `=`) instead of tolerating them.
    pub strict_querystring: bool,
    /// Chunk size `parse_form` reads from its `Read` source at a time.
    pub chunk_size: usize,
}

impl Default for FormParserConfig {
    fn default() -> Self {
        FormParserConfig {
            max_body_size: u64::MAX,
            max_memory_file_size: 1 << 20,
            upload_dir: None,
            upload_keep_filename: false,
            upload_keep_extensions: false,
            upload_error_on_bad_cte: false,
            upload_delete_tmp: true,
            strict_querystring: false,
            chunk_size: 1 << 20,
        }
    }
}

impl FormParserConfig {
    pub(crate) fn spool_config(&self) -> crate::sink::FileSpoolConfig {
        crate::sink::FileSpoolConfig {
            max_memory_size: self.max_memory_file_size,
            upload_dir: self.upload_dir.clone(),
            keep_filename: self.upload_keep_filename,
            keep_extensions: self.upload_keep_extensions,
            delete_tmp: self.upload_delete_tmp,
        }
    }
}
