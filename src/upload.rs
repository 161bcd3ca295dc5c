//! Upload staging for the submission side.
//!
//! A submitted file is validated and copied into the scratch directory under
//! a random name before a job is created for it. The staged copy becomes the
//! job's `document_path`; from then on the pipeline owns it and deletes it.

use crate::error::UploadError;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const CHUNK: usize = 1024 * 1024;

/// A validated copy of an upload, ready to be handed to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpload {
    pub path: PathBuf,
    /// Name the client submitted; reported in result rows.
    pub original_name: String,
    pub size: u64,
}

/// Whether `name` carries a `.pdf` extension (any case).
pub fn is_pdf_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".pdf")
}

/// Validate `source` and copy it into `tmp_dir` as `<uuid>.pdf`.
///
/// The copy is streamed in 1 MiB chunks; once more than `max_bytes` have
/// been read the partial copy is removed and [`UploadError::TooLarge`] is
/// returned.
pub fn stage_upload(
    source: &Path,
    tmp_dir: &Path,
    max_bytes: u64,
) -> Result<StagedUpload, UploadError> {
    let original_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !is_pdf_name(&original_name) {
        return Err(UploadError::UnsupportedExtension {
            name: original_name,
        });
    }

    let mut reader = File::open(source).map_err(io_error(source))?;
    let path = tmp_dir.join(format!("{}.pdf", Uuid::new_v4().simple()));
    let mut writer = File::create(&path).map_err(io_error(&path))?;

    match copy_limited(&mut reader, &mut writer, max_bytes) {
        Ok(size) => {
            debug!("Staged {} as {} ({} bytes)", original_name, path.display(), size);
            Ok(StagedUpload {
                path,
                original_name,
                size,
            })
        }
        Err(e) => {
            drop(writer);
            let _ = std::fs::remove_file(&path);
            Err(match e {
                CopyError::TooLarge => UploadError::TooLarge {
                    limit_mb: max_bytes / (1024 * 1024),
                },
                CopyError::Io(source) => UploadError::Io { path, source },
            })
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> UploadError {
    let path = path.to_path_buf();
    move |source| UploadError::Io { path, source }
}

enum CopyError {
    TooLarge,
    Io(io::Error),
}

fn copy_limited(
    reader: &mut impl Read,
    writer: &mut impl Write,
    max_bytes: u64,
) -> Result<u64, CopyError> {
    let mut buf = vec![0u8; CHUNK];
    let mut total: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Io(e)),
        };
        total += n as u64;
        if total > max_bytes {
            return Err(CopyError::TooLarge);
        }
        writer.write_all(&buf[..n]).map_err(CopyError::Io)?;
    }
    writer.flush().map_err(CopyError::Io)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(dir: &Path, name: &str, len: usize) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, vec![b'x'; len]).unwrap();
        p
    }

    #[test]
    fn pdf_names() {
        assert!(is_pdf_name("doc.pdf"));
        assert!(is_pdf_name("SCAN.PDF"));
        assert!(!is_pdf_name("doc.png"));
        assert!(is_pdf_name(".pdf"));
        assert!(!is_pdf_name("pdf"));
        assert!(!is_pdf_name(""));
    }

    #[test]
    fn bare_extension_name_is_staged() {
        let src = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let file = source(src.path(), ".pdf", 16);

        let staged = stage_upload(&file, tmp.path(), 1024).unwrap();
        assert_eq!(staged.original_name, ".pdf");
        assert_eq!(staged.size, 16);
    }

    #[test]
    fn stages_under_random_name() {
        let src = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let file = source(src.path(), "Ticket.PDF", 2048);

        let staged = stage_upload(&file, tmp.path(), 1024 * 1024).unwrap();
        assert_eq!(staged.original_name, "Ticket.PDF");
        assert_eq!(staged.size, 2048);
        assert!(staged.path.starts_with(tmp.path()));
        let name = staged.path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), 32 + 4);
        assert!(name.ends_with(".pdf"));
        assert!(file.exists());
    }

    #[test]
    fn wrong_extension_rejected() {
        let src = tempfile::tempdir().unwrap();
        let file = source(src.path(), "photo.jpg", 10);
        let err = stage_upload(&file, src.path(), 1024).unwrap_err();
        assert_eq!(err.to_string(), "Only PDF files are supported: 'photo.jpg'");
    }

    #[test]
    fn oversized_upload_leaves_nothing_behind() {
        let src = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let file = source(src.path(), "big.pdf", 3 * 1024 * 1024);

        let err = stage_upload(&file, tmp.path(), 2 * 1024 * 1024).unwrap_err();
        assert_eq!(err.to_string(), "File exceeds max size of 2MB");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_source_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = stage_upload(Path::new("/nonexistent/x.pdf"), tmp.path(), 1024).unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }
}
