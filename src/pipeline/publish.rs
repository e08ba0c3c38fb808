//! Output naming, atomic publish, and source disposal.
//!
//! ## Why a temporary name?
//!
//! Downstream systems scan the output directories. If the tool wrote
//! straight to `doc.pdf`, a scanner could pick up a half-written file. The
//! tool therefore writes `~doc.tmp` and the worker renames it to `doc.pdf`
//! once the source is gone. `rename(2)` within one filesystem is atomic, so
//! an observer only ever sees no file, the temporary name, or the complete
//! PDF. Both names live in the same directory, which keeps the rename on one
//! filesystem.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension of published files.
pub const OUTPUT_EXTENSION: &str = "pdf";
/// Prefix marking in-progress outputs.
pub const TEMP_PREFIX: &str = "~";
/// Extension of in-progress outputs.
pub const TEMP_EXTENSION: &str = "tmp";

/// Final and temporary output names for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub final_path: PathBuf,
    pub temp_path: PathBuf,
}

impl OutputPaths {
    /// `outdir/<stem>.pdf` and `outdir/~<stem>.tmp`.
    ///
    /// Returns `None` when the source has no file name.
    pub fn for_source(source: &Path, output_dir: &Path) -> Option<Self> {
        let stem = source.file_stem()?.to_string_lossy();
        Some(Self {
            final_path: output_dir.join(format!("{stem}.{OUTPUT_EXTENSION}")),
            temp_path: output_dir.join(format!("{TEMP_PREFIX}{stem}.{TEMP_EXTENSION}")),
        })
    }
}

/// Source stem of an in-progress output name (`~doc.tmp` → `doc`).
pub fn temp_stem(path: &Path) -> Option<&str> {
    path.file_name()?
        .to_str()?
        .strip_prefix(TEMP_PREFIX)?
        .strip_suffix(TEMP_EXTENSION)?
        .strip_suffix('.')
}

/// Whether a file name is an in-progress output.
pub fn is_temp_name(path: &Path) -> bool {
    temp_stem(path).is_some()
}

/// Remove a file. The only disposal primitive in the crate.
pub async fn dispose(path: &Path) -> std::io::Result<()> {
    tokio::fs::remove_file(path).await?;
    info!("Deleting {}", path.display());
    Ok(())
}

/// Copy `source` unmodified into `output_dir`, keeping its file name.
pub async fn copy_original(source: &Path, output_dir: &Path) -> std::io::Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name")
    })?;
    let target = output_dir.join(name);
    tokio::fs::copy(source, &target).await?;
    info!(
        "Copy original file {} to destination {}",
        source.display(),
        output_dir.display()
    );
    Ok(target)
}

/// Atomically move a finished temporary output to its final name.
pub async fn publish(paths: &OutputPaths) -> std::io::Result<()> {
    tokio::fs::rename(&paths.temp_path, &paths.final_path).await?;
    debug!(
        "published {} -> {}",
        paths.temp_path.display(),
        paths.final_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_use_the_stem() {
        let p = OutputPaths::for_source(Path::new("/in/doc.ps"), Path::new("/out")).unwrap();
        assert_eq!(p.final_path, PathBuf::from("/out/doc.pdf"));
        assert_eq!(p.temp_path, PathBuf::from("/out/~doc.tmp"));
        assert_ne!(p.final_path, p.temp_path);
    }

    #[test]
    fn only_last_extension_is_dropped() {
        let p = OutputPaths::for_source(Path::new("/in/q3.report.ps"), Path::new("/out")).unwrap();
        assert_eq!(p.final_path, PathBuf::from("/out/q3.report.pdf"));

        let p = OutputPaths::for_source(Path::new("/in/job-4711"), Path::new("/out")).unwrap();
        assert_eq!(p.final_path, PathBuf::from("/out/job-4711.pdf"));
        assert_eq!(p.temp_path, PathBuf::from("/out/~job-4711.tmp"));
    }

    #[test]
    fn no_file_name_no_paths() {
        assert!(OutputPaths::for_source(Path::new("/"), Path::new("/out")).is_none());
    }

    #[test]
    fn temp_name_detection() {
        assert!(is_temp_name(Path::new("/out/~doc.tmp")));
        assert!(!is_temp_name(Path::new("/out/doc.pdf")));
        assert!(!is_temp_name(Path::new("/out/~doc.pdf")));
        assert_eq!(temp_stem(Path::new("/out/~q3.report.tmp")), Some("q3.report"));
        assert_eq!(temp_stem(Path::new("/out/doc.tmp")), None);
    }

    #[tokio::test]
    async fn publish_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let paths = OutputPaths::for_source(Path::new("doc.ps"), dir.path()).unwrap();
        std::fs::write(&paths.temp_path, b"%PDF-1.4").unwrap();

        publish(&paths).await.unwrap();
        assert!(!paths.temp_path.exists());
        assert_eq!(std::fs::read(&paths.final_path).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn copy_then_dispose() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let src = input.path().join("doc.ps");
        std::fs::write(&src, b"%!PS").unwrap();

        let copied = copy_original(&src, output.path()).await.unwrap();
        assert_eq!(copied, output.path().join("doc.ps"));
        dispose(&src).await.unwrap();
        assert!(!src.exists());
        assert!(copied.exists());
        assert!(dispose(&src).await.is_err());
    }
}
