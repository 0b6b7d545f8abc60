//! File or block device image backend

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{IoCommand, IoRequest, KeyValue, QueueError, Target, TargetError};
use crate::error::NvmeOfResult;

/// Device backed by a file or block device
///
/// I/O runs on the blocking thread pool with positional reads and writes,
/// so one handle serves concurrent requests.
pub struct FileTarget {
    file: Arc<File>,
    path: PathBuf,
    size: u64,
}

impl FileTarget {
    /// Open an existing image read-write
    pub fn open(path: impl AsRef<Path>) -> NvmeOfResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        // block devices report a zero metadata length
        let size = file.seek(SeekFrom::End(0))?;
        debug!(path = %path.display(), size, "opened file target");
        Ok(Self {
            file: Arc::new(file),
            path,
            size,
        })
    }

    /// Image path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn execute(file: &File, request: &mut IoRequest, size: u64) -> Result<(), TargetError> {
        if request.command == IoCommand::Flush {
            return file.sync_data().map_err(|err| {
                warn!(error = %err, "flush failed");
                TargetError::Internal
            });
        }
        let range = request.byte_range(size)?;
        let mut offset = range.start;
        match request.command {
            IoCommand::Read => {
                for segment in request.sgl.iter_mut() {
                    file.read_exact_at(&mut segment[..], offset).map_err(|err| {
                        warn!(offset, error = %err, "read failed");
                        TargetError::Unsupported
                    })?;
                    offset += segment.len() as u64;
                }
                Ok(())
            }
            IoCommand::Write => {
                for segment in request.sgl.iter() {
                    file.write_all_at(&segment[..], offset).map_err(|err| {
                        warn!(offset, error = %err, "write failed");
                        TargetError::Unsupported
                    })?;
                    offset += segment.len() as u64;
                }
                Ok(())
            }
            IoCommand::Trim | IoCommand::WriteZero => {
                let zeros = vec![0u8; request.length as usize];
                file.write_all_at(&zeros, offset)
                    .map_err(|_| TargetError::Internal)
            }
            IoCommand::Flush => Ok(()),
        }
    }
}

#[async_trait]
impl Target for FileTarget {
    async fn queue(&self, request: IoRequest) -> Result<(), QueueError> {
        let file = Arc::clone(&self.file);
        let size = self.size;
        let outcome = tokio::task::spawn_blocking(move || {
            let mut request = request;
            let result = Self::execute(&file, &mut request, size);
            request.complete(result);
        })
        .await;
        // a panicked worker drops its request, which aborts it
        if let Err(err) = outcome {
            warn!(error = %err, "file target worker failed");
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&self) {
        let file = Arc::clone(&self.file);
        if let Ok(Err(err)) = tokio::task::spawn_blocking(move || file.sync_all()).await {
            warn!(path = %self.path.display(), error = %err, "final sync failed");
        }
    }

    fn runtime_details(&self) -> Vec<KeyValue> {
        vec![KeyValue::new("Image", self.path.display())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::testing::{conformance, run};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn image(size: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0xFF; size]).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_file_target_round_trip() {
        let img = image(64 * 1024);
        let target = FileTarget::open(img.path()).unwrap();
        conformance(&target).await;
        assert_eq!(target.size(), 64 * 1024);

        let (result, _) = run(&target, IoCommand::Write, 3, Some(vec![0x55; 1024]), 1024).await;
        assert!(result.is_ok());
        let (result, data) = run(&target, IoCommand::Read, 3, None, 1024).await;
        assert!(result.is_ok());
        assert_eq!(data.unwrap(), vec![0x55; 1024]);

        let (result, _) = run(&target, IoCommand::Trim, 3, None, 512).await;
        assert!(result.is_ok());
        let (_, data) = run(&target, IoCommand::Read, 3, None, 512).await;
        assert_eq!(data.unwrap(), vec![0u8; 512]);

        let (_, data) = run(&target, IoCommand::Read, 0, None, 512).await;
        assert_eq!(data.unwrap(), vec![0xFF; 512]);
    }

    #[tokio::test]
    async fn test_file_target_bounds_and_details() {
        let img = image(4096);
        let target = FileTarget::open(img.path()).unwrap();
        let (result, _) = run(&target, IoCommand::Read, 8, None, 512).await;
        assert_eq!(result, Err(TargetError::LbaOutOfRange));

        let details = target.runtime_details();
        assert_eq!(details[0].key, "Image");
        assert_eq!(details[0].value, img.path().display().to_string());
        target.close().await;
    }

    #[test]
    fn test_missing_image_fails() {
        assert!(FileTarget::open("/nonexistent/warp-nvmeof.img").is_err());
    }
}
