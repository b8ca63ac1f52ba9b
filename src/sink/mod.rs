use std::{io, path::Path};

use thiserror::Error;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

use crate::size::ByteSize;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write of {len} bytes would make the file bigger than the max of {max} (currently {current})")]
    CapacityExceeded {
        len: usize,
        current: ByteSize,
        max: ByteSize,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Destination for serialized request dumps.
#[derive(Debug)]
pub enum Sink {
    Discard,
    File(CappedFile),
}

impl Sink {
    pub async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        match self {
            Self::Discard => Ok(data.len()),
            Self::File(file) => file.write(data).await,
        }
    }
}

/// Append-only file that refuses writes which would bring it to or past
/// `max_size` bytes.
#[derive(Debug)]
pub struct CappedFile {
    max_size: ByteSize,
    // Held across the size check and the append.
    file: Mutex<File>,
}

impl CappedFile {
    pub async fn open(path: impl AsRef<Path>, max_size: ByteSize) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).append(true).read(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options.open(path).await?;

        Ok(Self::new(file, max_size))
    }

    pub fn new(file: File, max_size: ByteSize) -> Self {
        Self {
            max_size,
            file: Mutex::new(file),
        }
    }

    pub async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let mut file = self.file.lock().await;

        let current = file.metadata().await?.len();
        if current.saturating_add(data.len() as u64) >= self.max_size.as_u64() {
            return Err(SinkError::CapacityExceeded {
                len: data.len(),
                current: ByteSize(current),
                max: self.max_size,
            });
        }

        file.write_all(data).await?;
        file.flush().await?;

        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn capped(max: u64) -> (tempfile::TempDir, std::path::PathBuf, CappedFile) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("requests.log");
        let file = CappedFile::open(&path, ByteSize(max))
            .await
            .expect("open capped file");
        (dir, path, file)
    }

    #[tokio::test]
    async fn accepts_writes_strictly_below_the_cap() {
        let (_dir, path, file) = capped(10).await;

        assert_eq!(file.write(b"123456789").await.expect("write fits"), 9);
        assert_eq!(std::fs::read(&path).unwrap(), b"123456789");
    }

    #[tokio::test]
    async fn rejects_write_landing_exactly_on_the_cap() {
        let (_dir, path, file) = capped(10).await;

        let err = file.write(b"0123456789").await.unwrap_err();
        assert!(matches!(
            err,
            SinkError::CapacityExceeded { len: 10, current: ByteSize(0), .. }
        ));
        assert!(std::fs::read(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_write_leaves_file_untouched() {
        let (_dir, path, file) = capped(16).await;

        file.write(b"hello ").await.expect("first write fits");
        assert!(file.write(b"world, again").await.is_err());
        file.write(b"world").await.expect("smaller write still fits");

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn counts_existing_contents_toward_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.log");
        std::fs::write(&path, b"already here").unwrap();

        let file = CappedFile::open(&path, ByteSize(16)).await.unwrap();
        assert!(file.write(b"1234").await.is_err());
        file.write(b"123").await.expect("fits under the cap");

        assert_eq!(std::fs::read(&path).unwrap(), b"already here123");
    }

    #[tokio::test]
    async fn zero_cap_rejects_everything() {
        let (_dir, _path, file) = capped(0).await;

        assert!(file.write(b"").await.is_err());
        assert!(file.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn discard_sink_swallows_everything() {
        let sink = Sink::Discard;
        let payload = vec![0xAB; 1 << 20];

        for _ in 0..8 {
            assert_eq!(sink.write(&payload).await.unwrap(), payload.len());
        }
        assert_eq!(sink.write(b"").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_writers_never_pass_the_cap() {
        let (_dir, path, file) = capped(100).await;
        let sink = std::sync::Arc::new(Sink::File(file));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let sink = std::sync::Arc::clone(&sink);
            tasks.push(tokio::spawn(async move { sink.write(b"0123456789").await }));
        }

        let mut written = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                written += 1;
            }
        }

        assert_eq!(written, 9);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 90);
    }
}
