use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{FrameSource, SourceError};

/// File extensions treated as frames.
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A directory of still images, read in lexical file-name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    dir: PathBuf,
    remaining: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    pub async fn open(dir: &Path) -> Result<Self, SourceError> {
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            SourceError::Unavailable(format!("cannot open image directory {}: {e}", dir.display()))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::Unavailable(format!("cannot list {}: {e}", dir.display())))?
        {
            let path = entry.path();
            if is_image(&path) {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(SourceError::Unavailable(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        files.sort();

        tracing::debug!(dir = %dir.display(), frames = files.len(), "Opened image sequence");
        Ok(Self {
            dir: dir.to_path_buf(),
            remaining: files.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl FrameSource for ImageSequenceSource {
    async fn next_frame(&mut self) -> Result<Option<Bytes>, SourceError> {
        let Some(path) = self.remaining.pop_front() else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            SourceError::Read(format!(
                "cannot read {} in {}: {e}",
                path.display(),
                self.dir.display()
            ))
        })?;
        Ok(Some(Bytes::from(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn reads_images_in_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.jpg", "c.JPEG", "notes.txt"] {
            std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }

        let mut source = ImageSequenceSource::open(dir.path()).await.unwrap();
        assert_eq!(source.remaining(), 3);

        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().await.unwrap() {
            frames.push(frame);
        }
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"a.jpg"),
                Bytes::from_static(b"b.jpg"),
                Bytes::from_static(b"c.JPEG"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_directory_is_unavailable() {
        let result = ImageSequenceSource::open(Path::new("/no/such/frames")).await;
        assert_matches!(result, Err(SourceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn directory_without_images_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), b"x").unwrap();
        let result = ImageSequenceSource::open(dir.path()).await;
        assert_matches!(result, Err(SourceError::Unavailable(_)));
    }
}
