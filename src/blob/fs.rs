//! Blob storage glue over fusio filesystems.

use std::{io, sync::Arc};

use async_trait::async_trait;
use fusio::{
    fs::OpenOptions,
    path::{Path, PathPart},
    DynFs, Read, Write,
};

use super::{BlobError, BlobStore, PutOptions};
use crate::observability::log_debug;

/// [`BlobStore`] backed by any fusio filesystem (local disk, S3, ...).
///
/// Objects live at `<root>/<bucket>/<key>`. Content metadata is not
/// persisted by this backend.
#[derive(Clone)]
pub struct FusioBlobStore {
    fs: Arc<dyn DynFs>,
    root: Path,
}

impl FusioBlobStore {
    /// Store rooted at `root` on `fs`.
    pub fn new(fs: Arc<dyn DynFs>, root: Path) -> Self {
        Self { fs, root }
    }

    /// Root directory under which buckets are laid out.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `(parent directory, object path)` for `bucket/key`.
    fn object_paths(&self, bucket: &str, key: &str) -> Result<(Path, Path), BlobError> {
        let mut segments = std::iter::once(bucket)
            .chain(key.split('/'))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>();
        let Some(file_name) = segments.pop() else {
            return Err(BlobError::Transport(format!(
                "empty blob path for `{bucket}/{key}`"
            )));
        };

        let mut parent = self.root.clone();
        for segment in segments {
            parent = parent.child(parse_part(segment)?);
        }
        let path = parent.child(parse_part(file_name)?);
        Ok((parent, path))
    }
}

fn parse_part(segment: &str) -> Result<PathPart<'_>, BlobError> {
    PathPart::parse(segment).map_err(|err| {
        BlobError::Transport(format!("invalid blob path segment `{segment}`: {err}"))
    })
}

#[async_trait]
impl BlobStore for FusioBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        let (_, path) = self.object_paths(bucket, key)?;
        let mut file = match self
            .fs
            .open_options(&path, OpenOptions::default().read(true).write(false))
            .await
        {
            Ok(file) => file,
            Err(fusio::Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let (read_res, data) = file.read_to_end_at(Vec::new(), 0).await;
        read_res?;
        Ok(data)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: PutOptions,
    ) -> Result<(), BlobError> {
        let (parent, path) = self.object_paths(bucket, key)?;
        self.fs.create_dir_all(&parent).await?;

        let mut file = self
            .fs
            .open_options(
                &path,
                OpenOptions::default()
                    .read(false)
                    .write(true)
                    .create(true)
                    .truncate(true),
            )
            .await?;
        let bytes = body.len();
        let (write_res, _buf) = file.write_all(body).await;
        write_res?;
        file.close().await?;

        log_debug!(
            component = "blob",
            event = "blob_written",
            path = %path,
            bytes,
            content_type = ?options.content_type,
        );
        Ok(())
    }
}
