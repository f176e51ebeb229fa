//! Feed archives on local disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage_traits::{check_feed_archive, ArchiveDigest, FeedArchiveStore, StorageResult};

/// One `<digest>.zip` file per archive under `<root>/archives/`.
///
/// New archives are written to a hidden `.partial` file next to their final
/// name and renamed into place once flushed, so a reader never sees a
/// half-written zip under a real digest.
#[derive(Debug, Clone)]
pub struct FsArchiveStore {
    dir: PathBuf,
}

impl FsArchiveStore {
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = root.as_ref().join("archives");
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, digest: &ArchiveDigest) -> PathBuf {
        self.dir.join(format!("{digest}.zip"))
    }

    async fn write_new(
        &self,
        path: &Path,
        digest: &ArchiveDigest,
        archive: &[u8],
    ) -> StorageResult<()> {
        let partial = self
            .dir
            .join(format!(".{}-{}.partial", digest.short(), Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&partial).await?;
            file.write_all(archive).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&partial, path).await
        }
        .await;

        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(
                        path = %partial.display(),
                        error = %cleanup,
                        "partial archive left behind"
                    );
                }
            }
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl FeedArchiveStore for FsArchiveStore {
    async fn put(&self, archive: &[u8]) -> StorageResult<ArchiveDigest> {
        check_feed_archive(archive)?;
        let digest = ArchiveDigest::of(archive);
        let path = self.path_for(&digest);

        if fs::try_exists(&path).await? {
            debug!(digest = %digest.short(), "archive already on disk");
            return Ok(digest);
        }
        self.write_new(&path, &digest, archive).await?;
        debug!(digest = %digest.short(), bytes = archive.len(), "archive written");
        Ok(digest)
    }

    async fn get(&self, digest: &ArchiveDigest) -> StorageResult<Vec<u8>> {
        let bytes = match fs::read(self.path_for(digest)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::ArchiveNotFound {
                    digest: digest.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        if ArchiveDigest::of(&bytes) != *digest {
            return Err(StorageError::CorruptArchive {
                digest: digest.to_string(),
            });
        }
        Ok(bytes)
    }

    async fn contains(&self, digest: &ArchiveDigest) -> StorageResult<bool> {
        Ok(fs::try_exists(self.path_for(digest)).await?)
    }

    async fn remove(&self, digest: &ArchiveDigest) -> StorageResult<bool> {
        match fs::remove_file(self.path_for(digest)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
