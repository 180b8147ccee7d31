//! Durable blob storage for cache snapshots.

use std::{
   collections::HashMap,
   io::ErrorKind,
   path::{Path, PathBuf},
   sync::Arc,
};

use parking_lot::Mutex;

use crate::{Result, config};

/// Opaque blob store keyed by a fixed name.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
   async fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;

   async fn save(&self, name: &str, blob: &[u8]) -> Result<()>;

   async fn remove(&self, name: &str) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
   async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
      (**self).load(name).await
   }

   async fn save(&self, name: &str, blob: &[u8]) -> Result<()> {
      (**self).save(name, blob).await
   }

   async fn remove(&self, name: &str) -> Result<()> {
      (**self).remove(name).await
   }
}

/// Stores each blob as `<dir>/<name>.bin`. Writes go to a temporary file that
/// is renamed into place, so a crash mid-write leaves the previous snapshot.
pub struct FileSnapshotStore {
   dir: PathBuf,
}

impl FileSnapshotStore {
   pub fn new(dir: impl Into<PathBuf>) -> Self {
      Self { dir: dir.into() }
   }

   pub fn in_data_dir() -> Self {
      Self::new(config::cache_dir())
   }

   pub fn dir(&self) -> &Path {
      &self.dir
   }

   fn path(&self, name: &str) -> PathBuf {
      self.dir.join(format!("{name}.bin"))
   }
}

#[async_trait::async_trait]
impl SnapshotStore for FileSnapshotStore {
   async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
      match tokio::fs::read(self.path(name)).await {
         Ok(bytes) => Ok(Some(bytes)),
         Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
         Err(e) => Err(e.into()),
      }
   }

   async fn save(&self, name: &str, blob: &[u8]) -> Result<()> {
      tokio::fs::create_dir_all(&self.dir).await?;

      let path = self.path(name);
      let tmp = path.with_extension("bin.tmp");
      tokio::fs::write(&tmp, blob).await?;
      tokio::fs::rename(&tmp, &path).await?;
      Ok(())
   }

   async fn remove(&self, name: &str) -> Result<()> {
      match tokio::fs::remove_file(self.path(name)).await {
         Ok(()) => Ok(()),
         Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
         Err(e) => Err(e.into()),
      }
   }
}

/// In-process store, used when persistence should not touch the disk.
#[derive(Default)]
pub struct MemorySnapshotStore {
   blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn contains(&self, name: &str) -> bool {
      self.blobs.lock().contains_key(name)
   }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
   async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
      Ok(self.blobs.lock().get(name).cloned())
   }

   async fn save(&self, name: &str, blob: &[u8]) -> Result<()> {
      self.blobs.lock().insert(name.to_string(), blob.to_vec());
      Ok(())
   }

   async fn remove(&self, name: &str) -> Result<()> {
      self.blobs.lock().remove(name);
      Ok(())
   }
}
