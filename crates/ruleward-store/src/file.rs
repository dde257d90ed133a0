// ABOUTME: Directory-backed snapshot store: one file per (session, component) under <home>/sessions/<ulid>/.
// ABOUTME: Writes go to a .tmp file, are fsynced, then atomically renamed over the old component.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use ulid::Ulid;

use crate::store::{ComponentTag, SnapshotStore, StoreError};

/// A snapshot store rooted at a home directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    home: PathBuf,
}

impl FileStore {
    /// Open a store at `home`, creating `home/sessions` if needed.
    pub fn open(home: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(home.join("sessions"))?;
        Ok(Self { home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn session_dir(&self, session_id: &Ulid) -> PathBuf {
        self.home.join("sessions").join(session_id.to_string())
    }

    fn component_path(&self, session_id: &Ulid, tag: ComponentTag) -> PathBuf {
        self.session_dir(session_id).join(format!("{tag}.json"))
    }
}

impl SnapshotStore for FileStore {
    fn put(&self, session_id: &Ulid, tag: ComponentTag, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;

        let tmp_path = dir.join(format!("{tag}.tmp"));
        let final_path = self.component_path(session_id, tag);

        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;

        // Best-effort: the rename already happened, so the component is consistent either way.
        if let Ok(dir) = File::open(&dir) {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    fn get(&self, session_id: &Ulid, tag: ComponentTag) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.component_path(session_id, tag)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, session_id: &Ulid, tag: ComponentTag) -> Result<(), StoreError> {
        match fs::remove_file(self.component_path(session_id, tag)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let dir = self.session_dir(session_id);
        let now_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if now_empty {
            let _ = fs::remove_dir(&dir);
        }

        Ok(())
    }

    fn sessions(&self) -> Result<Vec<Ulid>, StoreError> {
        let sessions_dir = self.home.join("sessions");
        if !sessions_dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&sessions_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            match name_str.parse::<Ulid>() {
                Ok(session_id) => {
                    if self.component_path(&session_id, ComponentTag::Header).exists() {
                        results.push(session_id);
                    }
                }
                Err(_) => {
                    tracing::warn!("skipping non-ULID directory in sessions/: {}", name_str);
                }
            }
        }

        results.sort();
        Ok(results)
    }
}
