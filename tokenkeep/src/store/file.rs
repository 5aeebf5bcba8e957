//! A key/value medium persisted as a JSON file

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::KeyValueStore;

/// A store that keeps its entries in a local JSON file
///
/// Entries are loaded once on construction and written through on every
/// change. Write failures are logged; the in-memory view stays authoritative
/// for the life of the process.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens a file store, loading any entries already at `path`
    ///
    /// A missing file starts an empty store. A file that cannot be read or
    /// parsed is an error.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) {
        if let Err(error) = self.write_entries(entries) {
            tracing::warn!(
                path = %self.path.display(),
                error = (&error as &dyn std::error::Error),
                "unable to persist session store"
            );
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> io::Result<()> {
        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            file_opts.mode(0o600);
        }

        let mut file = file_opts.open(&self.path)?;
        let data = serde_json::to_string_pretty(entries)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries();
        entries.insert(key.to_owned(), value.to_owned());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    fn remove_all(&self, keys: &[&str]) {
        let mut entries = self.entries();
        let before = entries.len();
        for key in keys {
            entries.remove(*key);
        }
        if entries.len() != before {
            self.persist(&entries);
        }
    }
}
