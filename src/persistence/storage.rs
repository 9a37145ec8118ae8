//! Keyed string-blob stores used for drafts.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::anyhow;

use super::settings::EditorSettings;

/// Local, unreliable key/value storage. Callers treat every error as
/// "durability lost" and keep going.
pub trait DraftStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn from_settings(settings: &EditorSettings) -> Self { Self::new(settings.draft_dir()) }

    pub fn dir(&self) -> &Path { &self.dir }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys come from project ids; keep them filesystem-safe
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.flush()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

impl DraftStorage for FileStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)?;
        atomic_write(&self.path_for(key), value.as_bytes())?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process storage. Clones share the same entries, so a test can keep a
/// handle while the session owns another. `set_unavailable(true)` makes every
/// call fail, which is how quota or missing-storage conditions show up.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Rc<RefCell<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, String>,
    unavailable: bool,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub fn set_unavailable(&self, unavailable: bool) { self.inner.borrow_mut().unavailable = unavailable; }

    pub fn contains(&self, key: &str) -> bool { self.inner.borrow().entries.contains_key(key) }

    pub fn raw(&self, key: &str) -> Option<String> { self.inner.borrow().entries.get(key).cloned() }

    fn check(&self) -> anyhow::Result<()> {
        if self.inner.borrow().unavailable {
            return Err(anyhow!("storage unavailable"));
        }
        Ok(())
    }
}

impl DraftStorage for MemoryStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.check()?;
        Ok(self.raw(key))
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.check()?;
        self.inner.borrow_mut().entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.check()?;
        self.inner.borrow_mut().entries.remove(key);
        Ok(())
    }
}
