use cardpipe_core::{CardStore, Error, KnowledgeCard, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod automation;
pub mod config;
pub mod extract;
pub mod links;
pub mod merge;
pub mod openai_compat;
pub mod prompt;
pub mod render_playwright;
pub mod search;
pub mod service;
pub mod synthesis;

/// One JSON document per card: `<root>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FsCardStore {
    root: PathBuf,
}

fn check_id(id: &str) -> Result<&str> {
    let id = id.trim();
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(id)
    } else {
        Err(Error::Store(format!("invalid card id {id:?}")))
    }
}

impl FsCardStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}.json", check_id(id)?)))
    }

    fn write(&self, card: &KnowledgeCard) -> Result<()> {
        let path = self.path(&card.id)?;
        fs::create_dir_all(&self.root).map_err(|e| Error::Store(e.to_string()))?;
        let bytes =
            serde_json::to_vec_pretty(card).map_err(|e| Error::Store(e.to_string()))?;
        // Same-directory temp file so the rename stays on one filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| Error::Store(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| Error::Store(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| Error::Store(format!("{}: {}", path.display(), e.error)))?;
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<KnowledgeCard>> {
        let path = self.path(id)?;
        let raw = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Store(format!("{}: {e}", path.display()))),
        };
        let mut card: KnowledgeCard = serde_json::from_slice(&raw)
            .map_err(|e| Error::Store(format!("{}: {e}", path.display())))?;
        if card.id.trim().is_empty() {
            card.id = id.trim().to_string();
        }
        Ok(Some(card))
    }

    /// Every readable card, newest first. Unreadable documents are skipped with a warning.
    pub fn list(&self) -> Result<Vec<KnowledgeCard>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Store(e.to_string())),
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let p = entry.path();
            if p.extension().and_then(|x| x.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = p.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read(id) {
                Ok(Some(c)) => out.push(c),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "skipping unreadable card"),
            }
        }
        out.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(out)
    }
}

#[async_trait::async_trait]
impl CardStore for FsCardStore {
    async fn save(&self, card: &KnowledgeCard) -> Result<()> {
        self.write(card)
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeCard>> {
        self.read(id)
    }

    async fn update(&self, card: &KnowledgeCard) -> Result<()> {
        if !self.path(&card.id)?.exists() {
            return Err(Error::NotFound(format!("card {}", card.id)));
        }
        self.write(card)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("card {}", id.trim())))
            }
            Err(e) => Err(Error::Store(format!("{}: {e}", path.display()))),
        }
    }
}
