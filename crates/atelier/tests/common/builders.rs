//! Builder for seeding catalog items.

#![allow(dead_code)]

/// A file row, optionally backed by bytes on disk.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub path: String,
    pub content: Option<Vec<u8>>,
    pub size: i64,
}

/// Builder for one artwork with its owner and files.
#[derive(Debug, Clone)]
pub struct ItemBuilder {
    pub id: i64,
    pub owner: Option<String>,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub created_at: String,
    pub files: Vec<FileSpec>,
}

impl ItemBuilder {
    /// An eligible item owned by `u1` with external id `a<id>` and no files.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            owner: Some("u1".to_string()),
            external_id: Some(format!("a{}", id)),
            title: format!("Artwork {}", id),
            description: None,
            created_at: "2026-01-15T12:00:00Z".to_string(),
            files: Vec::new(),
        }
    }

    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn no_owner(mut self) -> Self {
        self.owner = None;
        self
    }

    pub fn external_id(mut self, external_id: &str) -> Self {
        self.external_id = Some(external_id.to_string());
        self
    }

    pub fn no_external_id(mut self) -> Self {
        self.external_id = None;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn created_at(mut self, created_at: &str) -> Self {
        self.created_at = created_at.to_string();
        self
    }

    /// A file row whose bytes are written under the content root.
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push(FileSpec {
            path: path.to_string(),
            content: Some(content.to_vec()),
            size: content.len() as i64,
        });
        self
    }

    /// A file row with nothing on disk.
    pub fn catalog_only_file(mut self, path: &str, size: i64) -> Self {
        self.files.push(FileSpec {
            path: path.to_string(),
            content: None,
            size,
        });
        self
    }

    /// `old/<ext>_p0.jpg` style files in `dir`, `count` pages.
    pub fn pages(mut self, dir: &str, count: usize) -> Self {
        let ext = self
            .external_id
            .clone()
            .unwrap_or_else(|| format!("item{}", self.id));
        for page in 0..count {
            let path = format!("{}/{}_p{}.jpg", dir, ext, page);
            let content = format!("{} page {}", ext, page).into_bytes();
            self = self.file(&path, &content);
        }
        self
    }
}
