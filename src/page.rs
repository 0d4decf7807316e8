//! The page under automation.
//!
//! A [`Page`] pairs the live document with the capability to load a new
//! one: navigation and reload belong to the embedding shell, so they
//! sit behind the [`PageHost`] trait. [`SnapshotHost`] backs a page
//! with static HTML snapshots keyed by URL, which is what replays
//! against saved pages (and the test suite) use.
//!
//! The document sits behind a shared lock because the page's own
//! scripts mutate it while a replay step is polling; guards are held
//! only for synchronous spans, never across a suspension point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::info;

use crate::dom::Document;
use crate::Result;

/// Navigation capability of the embedding shell.
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Produce the document for a URL.
    async fn navigate(&mut self, url: &str) -> Result<Document>;

    /// Produce a fresh document for the current URL.
    async fn reload(&mut self, url: &str) -> Result<Document>;
}

/// Host backed by static HTML snapshots keyed by URL. Unknown URLs get
/// a blank page; a reload re-parses the snapshot, discarding any state
/// the replay built up, the way a real reload would.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHost {
    snapshots: HashMap<String, String>,
}

impl SnapshotHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, url: &str, html: &str) -> Self {
        self.insert(url, html);
        self
    }

    pub fn insert(&mut self, url: &str, html: &str) {
        self.snapshots.insert(url.to_string(), html.to_string());
    }
}

#[async_trait]
impl PageHost for SnapshotHost {
    async fn navigate(&mut self, url: &str) -> Result<Document> {
        Ok(match self.snapshots.get(url) {
            Some(html) => Document::parse(html),
            None => Document::new(),
        })
    }

    async fn reload(&mut self, url: &str) -> Result<Document> {
        self.navigate(url).await
    }
}

/// A live page: document, URL, host.
pub struct Page {
    doc: Arc<Mutex<Document>>,
    url: String,
    host: Box<dyn PageHost>,
}

impl Page {
    pub fn new(doc: Document, url: &str, host: Box<dyn PageHost>) -> Self {
        Self {
            doc: Arc::new(Mutex::new(doc)),
            url: url.to_string(),
            host,
        }
    }

    /// Page over a single HTML snapshot; reloads re-parse it.
    pub fn from_html(html: &str, url: &str) -> Self {
        let host = SnapshotHost::new().with_snapshot(url, html);
        Self::new(Document::parse(html), url, Box::new(host))
    }

    /// Lock the document. Keep the guard short-lived.
    pub fn doc(&self) -> MutexGuard<'_, Document> {
        self.doc.lock().expect("page document lock poisoned")
    }

    /// Shared handle for collaborators that mutate the page while a
    /// replay step is in flight (the page's own scripts, tests).
    pub fn doc_handle(&self) -> Arc<Mutex<Document>> {
        Arc::clone(&self.doc)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn navigate(&mut self, url: &str) -> Result<()> {
        info!(url, "navigate");
        let doc = self.host.navigate(url).await?;
        *self.doc() = doc;
        self.url = url.to_string();
        Ok(())
    }

    pub async fn reload(&mut self) -> Result<()> {
        info!(url = self.url.as_str(), "reload");
        let doc = self.host.reload(&self.url).await?;
        *self.doc() = doc;
        Ok(())
    }
}
