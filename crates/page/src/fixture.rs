//! Serde-loadable page fixtures.
//!
//! A fixture file is either a single page or a site of several pages keyed
//! by URL, so navigation inside a run can land on another fixture page.
//!
//! ```json
//! {"url": "https://shop.example/", "title": "Shop",
//!  "body": [{"tag": "button", "text": "Buy", "attrs": {"id": "buy"}}]}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dom::{Document, NodeId, Rect};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read fixture {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fixture: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Fixture site has no pages")]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<ElementSpec>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSpec {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub page_height: Option<i64>,
    #[serde(default)]
    pub body: Vec<ElementSpec>,
}

impl PageSpec {
    /// Build a live document with the given viewport height.
    pub fn build(&self, viewport_height: i64) -> Document {
        let mut doc = Document::new(&self.url, &self.title);
        doc.viewport_height = viewport_height;
        let body = doc.body();
        for el in &self.body {
            append_spec(&mut doc, body, el);
        }
        let content_bottom = doc
            .all()
            .into_iter()
            .filter_map(|n| doc.node(n).rect.map(|r| r.bottom().ceil() as i64))
            .max()
            .unwrap_or(0);
        doc.page_height = self
            .page_height
            .unwrap_or(content_bottom)
            .max(viewport_height);
        doc
    }
}

fn append_spec(doc: &mut Document, parent: NodeId, spec: &ElementSpec) -> NodeId {
    let id = doc.append(parent, &spec.tag);
    {
        let node = doc.node_mut(id);
        node.text = spec.text.clone();
        node.attrs = spec
            .attrs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        node.value = spec
            .value
            .clone()
            .or_else(|| spec.attrs.get("value").cloned())
            .unwrap_or_default();
        node.rect = spec.rect;
        node.hidden = spec.hidden;
    }
    for child in &spec.children {
        append_spec(doc, id, child);
    }
    id
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FixtureFile {
    Site { pages: Vec<PageSpec> },
    Page(PageSpec),
}

/// A set of pages; the first is the start page.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pages: Vec<PageSpec>,
}

impl Site {
    pub fn new(pages: Vec<PageSpec>) -> Result<Self, FixtureError> {
        if pages.is_empty() {
            return Err(FixtureError::Empty);
        }
        Ok(Self { pages })
    }

    pub fn single(page: PageSpec) -> Self {
        Self { pages: vec![page] }
    }

    pub fn from_json(json: &str) -> Result<Self, FixtureError> {
        match serde_json::from_str::<FixtureFile>(json)? {
            FixtureFile::Site { pages } => Self::new(pages),
            FixtureFile::Page(page) => Ok(Self::single(page)),
        }
    }

    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let raw = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn start_url(&self) -> &str {
        &self.pages[0].url
    }

    pub fn start(&self, viewport_height: i64) -> Document {
        self.pages[0].build(viewport_height)
    }

    /// The document shown after navigating to `url`. Unknown URLs load a
    /// blank page titled with the URL.
    pub fn open(&self, url: &str, viewport_height: i64) -> Document {
        let wanted = url.trim_end_matches('/');
        match self
            .pages
            .iter()
            .find(|p| p.url.trim_end_matches('/') == wanted)
        {
            Some(page) => {
                let mut doc = page.build(viewport_height);
                doc.url = url.to_string();
                doc
            }
            None => {
                let mut doc = Document::new(url, url);
                doc.viewport_height = viewport_height;
                doc.page_height = viewport_height;
                doc
            }
        }
    }
}
