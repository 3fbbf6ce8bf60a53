// src/prerender/manifest.rs
// =============================================================================
// This module describes what a prerender run produced.
//
// Every path that made it to disk is recorded exactly once, as one of:
// - a page (an HTML document)
// - an asset (any other 200 response, with its content type)
// - a redirect (a 3xx response, with its resolved location)
//
// `paths` lists the same paths in the order they were discovered, so output
// that iterates over it is reproducible between runs of the same site.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    /// Output file, relative to the output directory
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectEntry {
    pub status: u16,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestEntry {
    Page(PageEntry),
    Asset(AssetEntry),
    Redirect(RedirectEntry),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub pages: BTreeMap<String, PageEntry>,
    pub assets: BTreeMap<String, AssetEntry>,
    pub redirects: BTreeMap<String, RedirectEntry>,
    pub paths: Vec<String>,
    // index over `paths`; rebuilt on demand after deserializing
    #[serde(skip)]
    listed: HashSet<String>,
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.pages == other.pages
            && self.assets == other.assets
            && self.redirects == other.redirects
            && self.paths == other.paths
    }
}

impl Eq for Manifest {}

impl Manifest {
    /// True if `decoded` already has an entry of any kind
    pub fn contains(&self, decoded: &str) -> bool {
        self.pages.contains_key(decoded)
            || self.assets.contains_key(decoded)
            || self.redirects.contains_key(decoded)
    }

    /// The entry recorded for `decoded`, whatever its kind
    pub fn entry(&self, decoded: &str) -> Option<ManifestEntry> {
        if let Some(page) = self.pages.get(decoded) {
            return Some(ManifestEntry::Page(page.clone()));
        }
        if let Some(asset) = self.assets.get(decoded) {
            return Some(ManifestEntry::Asset(asset.clone()));
        }
        self.redirects
            .get(decoded)
            .map(|redirect| ManifestEntry::Redirect(redirect.clone()))
    }

    /// Every entry with its path, sorted by path
    pub fn entries(&self) -> Vec<(&str, ManifestEntry)> {
        let pages = self
            .pages
            .iter()
            .map(|(path, page)| (path.as_str(), ManifestEntry::Page(page.clone())));
        let assets = self
            .assets
            .iter()
            .map(|(path, asset)| (path.as_str(), ManifestEntry::Asset(asset.clone())));
        let redirects = self
            .redirects
            .iter()
            .map(|(path, redirect)| (path.as_str(), ManifestEntry::Redirect(redirect.clone())));

        let mut entries: Vec<_> = pages.chain(assets).chain(redirects).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Records `entry` for `decoded` and appends `listed` to `paths`.
    /// The first entry for a path wins; returns false if one already existed.
    pub(crate) fn insert(&mut self, decoded: &str, entry: ManifestEntry, listed: String) -> bool {
        if self.contains(decoded) {
            return false;
        }

        match entry {
            ManifestEntry::Page(page) => {
                self.pages.insert(decoded.to_string(), page);
            }
            ManifestEntry::Asset(asset) => {
                self.assets.insert(decoded.to_string(), asset);
            }
            ManifestEntry::Redirect(redirect) => {
                self.redirects.insert(decoded.to_string(), redirect);
            }
        }

        if self.listed.len() != self.paths.len() {
            self.listed = self.paths.iter().cloned().collect();
        }
        if self.listed.insert(listed.clone()) {
            self.paths.push(listed);
        }
        true
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.pages.len() + self.assets.len() + self.redirects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
