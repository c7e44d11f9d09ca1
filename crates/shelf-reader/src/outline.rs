//! Table-of-contents entries and their resolution to navigable targets
//!
//! PDF destinations come in three vendor encodings. Resolution tries, in
//! order: the page-reference lookup, the raw zero-based index, and the
//! named-destination lookup. EPUB entries resolve by href (or CFI) first and
//! fall back to the spine item id. Unresolvable entries yield `None` so an
//! outline listing can skip them.

use crate::engine::DocumentEngine;
use crate::locations::ContentPoint;
use crate::types::{LocationToken, NavTarget};
use std::sync::Arc;

/// Destination of a PDF outline item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfDest {
    /// Indirect reference to a page object
    Reference { num: u32, generation: u16 },
    /// Zero-based page index
    Index(i64),
    /// Key into the document's named destinations
    Named(String),
}

/// What an outline entry points at, per format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRef {
    Pdf(Option<PdfDest>),
    Epub {
        href: Option<String>,
        id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub title: String,
    pub level: usize,
    pub target: EntryRef,
    pub children: Vec<OutlineEntry>,
}

impl OutlineEntry {
    /// Depth-first iteration over this entry and its descendants
    pub fn walk(&self) -> Vec<&OutlineEntry> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

/// Page lookups a PDF engine provides to the resolver
pub trait PageDirectory {
    fn page_count(&self) -> u32;
    /// Zero-based index of the page object `num gen R`
    fn page_index_of(&self, num: u32, generation: u16) -> Option<u32>;
    fn named_destination(&self, name: &str) -> Option<PdfDest>;
}

/// Spine lookups an EPUB engine provides to the resolver
pub trait SpineDirectory {
    fn spine_len(&self) -> usize;
    fn spine_index_of_href(&self, path: &str) -> Option<usize>;
    fn spine_index_of_id(&self, id: &str) -> Option<usize>;
    /// Text offset of the element with `fragment` as its id
    fn anchor_offset(&self, spine_index: usize, fragment: &str) -> Option<usize>;
}

/// 1-based page for a PDF destination, clamped to the document
pub fn resolve_pdf<D: PageDirectory + ?Sized>(directory: &D, dest: &PdfDest) -> Option<u32> {
    resolve_pdf_inner(directory, dest, true)
}

fn resolve_pdf_inner<D: PageDirectory + ?Sized>(
    directory: &D,
    dest: &PdfDest,
    follow_names: bool,
) -> Option<u32> {
    let total = directory.page_count();
    if total == 0 {
        return None;
    }

    let index = match dest {
        PdfDest::Reference { num, generation } => {
            match directory.page_index_of(*num, *generation) {
                Some(index) => index as i64,
                // Some producers store the page index in the object number
                None if *num < total => *num as i64,
                None => return None,
            }
        }
        PdfDest::Index(index) => *index,
        PdfDest::Named(name) if follow_names => {
            let resolved = directory.named_destination(name)?;
            return resolve_pdf_inner(directory, &resolved, false);
        }
        PdfDest::Named(_) => return None,
    };

    Some((index.saturating_add(1)).clamp(1, total as i64) as u32)
}

/// Location token for an EPUB entry
pub fn resolve_epub<D: SpineDirectory + ?Sized>(
    directory: &D,
    href: Option<&str>,
    id: Option<&str>,
) -> Option<LocationToken> {
    if let Some(href) = href.map(str::trim).filter(|h| !h.is_empty()) {
        if href.starts_with("epubcfi(") {
            let point = ContentPoint::parse(&LocationToken::new(href))?;
            return (point.spine_index < directory.spine_len()).then(|| point.to_token());
        }

        let (path, fragment) = match href.split_once('#') {
            Some((path, fragment)) => (path, Some(fragment)),
            None => (href, None),
        };
        if let Some(spine_index) = directory.spine_index_of_href(path) {
            let offset = fragment
                .and_then(|f| directory.anchor_offset(spine_index, f))
                .unwrap_or(0);
            return Some(ContentPoint::new(spine_index, offset).to_token());
        }
    }

    let spine_index = directory.spine_index_of_id(id?)?;
    Some(ContentPoint::new(spine_index, 0).to_token())
}

/// An outline entry paired with the target it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub title: String,
    pub level: usize,
    pub target: NavTarget,
}

/// Resolves outline entries against one open document
pub struct OutlineResolver {
    engine: Arc<dyn DocumentEngine>,
}

impl OutlineResolver {
    pub fn new(engine: Arc<dyn DocumentEngine>) -> Self {
        Self { engine }
    }

    pub fn entries(&self) -> Vec<OutlineEntry> {
        self.engine.outline()
    }

    pub fn resolve(&self, entry: &OutlineEntry) -> Option<NavTarget> {
        self.engine.resolve(entry)
    }

    /// Flatten and resolve the whole outline, skipping entries that do not resolve
    pub fn resolve_all(&self) -> Vec<ResolvedEntry> {
        let entries = self.entries();
        let mut resolved = Vec::new();
        for entry in entries.iter().flat_map(OutlineEntry::walk) {
            match self.resolve(entry) {
                Some(target) => resolved.push(ResolvedEntry {
                    title: entry.title.clone(),
                    level: entry.level,
                    target,
                }),
                None => log::debug!("Skipping unresolvable outline entry '{}'", entry.title),
            }
        }
        resolved
    }
}
