//! Fixed-layout engine backed by `lopdf`

use super::{DocumentEngine, EngineAdapter, ErrorBudget, Readiness, RenderedView};
use crate::options::ReaderConfig;
use crate::outline::{EntryRef, OutlineEntry, PageDirectory, PdfDest, resolve_pdf};
use crate::types::*;
use async_trait::async_trait;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Name trees deeper than this are treated as malformed
const MAX_NAME_TREE_DEPTH: usize = 32;

pub struct PdfAdapter;

#[async_trait]
impl EngineAdapter for PdfAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Pdf
    }

    fn readiness(&self) -> Readiness {
        Readiness::Resolves
    }

    async fn open(
        &self,
        bytes: Vec<u8>,
        budget: Arc<ErrorBudget>,
        _config: &ReaderConfig,
    ) -> Result<Arc<dyn DocumentEngine>> {
        let engine = tokio::task::spawn_blocking(move || PdfEngine::parse(&bytes, &budget))
            .await??;
        Ok(Arc::new(engine))
    }
}

pub struct PdfEngine {
    doc: Arc<Document>,
    /// Page object ids in page order
    pages: Vec<ObjectId>,
    page_lookup: HashMap<ObjectId, u32>,
    named: HashMap<String, PdfDest>,
    outline: Vec<OutlineEntry>,
    closed: AtomicBool,
}

impl PdfEngine {
    /// Parse a PDF held in memory
    pub fn parse(bytes: &[u8], budget: &ErrorBudget) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| budget.corrupt(&ReaderError::from(e)))?;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            let message = "document has no pages";
            budget.record(message)?;
            return Err(ReaderError::CorruptDocument {
                errors: budget.count(),
                last: message.to_string(),
            });
        }
        let page_lookup = pages
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index as u32))
            .collect();

        let named = read_named_destinations(&doc, budget)?;
        let outline = read_outline(&doc, budget)?;

        log::info!(
            "Opened PDF: {} pages, {} outline entries, {} named destinations",
            pages.len(),
            outline.len(),
            named.len()
        );

        Ok(Self {
            doc: Arc::new(doc),
            pages,
            page_lookup,
            named,
            outline,
            closed: AtomicBool::new(false),
        })
    }

    fn total(&self) -> u32 {
        self.pages.len() as u32
    }
}

impl PageDirectory for PdfEngine {
    fn page_count(&self) -> u32 {
        self.total()
    }

    fn page_index_of(&self, num: u32, generation: u16) -> Option<u32> {
        self.page_lookup.get(&(num, generation)).copied()
    }

    fn named_destination(&self, name: &str) -> Option<PdfDest> {
        self.named.get(name).cloned()
    }
}

#[async_trait]
impl DocumentEngine for PdfEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Pdf
    }

    fn unit_count(&self) -> u32 {
        self.total()
    }

    fn start_position(&self) -> Position {
        Position::Page(1)
    }

    fn step(&self, from: &Position, direction: Direction) -> Option<Position> {
        let Position::Page(page) = from else {
            return None;
        };
        let next = match direction {
            Direction::Forward => page.checked_add(1)?,
            Direction::Backward => page.checked_sub(1)?,
        };
        (1..=self.total()).contains(&next).then_some(Position::Page(next))
    }

    fn locate(&self, target: &NavTarget) -> Option<Position> {
        match target {
            NavTarget::Page(page) if (1..=self.total()).contains(page) => {
                Some(Position::Page(*page))
            }
            _ => None,
        }
    }

    async fn render(&self, position: &Position) -> Result<RenderedView> {
        if self.is_closed() {
            return Err(ReaderError::SessionClosed);
        }
        let page = match position {
            Position::Page(page) if (1..=self.total()).contains(page) => *page,
            other => {
                return Err(ReaderError::NavigationFailed(format!(
                    "{other} is not a page of this document"
                )));
            }
        };

        let doc = Arc::clone(&self.doc);
        let page_id = self.pages[(page - 1) as usize];
        let total = self.total();
        let position = position.clone();

        tokio::task::spawn_blocking(move || {
            let page_dict = doc.get_dictionary(page_id)?;
            let content = page_content(&doc, page_dict)?;
            Ok::<_, ReaderError>(RenderedView {
                position,
                label: format!("Page {page} of {total}"),
                text: extract_text(&content),
                size: page_dimensions(page_dict),
                reported_fraction: None,
            })
        })
        .await?
    }

    fn outline(&self) -> Vec<OutlineEntry> {
        self.outline.clone()
    }

    fn resolve(&self, entry: &OutlineEntry) -> Option<NavTarget> {
        match &entry.target {
            EntryRef::Pdf(Some(dest)) => resolve_pdf(self, dest).map(NavTarget::Page),
            _ => None,
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("Closed PDF engine");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Page Content
// =============================================================================

fn page_content(doc: &Document, page_dict: &Dictionary) -> Result<Vec<u8>> {
    let contents = match page_dict.get(b"Contents") {
        Ok(c) => c,
        Err(_) => return Ok(Vec::new()),
    };

    let ids: Vec<ObjectId> = match contents {
        Object::Reference(id) => vec![*id],
        Object::Array(arr) => arr.iter().filter_map(|o| o.as_reference().ok()).collect(),
        _ => Vec::new(),
    };

    let mut result = Vec::new();
    for id in ids {
        let stream = doc.get_object(id)?.as_stream()?;
        let content = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        result.extend_from_slice(&content);
        result.push(b'\n');
    }
    Ok(result)
}

/// Text shown by `Tj`, `TJ`, `'` and `"` operators
fn extract_text(content: &[u8]) -> String {
    let Ok(content) = Content::decode(content) else {
        return String::new();
    };

    let mut text = String::new();
    for op in &content.operations {
        match op.operator.as_str() {
            "Tj" | "'" | "\"" => {
                if let Some(Object::String(bytes, _)) = op.operands.last() {
                    text.push_str(&decode_text(bytes));
                }
            }
            "TJ" => {
                if let Some(Object::Array(parts)) = op.operands.first() {
                    for part in parts {
                        if let Object::String(bytes, _) = part {
                            text.push_str(&decode_text(bytes));
                        }
                    }
                }
            }
            "T*" | "Td" | "TD" | "ET" => {
                if !text.ends_with('\n') && !text.is_empty() {
                    text.push('\n');
                }
            }
            _ => {}
        }
    }
    text.trim_end().to_string()
}

fn page_dimensions(page_dict: &Dictionary) -> Option<(f32, f32)> {
    let media_box = page_dict.get(b"MediaBox").and_then(|o| o.as_array()).ok()?;
    let number = |obj: &Object| match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    };
    let (x0, y0) = (number(media_box.first()?)?, number(media_box.get(1)?)?);
    let (x1, y1) = (number(media_box.get(2)?)?, number(media_box.get(3)?)?);
    Some(((x1 - x0).abs(), (y1 - y0).abs()))
}

/// Decode a PDF text string: UTF-16BE with a byte-order mark, otherwise Latin-1
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

// =============================================================================
// Outline and Destinations
// =============================================================================

fn deref<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn deref_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    deref(doc, obj)?.as_dict().ok()
}

/// Interpret a destination in any of its encodings
fn parse_dest(doc: &Document, obj: &Object) -> Option<PdfDest> {
    match deref(doc, obj)? {
        Object::Array(items) => match items.first()? {
            Object::Reference((num, generation)) => Some(PdfDest::Reference {
                num: *num,
                generation: *generation,
            }),
            Object::Integer(index) => Some(PdfDest::Index(*index)),
            _ => None,
        },
        Object::Name(name) => Some(PdfDest::Named(String::from_utf8_lossy(name).into_owned())),
        Object::String(bytes, _) => Some(PdfDest::Named(decode_text(bytes))),
        Object::Dictionary(dict) => parse_dest(doc, dict.get(b"D").ok()?),
        _ => None,
    }
}

/// Destination of an outline item: `/Dest`, or a GoTo action's `/D`
fn item_dest(doc: &Document, item: &Dictionary) -> Option<PdfDest> {
    if let Ok(dest) = item.get(b"Dest") {
        return parse_dest(doc, dest);
    }
    let action = deref_dict(doc, item.get(b"A").ok()?)?;
    let is_goto = action
        .get(b"S")
        .and_then(|s| s.as_name())
        .is_ok_and(|s| s == b"GoTo");
    if !is_goto {
        return None;
    }
    parse_dest(doc, action.get(b"D").ok()?)
}

fn read_outline(doc: &Document, budget: &ErrorBudget) -> Result<Vec<OutlineEntry>> {
    let Ok(catalog) = doc.catalog() else {
        budget.record("missing document catalog")?;
        return Ok(Vec::new());
    };
    let Some(root) = catalog.get(b"Outlines").ok().and_then(|o| deref_dict(doc, o)) else {
        return Ok(Vec::new());
    };

    let mut visited = HashSet::new();
    read_outline_level(doc, root.get(b"First").ok(), 0, &mut visited, budget)
}

fn read_outline_level(
    doc: &Document,
    first: Option<&Object>,
    level: usize,
    visited: &mut HashSet<ObjectId>,
    budget: &ErrorBudget,
) -> Result<Vec<OutlineEntry>> {
    let mut entries = Vec::new();
    let mut next = first.and_then(|o| o.as_reference().ok());

    while let Some(id) = next {
        if !visited.insert(id) {
            budget.record(format!("outline item {} {} R forms a cycle", id.0, id.1))?;
            break;
        }
        let item = match doc.get_dictionary(id) {
            Ok(item) => item,
            Err(e) => {
                budget.record(format!("outline item {} {} R: {}", id.0, id.1, e))?;
                break;
            }
        };

        let title = item
            .get(b"Title")
            .ok()
            .and_then(|t| deref(doc, t))
            .and_then(|t| t.as_str().ok())
            .map(decode_text)
            .unwrap_or_else(|| "Untitled".to_string());

        let children = read_outline_level(doc, item.get(b"First").ok(), level + 1, visited, budget)?;

        entries.push(OutlineEntry {
            title,
            level,
            target: EntryRef::Pdf(item_dest(doc, item)),
            children,
        });

        next = item.get(b"Next").ok().and_then(|o| o.as_reference().ok());
    }

    Ok(entries)
}

/// Named destinations from both the catalog `/Dests` dictionary and the `/Names` tree
fn read_named_destinations(doc: &Document, budget: &ErrorBudget) -> Result<HashMap<String, PdfDest>> {
    let mut named = HashMap::new();
    let Ok(catalog) = doc.catalog() else {
        return Ok(named);
    };

    if let Some(dests) = catalog.get(b"Dests").ok().and_then(|o| deref_dict(doc, o)) {
        for (key, value) in dests.iter() {
            if let Some(dest) = parse_dest(doc, value) {
                named.insert(String::from_utf8_lossy(key).into_owned(), dest);
            }
        }
    }

    let tree = catalog
        .get(b"Names")
        .ok()
        .and_then(|o| deref_dict(doc, o))
        .and_then(|names| names.get(b"Dests").ok())
        .and_then(|o| deref_dict(doc, o));
    if let Some(tree) = tree {
        walk_name_tree(doc, tree, 0, &mut named, budget)?;
    }

    Ok(named)
}

fn walk_name_tree(
    doc: &Document,
    node: &Dictionary,
    depth: usize,
    named: &mut HashMap<String, PdfDest>,
    budget: &ErrorBudget,
) -> Result<()> {
    if depth > MAX_NAME_TREE_DEPTH {
        budget.record("named destination tree is too deep")?;
        return Ok(());
    }

    if let Some(pairs) = node.get(b"Names").ok().and_then(|o| deref(doc, o)) {
        if let Ok(pairs) = pairs.as_array() {
            for pair in pairs.chunks(2) {
                let [key, value] = pair else {
                    budget.record("odd-length /Names array")?;
                    break;
                };
                let key = match deref(doc, key) {
                    Some(Object::String(bytes, _)) => decode_text(bytes),
                    Some(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
                    _ => continue,
                };
                if let Some(dest) = parse_dest(doc, value) {
                    named.insert(key, dest);
                }
            }
        }
    }

    if let Some(kids) = node.get(b"Kids").ok().and_then(|o| deref(doc, o)) {
        for kid in kids.as_array().map(|k| k.as_slice()).unwrap_or_default() {
            match deref_dict(doc, kid) {
                Some(kid) => walk_name_tree(doc, kid, depth + 1, named, budget)?,
                None => budget.record("unreadable name tree node")?,
            }
        }
    }

    Ok(())
}
