//! Reflowable engine for EPUB containers
//!
//! The container is unpacked once at open time: every spine document is
//! reduced to its text, and the table of contents is read from the EPUB 3
//! navigation document or, failing that, the NCX. Positions are character
//! offsets into that text, carried as location tokens.

use super::{DocumentEngine, EngineAdapter, ErrorBudget, Readiness, RenderedView};
use crate::locations::ContentPoint;
use crate::options::ReaderConfig;
use crate::outline::{EntryRef, OutlineEntry, SpineDirectory, resolve_epub};
use crate::types::*;
use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

pub struct EpubAdapter;

#[async_trait]
impl EngineAdapter for EpubAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Epub
    }

    fn readiness(&self) -> Readiness {
        Readiness::Signals
    }

    async fn open(
        &self,
        bytes: Vec<u8>,
        budget: Arc<ErrorBudget>,
        config: &ReaderConfig,
    ) -> Result<Arc<dyn DocumentEngine>> {
        let page_chars = config.epub_page_chars;
        let engine =
            tokio::task::spawn_blocking(move || EpubEngine::parse(&bytes, &budget, page_chars))
                .await??;
        Ok(Arc::new(engine))
    }
}

#[derive(Debug, Clone)]
struct SpineItem {
    id: String,
    /// Full path inside the archive
    path: String,
    text: String,
    chars: usize,
    /// Element ids and the text offset where each begins
    anchors: HashMap<String, usize>,
}

pub struct EpubEngine {
    spine: Vec<SpineItem>,
    /// Characters before each spine item
    prefix: Vec<usize>,
    total_chars: usize,
    toc: Vec<OutlineEntry>,
    page_chars: usize,
    closed: AtomicBool,
}

impl EpubEngine {
    pub fn parse(bytes: &[u8], budget: &ErrorBudget, page_chars: usize) -> Result<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| budget.corrupt(&ReaderError::from(e)))?;

        let container = read_entry(&mut archive, CONTAINER_PATH).map_err(|e| budget.corrupt(&e))?;
        let opf_path = parse_container(&xml_text(&container))
            .map_err(|e| budget.corrupt(&e))?
            .ok_or_else(|| ReaderError::CorruptDocument {
                errors: budget.count().max(1),
                last: "container.xml names no package document".to_string(),
            })?;
        let opf_dir = parent_dir(&opf_path);

        let opf_bytes = read_entry(&mut archive, &opf_path).map_err(|e| budget.corrupt(&e))?;
        let package = parse_opf(&xml_text(&opf_bytes)).map_err(|e| budget.corrupt(&e))?;

        let mut spine = Vec::with_capacity(package.spine.len());
        for idref in &package.spine {
            let Some(item) = package.manifest.get(idref) else {
                budget.record(format!("spine item '{idref}' is not in the manifest"))?;
                continue;
            };
            let path = join_path(&opf_dir, &item.href);
            let content = match read_entry(&mut archive, &path) {
                Ok(content) => content,
                Err(e) => {
                    budget.record(format!("{path}: {e}"))?;
                    continue;
                }
            };

            let (extracted, error) = extract_text(&xml_text(&content));
            if let Some(error) = error {
                budget.record(format!("{path}: {error}"))?;
            }
            spine.push(SpineItem {
                id: idref.clone(),
                path,
                text: extracted.text,
                chars: extracted.chars,
                anchors: extracted.anchors,
            });
        }

        if spine.is_empty() {
            return Err(ReaderError::CorruptDocument {
                errors: budget.count().max(1),
                last: "no readable content documents".to_string(),
            });
        }

        let toc = read_toc(&mut archive, &package, &opf_dir, budget)?;

        let mut prefix = Vec::with_capacity(spine.len());
        let mut total_chars = 0;
        for item in &spine {
            prefix.push(total_chars);
            total_chars += item.chars;
        }

        log::info!(
            "Opened EPUB: {} spine items, {} characters, {} top-level chapters",
            spine.len(),
            total_chars,
            toc.len()
        );

        Ok(Self {
            spine,
            prefix,
            total_chars,
            toc,
            page_chars: page_chars.max(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Clamp a position to existing content
    fn point_of(&self, position: &Position) -> Option<ContentPoint> {
        let Position::Location(token) = position else {
            return None;
        };
        let point = ContentPoint::parse(token)?;
        let item = self.spine.get(point.spine_index)?;
        Some(ContentPoint::new(
            point.spine_index,
            point.offset.min(item.chars.saturating_sub(1)),
        ))
    }

    fn last_page_start(&self, spine_index: usize) -> usize {
        let chars = self.spine[spine_index].chars;
        if chars == 0 {
            0
        } else {
            (chars - 1) / self.page_chars * self.page_chars
        }
    }

    fn fraction_at(&self, point: ContentPoint) -> Option<f64> {
        if self.total_chars == 0 {
            return None;
        }
        let before = self.prefix.get(point.spine_index)? + point.offset;
        Some(before as f64 / self.total_chars as f64)
    }
}

impl SpineDirectory for EpubEngine {
    fn spine_len(&self) -> usize {
        self.spine.len()
    }

    fn spine_index_of_href(&self, path: &str) -> Option<usize> {
        let path = percent_decode(path);
        let path = path.trim_start_matches("./");
        self.spine
            .iter()
            .position(|item| item.path == path)
            .or_else(|| {
                let suffix = format!("/{path}");
                self.spine.iter().position(|item| item.path.ends_with(&suffix))
            })
    }

    fn spine_index_of_id(&self, id: &str) -> Option<usize> {
        self.spine.iter().position(|item| item.id == id)
    }

    fn anchor_offset(&self, spine_index: usize, fragment: &str) -> Option<usize> {
        self.spine.get(spine_index)?.anchors.get(fragment).copied()
    }
}

#[async_trait]
impl DocumentEngine for EpubEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Epub
    }

    fn unit_count(&self) -> u32 {
        self.spine.len() as u32
    }

    fn start_position(&self) -> Position {
        Position::Location(ContentPoint::new(0, 0).to_token())
    }

    fn step(&self, from: &Position, direction: Direction) -> Option<Position> {
        let point = self.point_of(from)?;
        let next = match direction {
            Direction::Forward => {
                let offset = point.offset + self.page_chars;
                if offset < self.spine[point.spine_index].chars {
                    ContentPoint::new(point.spine_index, offset)
                } else if point.spine_index + 1 < self.spine.len() {
                    ContentPoint::new(point.spine_index + 1, 0)
                } else {
                    return None;
                }
            }
            Direction::Backward => {
                if point.offset > 0 {
                    ContentPoint::new(point.spine_index, point.offset.saturating_sub(self.page_chars))
                } else if point.spine_index > 0 {
                    let previous = point.spine_index - 1;
                    ContentPoint::new(previous, self.last_page_start(previous))
                } else {
                    return None;
                }
            }
        };
        Some(Position::Location(next.to_token()))
    }

    fn locate(&self, target: &NavTarget) -> Option<Position> {
        match target {
            NavTarget::Location(token) => self
                .point_of(&Position::Location(token.clone()))
                .map(|point| Position::Location(point.to_token())),
            NavTarget::Href(href) => {
                resolve_epub(self, Some(href.as_str()), None).map(Position::Location)
            }
            NavTarget::Page(_) => None,
        }
    }

    async fn render(&self, position: &Position) -> Result<RenderedView> {
        if self.is_closed() {
            return Err(ReaderError::SessionClosed);
        }
        let point = self.point_of(position).ok_or_else(|| {
            ReaderError::NavigationFailed(format!("{position} is not a location in this book"))
        })?;
        let item = &self.spine[point.spine_index];

        Ok(RenderedView {
            position: Position::Location(point.to_token()),
            label: format!(
                "{} ({} of {})",
                item.path,
                point.spine_index + 1,
                self.spine.len()
            ),
            text: item
                .text
                .chars()
                .skip(point.offset)
                .take(self.page_chars)
                .collect(),
            size: None,
            reported_fraction: self.fraction_at(point),
        })
    }

    fn outline(&self) -> Vec<OutlineEntry> {
        self.toc.clone()
    }

    fn resolve(&self, entry: &OutlineEntry) -> Option<NavTarget> {
        match &entry.target {
            EntryRef::Epub { href, id } => {
                resolve_epub(self, href.as_deref(), id.as_deref()).map(NavTarget::Location)
            }
            EntryRef::Pdf(_) => None,
        }
    }

    fn content_lengths(&self) -> Option<Vec<usize>> {
        Some(self.spine.iter().map(|item| item.chars).collect())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("Closed EPUB engine");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Archive Access
// =============================================================================

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<Vec<u8>> {
    let mut file = archive.by_name(path)?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

fn xml_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Directory part of an archive path, with a trailing slash when non-empty
fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..=i].to_string(),
        None => String::new(),
    }
}

/// Resolve `href` against `base_dir`, keeping any fragment
fn join_path(base_dir: &str, href: &str) -> String {
    let (path, fragment) = match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    };

    let mut joined = if path.is_empty() {
        String::new()
    } else {
        let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
        let decoded = percent_decode(path);
        for part in decoded.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        parts.join("/")
    };

    if let Some(fragment) = fragment {
        joined.push('#');
        joined.push_str(fragment);
    }
    joined
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// =============================================================================
// Package Documents
// =============================================================================

struct ManifestItem {
    href: String,
    media_type: String,
    properties: String,
}

struct Package {
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
    toc_id: Option<String>,
}

fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| local_name(a.key.as_ref()) == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn parse_container(content: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"rootfile" => {
                if let Some(path) = attr(&e, b"full-path") {
                    return Ok(Some(path));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn parse_opf(content: &str) -> Result<Package> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut package = Package {
        manifest: HashMap::new(),
        spine: Vec::new(),
        toc_id: None,
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match local_name(e.name().as_ref()) {
                b"item" => {
                    if let (Some(id), Some(href)) = (attr(&e, b"id"), attr(&e, b"href")) {
                        package.manifest.insert(
                            id,
                            ManifestItem {
                                href,
                                media_type: attr(&e, b"media-type").unwrap_or_default(),
                                properties: attr(&e, b"properties").unwrap_or_default(),
                            },
                        );
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr(&e, b"idref") {
                        package.spine.push(idref);
                    }
                }
                b"spine" => package.toc_id = attr(&e, b"toc"),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(package)
}

// =============================================================================
// Content Text
// =============================================================================

const BLOCK_ELEMENTS: &[&[u8]] = &[
    b"p", b"div", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"li", b"tr", b"blockquote",
    b"section", b"article", b"pre", b"dt", b"dd", b"figcaption", b"table", b"hr",
];

const SKIPPED_ELEMENTS: &[&[u8]] = &[b"head", b"script", b"style"];

#[derive(Debug, Default)]
struct ExtractedText {
    text: String,
    chars: usize,
    anchors: HashMap<String, usize>,
}

impl ExtractedText {
    fn push(&mut self, c: char) {
        let c = if c.is_whitespace() && c != '\n' && c != '\u{a0}' { ' ' } else { c };
        if (c == ' ' || c == '\n') && (self.text.is_empty() || self.text.ends_with([' ', '\n'])) {
            if c == '\n' && self.text.ends_with(' ') {
                self.text.pop();
                self.text.push('\n');
            }
            return;
        }
        self.text.push(c);
        self.chars += 1;
    }

    fn push_str(&mut self, s: &str) {
        s.chars().for_each(|c| self.push(c));
    }

    fn anchor(&mut self, e: &BytesStart) {
        if let Some(id) = attr(e, b"id") {
            self.anchors.entry(id).or_insert(self.chars);
        }
    }
}

/// Reduce an XHTML document to text; a parse error keeps the text read so far
fn extract_text(content: &str) -> (ExtractedText, Option<quick_xml::Error>) {
    let mut reader = Reader::from_str(content);
    let mut out = ExtractedText::default();
    let mut skip_depth = 0usize;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => return (out, Some(e)),
        };
        match event {
            Event::Start(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if SKIPPED_ELEMENTS.contains(&local) {
                    skip_depth += 1;
                } else if skip_depth == 0 {
                    out.anchor(&e);
                    if BLOCK_ELEMENTS.contains(&local) {
                        out.push('\n');
                    }
                }
            }
            Event::Empty(e) if skip_depth == 0 => {
                out.anchor(&e);
                let name = e.name();
                if matches!(local_name(name.as_ref()), b"br" | b"hr") {
                    out.push('\n');
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if SKIPPED_ELEMENTS.contains(&local) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if skip_depth == 0 && BLOCK_ELEMENTS.contains(&local) {
                    out.push('\n');
                }
            }
            Event::Text(e) if skip_depth == 0 => out.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::CData(e) if skip_depth == 0 => out.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::GeneralRef(e) if skip_depth == 0 => {
                if let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    out.push(resolved);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if out.text.ends_with([' ', '\n']) {
        out.text.pop();
        out.chars -= 1;
    }
    (out, None)
}

fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "apos" => return Some('\''),
        "quot" => return Some('"'),
        "lt" => return Some('<'),
        "gt" => return Some('>'),
        "amp" => return Some('&'),
        "nbsp" => return Some('\u{a0}'),
        "mdash" => return Some('\u{2014}'),
        "ndash" => return Some('\u{2013}'),
        "hellip" => return Some('\u{2026}'),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        entity.strip_prefix('#')?.parse().ok()?
    };
    char::from_u32(code)
}

// =============================================================================
// Table of Contents
// =============================================================================

fn read_toc<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    package: &Package,
    opf_dir: &str,
    budget: &ErrorBudget,
) -> Result<Vec<OutlineEntry>> {
    let nav = package
        .manifest
        .values()
        .find(|item| item.properties.split_whitespace().any(|p| p == "nav"));
    let ncx = package
        .toc_id
        .as_ref()
        .and_then(|id| package.manifest.get(id))
        .or_else(|| package.manifest.values().find(|item| item.media_type == NCX_MEDIA_TYPE));

    for (item, is_nav) in [(nav, true), (ncx, false)] {
        let Some(item) = item else { continue };
        let path = join_path(opf_dir, &item.href);
        let content = match read_entry(archive, &path) {
            Ok(content) => xml_text(&content),
            Err(e) => {
                budget.record(format!("{path}: {e}"))?;
                continue;
            }
        };

        let base = parent_dir(&path);
        let parsed = if is_nav {
            parse_nav(&content, &base)
        } else {
            parse_ncx(&content, &base)
        };
        match parsed {
            Ok(entries) if !entries.is_empty() => return Ok(entries),
            Ok(_) => {}
            Err(e) => budget.record(format!("{path}: {e}"))?,
        }
    }

    Ok(Vec::new())
}

struct Frame {
    id: Option<String>,
    label: String,
    href: Option<String>,
    level: usize,
    children: Vec<OutlineEntry>,
}

impl Frame {
    fn new(id: Option<String>, level: usize) -> Self {
        Self {
            id,
            label: String::new(),
            href: None,
            level,
            children: Vec::new(),
        }
    }

    fn finish(self) -> OutlineEntry {
        let label = self.label.split_whitespace().collect::<Vec<_>>().join(" ");
        OutlineEntry {
            title: if label.is_empty() {
                "Untitled".to_string()
            } else {
                label
            },
            level: self.level,
            target: EntryRef::Epub {
                href: self.href,
                id: self.id,
            },
            children: self.children,
        }
    }
}

fn attach(stack: &mut [Frame], roots: &mut Vec<OutlineEntry>, entry: OutlineEntry) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(entry),
        None => roots.push(entry),
    }
}

/// EPUB 3 navigation document: the `<nav epub:type="toc">` list
fn parse_nav(content: &str, base_dir: &str) -> Result<Vec<OutlineEntry>> {
    let mut reader = Reader::from_str(content);
    let mut roots = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_toc = false;
    let mut list_depth = 0usize;
    let mut in_label = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"nav" => {
                        let kind = attr(&e, b"type").or_else(|| attr(&e, b"role"));
                        if kind.is_some_and(|k| k.split_whitespace().any(|t| t == "toc" || t == "doc-toc")) {
                            in_toc = true;
                        }
                    }
                    _ if !in_toc => {}
                    b"ol" => list_depth += 1,
                    b"li" => stack.push(Frame::new(attr(&e, b"id"), list_depth.saturating_sub(1))),
                    local @ (b"a" | b"span") => {
                        if let Some(frame) = stack.last_mut() {
                            in_label = true;
                            if local == b"a" {
                                frame.href = attr(&e, b"href").map(|h| join_path(base_dir, &h));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) if in_label => {
                if let Some(frame) = stack.last_mut() {
                    frame.label.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) if in_label => {
                if let (Some(frame), Some(c)) = (
                    stack.last_mut(),
                    resolve_entity(&String::from_utf8_lossy(e.as_ref())),
                ) {
                    frame.label.push(c);
                }
            }
            Event::End(e) if in_toc => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"a" | b"span" => in_label = false,
                    b"li" => {
                        if let Some(frame) = stack.pop() {
                            let entry = frame.finish();
                            attach(&mut stack, &mut roots, entry);
                        }
                    }
                    b"ol" => list_depth = list_depth.saturating_sub(1),
                    b"nav" => break,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(roots)
}

/// EPUB 2 NCX `navMap`
fn parse_ncx(content: &str, base_dir: &str) -> Result<Vec<OutlineEntry>> {
    let mut reader = Reader::from_str(content);
    let mut roots = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"navPoint" => stack.push(Frame::new(attr(&e, b"id"), stack.len())),
                    b"text" => in_text = !stack.is_empty(),
                    b"content" => {
                        if let Some(frame) = stack.last_mut() {
                            frame.href = attr(&e, b"src").map(|s| join_path(base_dir, &s));
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                let name = e.name();
                if local_name(name.as_ref()) == b"content" {
                    if let Some(frame) = stack.last_mut() {
                        frame.href = attr(&e, b"src").map(|s| join_path(base_dir, &s));
                    }
                }
            }
            Event::Text(e) if in_text => {
                if let Some(frame) = stack.last_mut() {
                    frame.label.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) if in_text => {
                if let (Some(frame), Some(c)) = (
                    stack.last_mut(),
                    resolve_entity(&String::from_utf8_lossy(e.as_ref())),
                ) {
                    frame.label.push(c);
                }
            }
            Event::End(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"text" => in_text = false,
                    b"navPoint" => {
                        if let Some(frame) = stack.pop() {
                            let entry = frame.finish();
                            attach(&mut stack, &mut roots, entry);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(roots)
}
