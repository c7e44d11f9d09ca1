#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object, Stream};
use shelf_async_runtime::*;
use shelf_reader::engine::RenderedView;
use shelf_reader::outline::OutlineEntry;
use shelf_reader::{
    DocumentEngine, EngineAdapter, EngineHandle, EngineHost, EngineKind, ErrorBudget,
    ProgressSnapshot, Readiness, Result,
};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

// =============================================================================
// Documents
// =============================================================================

pub fn test_pdf_bytes(num_pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for i in 0..num_pages {
        let content = format!("BT /F1 12 Tf 72 720 Td (Page {}) Tj ET", i + 1);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
        ]));
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(num_pages as i64)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// EPUB with `chapters` spine items of about `chars` characters each
pub fn test_epub(chapters: usize, chars: usize) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default();

    zip.start_file("mimetype", stored).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();
    zip.start_file("META-INF/container.xml", deflated).unwrap();
    zip.write_all(
        br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
    )
    .unwrap();

    let mut manifest = String::new();
    let mut spine = String::new();
    let mut nav = String::new();
    for n in 1..=chapters {
        let text: String = "the quick brown fox ".chars().cycle().take(chars).collect();
        zip.start_file(format!("ch{n}.xhtml"), deflated).unwrap();
        write!(
            zip,
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><body><p>{text}</p></body></html>"#
        )
        .unwrap();
        manifest.push_str(&format!(
            r#"<item id="ch{n}" href="ch{n}.xhtml" media-type="application/xhtml+xml"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="ch{n}"/>"#));
        nav.push_str(&format!(r#"<li><a href="ch{n}.xhtml">Chapter {n}</a></li>"#));
    }

    zip.start_file("nav.xhtml", deflated).unwrap();
    write!(
        zip,
        r#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops"><body><nav epub:type="toc"><ol>{nav}</ol></nav></body></html>"#
    )
    .unwrap();
    zip.start_file("content.opf", deflated).unwrap();
    write!(
        zip,
        r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0"><manifest><item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>{manifest}</manifest><spine>{spine}</spine></package>"#
    )
    .unwrap();

    zip.finish().unwrap().into_inner()
}

// =============================================================================
// Fake engine
// =============================================================================

/// Paged engine with scriptable render delays and failures
pub struct FakeEngine {
    pages: u32,
    delays: HashMap<u32, Duration>,
    failing: HashSet<u32>,
    pub rendered: Mutex<Vec<u32>>,
    closed: AtomicBool,
}

impl FakeEngine {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            delays: HashMap::new(),
            failing: HashSet::new(),
            rendered: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn delay(mut self, page: u32, delay: Duration) -> Self {
        self.delays.insert(page, delay);
        self
    }

    pub fn fail(mut self, page: u32) -> Self {
        self.failing.insert(page);
        self
    }

    pub fn rendered(&self) -> Vec<u32> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentEngine for FakeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Pdf
    }

    fn unit_count(&self) -> u32 {
        self.pages
    }

    fn start_position(&self) -> Position {
        Position::Page(1)
    }

    fn step(&self, from: &Position, direction: shelf_reader::Direction) -> Option<Position> {
        let Position::Page(page) = from else { return None };
        let next = match direction {
            shelf_reader::Direction::Forward => page + 1,
            shelf_reader::Direction::Backward => page.checked_sub(1)?,
        };
        (1..=self.pages).contains(&next).then_some(Position::Page(next))
    }

    fn locate(&self, target: &NavTarget) -> Option<Position> {
        match target {
            NavTarget::Page(p) if (1..=self.pages).contains(p) => Some(Position::Page(*p)),
            _ => None,
        }
    }

    async fn render(&self, position: &Position) -> Result<RenderedView> {
        let Position::Page(page) = position else {
            return Err(ReaderError::NavigationFailed("not a page".into()));
        };
        if let Some(delay) = self.delays.get(page) {
            tokio::time::sleep(*delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ReaderError::SessionClosed);
        }
        if self.failing.contains(page) {
            return Err(ReaderError::Io(std::io::Error::other(format!(
                "page {page} unreadable"
            ))));
        }
        self.rendered.lock().unwrap().push(*page);
        Ok(RenderedView {
            position: position.clone(),
            label: format!("Page {page} of {}", self.pages),
            text: String::new(),
            size: None,
            reported_fraction: None,
        })
    }

    fn outline(&self) -> Vec<OutlineEntry> {
        Vec::new()
    }

    fn resolve(&self, _entry: &OutlineEntry) -> Option<NavTarget> {
        None
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Adapter that hands out one shared fake engine
pub struct FakeAdapter {
    pub engine: Arc<FakeEngine>,
}

#[async_trait]
impl EngineAdapter for FakeAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Pdf
    }

    fn readiness(&self) -> Readiness {
        Readiness::Resolves
    }

    async fn open(
        &self,
        _bytes: Vec<u8>,
        _budget: Arc<ErrorBudget>,
        _config: &ReaderConfig,
    ) -> Result<Arc<dyn DocumentEngine>> {
        let engine: Arc<dyn DocumentEngine> = self.engine.clone();
        Ok(engine)
    }
}

struct FakeHost {
    adapter: EngineHandle,
}

impl EngineHost for FakeHost {
    fn resource_url(&self, kind: EngineKind) -> String {
        format!("fake:{kind}")
    }

    fn inject(&self, _url: &str) {}

    fn lookup(&self, kind: EngineKind) -> Option<EngineHandle> {
        (kind == EngineKind::Pdf).then(|| self.adapter.clone())
    }
}

/// Loader whose PDF engine is `engine`
pub fn fake_loader(engine: Arc<FakeEngine>) -> Arc<EngineLoader> {
    let host = FakeHost {
        adapter: Arc::new(FakeAdapter { engine }),
    };
    Arc::new(EngineLoader::new(Arc::new(host), &ReaderConfig::default()))
}

// =============================================================================
// Fake library backend
// =============================================================================

#[derive(Default)]
pub struct FakeLibrary {
    pub books: Mutex<HashMap<u64, Vec<u8>>>,
    pub saves: Mutex<Vec<(u64, ProgressSnapshot)>>,
    pub fail_saves: AtomicBool,
}

impl FakeLibrary {
    pub fn with_bytes(self, book_id: u64, bytes: Vec<u8>) -> Self {
        self.books.lock().unwrap().insert(book_id, bytes);
        self
    }

    pub fn saved(&self) -> Vec<ProgressSnapshot> {
        self.saves.lock().unwrap().iter().map(|(_, s)| *s).collect()
    }
}

#[async_trait]
impl LibraryApi for FakeLibrary {
    async fn get_book(&self, book_id: u64, _auth: &AuthContext) -> Result<BookRecord> {
        Err(ReaderError::Http(format!("no record for {book_id}")))
    }

    async fn fetch_book_bytes(&self, book_id: u64, _auth: &AuthContext) -> Result<Vec<u8>> {
        self.books
            .lock()
            .unwrap()
            .get(&book_id)
            .cloned()
            .ok_or_else(|| ReaderError::Http(format!("book {book_id} not found")))
    }

    async fn save_progress(
        &self,
        book_id: u64,
        _auth: &AuthContext,
        snapshot: ProgressSnapshot,
    ) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ReaderError::Http("connection reset".into()));
        }
        self.saves.lock().unwrap().push((book_id, snapshot));
        Ok(())
    }
}

pub fn book(id: u64, format: BookFormat, current_page: u32, progress_percentage: f64) -> BookRecord {
    BookRecord {
        id,
        title: format!("Book {id}"),
        format,
        file_url: String::new(),
        current_page,
        progress_percentage,
    }
}

/// Collect updates until `done` matches one, or the timeout elapses
pub async fn updates_until(
    rx: &mut mpsc::UnboundedReceiver<ReaderUpdate>,
    timeout: Duration,
    done: impl Fn(&ReaderUpdate) -> bool,
) -> Vec<ReaderUpdate> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Some(update) = rx.recv().await {
            let finished = done(&update);
            seen.push(update);
            if finished {
                break;
            }
        }
    })
    .await;
    seen
}

/// Updates already queued, without waiting
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ReaderUpdate>) -> Vec<ReaderUpdate> {
    let mut seen = Vec::new();
    while let Ok(update) = rx.try_recv() {
        seen.push(update);
    }
    seen
}
