#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use shelf_reader::engine::{DocumentEngine, RenderedView};
use shelf_reader::outline::OutlineEntry;
use shelf_reader::*;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

// =============================================================================
// PDF fixtures
// =============================================================================

/// Build a PDF with `num_pages` pages, returning the page object ids too
pub fn create_test_pdf(num_pages: usize) -> (Document, Vec<ObjectId>) {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    let mut page_ids = Vec::new();
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
            ("Resources", Object::Dictionary(Dictionary::new())),
            ("Contents", Object::Reference(content_id)),
        ]));
        kids.push(Object::Reference(page_id));
        page_ids.push(page_id);
    }

    let pages_dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Kids", Object::Array(kids)),
        ("Count", Object::Integer(num_pages as i64)),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", catalog_id);

    (doc, page_ids)
}

pub fn pdf_bytes(doc: &mut Document) -> Vec<u8> {
    let mut writer = Vec::new();
    doc.save_to(&mut writer).unwrap();
    writer
}

pub fn test_pdf_bytes(num_pages: usize) -> Vec<u8> {
    let (mut doc, _) = create_test_pdf(num_pages);
    pdf_bytes(&mut doc)
}

/// A 10-page PDF whose outline uses every destination encoding:
///
/// | title      | destination                         | page |
/// |------------|-------------------------------------|------|
/// | Direct     | `[page3 /Fit]`                      | 3    |
/// | Action     | GoTo action to `[page2 /XYZ]`       | 2    |
/// | Index      | `[4 /Fit]`                          | 5    |
/// | Named      | `(chapter-two)` via the name tree   | 7    |
/// | Dangling   | `[999 0 R /Fit]`                    | none |
/// | Missing    | no destination                      | none |
///
/// "Direct" has one child, "Nested", pointing at page 4.
pub fn pdf_with_outline() -> Vec<u8> {
    let (mut doc, pages) = create_test_pdf(10);

    let outlines_id = doc.new_object_id();
    let ids: Vec<ObjectId> = (0..6).map(|_| doc.new_object_id()).collect();
    let nested_id = doc.new_object_id();

    let fit = |page: ObjectId| Object::Array(vec![Object::Reference(page), Object::Name(b"Fit".to_vec())]);
    let dests: Vec<(&str, Option<(&str, Object)>)> = vec![
        ("Direct", Some(("Dest", fit(pages[2])))),
        (
            "Action",
            Some((
                "A",
                Object::Dictionary(Dictionary::from_iter(vec![
                    ("S", Object::Name(b"GoTo".to_vec())),
                    (
                        "D",
                        Object::Array(vec![
                            Object::Reference(pages[1]),
                            Object::Name(b"XYZ".to_vec()),
                            Object::Null,
                            Object::Null,
                            Object::Null,
                        ]),
                    ),
                ])),
            )),
        ),
        (
            "Index",
            Some((
                "Dest",
                Object::Array(vec![Object::Integer(4), Object::Name(b"Fit".to_vec())]),
            )),
        ),
        ("Named", Some(("Dest", Object::string_literal("chapter-two")))),
        ("Dangling", Some(("Dest", fit((999, 0))))),
        ("Missing", None),
    ];

    for (i, (title, dest)) in dests.into_iter().enumerate() {
        let mut item = Dictionary::from_iter(vec![
            ("Title", Object::string_literal(title)),
            ("Parent", Object::Reference(outlines_id)),
        ]);
        if let Some((key, value)) = dest {
            item.set(key, value);
        }
        if i > 0 {
            item.set("Prev", Object::Reference(ids[i - 1]));
        }
        if i + 1 < ids.len() {
            item.set("Next", Object::Reference(ids[i + 1]));
        }
        if i == 0 {
            item.set("First", Object::Reference(nested_id));
            item.set("Last", Object::Reference(nested_id));
            item.set("Count", Object::Integer(1));
        }
        doc.objects.insert(ids[i], Object::Dictionary(item));
    }

    doc.objects.insert(
        nested_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Title", Object::string_literal("Nested")),
            ("Parent", Object::Reference(ids[0])),
            ("Dest", fit(pages[3])),
        ])),
    );

    doc.objects.insert(
        outlines_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Outlines".to_vec())),
            ("First", Object::Reference(ids[0])),
            ("Last", Object::Reference(ids[5])),
            ("Count", Object::Integer(7)),
        ])),
    );

    let names = Dictionary::from_iter(vec![(
        "Dests",
        Object::Dictionary(Dictionary::from_iter(vec![(
            "Names",
            Object::Array(vec![Object::string_literal("chapter-two"), fit(pages[6])]),
        )])),
    )]);

    let catalog_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    let catalog = doc.get_dictionary_mut(catalog_id).unwrap();
    catalog.set("Outlines", Object::Reference(outlines_id));
    catalog.set("Names", Object::Dictionary(names));

    pdf_bytes(&mut doc)
}

// =============================================================================
// EPUB fixtures
// =============================================================================

const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Zip up an EPUB from `(path, contents)` pairs plus the standard container
pub fn build_epub(files: &[(&str, String)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default();

    zip.start_file("mimetype", stored).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();
    zip.start_file("META-INF/container.xml", deflated).unwrap();
    zip.write_all(CONTAINER_XML.as_bytes()).unwrap();

    for (path, contents) in files {
        zip.start_file(*path, deflated).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }

    zip.finish().unwrap().into_inner()
}

pub fn chapter_xhtml(title: &str, paragraphs: &[String]) -> String {
    let body: String = paragraphs
        .iter()
        .enumerate()
        .map(|(i, p)| format!("<p id=\"p{}\">{}</p>", i + 1, p))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{title}</title></head>
<body><h1>{title}</h1>{body}</body></html>"#
    )
}

/// An EPUB with `chapters` chapters of roughly `chars_per_chapter` characters
///
/// Spine ids are `ch1..`, files live at `OEBPS/text/chN.xhtml`, and the
/// navigation document lists every chapter plus a link to `#p2` of the first.
pub fn test_epub(chapters: usize, chars_per_chapter: usize) -> Vec<u8> {
    let mut files = Vec::new();
    let mut manifest = String::new();
    let mut spine = String::new();
    let mut nav_items = String::new();

    for n in 1..=chapters {
        let paragraph: String = "lorem ipsum dolor sit amet "
            .chars()
            .cycle()
            .take(chars_per_chapter / 2)
            .collect();
        let xhtml = chapter_xhtml(&format!("Chapter {n}"), &[paragraph.clone(), paragraph]);
        files.push((format!("OEBPS/text/ch{n}.xhtml"), xhtml));
        manifest.push_str(&format!(
            r#"<item id="ch{n}" href="text/ch{n}.xhtml" media-type="application/xhtml+xml"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="ch{n}"/>"#));
        nav_items.push_str(&format!(
            r#"<li id="ch{n}"><a href="text/ch{n}.xhtml">Chapter {n}</a></li>"#
        ));
    }

    let nav = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head><body>
<nav epub:type="toc"><ol>{nav_items}<li><a href="text/ch1.xhtml#p2">Second paragraph</a></li></ol></nav>
</body></html>"#
    );
    files.push(("OEBPS/nav.xhtml".to_string(), nav));

    let opf = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Test Book</dc:title></metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    {manifest}
  </manifest>
  <spine>{spine}</spine>
</package>"#
    );
    files.push(("OEBPS/content.opf".to_string(), opf));

    let refs: Vec<(&str, String)> = files.iter().map(|(p, c)| (p.as_str(), c.clone())).collect();
    build_epub(&refs)
}

/// An EPUB whose spine names `missing` content documents that are not in the archive
pub fn epub_with_missing_chapters(missing: usize) -> Vec<u8> {
    let mut manifest = String::new();
    let mut spine = String::new();
    for n in 1..=missing {
        manifest.push_str(&format!(
            r#"<item id="gone{n}" href="gone{n}.xhtml" media-type="application/xhtml+xml"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="gone{n}"/>"#));
    }
    let opf = format!(
        r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>{manifest}</manifest>
  <spine>{spine}</spine>
</package>"#
    );
    build_epub(&[("OEBPS/content.opf", opf)])
}

// =============================================================================
// Fake engine
// =============================================================================

/// Paged engine whose renders take a configurable time and may fail
pub struct FakeEngine {
    pub pages: u32,
    pub delays: Mutex<HashMap<u32, Duration>>,
    pub failing: Mutex<HashSet<u32>>,
    pub rendered: Mutex<Vec<u32>>,
    closed: AtomicBool,
}

impl FakeEngine {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            delays: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            rendered: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn delay(self, page: u32, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(page, delay);
        self
    }

    pub fn fail(self, page: u32) -> Self {
        self.failing.lock().unwrap().insert(page);
        self
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

    fn step(&self, from: &Position, direction: Direction) -> Option<Position> {
        let Position::Page(page) = from else { return None };
        let next = match direction {
            Direction::Forward => page + 1,
            Direction::Backward => page.checked_sub(1)?,
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
        let delay = self.delays.lock().unwrap().get(page).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(page) {
            return Err(ReaderError::Io(std::io::Error::other(format!("page {page} unreadable"))));
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

// =============================================================================
// Fake library backend
// =============================================================================

#[derive(Default)]
pub struct FakeLibrary {
    pub books: Mutex<HashMap<u64, (BookRecord, Vec<u8>)>>,
    pub saves: Mutex<Vec<(u64, ProgressSnapshot, tokio::time::Instant)>>,
    pub save_delay: Mutex<Duration>,
    pub fail_saves: AtomicBool,
    pub seen_auth: Mutex<Vec<AuthContext>>,
}

impl FakeLibrary {
    pub fn with_book(self, record: BookRecord, bytes: Vec<u8>) -> Self {
        self.books.lock().unwrap().insert(record.id, (record, bytes));
        self
    }

    pub fn saved(&self) -> Vec<ProgressSnapshot> {
        self.saves.lock().unwrap().iter().map(|(_, s, _)| *s).collect()
    }
}

#[async_trait]
impl LibraryApi for FakeLibrary {
    async fn get_book(&self, book_id: u64, auth: &AuthContext) -> Result<BookRecord> {
        self.seen_auth.lock().unwrap().push(*auth);
        self.books
            .lock()
            .unwrap()
            .get(&book_id)
            .map(|(record, _)| record.clone())
            .ok_or_else(|| ReaderError::Http(format!("book {book_id} not found")))
    }

    async fn fetch_book_bytes(&self, book_id: u64, auth: &AuthContext) -> Result<Vec<u8>> {
        self.seen_auth.lock().unwrap().push(*auth);
        self.books
            .lock()
            .unwrap()
            .get(&book_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ReaderError::Http(format!("book {book_id} not found")))
    }

    async fn save_progress(
        &self,
        book_id: u64,
        _auth: &AuthContext,
        snapshot: ProgressSnapshot,
    ) -> Result<()> {
        let delay = *self.save_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ReaderError::Http("connection refused".into()));
        }
        self.saves
            .lock()
            .unwrap()
            .push((book_id, snapshot, tokio::time::Instant::now()));
        Ok(())
    }
}

pub fn book(id: u64, format: BookFormat, progress_percentage: f64) -> BookRecord {
    BookRecord {
        id,
        title: format!("Book {id}"),
        format,
        file_url: format!("/api/v1/books/{id}/download"),
        current_page: 0,
        progress_percentage,
    }
}
