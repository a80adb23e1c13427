//! Record formats
//!
//! A format is a streaming handler fed with element and text events by
//! [`parse`]. Handlers decide which fields they need, enforce field
//! constraints while text arrives, and know how to hand the finished
//! record to a [`RecordSink`].

use crate::error::{Error, Result};
use crate::record::{Record, RecordSink, MAX_CONTENT_LEN};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Capability interface implemented by every record format
pub trait RecordHandler {
    /// Called for every opening (or self-closing) element
    fn on_element_start(&mut self, name: &str) -> Result<()>;

    /// Called for every closing element, including self-closing ones
    fn on_element_end(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Called with unescaped character data inside the document root
    fn on_text(&mut self, text: &str) -> Result<()>;

    /// True once every required field has been observed
    fn is_complete(&self) -> bool;

    /// Write the parsed record through `sink`
    ///
    /// Incomplete records are refused with [`Error::Persist`] and never
    /// reach the sink.
    fn persist(&self, sink: &dyn RecordSink) -> Result<bool>;
}

/// Selects the handler used to interpret a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    /// `<Entry><content/><creationDate/></Entry>` documents
    #[default]
    Entry,
}

impl RecordFormat {
    /// Fresh handler for one document
    pub fn handler(self) -> FormatHandler {
        match self {
            RecordFormat::Entry => FormatHandler::Entry(EntryHandler::default()),
        }
    }

    /// Open and parse `path`, returning the populated handler
    pub fn parse_file(self, path: &Path) -> Result<FormatHandler> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut handler = self.handler();
        parse(BufReader::new(file), &mut handler)?;
        Ok(handler)
    }
}

/// Handler chosen by [`RecordFormat`]
#[derive(Debug)]
pub enum FormatHandler {
    Entry(EntryHandler),
}

impl RecordHandler for FormatHandler {
    fn on_element_start(&mut self, name: &str) -> Result<()> {
        match self {
            FormatHandler::Entry(h) => h.on_element_start(name),
        }
    }

    fn on_element_end(&mut self, name: &str) -> Result<()> {
        match self {
            FormatHandler::Entry(h) => h.on_element_end(name),
        }
    }

    fn on_text(&mut self, text: &str) -> Result<()> {
        match self {
            FormatHandler::Entry(h) => h.on_text(text),
        }
    }

    fn is_complete(&self) -> bool {
        match self {
            FormatHandler::Entry(h) => h.is_complete(),
        }
    }

    fn persist(&self, sink: &dyn RecordSink) -> Result<bool> {
        match self {
            FormatHandler::Entry(h) => h.persist(sink),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryField {
    Content,
    CreationDate,
}

/// Handler for the `Entry` format
///
/// Element names are matched case-insensitively. A field counts as observed
/// as soon as its element opens, even if it carries no text.
#[derive(Debug, Default)]
pub struct EntryHandler {
    root: bool,
    content: Option<String>,
    creation_date: Option<String>,
    current: Option<EntryField>,
}

impl EntryHandler {
    /// The staged record, if complete
    pub fn record(&self) -> Option<Record> {
        if !self.is_complete() {
            return None;
        }
        Some(Record::new(
            self.content.clone().unwrap_or_default(),
            self.creation_date.clone().unwrap_or_default(),
        ))
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.root {
            missing.push("Entry");
        }
        if self.content.is_none() {
            missing.push("content");
        }
        if self.creation_date.is_none() {
            missing.push("creationDate");
        }
        missing
    }
}

impl RecordHandler for EntryHandler {
    fn on_element_start(&mut self, name: &str) -> Result<()> {
        self.current = None;
        if name.eq_ignore_ascii_case("entry") {
            self.root = true;
        } else if name.eq_ignore_ascii_case("content") {
            self.content = Some(String::new());
            self.current = Some(EntryField::Content);
        } else if name.eq_ignore_ascii_case("creationdate") {
            self.creation_date = Some(String::new());
            self.current = Some(EntryField::CreationDate);
        }
        Ok(())
    }

    fn on_element_end(&mut self, _name: &str) -> Result<()> {
        self.current = None;
        Ok(())
    }

    fn on_text(&mut self, text: &str) -> Result<()> {
        match self.current {
            Some(EntryField::Content) => {
                let content = self.content.get_or_insert_with(String::new);
                content.push_str(text);
                let len = content.chars().count();
                if len > MAX_CONTENT_LEN {
                    return Err(Error::Parse(format!(
                        "content is {} characters, limit is {}",
                        len, MAX_CONTENT_LEN
                    )));
                }
            }
            Some(EntryField::CreationDate) => {
                self.creation_date
                    .get_or_insert_with(String::new)
                    .push_str(text);
            }
            None => {}
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.root && self.content.is_some() && self.creation_date.is_some()
    }

    fn persist(&self, sink: &dyn RecordSink) -> Result<bool> {
        match self.record() {
            Some(record) => sink.write_entry(&record),
            None => Err(Error::Persist(format!(
                "record incomplete, missing {}",
                self.missing_fields().join(", ")
            ))),
        }
    }
}

/// Drive `handler` with the events of an XML document
///
/// Besides XML syntax errors this rejects documents without a root element,
/// with more than one root, with non-whitespace text outside the root, or
/// with elements left open at end of input.
pub fn parse<R: BufRead, H: RecordHandler>(input: R, handler: &mut H) -> Result<()> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            Error::Parse(format!("{} at byte {}", e, reader.buffer_position()))
        })?;

        match event {
            Event::Start(e) => {
                if depth == 0 {
                    roots += 1;
                    check_single_root(roots)?;
                }
                depth += 1;
                handler.on_element_start(&element_name(e.name().as_ref())?)?;
            }
            Event::Empty(e) => {
                if depth == 0 {
                    roots += 1;
                    check_single_root(roots)?;
                }
                let name = element_name(e.name().as_ref())?;
                handler.on_element_start(&name)?;
                handler.on_element_end(&name)?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                handler.on_element_end(&element_name(e.name().as_ref())?)?;
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Parse(format!("bad character data: {}", e)))?;
                if depth == 0 {
                    if !text.trim().is_empty() {
                        return Err(Error::Parse("text outside the root element".into()));
                    }
                } else {
                    handler.on_text(&text)?;
                }
            }
            Event::CData(c) => {
                if depth == 0 {
                    return Err(Error::Parse("CDATA outside the root element".into()));
                }
                let bytes = c.into_inner();
                let text = std::str::from_utf8(&bytes)
                    .map_err(|e| Error::Parse(format!("CDATA is not UTF-8: {}", e)))?;
                handler.on_text(text)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if roots == 0 {
        return Err(Error::Parse("document has no root element".into()));
    }
    if depth != 0 {
        return Err(Error::Parse(format!("{} element(s) left unclosed", depth)));
    }
    Ok(())
}

fn check_single_root(roots: usize) -> Result<()> {
    if roots > 1 {
        return Err(Error::Parse("document has more than one root element".into()));
    }
    Ok(())
}

fn element_name(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|e| Error::Parse(format!("element name is not UTF-8: {}", e)))
}
