//! Owned element tree built from untrusted report XML.
//!
//! The reader never resolves DTDs: any `<!DOCTYPE>` is rejected outright, and
//! entity references other than the five predefined ones (plus numeric
//! character references) fail to unescape. This closes both the entity
//! expansion and the external entity routes.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XMLの構文が不正です: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("DOCTYPE 宣言は受け付けません（DTD/エンティティ定義は無効です）")]
    DoctypeForbidden,
    #[error("要素の入れ子が深すぎます（上限 {}）", MAX_DEPTH)]
    TooDeep,
    #[error("閉じられていない要素があります: <{0}>")]
    Unclosed(String),
    #[error("対応する開始タグのない終了タグがあります")]
    UnexpectedEnd,
    #[error("ルート要素がありません")]
    NoRoot,
    #[error("ルート要素が複数あります")]
    MultipleRoots,
    #[error("ルート要素の外にテキストがあります")]
    TextOutsideRoot,
    #[error("UTF-8 として解釈できません: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("未対応の文字コードです: {0}")]
    UnknownEncoding(String),
    #[error("文字コード {0} として解釈できない内容があります")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// Trimmed text content, `None` when absent or blank.
    pub fn text(&self) -> Option<&str> {
        let t = self.text.trim();
        if t.is_empty() { None } else { Some(t) }
    }

    /// Pre-order walk over every element below `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// First match for a `/`-separated path. The first segment may sit at any
    /// depth below `self`; each following segment must be a direct child.
    pub fn find(&self, path: &str) -> Option<&Element> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (first, rest) = segments.split_first()?;
        self.descendants()
            .filter(|el| el.name == *first)
            .find_map(|el| el.resolve(rest))
    }

    /// Every descendant named `name`, in document order.
    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.descendants().filter(move |el| el.name == name)
    }

    fn resolve(&self, segments: &[&str]) -> Option<&Element> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(self);
        };
        self.children
            .iter()
            .filter(|c| c.name == *first)
            .find_map(|c| c.resolve(rest))
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let el = self.stack.pop()?;
        self.stack.extend(el.children.iter().rev());
        Some(el)
    }
}

/// Text at `path` below `element`, or `default` when the node is missing or
/// carries no text.
pub fn find_text(element: &Element, path: &str, default: &str) -> String {
    find_text_opt(element, path).unwrap_or(default).to_string()
}

pub fn find_text_opt<'a>(element: &'a Element, path: &str) -> Option<&'a str> {
    element.find(path).and_then(Element::text)
}

/// Raw file bytes as text. A byte order mark wins, then the `encoding` of the
/// XML declaration, then UTF-8.
pub fn decode_document(bytes: &[u8]) -> Result<Cow<'_, str>, XmlError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return decode_with(encoding, &bytes[bom_len..]);
    }
    let encoding = match declared_encoding(bytes) {
        Some(label) => Encoding::for_label(&label).ok_or_else(|| {
            XmlError::UnknownEncoding(String::from_utf8_lossy(&label).into_owned())
        })?,
        None => UTF_8,
    };
    decode_with(encoding, bytes)
}

fn declared_encoding(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut reader = Reader::from_reader(bytes);
    match reader.read_event() {
        Ok(Event::Decl(decl)) => decl.encoding()?.ok().map(Cow::into_owned),
        _ => None,
    }
}

fn decode_with<'a>(encoding: &'static Encoding, bytes: &'a [u8]) -> Result<Cow<'a, str>, XmlError> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .ok_or(XmlError::Malformed(encoding.name()))
}

pub fn parse_document(input: &str) -> Result<Element, XmlError> {
    let input = input.trim_start_matches('\u{feff}');
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let el = open_element(&e, &stack, root.is_some())?;
                stack.push(el);
            }
            Event::Empty(e) => {
                let el = open_element(&e, &stack, root.is_some())?;
                close_element(el, &mut stack, &mut root);
            }
            Event::End(_) => {
                let el = stack.pop().ok_or(XmlError::UnexpectedEnd)?;
                close_element(el, &mut stack, &mut root);
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(c) => {
                let text = std::str::from_utf8(&c)?;
                push_text(&mut stack, text)?;
            }
            Event::DocType(_) => return Err(XmlError::DoctypeForbidden),
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) => {}
            Event::Eof => break,
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed(open.name));
    }
    root.ok_or(XmlError::NoRoot)
}

fn open_element(
    start: &BytesStart<'_>,
    stack: &[Element],
    root_closed: bool,
) -> Result<Element, XmlError> {
    if stack.is_empty() && root_closed {
        return Err(XmlError::MultipleRoots);
    }
    if stack.len() >= MAX_DEPTH {
        return Err(XmlError::TooDeep);
    }
    let local = start.local_name();
    let name = std::str::from_utf8(local.as_ref())?;
    Ok(Element::new(name.to_string()))
}

fn close_element(el: Element, stack: &mut [Element], root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => *root = Some(el),
    }
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), XmlError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    let current = stack.last_mut().ok_or(XmlError::TextOutsideRoot)?;
    current.text.push_str(text);
    Ok(())
}
