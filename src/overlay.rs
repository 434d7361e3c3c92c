//! Script-created UI overlay: a single root holding markup fragments appended by scripts.
//!
//! The markup dialect is the HTML subset HUD snippets use: elements, quoted or bare attributes,
//! text, comments, void and self-closing tags, and the five common character entities.

use smallvec::SmallVec;
use std::fmt::Write as _;
use thiserror::Error;

const VOID_TAGS: &[&str] =
    &["area", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source", "track", "wbr"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("markup contains no element")]
    NoElement,
    #[error("unexpected end of markup inside a tag starting at byte {0}")]
    UnexpectedEof(usize),
    #[error("invalid tag name at byte {0}")]
    InvalidTag(usize),
    #[error("closing tag </{found}> does not match <{expected}>")]
    MismatchedClose { expected: String, found: String },
    #[error("stray closing tag </{0}>")]
    StrayClose(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiNode {
    Element(UiElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiElement {
    pub tag: String,
    pub attributes: SmallVec<[(String, String); 4]>,
    pub children: Vec<UiNode>,
}

impl UiElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), attributes: SmallVec::new(), children: Vec::new() }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                UiNode::Text(text) => out.push_str(text),
                UiNode::Element(element) => element.collect_text(out),
            }
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&UiElement> {
        if self.id() == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|child| match child {
            UiNode::Element(element) => element.find_by_id(id),
            UiNode::Text(_) => None,
        })
    }

    /// Removes the first descendant (not `self`) carrying `id`.
    fn remove_descendant(&mut self, id: &str) -> bool {
        if let Some(index) =
            self.children.iter().position(|child| matches!(child, UiNode::Element(element) if element.id() == Some(id)))
        {
            self.children.remove(index);
            return true;
        }
        self.children.iter_mut().any(|child| match child {
            UiNode::Element(element) => element.remove_descendant(id),
            UiNode::Text(_) => false,
        })
    }

    pub fn write_markup(&self, out: &mut String) {
        let _ = write!(out, "<{}", self.tag);
        for (key, value) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", key, escape(value));
        }
        out.push('>');
        if is_void(&self.tag) {
            return;
        }
        for child in &self.children {
            match child {
                UiNode::Text(text) => out.push_str(&escape(text)),
                UiNode::Element(element) => element.write_markup(out),
            }
        }
        let _ = write!(out, "</{}>", self.tag);
    }
}

/// Parses a fragment and returns its root (first) element.
pub fn parse_fragment(markup: &str) -> Result<UiElement, MarkupError> {
    let mut parser = MarkupParser { src: markup, pos: 0 };
    let nodes = parser.parse_nodes(None)?;
    nodes
        .into_iter()
        .find_map(|node| match node {
            UiNode::Element(element) => Some(element),
            UiNode::Text(_) => None,
        })
        .ok_or(MarkupError::NoElement)
}

struct MarkupParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> MarkupParser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse_nodes(&mut self, parent: Option<&str>) -> Result<Vec<UiNode>, MarkupError> {
        let mut nodes = Vec::new();
        loop {
            if self.eof() {
                // Unclosed elements are closed implicitly, as browsers do.
                return Ok(nodes);
            }
            let rest = self.rest();
            if rest.starts_with("<!--") {
                match rest.find("-->") {
                    Some(end) => self.pos += end + 3,
                    None => self.pos = self.src.len(),
                }
            } else if rest.starts_with("</") {
                let start = self.pos;
                self.pos += 2;
                let name = self.read_name().ok_or(MarkupError::InvalidTag(start))?;
                self.skip_whitespace();
                if self.bump() != Some('>') {
                    return Err(MarkupError::UnexpectedEof(start));
                }
                return match parent {
                    Some(expected) if expected == name => Ok(nodes),
                    Some(expected) => {
                        Err(MarkupError::MismatchedClose { expected: expected.to_string(), found: name })
                    }
                    None => Err(MarkupError::StrayClose(name)),
                };
            } else if rest.starts_with('<') && rest[1..].starts_with(|ch: char| ch.is_ascii_alphabetic()) {
                nodes.push(UiNode::Element(self.parse_element()?));
            } else {
                let text = self.read_text();
                if !text.trim().is_empty() {
                    nodes.push(UiNode::Text(decode_entities(&text)));
                }
            }
        }
    }

    fn read_text(&mut self) -> String {
        let start = self.pos;
        self.bump();
        while let Some(ch) = self.peek() {
            if ch == '<' {
                let after = &self.rest()[1..];
                if after.starts_with(|c: char| c.is_ascii_alphabetic() || c == '/' || c == '!') {
                    break;
                }
            }
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn read_name(&mut self) -> Option<String> {
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ':')) {
            self.bump();
        }
        (self.pos > start).then(|| self.src[start..self.pos].to_ascii_lowercase())
    }

    fn parse_element(&mut self) -> Result<UiElement, MarkupError> {
        let start = self.pos;
        self.bump();
        let tag = self.read_name().ok_or(MarkupError::InvalidTag(start))?;
        let mut element = UiElement::new(tag);
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(MarkupError::UnexpectedEof(start));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(element);
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break;
            }
            let name_start = self.pos;
            while self.peek().is_some_and(|ch| !ch.is_whitespace() && !matches!(ch, '=' | '>' | '/')) {
                self.bump();
            }
            if self.pos == name_start {
                // Lone '/' inside a start tag.
                self.bump();
                continue;
            }
            let name = self.src[name_start..self.pos].to_ascii_lowercase();
            self.skip_whitespace();
            let value = if self.peek() == Some('=') {
                self.bump();
                self.skip_whitespace();
                self.read_attribute_value(start)?
            } else {
                String::new()
            };
            element.attributes.push((name, value));
        }
        if !is_void(&element.tag) {
            let tag = element.tag.clone();
            element.children = self.parse_nodes(Some(&tag))?;
        }
        Ok(element)
    }

    fn read_attribute_value(&mut self, tag_start: usize) -> Result<String, MarkupError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                let value_start = self.pos;
                let end = self.rest().find(quote).ok_or(MarkupError::UnexpectedEof(tag_start))?;
                self.pos += end + 1;
                Ok(decode_entities(&self.src[value_start..value_start + end]))
            }
            Some(_) => {
                let value_start = self.pos;
                while self.peek().is_some_and(|ch| !ch.is_whitespace() && ch != '>') {
                    self.bump();
                }
                Ok(decode_entities(&self.src[value_start..self.pos]))
            }
            None => Err(MarkupError::UnexpectedEof(tag_start)),
        }
    }
}

fn is_void(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[derive(Debug, Clone)]
struct PendingRemoval {
    id: String,
    due: f64,
}

/// The single overlay root shared by every script.
#[derive(Debug)]
pub struct UiOverlay {
    roots: Vec<UiElement>,
    max_elements: usize,
    timers: Vec<PendingRemoval>,
}

impl UiOverlay {
    pub fn new(max_elements: usize) -> Self {
        Self { roots: Vec::new(), max_elements: max_elements.max(1), timers: Vec::new() }
    }

    /// Appends `element`; returns the evicted oldest root when the overlay is full.
    pub fn append(&mut self, element: UiElement) -> Option<UiElement> {
        let evicted = if self.roots.len() >= self.max_elements { Some(self.roots.remove(0)) } else { None };
        self.roots.push(element);
        evicted
    }

    pub fn create_from_markup(&mut self, markup: &str) -> Result<Option<UiElement>, MarkupError> {
        let element = parse_fragment(markup)?;
        Ok(self.append(element))
    }

    /// Removes the first element carrying `id` in document order. Absent ids are a no-op.
    pub fn remove_by_id(&mut self, id: &str) -> bool {
        for index in 0..self.roots.len() {
            if self.roots[index].id() == Some(id) {
                self.roots.remove(index);
                return true;
            }
            if self.roots[index].remove_descendant(id) {
                return true;
            }
        }
        false
    }

    pub fn find_by_id(&self, id: &str) -> Option<&UiElement> {
        self.roots.iter().find_map(|root| root.find_by_id(id))
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.find_by_id(id).is_some()
    }

    pub fn roots(&self) -> &[UiElement] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Empties the overlay root and drops pending timed removals.
    pub fn clear(&mut self) {
        self.roots.clear();
        self.timers.clear();
    }

    pub fn schedule_removal(&mut self, id: impl Into<String>, now: f64, after_seconds: f64) {
        let delay = if after_seconds.is_finite() { after_seconds.max(0.0) } else { 0.0 };
        self.timers.push(PendingRemoval { id: id.into(), due: now + delay });
    }

    pub fn pending_removals(&self) -> usize {
        self.timers.len()
    }

    /// Fires every timer due at `now`; returns the ids that were actually removed.
    pub fn fire_due(&mut self, now: f64) -> Vec<String> {
        let mut due = Vec::new();
        self.timers.retain(|timer| {
            if timer.due <= now {
                due.push(timer.id.clone());
                false
            } else {
                true
            }
        });
        due.into_iter().filter(|id| self.remove_by_id(id)).collect()
    }

    pub fn render_markup(&self) -> String {
        let mut out = String::new();
        for root in &self.roots {
            root.write_markup(&mut out);
        }
        out
    }
}
