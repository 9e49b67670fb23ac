//! Minimal element tree over quick-xml, keeping byte spans into the source
//! so raw fragments (SignedInfo, structured attribute values) can be handed
//! on verbatim.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::ops::Range;

use crate::error::{ValidationError, ValidationResult};

/// Deepest nesting accepted in a SAML document.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct Element {
    /// Local name, prefix stripped.
    pub name: String,
    /// Qualified attribute name and unescaped value.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Unescaped direct text content.
    pub text: String,
    /// Span of the whole element in the source.
    pub outer: Range<usize>,
    /// Span between the start and end tags.
    pub inner: Range<usize>,
}

impl Element {
    fn open(start: &BytesStart<'_>, span: Range<usize>) -> ValidationResult<Self> {
        let name = std::str::from_utf8(start.local_name().as_ref())
            .map_err(|_| ValidationError::decode("element name is not UTF-8"))?
            .to_string();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr
                .map_err(|e| ValidationError::decode(format!("bad attribute on <{}>: {}", name, e)))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|_| ValidationError::decode("attribute name is not UTF-8"))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| ValidationError::decode(format!("bad attribute value: {}", e)))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
            text: String::new(),
            inner: span.end..span.end,
            outer: span,
        })
    }

    /// Attribute by local name. Namespace declarations are never matched.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .filter(|(key, _)| key != "xmlns" && !key.starts_with("xmlns:"))
            .find(|(key, _)| key.rsplit(':').next() == Some(local))
            .map(|(_, value)| value.as_str())
    }

    /// Attribute by exact qualified name, so `ID` never matches `foo:ID`.
    pub fn attr_exact(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.as_str())
    }

    /// Attributes whose local name is one of `locals`, namespace
    /// declarations excluded.
    pub fn attrs_with_local<'a>(
        &'a self,
        locals: &'a [&'a str],
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(|(key, _)| key != "xmlns" && !key.starts_with("xmlns:"))
            .filter(move |(key, _)| key.rsplit(':').next().is_some_and(|l| locals.contains(&l)))
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == local)
    }

    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == local)
    }

    /// Trimmed text, `None` when blank.
    pub fn trimmed_text(&self) -> Option<String> {
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    /// Depth-first walk over this element and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Parse an XML document into its root element.
pub fn parse(xml: &str) -> ValidationResult<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Err(e) => {
                return Err(ValidationError::decode(format!(
                    "XML parse error at position {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            Ok(Event::Eof) => break,
            Ok(Event::DocType(_)) => {
                return Err(ValidationError::decode("DOCTYPE declarations are not allowed"))
            }
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(ValidationError::decode("XML nesting too deep"));
                }
                let after = reader.buffer_position() as usize;
                stack.push(Element::open(&e, before..after)?);
            }
            Ok(Event::Empty(e)) => {
                let after = reader.buffer_position() as usize;
                let element = Element::open(&e, before..after)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let after = reader.buffer_position() as usize;
                let mut element = stack
                    .pop()
                    .ok_or_else(|| ValidationError::decode("unbalanced end tag"))?;
                element.inner.end = before;
                element.outer.end = after;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ValidationError::decode(format!("bad text content: {}", e)))?;
                match stack.last_mut() {
                    Some(top) => top.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(ValidationError::decode("text outside the root element")),
                }
            }
            Ok(Event::CData(c)) => {
                let text = std::str::from_utf8(&c)
                    .map_err(|_| ValidationError::decode("CDATA is not UTF-8"))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(text);
                }
            }
            Ok(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(ValidationError::decode("unclosed element"));
    }
    root.ok_or_else(|| ValidationError::decode("document has no root element"))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> ValidationResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(ValidationError::decode("multiple root elements")),
    }
    Ok(())
}

/// Concatenated text of every text and CDATA node in an XML fragment.
pub fn text_content(fragment: &str) -> ValidationResult<String> {
    let mut reader = Reader::from_str(fragment);
    reader.config_mut().trim_text(false);
    let mut out = String::new();

    loop {
        match reader.read_event() {
            Err(e) => return Err(ValidationError::decode(format!("bad XML fragment: {}", e))),
            Ok(Event::Eof) => break,
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ValidationError::decode(format!("bad text content: {}", e)))?;
                out.push_str(&text);
            }
            Ok(Event::CData(c)) => {
                let text = std::str::from_utf8(&c)
                    .map_err(|_| ValidationError::decode("CDATA is not UTF-8"))?;
                out.push_str(text);
            }
            Ok(_) => {}
        }
    }

    Ok(out)
}
