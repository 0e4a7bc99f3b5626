//! Minimal element lookups over the EGI XML responses.
//!
//! The order, status and capabilities documents are shallow; all we ever need is
//! "every `<name>` element, its attributes, its own text and the text of each
//! direct child", so this walks the event stream once instead of building a DOM.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

pub(crate) type XmlResult<T> = std::result::Result<T, quick_xml::Error>;

#[derive(Debug, Default, Clone)]
pub(crate) struct Element {
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) text: String,
    /// `(local name, text)` of each direct child, in document order.
    pub(crate) children: Vec<(String, String)>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> XmlResult<Self> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            attributes,
            ..Self::default()
        })
    }

    /// Text of the first child, or the element's own text when it has no children.
    pub(crate) fn first_value(&self) -> Option<&str> {
        let v = match self.children.first() {
            Some((_, text)) => text.as_str(),
            None => self.text.as_str(),
        };
        if v.is_empty() { None } else { Some(v) }
    }

    /// Non-empty texts of all children, or the element's own text when it has no children.
    pub(crate) fn values(&self) -> Vec<String> {
        if self.children.is_empty() {
            if self.text.is_empty() {
                return Vec::new();
            }
            return vec![self.text.clone()];
        }
        self.children
            .iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub(crate) fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Every element whose local name is `name`, outermost matches only.
pub(crate) fn elements(doc: &str, name: &str) -> XmlResult<Vec<Element>> {
    let mut reader = Reader::from_str(doc);
    reader.config_mut().trim_text(true);

    let mut found: Vec<Element> = Vec::new();
    // (index into `found`, depth the match opened at)
    let mut open: Option<(usize, usize)> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                match open {
                    None if e.local_name().as_ref() == name.as_bytes() => {
                        found.push(Element::from_start(&e)?);
                        open = Some((found.len() - 1, depth));
                    }
                    Some((idx, d)) if depth == d + 1 => {
                        let child = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        found[idx].children.push((child, String::new()));
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => match open {
                None if e.local_name().as_ref() == name.as_bytes() => {
                    found.push(Element::from_start(&e)?);
                }
                Some((idx, d)) if depth == d => {
                    let child = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    found[idx].children.push((child, String::new()));
                }
                _ => {}
            },
            Event::End(_) => {
                if matches!(open, Some((_, d)) if d == depth) {
                    open = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                push_text(&mut found, open, depth, &text);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                push_text(&mut found, open, depth, &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(found)
}

fn push_text(found: &mut [Element], open: Option<(usize, usize)>, depth: usize, text: &str) {
    let Some((idx, d)) = open else {
        return;
    };
    let el = &mut found[idx];
    if depth == d {
        el.text.push_str(text);
    } else if let Some((_, child)) = el.children.last_mut() {
        child.push_str(text);
    }
}

/// Own text of every `<name>` element (empty ones dropped).
pub(crate) fn all_texts(doc: &str, name: &str) -> XmlResult<Vec<String>> {
    Ok(elements(doc, name)?
        .into_iter()
        .flat_map(|e| e.values())
        .collect())
}
