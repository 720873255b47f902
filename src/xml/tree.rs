use anyhow::{bail, Result};
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

/// A parsed element. Names (tags and attributes) are stored by local name,
/// so `<bme:PRODUCT>` and `<PRODUCT>` index the same way.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    fn open(start: &BytesStart<'_>, strict: bool) -> Result<Self> {
        let name = local_name(start.local_name().as_ref());
        let mut attrs = Vec::new();
        for attr in start.attributes().with_checks(strict) {
            let attr = match attr {
                Ok(a) => a,
                Err(e) if strict => return Err(e.into()),
                Err(_) => continue,
            };
            let key = local_name(attr.key.local_name().as_ref());
            let value = match attr.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(e) if strict => return Err(e.into()),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            };
            attrs.push((key, value));
        }
        Ok(Self { name, attrs, children: Vec::new() })
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// All descendant elements with the given local name, in document order.
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut out = Vec::new();
        self.collect(name, &mut out);
        out
    }

    fn collect<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in self.elements() {
            if child.name == name {
                out.push(child);
            }
            child.collect(name, out);
        }
    }

    /// First descendant with the given local name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        for child in self.elements() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// First descendant with the given name whose trimmed text is non-empty.
    pub fn find_text(&self, name: &str) -> Option<String> {
        self.descendants(name)
            .into_iter()
            .map(|e| e.text().trim().to_string())
            .find(|t| !t.is_empty())
    }

    /// Direct text children only.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Text of the whole subtree. Stray `<br>` elements become line breaks.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.append_text(&mut out);
        out
    }

    fn append_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) if e.name.eq_ignore_ascii_case("br") => {
                    out.push('\n');
                    e.append_text(out);
                }
                Node::Element(e) => e.append_text(out),
            }
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Drop a UTF-8 byte-order mark and anything blank before the declaration.
pub fn clean_prolog(text: &str) -> &str {
    text.trim_start_matches('\u{feff}').trim_start()
}

/// Parse leniently: mismatched or unmatched end tags are reconciled against
/// the open-element stack, bad attributes and entities are kept raw, and
/// malformed markup is skipped up to the next `<` so later elements survive.
pub fn parse_tolerant(text: &str) -> Result<Element> {
    build(clean_prolog(text), false)
}

/// Parse strictly: any well-formedness problem is an error.
pub fn parse_strict(text: &str) -> Result<Element> {
    build(clean_prolog(text), true)
}

/// Returns a synthetic document node whose children are the top-level elements.
fn build(xml: &str, strict: bool) -> Result<Element> {
    let mut stack: Vec<Element> = vec![Element::default()];
    let mut offset = 0usize;

    while let Some((at, err)) = read_events(&xml[offset..], strict, &mut stack)? {
        let bad = offset + at;
        let from = (bad + 1).min(xml.len());
        match xml.as_bytes()[from..].iter().position(|b| *b == b'<') {
            Some(next) => {
                warn!("Tolerant parse skipped malformed markup at byte {}: {}", bad, err);
                offset = from + next;
            }
            None => {
                warn!("Tolerant parse stopped at byte {}: {}", bad, err);
                break;
            }
        }
    }

    if strict && stack.len() > 1 {
        bail!("unclosed element <{}> at end of document", stack[stack.len() - 1].name);
    }
    while stack.len() > 1 {
        pop_into_parent(&mut stack);
    }
    let doc = stack.pop().unwrap_or_default();
    if strict && doc.elements().next().is_none() {
        bail!("document has no root element");
    }
    Ok(doc)
}

/// Feed events from `xml` into the open-element stack until the end of input.
/// In tolerant mode a syntax error hands back its offset instead of failing.
fn read_events(
    xml: &str,
    strict: bool,
    stack: &mut Vec<Element>,
) -> Result<Option<(usize, quick_xml::Error)>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    {
        let config = reader.config_mut();
        config.check_end_names = strict;
        config.allow_unmatched_ends = !strict;
    }
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(Element::open(&e, strict)?),
            Ok(Event::Empty(e)) => {
                let el = Element::open(&e, strict)?;
                attach(stack, Node::Element(el));
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.local_name().as_ref());
                close(stack, &name);
            }
            Ok(Event::Text(e)) => {
                let text = match e.unescape() {
                    Ok(t) => t.into_owned(),
                    Err(err) if strict => return Err(err.into()),
                    Err(_) => String::from_utf8_lossy(&e).into_owned(),
                };
                attach(stack, Node::Text(text));
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                attach(stack, Node::Text(text));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) if strict => return Err(e.into()),
            Err(e) => return Ok(Some((reader.error_position() as usize, e))),
            _ => {}
        }
        buf.clear();
    }
}

fn attach(stack: &mut [Element], node: Node) {
    if let Some(top) = stack.last_mut() {
        top.children.push(node);
    }
}

fn pop_into_parent(stack: &mut Vec<Element>) {
    if stack.len() < 2 {
        return;
    }
    if let Some(done) = stack.pop() {
        attach(stack, Node::Element(done));
    }
}

/// Close the innermost open element called `name`, implicitly closing
/// anything opened inside it. An end tag nothing matches is ignored.
fn close(stack: &mut Vec<Element>, name: &str) {
    let Some(depth) = stack.iter().skip(1).rposition(|e| e.name == name) else {
        return;
    };
    let target = depth + 1;
    while stack.len() > target {
        pop_into_parent(stack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_names_ignore_prefix() {
        let doc = parse_tolerant(
            r#"<bme:BMECAT xmlns:bme="urn:x"><bme:PRODUCT><SUPPLIER_PID>A1</SUPPLIER_PID></bme:PRODUCT></bme:BMECAT>"#,
        )
        .unwrap();
        let products = doc.descendants("PRODUCT");
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].find_text("SUPPLIER_PID").as_deref(), Some("A1"));
    }

    #[test]
    fn bom_and_leading_whitespace_are_stripped() {
        let doc = parse_strict("\u{feff}\n  <?xml version=\"1.0\"?><A><B>x</B></A>").unwrap();
        assert_eq!(doc.find_text("B").as_deref(), Some("x"));
    }

    #[test]
    fn tolerant_recovers_unclosed_and_stray_tags() {
        let xml = "<ROOT><P><ID>1</ID><X>open</P><P><ID>2</ID></Q></P>";
        let doc = parse_tolerant(xml).unwrap();
        let ids: Vec<String> = doc
            .descendants("P")
            .iter()
            .filter_map(|p| p.find_text("ID"))
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(parse_strict(xml).is_err());
    }

    #[test]
    fn strict_rejects_truncated_document() {
        assert!(parse_strict("<A><B>x</B>").is_err());
        assert!(parse_tolerant("<A><B>x</B>").unwrap().find("B").is_some());
    }

    #[test]
    fn tolerant_resumes_after_malformed_markup() {
        for junk in ["<!BOGUS>", "<? >"] {
            let xml = format!(
                "<ROOT><PRODUCT><ID>A</ID></PRODUCT>{}<PRODUCT><ID>B</ID></PRODUCT></ROOT>",
                junk
            );
            let doc = parse_tolerant(&xml).unwrap();
            let ids: Vec<String> = doc
                .descendants("PRODUCT")
                .iter()
                .filter_map(|p| p.find_text("ID"))
                .collect();
            assert_eq!(ids, vec!["A", "B"], "after {}", junk);
        }
    }

    #[test]
    fn attributes_by_local_name() {
        let doc = parse_strict(r#"<F><FNAME xml:lang="deu">Gewicht</FNAME></F>"#).unwrap();
        let fname = doc.find("FNAME").unwrap();
        assert_eq!(fname.attr("lang"), Some("deu"));
        assert_eq!(fname.text(), "Gewicht");
    }

    #[test]
    fn text_content_joins_subtree_with_breaks() {
        let doc = parse_tolerant("<T>line one<br/>line <b>two</b></T>").unwrap();
        assert_eq!(doc.find("T").unwrap().text_content(), "line one\nline two");
    }

    #[test]
    fn entities_are_unescaped() {
        let doc = parse_strict("<T>a &amp; b &lt;br&gt;</T>").unwrap();
        assert_eq!(doc.find("T").unwrap().text(), "a & b <br>");
    }
}
