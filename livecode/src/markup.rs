//! Tolerant markup parsing for editor text.
//!
//! The parser is a single-pass byte scanner with an explicit stack of open
//! elements. It is intentionally not a spec-complete HTML parser: editor
//! text is malformed most of the time (the learner is mid-keystroke), so
//! every unparsable fragment degrades to a text node and the parse never
//! fails. Tag and attribute names are restricted to ASCII `[A-Za-z0-9:_-]`
//! and normalized to lowercase.
//!
//! Known limitations (intentional):
//! - Comments and doctype declarations are dropped, not preserved.
//! - No entity decoding; text content is kept verbatim.
//! - `<script>`/`<style>` bodies are raw text up to the matching close tag.

/// One node of the parsed document tree.
///
/// Text nodes have an empty `tag` and their text in `content`; element
/// nodes have a non-empty `tag`, ordered attributes, and children.
/// Attributes without a value (e.g. `disabled`) carry `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentNode {
    pub tag: String,
    pub attributes: Vec<(String, Option<String>)>,
    pub children: Vec<DocumentNode>,
    pub content: Option<String>,
}

impl DocumentNode {
    pub fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
            content: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            tag: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            content: Some(content.into()),
        }
    }

    pub fn is_text(&self) -> bool {
        self.tag.is_empty()
    }
}

pub const SCRIPT_TAG: &str = "script";
pub const STYLE_TAG: &str = "style";

pub fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b':' || b == b'_' || b == b'-'
}

/// Parse editor text into an ordered forest of document nodes.
///
/// Deterministic and side-effect-free: the same text always yields a
/// structurally identical tree. Never panics on malformed input.
pub fn parse(text: &str) -> Vec<DocumentNode> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut roots: Vec<DocumentNode> = Vec::new();
    let mut stack: Vec<DocumentNode> = Vec::new();
    let mut pos = 0;

    while pos < len {
        if bytes[pos] != b'<' {
            let start = pos;
            while pos < len && bytes[pos] != b'<' {
                pos += 1;
            }
            append(&mut stack, &mut roots, DocumentNode::text(&text[start..pos]));
            continue;
        }

        if text[pos..].starts_with("<!--") {
            pos = match text[pos + 4..].find("-->") {
                Some(rel) => pos + 4 + rel + 3,
                None => len,
            };
            continue;
        }

        if text[pos..].starts_with("<!") || text[pos..].starts_with("<?") {
            // Doctype, processing instruction, or similar junk: skip to `>`.
            pos = match text[pos..].find('>') {
                Some(rel) => pos + rel + 1,
                None => len,
            };
            continue;
        }

        if text[pos..].starts_with("</") {
            let (name, after) = read_name(bytes, pos + 2);
            pos = match text[after..].find('>') {
                Some(rel) => after + rel + 1,
                None => len,
            };
            if !name.is_empty() {
                close_element(&mut stack, &mut roots, &name);
            }
            continue;
        }

        if pos + 1 < len && bytes[pos + 1].is_ascii_alphabetic() {
            match read_start_tag(text, pos) {
                Some(tag) => {
                    pos = handle_start_tag(text, tag, &mut stack, &mut roots);
                }
                None => {
                    // Tag never closed before EOF: the fragment is text.
                    append(&mut stack, &mut roots, DocumentNode::text(&text[pos..]));
                    pos = len;
                }
            }
            continue;
        }

        // A lone `<` that opens nothing: carry it into the next text run.
        let start = pos;
        pos += 1;
        while pos < len && bytes[pos] != b'<' {
            pos += 1;
        }
        append(&mut stack, &mut roots, DocumentNode::text(&text[start..pos]));
    }

    while let Some(node) = stack.pop() {
        append(&mut stack, &mut roots, node);
    }
    roots
}

/// Serialize a forest back to markup text.
///
/// Reproduces tag structure and attributes exactly; whitespace between
/// nodes is whatever the text nodes carry. Void elements are written
/// self-closed.
pub fn serialize(nodes: &[DocumentNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node);
    }
    out
}

fn write_node(out: &mut String, node: &DocumentNode) {
    if node.is_text() {
        if let Some(content) = &node.content {
            out.push_str(content);
        }
        return;
    }
    out.push('<');
    out.push_str(&node.tag);
    for (name, value) in &node.attributes {
        out.push(' ');
        out.push_str(name);
        if let Some(value) = value {
            let quote = if value.contains('"') { '\'' } else { '"' };
            out.push('=');
            out.push(quote);
            out.push_str(value);
            out.push(quote);
        }
    }
    if is_void_element(&node.tag) && node.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &node.children {
        write_node(out, child);
    }
    out.push_str("</");
    out.push_str(&node.tag);
    out.push('>');
}

struct StartTag {
    name: String,
    attributes: Vec<(String, Option<String>)>,
    self_closing: bool,
    end: usize,
}

fn read_name(bytes: &[u8], mut pos: usize) -> (String, usize) {
    let start = pos;
    while pos < bytes.len() && is_name_byte(bytes[pos]) {
        pos += 1;
    }
    let name = String::from_utf8_lossy(&bytes[start..pos]).to_ascii_lowercase();
    (name, pos)
}

/// Read a start tag beginning at `pos` (which points at `<`).
///
/// Returns `None` when the tag is still open at EOF; the caller degrades
/// the whole fragment to text.
fn read_start_tag(text: &str, pos: usize) -> Option<StartTag> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let (name, mut i) = read_name(bytes, pos + 1);
    let mut attributes = Vec::new();

    loop {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len {
            return None;
        }
        match bytes[i] {
            b'>' => {
                return Some(StartTag {
                    name,
                    attributes,
                    self_closing: false,
                    end: i + 1,
                });
            }
            b'/' => {
                if i + 1 < len && bytes[i + 1] == b'>' {
                    return Some(StartTag {
                        name,
                        attributes,
                        self_closing: true,
                        end: i + 2,
                    });
                }
                i += 1;
            }
            b if is_name_byte(b) => {
                let (attr, after) = read_name(bytes, i);
                i = after;
                while i < len && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i < len && bytes[i] == b'=' {
                    i += 1;
                    while i < len && bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    let (value, after) = read_attr_value(text, i)?;
                    attributes.push((attr, Some(value)));
                    i = after;
                } else {
                    attributes.push((attr, None));
                }
            }
            _ => {
                // Tolerance: step over bytes that fit no grammar rule.
                i += 1;
            }
        }
    }
}

fn read_attr_value(text: &str, pos: usize) -> Option<(String, usize)> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    if pos >= len {
        return None;
    }
    if bytes[pos] == b'"' || bytes[pos] == b'\'' {
        let quote = bytes[pos];
        let start = pos + 1;
        let mut i = start;
        while i < len && bytes[i] != quote {
            i += 1;
        }
        if i >= len {
            return None;
        }
        return Some((text[start..i].to_string(), i + 1));
    }
    let start = pos;
    let mut i = pos;
    while i < len && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
        i += 1;
    }
    Some((text[start..i].to_string(), i))
}

fn handle_start_tag(
    text: &str,
    tag: StartTag,
    stack: &mut Vec<DocumentNode>,
    roots: &mut Vec<DocumentNode>,
) -> usize {
    let mut node = DocumentNode::element(&tag.name);
    node.attributes = tag.attributes;

    if tag.self_closing || is_void_element(&tag.name) {
        append(stack, roots, node);
        return tag.end;
    }

    if tag.name == SCRIPT_TAG || tag.name == STYLE_TAG {
        let (content, after) = read_raw_text(text, tag.end, &tag.name);
        if !content.is_empty() {
            node.children.push(DocumentNode::text(content));
        }
        append(stack, roots, node);
        return after;
    }

    stack.push(node);
    tag.end
}

/// Scan raw text content up to the matching case-insensitive close tag.
fn read_raw_text<'a>(text: &'a str, pos: usize, name: &str) -> (&'a str, usize) {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let close = format!("</{name}");
    let close_bytes = close.as_bytes();
    let mut i = pos;
    while i + close_bytes.len() <= len {
        if bytes[i] == b'<' && bytes[i..i + close_bytes.len()].eq_ignore_ascii_case(close_bytes) {
            let mut k = i + close_bytes.len();
            while k < len && bytes[k].is_ascii_whitespace() {
                k += 1;
            }
            if k < len && bytes[k] == b'>' {
                return (&text[pos..i], k + 1);
            }
        }
        i += 1;
    }
    (&text[pos..], len)
}

fn append(stack: &mut [DocumentNode], roots: &mut Vec<DocumentNode>, node: DocumentNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

/// Close the innermost open element named `name`, attaching everything
/// popped on the way. Stray end tags (no matching open element) are
/// dropped.
fn close_element(stack: &mut Vec<DocumentNode>, roots: &mut Vec<DocumentNode>, name: &str) {
    let Some(depth) = stack.iter().rposition(|node| node.tag == name) else {
        return;
    };
    while stack.len() > depth {
        let Some(node) = stack.pop() else {
            break;
        };
        append(stack, roots, node);
    }
}
