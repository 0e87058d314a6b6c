//! Script extraction and document queries.
//!
//! Stripping script out of the tree is what makes per-keystroke preview
//! renders cheap: the preview channel only ever sees script-free markup,
//! and the extracted script body is what later gets instrumented.

use std::sync::LazyLock;

use regex::Regex;

use crate::markup::{DocumentNode, SCRIPT_TAG, STYLE_TAG};

/// What the stripper found while walking the tree.
///
/// `found` is true whenever a script tag exists, even with an empty body,
/// so callers can distinguish "script tag present but empty" from "no
/// script tag". `source` is the raw body of the last script element whose
/// content is more than whitespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptExtract {
    pub found: bool,
    pub source: Option<String>,
}

/// Return a new tree with every script element removed, plus what was
/// found on the way. The input tree is left untouched.
pub fn strip(nodes: &[DocumentNode]) -> (Vec<DocumentNode>, ScriptExtract) {
    let mut extract = ScriptExtract::default();
    let stripped = strip_inner(nodes, &mut extract);
    (stripped, extract)
}

fn strip_inner(nodes: &[DocumentNode], extract: &mut ScriptExtract) -> Vec<DocumentNode> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        if node.tag == SCRIPT_TAG {
            extract.found = true;
            if let Some(body) = node.children.first().and_then(|c| c.content.as_deref()) {
                if body.chars().any(|c| !c.is_whitespace()) {
                    extract.source = Some(body.to_string());
                }
            }
            continue;
        }
        let mut copy = node.clone();
        copy.children = strip_inner(&node.children, extract);
        out.push(copy);
    }
    out
}

static OPEN_SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<script[^>]*>").expect("script-tag pattern should be valid"));

/// True if the raw text has an opening script tag before a closing one.
pub fn has_script(text: &str) -> bool {
    let Some(open) = OPEN_SCRIPT_RE.find(text) else {
        return false;
    };
    match text.find("</script>") {
        Some(close) => open.start() < close,
        None => false,
    }
}

/// Extract the text of a properly nested `html > head > title`, if any.
pub fn title_text(nodes: &[DocumentNode]) -> Option<String> {
    let html = nodes.iter().find(|n| n.tag == "html")?;
    let head = html.children.iter().find(|n| n.tag == "head")?;
    let title = head.children.iter().find(|n| n.tag == "title")?;
    let text = title.children.first()?.content.clone()?;
    if text.is_empty() { None } else { Some(text) }
}

/// Collect the text content of every style element, in document order.
pub fn style_contents(nodes: &[DocumentNode]) -> Vec<&str> {
    let mut out = Vec::new();
    collect_style_contents(nodes, &mut out);
    out
}

fn collect_style_contents<'a>(nodes: &'a [DocumentNode], out: &mut Vec<&'a str>) {
    for node in nodes {
        if node.tag == STYLE_TAG {
            if let Some(body) = node.children.first().and_then(|c| c.content.as_deref()) {
                out.push(body);
            }
        }
        collect_style_contents(&node.children, out);
    }
}
