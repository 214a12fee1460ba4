//! Post-processing of serialized markup.
//!
//! The serialized DOM still carries the bootstrap that built it. Before it
//! is returned the markup is parsed with `html5ever` and:
//!
//! 1. Executable `<script>` elements are removed: no `type`, a JavaScript
//!    MIME type, `module`, or any script whose text mentions the bootstrap
//!    marker `loadMainDartJs`. Data blocks (`application/json`, templates)
//!    stay.
//! 2. Script preload hints (`<link rel="preload" as="script">` and
//!    `<link rel="modulepreload">`) are removed.
//! 3. Two inline blocks from [`DeferredScripts`] are appended to `<head>`
//!    and `<body>`, serializing as:
//!
//! ```text
//! <script type="application/javascript">\r\n{registration}</script>\r\n</head>
//! <script type="application/javascript">\r\nPromise.all(fontLoaders).then(function(){\r\n{replay}\r\n})</script>\r\n</body>
//! ```
//!
//! The replay block waits on `fontLoaders`, which the registration block is
//! expected to declare.
//!
//! Attribute values, comments and raw text are handled by the tokenizer, so
//! `<script>` inside an attribute or a comment is left alone.

use std::cell::RefCell;
use std::rc::Rc;

use html5ever::serialize::{SerializeOpts, serialize};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{Attribute, ParseOpts, QualName, local_name, ns, parse_document};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};

/// Marker identifying the application's own bootstrap script.
pub const BOOTSTRAP_MARKER: &str = "loadMainDartJs";

const JAVASCRIPT_TYPES: &[&str] = &[
    "",
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "text/ecmascript",
    "application/ecmascript",
    "module",
];

/// Script text produced by the runtime's collaborators and injected into
/// the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredScripts {
    /// Registers assets (fonts) and populates `fontLoaders`.
    pub asset_registration: String,
    /// Replays recorded visual operations once assets are registered.
    pub visual_replay: String,
}

impl Default for DeferredScripts {
    fn default() -> Self {
        Self {
            asset_registration: "const fontLoaders = [];".to_string(),
            visual_replay: String::new(),
        }
    }
}

impl DeferredScripts {
    /// Text of the block appended to `<head>`.
    pub fn head_script(&self) -> String {
        format!("\r\n{}", self.asset_registration)
    }

    /// Text of the block appended to `<body>`.
    pub fn body_script(&self) -> String {
        format!(
            "\r\nPromise.all(fontLoaders).then(function(){{\r\n{}\r\n}})",
            self.visual_replay
        )
    }
}

/// Strip the bootstrap from `markup` and inject `scripts`.
pub fn finalize(markup: &str, scripts: &DeferredScripts) -> String {
    let dom = parse(markup);
    strip(&dom.document);

    match find_element(&dom.document, "head") {
        Some(head) => append_block(&head, scripts.head_script()),
        None => log::debug!("No <head> in serialized markup; registration block not injected"),
    }
    match find_element(&dom.document, "body") {
        Some(body) => append_block(&body, scripts.body_script()),
        None => log::debug!("No <body> in serialized markup; replay block not injected"),
    }

    to_markup(&dom, markup)
}

/// Remove executable scripts and script preload hints.
///
/// `markup` is parsed as a whole document, so the result always carries
/// `<html>`, `<head>` and `<body>`.
pub fn strip_bootstrap(markup: &str) -> String {
    let dom = parse(markup);
    strip(&dom.document);
    to_markup(&dom, markup)
}

fn parse(markup: &str) -> RcDom {
    parse_document(RcDom::default(), ParseOpts::default()).one(markup)
}

fn to_markup(dom: &RcDom, source: &str) -> String {
    let document: SerializableHandle = dom.document.clone().into();
    let mut out = Vec::with_capacity(source.len() + 256);
    match serialize(&mut out, &document, SerializeOpts::default()) {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(e) => {
            log::error!("Failed to serialize rendered markup: {}", e);
            source.to_string()
        }
    }
}

// ============================================================================
// Tree editing
// ============================================================================

fn strip(node: &Handle) {
    node.children.borrow_mut().retain(|child| !is_bootstrap(child));
    for child in node.children.borrow().iter() {
        strip(child);
    }
}

fn is_bootstrap(node: &Handle) -> bool {
    let NodeData::Element { name, attrs, .. } = &node.data else {
        return false;
    };
    if name.ns != ns!(html) {
        return false;
    }
    let attrs = attrs.borrow();

    if name.local == local_name!("script") {
        let script_type = attribute(&attrs, "type").unwrap_or("");
        let script_type = script_type.split(';').next().unwrap_or("").trim();
        return JAVASCRIPT_TYPES
            .iter()
            .any(|t| t.eq_ignore_ascii_case(script_type))
            || text_content(node).contains(BOOTSTRAP_MARKER);
    }
    if name.local == local_name!("link") {
        let rel = attribute(&attrs, "rel").unwrap_or("");
        let has_rel = |wanted: &str| {
            rel.split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case(wanted))
        };
        let as_script = attribute(&attrs, "as").is_some_and(|v| v.trim().eq_ignore_ascii_case("script"));
        return has_rel("modulepreload") || (has_rel("preload") && as_script);
    }
    false
}

fn attribute<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|attr| &*attr.name.local == name)
        .map(|attr| &*attr.value)
}

fn text_content(node: &Handle) -> String {
    let mut text = String::new();
    for child in node.children.borrow().iter() {
        if let NodeData::Text { contents } = &child.data {
            text.push_str(&contents.borrow());
        }
    }
    text
}

fn find_element(node: &Handle, local: &str) -> Option<Handle> {
    for child in node.children.borrow().iter() {
        if let NodeData::Element { name, .. } = &child.data {
            if name.ns == ns!(html) && &*name.local == local {
                return Some(Rc::clone(child));
            }
        }
        if let Some(found) = find_element(child, local) {
            return Some(found);
        }
    }
    None
}

/// Append `<script type="application/javascript">{text}</script>\r\n`.
fn append_block(parent: &Handle, text: String) {
    let script = Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), local_name!("script")),
        attrs: RefCell::new(vec![Attribute {
            name: QualName::new(None, ns!(), local_name!("type")),
            value: StrTendril::from("application/javascript"),
        }]),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    });
    append(&script, text_node(text));
    append(parent, script);
    append(parent, text_node("\r\n".to_string()));
}

fn text_node(text: String) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

fn append(parent: &Handle, child: Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = concat!(
        "<html><head>",
        "<link rel=\"preload\" href=\"main.dart.js\" as=\"script\">",
        "<link rel=\"modulepreload\" href=\"chunk.mjs\"/>",
        "<link rel=\"stylesheet\" href=\"app.css\">",
        "<script>window.addEventListener('load', function() { loadMainDartJs(); });</script>",
        "<script type=\"application/ld+json\">{\"@type\":\"WebSite\"}</script>",
        "</head><body>",
        "<p>Hello <b>world</b></p>",
        "<SCRIPT SRC=\"main.dart.js\" TYPE=\"text/javascript\"></SCRIPT>",
        "<script type=\"text/template\">if (a < b) {}</script>",
        "</body></html>"
    );

    #[test]
    fn test_strip_removes_executable_scripts_and_preloads() {
        let out = strip_bootstrap(SOURCE);
        assert!(!out.contains("loadMainDartJs"));
        assert!(!out.contains("main.dart.js"));
        assert!(!out.contains("modulepreload"));
        assert!(out.contains("<link rel=\"stylesheet\" href=\"app.css\">"));
        assert!(out.contains("application/ld+json"));
        assert!(out.contains("<script type=\"text/template\">if (a < b) {}</script>"));
        assert!(out.contains("<p>Hello <b>world</b></p>"));
    }

    #[test]
    fn test_marker_strips_non_js_type() {
        let out = strip_bootstrap("<html><head></head><body><script type=\"text/dart\">loadMainDartJs()</script><i>x</i></body></html>");
        assert_eq!(out, "<html><head></head><body><i>x</i></body></html>");
    }

    #[test]
    fn test_finalize_injects_two_blocks() {
        let scripts = DeferredScripts {
            asset_registration: "const fontLoaders = [load('Roboto')];".to_string(),
            visual_replay: "replay();".to_string(),
        };
        let out = finalize(SOURCE, &scripts);

        assert!(out.contains(
            "<script type=\"application/javascript\">\r\nconst fontLoaders = [load('Roboto')];</script>\r\n</head>"
        ));
        assert!(out.contains(
            "<script type=\"application/javascript\">\r\nPromise.all(fontLoaders).then(function(){\r\nreplay();\r\n})</script>\r\n</body>"
        ));
        assert_eq!(out.matches("<script type=\"application/javascript\">").count(), 2);
    }

    #[test]
    fn test_default_registration_declares_font_loaders() {
        let out = finalize("<html><head></head><body></body></html>", &DeferredScripts::default());
        assert!(out.contains("const fontLoaders = [];"));
    }

    #[test]
    fn test_script_text_in_attribute_is_kept() {
        let out = strip_bootstrap(r#"<html><head></head><body><div title="<script>x</script>">y</div></body></html>"#);
        let kept = out.contains(r#"<div title="<script>x</script>">y</div>"#)
            || out.contains(r#"<div title="&lt;script&gt;x&lt;/script&gt;">y</div>"#);
        assert!(kept, "attribute value lost: {}", out);
    }

    #[test]
    fn test_script_inside_comment_is_kept() {
        let source = "<html><head></head><body><!-- <script>keep()</script> --><p>a</p></body></html>";
        assert_eq!(strip_bootstrap(source), source);
    }

    #[test]
    fn test_text_that_looks_like_tags_is_untouched() {
        let out = strip_bootstrap("<html><head></head><body><p>a &lt; b and &lt;scripted&gt; is text</p></body></html>");
        assert!(out.contains("<p>a &lt; b and &lt;scripted&gt; is text</p>"));
    }

    #[test]
    fn test_quoted_gt_in_attribute() {
        let out = strip_bootstrap("<html><head></head><body><script data-x=\"a>b\">run()</script>ok</body></html>");
        assert_eq!(out, "<html><head></head><body>ok</body></html>");
    }

    #[test]
    fn test_fragment_gains_document_structure() {
        let out = finalize("<p>bare</p>", &DeferredScripts::default());
        assert!(out.starts_with("<html><head><script type=\"application/javascript\">"));
        assert!(out.contains("<body><p>bare</p><script type=\"application/javascript\">"));
        assert!(out.ends_with("</script>\r\n</body></html>"));
    }
}
