//! Document → [`PageModel`] extraction.
//!
//! The model is deliberately lossy: every list is capped and every string is
//! cleaned so the page never costs more than a bounded number of tokens.

use std::sync::LazyLock;

use tabpilot_core::page::{
    FormField, FormSummary, Heading, InteractableElement, MAX_ELEMENT_TEXT, MAX_FORMS,
    MAX_HEADINGS, MAX_INTERACTABLE, MAX_MAIN_TEXT, PageModel,
};

use crate::dom::{Document, NodeId, resolve_url};
use crate::selector::Selector;

/// Elements the agent can act on, in the order both reading and positional
/// targeting enumerate them.
pub const INTERACTIVE_SELECTOR: &str =
    r#"button, a[href], input, select, textarea, [role="button"], [role="link"]"#;

const HEADING_SELECTOR: &str = "h1, h2, h3";
const FORM_FIELD_SELECTOR: &str = "input, select, textarea";

static INTERACTIVE: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse(INTERACTIVE_SELECTOR).ok());
static HEADINGS: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse(HEADING_SELECTOR).ok());
static FORMS: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse("form").ok());
static FORM_FIELDS: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse(FORM_FIELD_SELECTOR).ok());

fn query(selector: &LazyLock<Option<Selector>>, doc: &Document, scope: NodeId) -> Vec<NodeId> {
    selector
        .as_ref()
        .map(|s| s.query_all_within(doc, scope))
        .unwrap_or_default()
}

/// The full interactive enumeration. Indices into this list are what
/// `InteractableElement::index` and positional targeting refer to.
pub fn interactive_elements(doc: &Document) -> Vec<NodeId> {
    query(&INTERACTIVE, doc, doc.root())
}

/// Strip control characters and collapse whitespace.
pub fn clean_text(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Char-boundary-safe prefix of at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => s[..i].to_string(),
        None => s.to_string(),
    }
}

/// Visible element text, cleaned and capped at [`MAX_ELEMENT_TEXT`].
pub fn element_text(doc: &Document, id: NodeId) -> String {
    truncate_chars(&clean_text(&doc.inner_text(id)), MAX_ELEMENT_TEXT)
}

fn clean_attr(doc: &Document, id: NodeId, name: &str) -> Option<String> {
    doc.node(id)
        .attr(name)
        .map(|v| truncate_chars(&clean_text(v), MAX_ELEMENT_TEXT))
        .filter(|v| !v.is_empty())
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Label priority: visible text, aria-label, placeholder.
fn label_of(doc: &Document, id: NodeId) -> Option<String> {
    non_empty(element_text(doc, id))
        .or_else(|| clean_attr(doc, id, "aria-label"))
        .or_else(|| clean_attr(doc, id, "placeholder"))
}

fn name_of(doc: &Document, id: NodeId) -> Option<String> {
    clean_attr(doc, id, "name").or_else(|| clean_attr(doc, id, "id"))
}

fn value_of(doc: &Document, id: NodeId) -> Option<String> {
    let node = doc.node(id);
    let raw = if node.value.is_empty() {
        node.attr("value").unwrap_or_default()
    } else {
        node.value.as_str()
    };
    non_empty(truncate_chars(&clean_text(raw), MAX_ELEMENT_TEXT))
}

fn describe_element(doc: &Document, index: usize, id: NodeId) -> InteractableElement {
    let node = doc.node(id);
    InteractableElement {
        index,
        tag: node.tag.to_ascii_uppercase(),
        input_type: node.input_type(),
        role: clean_attr(doc, id, "role"),
        label: label_of(doc, id),
        name: name_of(doc, id),
        href: node
            .attr("href")
            .map(|h| truncate_chars(&clean_text(&resolve_url(&doc.url, h)), MAX_ELEMENT_TEXT)),
        value: value_of(doc, id),
    }
}

fn headings(doc: &Document) -> Vec<Heading> {
    query(&HEADINGS, doc, doc.root())
        .into_iter()
        .take(MAX_HEADINGS)
        .map(|id| Heading {
            tag: doc.node(id).tag.to_ascii_uppercase(),
            text: element_text(doc, id),
        })
        .filter(|h| !h.text.is_empty())
        .collect()
}

fn forms(doc: &Document) -> Vec<FormSummary> {
    query(&FORMS, doc, doc.root())
        .into_iter()
        .take(MAX_FORMS)
        .map(|form| FormSummary {
            id: clean_attr(doc, form, "id"),
            action: doc
                .node(form)
                .attr("action")
                .map(|a| clean_text(&resolve_url(&doc.url, a))),
            fields: query(&FORM_FIELDS, doc, form)
                .into_iter()
                .map(|f| FormField {
                    name: name_of(doc, f),
                    field_type: doc.node(f).input_type().unwrap_or_else(|| "text".into()),
                    placeholder: clean_attr(doc, f, "placeholder"),
                    required: doc.node(f).attrs.contains_key("required"),
                })
                .collect(),
        })
        .collect()
}

fn main_text(doc: &Document) -> String {
    let container = doc
        .all()
        .into_iter()
        .find(|&n| doc.node(n).tag == "main")
        .or_else(|| doc.all().into_iter().find(|&n| doc.node(n).tag == "article"))
        .unwrap_or_else(|| doc.body());
    truncate_chars(&clean_text(&doc.inner_text(container)), MAX_MAIN_TEXT)
}

/// Build the token-bounded model of `doc`.
pub fn extract_page_model(doc: &Document) -> PageModel {
    let interactable_elements = interactive_elements(doc)
        .into_iter()
        .take(MAX_INTERACTABLE)
        .enumerate()
        .map(|(index, id)| describe_element(doc, index, id))
        .filter(|el| el.label.is_some() || el.name.is_some() || el.href.is_some())
        .collect();

    PageModel {
        url: clean_text(&doc.url),
        title: truncate_chars(&clean_text(&doc.title), MAX_ELEMENT_TEXT),
        headings: headings(doc),
        interactable_elements,
        forms: forms(doc),
        main_text: main_text(doc),
        page_height: doc.page_height,
        scroll_y: doc.scroll_y,
        error: None,
    }
}
