//! CSS selector subset.
//!
//! Supported: type and universal selectors, `#id`, `.class`, attribute
//! selectors (`[a]`, `[a=v]`, `[a~=v]`, `[a^=v]`, `[a$=v]`, `[a*=v]`),
//! descendant and child combinators, and selector lists. Anything else
//! (pseudo-classes, sibling combinators) is rejected as invalid, which the
//! resolver treats as "try the next strategy".

use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

use crate::dom::{Document, Node, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid selector '{selector}': {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, PartialEq)]
struct AttrSelector {
    name: String,
    op: Option<(AttrOp, String)>,
}

impl AttrSelector {
    fn matches(&self, node: &Node) -> bool {
        let Some(actual) = node.attr(&self.name) else {
            return false;
        };
        match &self.op {
            None => true,
            Some((AttrOp::Equals, v)) => actual == v,
            Some((AttrOp::Includes, v)) => actual.split_whitespace().any(|w| w == v),
            Some((AttrOp::Prefix, v)) => !v.is_empty() && actual.starts_with(v.as_str()),
            Some((AttrOp::Suffix, v)) => !v.is_empty() && actual.ends_with(v.as_str()),
            Some((AttrOp::Substring, v)) => !v.is_empty() && actual.contains(v.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.ids.is_empty() && self.classes.is_empty() && self.attrs.is_empty()
    }

    fn matches(&self, node: &Node) -> bool {
        self.tag.as_ref().is_none_or(|t| t == "*" || *t == node.tag)
            && self.ids.iter().all(|id| node.attr("id") == Some(id.as_str()))
            && self.classes.iter().all(|c| node.has_class(c))
            && self.attrs.iter().all(|a| a.matches(node))
    }
}

/// One comma-free selector: compounds joined by combinators, stored
/// left-to-right. The combinator of the first compound is unused.
#[derive(Debug, Clone, PartialEq)]
struct Complex {
    parts: Vec<(Combinator, Compound)>,
}

impl Complex {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.matches_at(doc, node, self.parts.len() - 1)
    }

    fn matches_at(&self, doc: &Document, node: NodeId, idx: usize) -> bool {
        let (combinator, compound) = &self.parts[idx];
        if !compound.matches(doc.node(node)) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => doc
                .node(node)
                .parent
                .is_some_and(|p| self.matches_at(doc, p, idx - 1)),
            Combinator::Descendant => doc
                .ancestors(node)
                .any(|a| self.matches_at(doc, a, idx - 1)),
        }
    }
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let err = |reason: &str| SelectorError {
            selector: source.to_string(),
            reason: reason.to_string(),
        };

        let mut alternatives = Vec::new();
        for part in split_list(source) {
            let complex = parse_complex(part.trim()).map_err(|r| err(&r))?;
            alternatives.push(complex);
        }
        if alternatives.is_empty() {
            return Err(err("empty selector"));
        }
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.alternatives.iter().any(|c| c.matches(doc, node))
    }

    /// All matching nodes in document order.
    pub fn query_all(&self, doc: &Document) -> Vec<NodeId> {
        self.query_all_within(doc, doc.root())
    }

    /// Matching descendants of `scope` in document order.
    pub fn query_all_within(&self, doc: &Document, scope: NodeId) -> Vec<NodeId> {
        doc.descendants(scope)
            .into_iter()
            .filter(|&n| self.matches(doc, n))
            .collect()
    }

    pub fn query_first(&self, doc: &Document) -> Option<NodeId> {
        doc.descendants(doc.root())
            .into_iter()
            .find(|&n| self.matches(doc, n))
    }
}

/// Split on top-level commas (commas inside `[...]` or quotes are kept).
fn split_list(source: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in source.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth -= 1,
            (None, ',') if depth == 0 => {
                parts.push(&source[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&source[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

fn read_ident(chars: &mut Peekable<Chars<'_>>) -> Result<String, String> {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if c == '\\' {
            chars.next();
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => return Err("dangling escape".into()),
            }
        } else if is_ident_char(c) {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if out.is_empty() {
        Err("expected identifier".into())
    } else {
        Ok(out)
    }
}

fn skip_ws(chars: &mut Peekable<Chars<'_>>) -> bool {
    let mut skipped = false;
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
        skipped = true;
    }
    skipped
}

fn parse_attr(chars: &mut Peekable<Chars<'_>>) -> Result<AttrSelector, String> {
    skip_ws(chars);
    let name = read_ident(chars)?.to_ascii_lowercase();
    skip_ws(chars);

    let op = match chars.next() {
        Some(']') => return Ok(AttrSelector { name, op: None }),
        Some('=') => AttrOp::Equals,
        Some(c @ ('~' | '^' | '$' | '*')) => {
            if chars.next() != Some('=') {
                return Err(format!("expected '=' after '{c}'"));
            }
            match c {
                '~' => AttrOp::Includes,
                '^' => AttrOp::Prefix,
                '$' => AttrOp::Suffix,
                _ => AttrOp::Substring,
            }
        }
        Some(c) => return Err(format!("unexpected '{c}' in attribute selector")),
        None => return Err("unterminated attribute selector".into()),
    };

    skip_ws(chars);
    let value = match chars.peek().copied() {
        Some(q @ ('"' | '\'')) => {
            chars.next();
            let mut v = String::new();
            loop {
                match chars.next() {
                    Some('\\') => {
                        if let Some(e) = chars.next() {
                            v.push(e);
                        }
                    }
                    Some(c) if c == q => break,
                    Some(c) => v.push(c),
                    None => return Err("unterminated string".into()),
                }
            }
            v
        }
        _ => read_ident(chars)?,
    };
    skip_ws(chars);
    if chars.next() != Some(']') {
        return Err("expected ']'".into());
    }
    Ok(AttrSelector {
        name,
        op: Some((op, value)),
    })
}

fn parse_compound(chars: &mut Peekable<Chars<'_>>) -> Result<Compound, String> {
    let mut compound = Compound::default();

    match chars.peek() {
        Some('*') => {
            chars.next();
            compound.tag = Some("*".into());
        }
        Some(&c) if is_ident_char(c) => {
            compound.tag = Some(read_ident(chars)?.to_ascii_lowercase());
        }
        _ => {}
    }

    loop {
        match chars.peek() {
            Some('#') => {
                chars.next();
                compound.ids.push(read_ident(chars)?);
            }
            Some('.') => {
                chars.next();
                compound.classes.push(read_ident(chars)?);
            }
            Some('[') => {
                chars.next();
                compound.attrs.push(parse_attr(chars)?);
            }
            Some(':') => return Err("pseudo-classes are not supported".into()),
            Some('+' | '~') => return Err("sibling combinators are not supported".into()),
            _ => break,
        }
    }

    if compound.is_empty() {
        return Err(match chars.peek() {
            Some(c) => format!("unexpected '{c}'"),
            None => "expected a selector".into(),
        });
    }
    Ok(compound)
}

fn parse_complex(source: &str) -> Result<Complex, String> {
    let mut chars = source.chars().peekable();
    let mut parts = Vec::new();
    let mut combinator = Combinator::Descendant;

    skip_ws(&mut chars);
    loop {
        parts.push((combinator, parse_compound(&mut chars)?));

        let had_ws = skip_ws(&mut chars);
        match chars.peek() {
            None => break,
            Some('>') => {
                chars.next();
                skip_ws(&mut chars);
                combinator = Combinator::Child;
            }
            Some(_) if had_ws => combinator = Combinator::Descendant,
            Some(c) => return Err(format!("unexpected '{c}'")),
        }
    }
    Ok(Complex { parts })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new("https://a.example", "A");
        let body = doc.body();
        let nav = doc.append(body, "nav");
        doc.node_mut(nav).attrs.insert("class".into(), "top main-nav".into());
        let link = doc.append(nav, "a");
        doc.node_mut(link).attrs.insert("href".into(), "/home".into());
        let form = doc.append(body, "form");
        doc.node_mut(form).attrs.insert("id".into(), "login".into());
        let div = doc.append(form, "div");
        let input = doc.append(div, "input");
        doc.node_mut(input).attrs.insert("name".into(), "email".into());
        doc.node_mut(input).attrs.insert("type".into(), "email".into());
        (doc, link, form, input)
    }

    fn q(doc: &Document, s: &str) -> Vec<NodeId> {
        Selector::parse(s).unwrap().query_all(doc)
    }

    #[test]
    fn simple_selectors() {
        let (doc, link, form, input) = doc();
        assert_eq!(q(&doc, "a"), vec![link]);
        assert_eq!(q(&doc, "#login"), vec![form]);
        assert_eq!(q(&doc, "nav.top.main-nav a"), vec![link]);
        assert_eq!(q(&doc, "input[name=email]"), vec![input]);
        assert_eq!(q(&doc, r#"input[type="email"]"#), vec![input]);
        assert_eq!(q(&doc, "a[href^='/ho']"), vec![link]);
        assert_eq!(q(&doc, "[href$=me]"), vec![link]);
        assert_eq!(q(&doc, "[class~=top]").len(), 1);
    }

    #[test]
    fn combinators() {
        let (doc, _, _, input) = doc();
        assert_eq!(q(&doc, "form input"), vec![input]);
        assert_eq!(q(&doc, "#login > div > input"), vec![input]);
        assert!(q(&doc, "#login > input").is_empty());
        assert!(q(&doc, "nav input").is_empty());
    }

    #[test]
    fn selector_list_keeps_document_order() {
        let (doc, link, form, input) = doc();
        assert_eq!(q(&doc, "input, form, a"), vec![link, form, input]);
        assert_eq!(q(&doc, r#"button, a[href], [role="button"], input"#), vec![link, input]);
    }

    #[test]
    fn invalid_selectors_are_rejected() {
        for bad in ["", "a:hover", "div + p", "[name", "#", "a >", "..x", "input[type=\"x]"] {
            assert!(Selector::parse(bad).is_err(), "{bad} should be invalid");
        }
        let err = Selector::parse("button:contains('Go')").unwrap_err();
        assert!(err.to_string().contains("pseudo-classes"));
    }

    #[test]
    fn tag_matching_is_case_insensitive() {
        let (doc, _, form, _) = doc();
        assert_eq!(q(&doc, "FORM"), vec![form]);
    }

    #[test]
    fn query_within_scope() {
        let (doc, _, form, input) = doc();
        let sel = Selector::parse("input, select, textarea").unwrap();
        assert_eq!(sel.query_all_within(&doc, form), vec![input]);
    }
}
