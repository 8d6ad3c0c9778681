//! Exclusive XML Canonicalization 1.0
//!
//! Produces the byte-exact octet stream signed by XMLDSig: namespace
//! declarations are emitted only where visibly utilized, attributes are
//! sorted by (namespace URI, local name), and text/attribute escaping follows
//! the canonical XML rules. Supports the with-comments variant and an
//! excluded subtree for the enveloped-signature transform.

use std::collections::{BTreeMap, HashMap};

use crate::dom::{Document, NodeId, NodeKind};

/// Canonicalize the subtree rooted at `apex`.
///
/// `exclude` removes one subtree from the output (the `Signature` element
/// during the enveloped-signature transform).
pub fn canonicalize(
    doc: &Document,
    apex: NodeId,
    with_comments: bool,
    exclude: Option<NodeId>,
) -> String {
    let mut out = String::new();
    let rendered: HashMap<Option<String>, String> = HashMap::new();
    write_node(doc, apex, with_comments, exclude, &rendered, &mut out);
    out
}

fn write_node(
    doc: &Document,
    id: NodeId,
    with_comments: bool,
    exclude: Option<NodeId>,
    rendered: &HashMap<Option<String>, String>,
    out: &mut String,
) {
    if Some(id) == exclude {
        return;
    }
    match doc.kind(id) {
        NodeKind::Text(t) => out.push_str(&escape_text(t)),
        NodeKind::Comment(c) => {
            if with_comments {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
        }
        NodeKind::Element(e) => {
            // Visibly utilized prefixes: the element's own prefix and every
            // prefixed attribute. Unprefixed attributes carry no namespace.
            let mut utilized: Vec<Option<&str>> = vec![e.name.prefix.as_deref()];
            for attr in &e.attributes {
                if let Some(p) = attr.name.prefix.as_deref() {
                    utilized.push(Some(p));
                }
            }
            utilized.sort();
            utilized.dedup();

            // Sorted by prefix; the default namespace (empty prefix) first.
            let mut decls: BTreeMap<String, (Option<String>, String)> = BTreeMap::new();
            let mut scope = rendered.clone();
            for prefix in utilized {
                let uri = doc.resolve_prefix(id, prefix).unwrap_or("");
                let key = prefix.map(|p| p.to_string());
                let current = scope.get(&key).map(String::as_str).unwrap_or("");
                if uri != current {
                    decls.insert(
                        key.clone().unwrap_or_default(),
                        (key.clone(), uri.to_string()),
                    );
                    scope.insert(key, uri.to_string());
                }
            }

            let mut attrs: Vec<(&str, &str, String)> = e
                .attributes
                .iter()
                .map(|a| {
                    let ns = a
                        .name
                        .prefix
                        .as_deref()
                        .and_then(|p| doc.resolve_prefix(id, Some(p)))
                        .unwrap_or("");
                    (ns, a.name.local.as_str(), a.name.as_xml())
                })
                .collect();
            let values: HashMap<String, &str> = e
                .attributes
                .iter()
                .map(|a| (a.name.as_xml(), a.value.as_str()))
                .collect();
            attrs.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

            let tag = e.name.as_xml();
            out.push('<');
            out.push_str(&tag);
            for (prefix_key, (prefix, uri)) in &decls {
                if prefix_key.is_empty() && uri.is_empty() && prefix.is_none() {
                    out.push_str(" xmlns=\"\"");
                } else {
                    match prefix {
                        Some(p) => {
                            out.push_str(&format!(" xmlns:{}=\"{}\"", p, escape_attr(uri)))
                        }
                        None => out.push_str(&format!(" xmlns=\"{}\"", escape_attr(uri))),
                    }
                }
            }
            for (_, _, qname) in &attrs {
                out.push_str(&format!(" {}=\"{}\"", qname, escape_attr(values[qname])));
            }
            out.push('>');
            for &child in doc.children(id) {
                write_node(doc, child, with_comments, exclude, &scope, out);
            }
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}
