//! Hardened, namespace-aware XML document model
//!
//! A small index-arena DOM built from a `quick-xml` event stream. The parser
//! is locked down for untrusted input: any DTD (and with it, any entity
//! definition or external reference) aborts the parse, and unknown entity
//! references fail unescaping. Nodes keep parent links so validators can walk
//! from the document element, and subtrees can be grafted in to substitute
//! decrypted content.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{XmlSecError, XmlSecResult};

/// Index of a node inside its [`Document`] arena
pub type NodeId = usize;

/// Qualified name: optional prefix plus local part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    /// Namespace prefix, `None` for unprefixed names
    pub prefix: Option<String>,
    /// Local part
    pub local: String,
}

impl QName {
    fn from_bytes(bytes: &[u8]) -> XmlSecResult<Self> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| XmlSecError::XmlParse(format!("non-UTF8 name: {}", e)))?;
        Ok(match s.split_once(':') {
            Some((prefix, local)) => Self {
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
            },
            None => Self {
                prefix: None,
                local: s.to_string(),
            },
        })
    }

    /// Render as `prefix:local` or `local`
    pub fn as_xml(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }
}

/// An element attribute (namespace declarations are kept separately)
#[derive(Debug, Clone)]
pub struct Attribute {
    /// Attribute name
    pub name: QName,
    /// Unescaped attribute value
    pub value: String,
}

/// Element payload: name, namespace declarations, attributes
#[derive(Debug, Clone)]
pub struct ElementData {
    /// Element name
    pub name: QName,
    /// Namespace declarations on this element: `(prefix, uri)`, prefix `None`
    /// for the default namespace
    pub namespaces: Vec<(Option<String>, String)>,
    /// Attributes in document order
    pub attributes: Vec<Attribute>,
}

/// Node payload
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// An element node
    Element(ElementData),
    /// A text or CDATA node (unescaped)
    Text(String),
    /// A comment node
    Comment(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A parsed XML document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Document {
    /// Parse a document from a string.
    ///
    /// Rejects doctype declarations outright; entity references other than
    /// the five predefined ones and character references fail the parse, so
    /// no entity expansion ever happens.
    pub fn parse(xml: &str) -> XmlSecResult<Self> {
        let mut reader = Reader::from_str(xml);
        let mut nodes: Vec<NodeData> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        loop {
            match reader.read_event()? {
                Event::DocType(_) => return Err(XmlSecError::DtdForbidden),
                Event::Decl(_) | Event::PI(_) => {}
                Event::Start(e) => {
                    let id = Self::append_element(&mut nodes, &stack, &mut root, &e)?;
                    stack.push(id);
                }
                Event::Empty(e) => {
                    Self::append_element(&mut nodes, &stack, &mut root, &e)?;
                }
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|e| XmlSecError::XmlParse(e.to_string()))?
                        .into_owned();
                    match stack.last() {
                        Some(&parent) => {
                            Self::append_node(&mut nodes, parent, NodeKind::Text(text));
                        }
                        None => {
                            if !text.trim().is_empty() {
                                return Err(XmlSecError::XmlParse(
                                    "text outside document element".to_string(),
                                ));
                            }
                        }
                    }
                }
                Event::CData(e) => {
                    let text = String::from_utf8(e.into_inner().into_owned())?;
                    match stack.last() {
                        Some(&parent) => {
                            Self::append_node(&mut nodes, parent, NodeKind::Text(text));
                        }
                        None => {
                            return Err(XmlSecError::XmlParse(
                                "CDATA outside document element".to_string(),
                            ))
                        }
                    }
                }
                Event::Comment(e) => {
                    if let Some(&parent) = stack.last() {
                        // comments carry raw character data, no unescaping
                        let text = String::from_utf8(e.to_vec())?;
                        Self::append_node(&mut nodes, parent, NodeKind::Comment(text));
                    }
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(XmlSecError::XmlParse("unclosed element".to_string()));
        }
        let root = root.ok_or_else(|| XmlSecError::XmlParse("no document element".to_string()))?;
        Ok(Self { nodes, root })
    }

    fn append_element(
        nodes: &mut Vec<NodeData>,
        stack: &[NodeId],
        root: &mut Option<NodeId>,
        e: &BytesStart<'_>,
    ) -> XmlSecResult<NodeId> {
        let name = QName::from_bytes(e.name().as_ref())?;
        let mut namespaces = Vec::new();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|e| XmlSecError::XmlParse(e.to_string()))?;
            let key = attr.key.as_ref().to_vec();
            let value = attr
                .unescape_value()
                .map_err(|e| XmlSecError::XmlParse(e.to_string()))?
                .into_owned();
            if key == b"xmlns" {
                namespaces.push((None, value));
            } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                let prefix = String::from_utf8(prefix.to_vec())?;
                namespaces.push((Some(prefix), value));
            } else {
                attributes.push(Attribute {
                    name: QName::from_bytes(&key)?,
                    value,
                });
            }
        }
        let element = NodeKind::Element(ElementData {
            name,
            namespaces,
            attributes,
        });
        match stack.last() {
            Some(&parent) => Ok(Self::append_node(nodes, parent, element)),
            None => {
                if root.is_some() {
                    return Err(XmlSecError::XmlParse(
                        "more than one document element".to_string(),
                    ));
                }
                let id = nodes.len();
                nodes.push(NodeData {
                    kind: element,
                    parent: None,
                    children: Vec::new(),
                });
                *root = Some(id);
                Ok(id)
            }
        }
    }

    fn append_node(nodes: &mut Vec<NodeData>, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = nodes.len();
        nodes.push(NodeData {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        nodes[parent].children.push(id);
        id
    }

    /// The document element
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node payload
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    /// Element payload, `None` for text and comment nodes
    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes[id].kind {
            NodeKind::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Parent node
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Child nodes in document order
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Child element nodes in document order
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| matches!(self.nodes[c].kind, NodeKind::Element(_)))
    }

    /// Resolve a namespace prefix at a node by walking toward the root.
    /// `None` resolves the default namespace.
    pub fn resolve_prefix(&self, at: NodeId, prefix: Option<&str>) -> Option<&str> {
        let mut current = Some(at);
        while let Some(id) = current {
            if let NodeKind::Element(e) = &self.nodes[id].kind {
                for (p, uri) in &e.namespaces {
                    if p.as_deref() == prefix {
                        return Some(uri.as_str());
                    }
                }
            }
            current = self.nodes[id].parent;
        }
        None
    }

    /// Namespace URI of an element
    pub fn element_namespace(&self, id: NodeId) -> Option<&str> {
        let e = self.element(id)?;
        self.resolve_prefix(id, e.name.prefix.as_deref())
    }

    /// Whether a node is an element with the given namespace and local name.
    /// An empty `ns` matches elements in no namespace.
    pub fn is_named(&self, id: NodeId, ns: &str, local: &str) -> bool {
        match self.element(id) {
            Some(e) => {
                e.name.local == local && self.element_namespace(id).unwrap_or("") == ns
            }
            None => false,
        }
    }

    /// First child element with the given namespace and local name
    pub fn find_child(&self, id: NodeId, ns: &str, local: &str) -> Option<NodeId> {
        self.child_elements(id).find(|&c| self.is_named(c, ns, local))
    }

    /// All child elements with the given namespace and local name
    pub fn find_children(&self, id: NodeId, ns: &str, local: &str) -> Vec<NodeId> {
        self.child_elements(id)
            .filter(|&c| self.is_named(c, ns, local))
            .collect()
    }

    /// All descendant elements of a node in document order (excluding the
    /// node itself)
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_descendants(id, &mut out);
        out
    }

    fn collect_descendants(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in &self.nodes[id].children {
            if matches!(self.nodes[child].kind, NodeKind::Element(_)) {
                out.push(child);
                self.collect_descendants(child, out);
            }
        }
    }

    /// All descendant elements with the given namespace and local name
    pub fn find_descendants(&self, id: NodeId, ns: &str, local: &str) -> Vec<NodeId> {
        self.descendant_elements(id)
            .into_iter()
            .filter(|&c| self.is_named(c, ns, local))
            .collect()
    }

    /// Value of an unprefixed attribute
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        let e = self.element(id)?;
        e.attributes
            .iter()
            .find(|a| a.name.prefix.is_none() && a.name.local == name)
            .map(|a| a.value.as_str())
    }

    /// Concatenated text content of a subtree
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Comment(_) => {}
            NodeKind::Element(_) => {
                for &child in &self.nodes[id].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Map of `ID` attribute values to their elements for the whole document.
    ///
    /// The same value appearing on more than one element is rejected; signed
    /// reference resolution must be unambiguous.
    pub fn ids(&self) -> XmlSecResult<HashMap<String, NodeId>> {
        let mut map = HashMap::new();
        let mut all = vec![self.root];
        all.extend(self.descendant_elements(self.root));
        for id in all {
            if let Some(value) = self.attribute(id, "ID") {
                if map.insert(value.to_string(), id).is_some() {
                    return Err(XmlSecError::DuplicateId(value.to_string()));
                }
            }
        }
        Ok(map)
    }

    /// Replace the children of a node with a single text node
    pub fn set_text(&mut self, id: NodeId, text: String) {
        self.nodes[id].children.clear();
        Self::append_node(&mut self.nodes, id, NodeKind::Text(text));
    }

    /// Copy a subtree from another document and splice it in place of
    /// `target`. Returns the id of the copied subtree root.
    pub fn replace_with_subtree(
        &mut self,
        target: NodeId,
        src: &Document,
        src_node: NodeId,
    ) -> XmlSecResult<NodeId> {
        let parent = self.nodes[target]
            .parent
            .ok_or_else(|| XmlSecError::XmlParse("cannot replace document element".to_string()))?;
        let copied = self.copy_in(src, src_node, parent);
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == target)
            .expect("target is a child of its parent");
        // copy_in appended the copy at the end of the child list
        self.nodes[parent].children.pop();
        self.nodes[parent].children[position] = copied;
        self.nodes[target].parent = None;
        Ok(copied)
    }

    /// Copy a subtree from another document and insert it as a child of
    /// `parent` at `index`. Returns the id of the copied subtree root.
    pub fn insert_subtree(
        &mut self,
        parent: NodeId,
        index: usize,
        src: &Document,
        src_node: NodeId,
    ) -> NodeId {
        let copied = self.copy_in(src, src_node, parent);
        self.nodes[parent].children.pop();
        let index = index.min(self.nodes[parent].children.len());
        self.nodes[parent].children.insert(index, copied);
        copied
    }

    fn copy_in(&mut self, src: &Document, src_node: NodeId, parent: NodeId) -> NodeId {
        let kind = src.nodes[src_node].kind.clone();
        let id = Self::append_node(&mut self.nodes, parent, kind);
        for &child in &src.nodes[src_node].children {
            self.copy_in(src, child, id);
        }
        id
    }

    /// Serialize a subtree back to XML text
    pub fn to_xml(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].kind {
            NodeKind::Text(t) => out.push_str(&escape_text(t)),
            NodeKind::Comment(c) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
            NodeKind::Element(e) => {
                let tag = e.name.as_xml();
                out.push('<');
                out.push_str(&tag);
                for (prefix, uri) in &e.namespaces {
                    match prefix {
                        Some(p) => {
                            out.push_str(&format!(" xmlns:{}=\"{}\"", p, escape_attr(uri)))
                        }
                        None => out.push_str(&format!(" xmlns=\"{}\"", escape_attr(uri))),
                    }
                }
                for attr in &e.attributes {
                    out.push_str(&format!(
                        " {}=\"{}\"",
                        attr.name.as_xml(),
                        escape_attr(&attr.value)
                    ));
                }
                if self.nodes[id].children.is_empty() {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    for &child in &self.nodes[id].children {
                        self.write_node(child, out);
                    }
                    out.push_str("</");
                    out.push_str(&tag);
                    out.push('>');
                }
            }
        }
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}
