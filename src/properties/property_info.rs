//! The property-info trie: an ordered radix structure mapping property name
//! patterns to their SELinux target context and value type.
//!
//! Patterns come from the concatenated property_contexts files. A pattern is
//! either exact (`ro.serialno`) or a prefix (`persist.radio.*`, where the
//! star may also cut a segment short, as in `ro.boot*`). Lookup prefers an
//! exact hit, then the longest matching prefix, then the built-in default.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyInfoEntry {
    pub name: String,
    pub context: String,
    pub type_str: String,
    pub exact: bool,
}

/// One line: `name[*]  context  [type...]`. The type may span several fields
/// (`enum a b c`). Missing type means `string`.
pub fn parse_property_info_line(line: &str) -> Result<Option<PropertyInfoEntry>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut fields = line.split_whitespace();
    let name = fields
        .next()
        .ok_or_else(|| "missing property name".to_owned())?;
    let context = fields
        .next()
        .ok_or_else(|| format!("missing context for '{name}'"))?;
    let type_str = fields.collect::<Vec<_>>().join(" ");
    let type_str = if type_str.is_empty() {
        "string".to_owned()
    } else {
        type_str
    };

    let (name, exact) = match name.strip_suffix('*') {
        Some(prefix) => (prefix, false),
        None => (name, true),
    };
    Ok(Some(PropertyInfoEntry {
        name: name.to_owned(),
        context: context.to_owned(),
        type_str,
        exact,
    }))
}

pub fn parse_property_info_file(
    content: &str,
    entries: &mut Vec<PropertyInfoEntry>,
    errors: &mut Vec<String>,
) {
    for (lineno, line) in content.lines().enumerate() {
        match parse_property_info_line(line) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(e) => errors.push(format!("line {}: {e}", lineno + 1)),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrieNode {
    children: BTreeMap<String, TrieNode>,
    /// Set when a pattern terminates exactly at this node.
    exact: Option<(String, String)>,
    /// Set when a `name.*`-style pattern covers everything below this node.
    subtree: Option<(String, String)>,
    /// `frag*`-style patterns anchored at this node, longest fragment first.
    partial: Vec<(String, (String, String))>,
}

/// In-memory form of the trie plus the flat entry list it was built from
/// (the flat list is what gets serialized for readers).
#[derive(Debug, Serialize, Deserialize)]
pub struct PropertyInfoArea {
    entries: Vec<PropertyInfoEntry>,
    default_context: String,
    default_type: String,
    #[serde(skip)]
    root: TrieNode,
}

impl PropertyInfoArea {
    pub fn build(
        entries: Vec<PropertyInfoEntry>,
        default_context: &str,
        default_type: &str,
    ) -> Self {
        let mut area = Self {
            entries,
            default_context: default_context.to_owned(),
            default_type: default_type.to_owned(),
            root: TrieNode::default(),
        };
        area.rebuild_trie();
        area
    }

    pub fn empty(default_context: &str, default_type: &str) -> Self {
        Self::build(Vec::new(), default_context, default_type)
    }

    fn rebuild_trie(&mut self) {
        self.root = TrieNode::default();
        for entry in &self.entries {
            let payload = (entry.context.clone(), entry.type_str.clone());
            let mut node = &mut self.root;
            let mut segments = entry.name.split('.').peekable();
            loop {
                let Some(segment) = segments.next() else {
                    break;
                };
                let is_last = segments.peek().is_none();
                if is_last {
                    if entry.exact {
                        node.children
                            .entry(segment.to_owned())
                            .or_default()
                            .exact
                            .get_or_insert(payload);
                    } else if segment.is_empty() {
                        // "foo.*" leaves an empty trailing segment
                        node.subtree.get_or_insert(payload);
                    } else {
                        node.partial.push((segment.to_owned(), payload));
                        node.partial.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
                    }
                    break;
                }
                node = node.children.entry(segment.to_owned()).or_default();
            }
        }
    }

    /// Longest-match lookup. Returns `(target_context, type)`.
    #[must_use]
    pub fn query(&self, name: &str) -> (&str, &str) {
        let mut node = &self.root;
        let mut best: Option<&(String, String)> = None;
        let mut segments = name.split('.').peekable();

        loop {
            if let Some(subtree) = &node.subtree {
                best = Some(subtree);
            }
            let Some(segment) = segments.next() else {
                break;
            };
            let is_last = segments.peek().is_none();
            if let Some(hit) = node
                .partial
                .iter()
                .find(|(frag, _)| segment.starts_with(frag.as_str()))
            {
                best = Some(&hit.1);
            }
            let Some(child) = node.children.get(segment) else {
                break;
            };
            if is_last {
                // A `foo.*` pattern requires the dot, so a child subtree
                // does not cover the exact name `foo`.
                if let Some(exact) = &child.exact {
                    best = Some(exact);
                }
                break;
            }
            node = child;
        }

        match best {
            Some((context, type_str)) => (context, type_str),
            None => (&self.default_context, &self.default_type),
        }
    }

    #[must_use]
    pub fn default_context(&self) -> &str {
        &self.default_context
    }

    /// Serialize and atomically publish the trie for out-of-process readers,
    /// then restore its label.
    pub fn publish(
        &self,
        path: &Path,
        file_context: &str,
    ) -> Result<(), String> {
        let serialized = serde_json::to_vec(self)
            .map_err(|e| format!("Could not serialize property info: {e}"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Could not create {parent:?}: {e}"))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &serialized)
            .map_err(|e| format!("Could not write {tmp:?}: {e}"))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| format!("Could not move property info into place: {e}"))?;
        if crate::platform::selinux::is_enabled() {
            crate::platform::selinux::set_file_context(path, file_context)?;
        }
        Ok(())
    }
}
