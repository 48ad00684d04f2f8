//! Matching of `start:`/`end:` markers into nested blocks.

use crate::check_box::CheckBox;
use crate::error::{DocmergeError, Result};
use crate::filters::FilterCall;
use crate::merge_field::{MergeField, Role};
use serde::Serialize;
use serde_json::{Map, Value};

/// A placeholder found in a document part
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    Field(MergeField),
    CheckBox(CheckBox),
}

/// A placeholder and its position in the part's tree (child indices from the top).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub path: Vec<usize>,
    pub kind: PlaceholderKind,
}

impl Placeholder {
    #[must_use]
    pub fn field(&self) -> Option<&MergeField> {
        match &self.kind {
            PlaceholderKind::Field(field) => Some(field),
            PlaceholderKind::CheckBox(_) => None,
        }
    }

    /// Key used for error reporting
    #[must_use]
    pub fn raw_key(&self) -> &str {
        match &self.kind {
            PlaceholderKind::Field(field) => field.raw_key(),
            PlaceholderKind::CheckBox(check_box) => check_box.key(),
        }
    }
}

/// Placeholders reduced to a forest. Leaves and block bounds are indices
/// into the placeholder list the forest was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateNode {
    Field(usize),
    CheckBox(usize),
    Block {
        start: usize,
        end: usize,
        children: Vec<TemplateNode>,
    },
}

impl TemplateNode {
    /// Index of the first placeholder this node covers
    #[must_use]
    pub fn first_index(&self) -> usize {
        match self {
            Self::Field(index) | Self::CheckBox(index) => *index,
            Self::Block { start, .. } => *start,
        }
    }

    /// Index of the last placeholder this node covers
    #[must_use]
    pub fn last_index(&self) -> usize {
        match self {
            Self::Field(index) | Self::CheckBox(index) => *index,
            Self::Block { end, .. } => *end,
        }
    }
}

struct OpenBlock<'a> {
    start: usize,
    key: &'a str,
    children: Vec<TemplateNode>,
}

/// Builds the block forest for placeholders given in document order.
///
/// An end marker without any open start is kept as an ordinary field, so a
/// missing start surfaces as a lookup failure for `end:<key>`.
///
/// # Errors
///
/// - `DocmergeError::Template` if an end marker closes a block that is not the innermost one.
/// - `DocmergeError::Template` if a start marker is never closed.
pub fn match_blocks(placeholders: &[Placeholder]) -> Result<Vec<TemplateNode>> {
    let mut stack: Vec<OpenBlock<'_>> = Vec::new();
    let mut top_level = Vec::new();

    for (index, placeholder) in placeholders.iter().enumerate() {
        let node = match &placeholder.kind {
            PlaceholderKind::CheckBox(_) => TemplateNode::CheckBox(index),
            PlaceholderKind::Field(field) => match field.role() {
                Role::Simple => TemplateNode::Field(index),
                Role::BlockStart => {
                    stack.push(OpenBlock {
                        start: index,
                        key: field.key(),
                        children: Vec::new(),
                    });
                    continue;
                }
                Role::BlockEnd => match open_position(&stack, field.key()) {
                    None => TemplateNode::Field(index),
                    Some(position) if position + 1 == stack.len() => {
                        let Some(open) = stack.pop() else {
                            continue;
                        };
                        TemplateNode::Block {
                            start: open.start,
                            end: index,
                            children: open.children,
                        }
                    }
                    Some(_) => {
                        let expected = stack.last().map_or("", |open| open.key);
                        return Err(DocmergeError::template(format!(
                            "expected end tag for start:{expected}, got end:{}",
                            field.key()
                        )));
                    }
                },
            },
        };

        match stack.last_mut() {
            Some(open) => open.children.push(node),
            None => top_level.push(node),
        }
    }

    if let Some(open) = stack.last() {
        return Err(DocmergeError::template(format!(
            "no end tag for start:{}",
            open.key
        )));
    }

    Ok(top_level)
}

fn open_position(stack: &[OpenBlock<'_>], key: &str) -> Option<usize> {
    stack.iter().rposition(|open| open.key == key)
}

/// Serializable view of a part's placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    MergeField {
        key: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        filters: Vec<FilterCall>,
    },
    CheckBox {
        key: String,
    },
    Block {
        key: String,
        nodes: Vec<TreeNode>,
    },
}

/// Converts a matched forest into its serializable form.
#[must_use]
pub fn to_tree(forest: &[TemplateNode], placeholders: &[Placeholder]) -> Vec<TreeNode> {
    forest
        .iter()
        .filter_map(|node| match node {
            TemplateNode::Field(index) => placeholders[*index].field().map(|field| {
                TreeNode::MergeField {
                    key: field.key().to_string(),
                    filters: field.filters().to_vec(),
                }
            }),
            TemplateNode::CheckBox(index) => Some(TreeNode::CheckBox {
                key: placeholders[*index].raw_key().to_string(),
            }),
            TemplateNode::Block {
                start, children, ..
            } => placeholders[*start].field().map(|field| TreeNode::Block {
                key: field.key().to_string(),
                nodes: to_tree(children, placeholders),
            }),
        })
        .collect()
}

/// The data shape a tree needs: `null` leaves, nested objects for dotted
/// keys, one-element arrays for blocks.
#[must_use]
pub fn required_hash(tree: &[TreeNode]) -> Value {
    let mut hash = Value::Object(Map::new());
    for node in tree {
        let (key, leaf) = match node {
            TreeNode::MergeField { key, .. } | TreeNode::CheckBox { key } => (key, Value::Null),
            TreeNode::Block { key, nodes } => (key, Value::Array(vec![required_hash(nodes)])),
        };
        let nested = key.rsplit('.').fold(leaf, |inner, segment| {
            let mut map = Map::new();
            map.insert(segment.to_string(), inner);
            Value::Object(map)
        });
        deep_merge(&mut hash, nested);
    }
    hash
}

/// Merges `source` into `target`. Objects merge by key, arrays element-wise,
/// and `null` never overwrites an existing value.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) => {
            for (i, value) in source.into_iter().enumerate() {
                match target.get_mut(i) {
                    Some(existing) => deep_merge(existing, value),
                    None => target.push(value),
                }
            }
        }
        (_, Value::Null) => {}
        (target, source) => *target = source,
    }
}
