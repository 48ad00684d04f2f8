//! Resolution of one document part: fields, checkboxes and block unrolling.

use crate::block::{Placeholder, PlaceholderKind, TemplateNode};
use crate::data_set::{DataSet, is_truthy, render};
use crate::error::{DocmergeError, MergeErrors, Result};
use crate::wml;
use crate::xml::{Node, children_at_mut, node_at, node_at_mut};
use serde_json::Value;
use std::borrow::Cow;
use tracing::{debug, trace};

/// Result of [`replace`]
#[derive(Debug, Clone, Default)]
pub struct Replacement {
    /// Lookup failures in document order
    pub errors: MergeErrors,
    /// Number of placeholders found in the part
    pub placeholders: usize,
}

/// Resolves every placeholder in `nodes` in place.
///
/// Lookup failures do not stop the walk; they are collected per placeholder
/// and returned in document order. Placeholders that fail keep their markers.
/// A placeholder sharing a paragraph with a block marker is first moved into a
/// paragraph of its own, so that it is not repeated with the block.
///
/// # Errors
///
/// Returns filter and block structure errors, which abort the part.
pub fn replace(nodes: &mut Vec<Node>, data_set: &DataSet) -> Result<Replacement> {
    wml::normalize_complex_fields(nodes);
    let (placeholders, forest) = loop {
        let (placeholders, forest) = wml::scan(nodes)?;
        let engine = ReplacementEngine {
            placeholders: &placeholders,
        };
        if !engine.split_shared_paragraphs(nodes, &forest)? {
            break (placeholders, forest);
        }
    };

    let engine = ReplacementEngine {
        placeholders: &placeholders,
    };
    let mut slots = vec![MergeErrors::new(); placeholders.len()];
    engine.replace_level(nodes, &forest, &[], data_set, &mut slots)?;

    let mut errors = MergeErrors::new();
    for slot in slots {
        errors.merge(slot);
    }

    Ok(Replacement {
        errors,
        placeholders: placeholders.len(),
    })
}

/// Maps paths of the original tree into a copied block region: the segment
/// at `depth` is shifted down by `offset` and everything above it dropped.
#[derive(Debug, Clone, Copy)]
struct Frame {
    depth: usize,
    offset: usize,
}

fn rebase(path: &[usize], frame: Frame) -> Vec<usize> {
    let mut local = Vec::with_capacity(path.len().saturating_sub(frame.depth));
    if let Some(index) = path.get(frame.depth) {
        local.push(index.saturating_sub(frame.offset));
        local.extend_from_slice(&path[frame.depth + 1..]);
    }
    local
}

fn localize(path: &[usize], frames: &[Frame]) -> Vec<usize> {
    frames
        .iter()
        .fold(path.to_vec(), |path, frame| rebase(&path, *frame))
}

fn common_prefix_len(a: &[usize], b: &[usize]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// The sibling range repeated by a block
#[derive(Debug, Clone)]
struct Region {
    /// Path of the element whose children hold the region
    parent: Vec<usize>,
    first: usize,
    last: usize,
}

impl Region {
    fn contains(&self, path: &[usize]) -> bool {
        path.starts_with(&self.parent)
            && path
                .get(self.parent.len())
                .is_some_and(|index| (self.first..=self.last).contains(index))
    }
}

struct ReplacementEngine<'a> {
    placeholders: &'a [Placeholder],
}

impl ReplacementEngine<'_> {
    /// Walks one level of the block forest backwards, so that rewriting a
    /// node never moves a node that is still to be visited.
    fn replace_level(
        &self,
        nodes: &mut Vec<Node>,
        level: &[TemplateNode],
        frames: &[Frame],
        data_set: &DataSet,
        slots: &mut [MergeErrors],
    ) -> Result<()> {
        for node in level.iter().rev() {
            match node {
                TemplateNode::Field(index) | TemplateNode::CheckBox(index) => {
                    self.replace_leaf(nodes, *index, frames, data_set, slots);
                }
                TemplateNode::Block {
                    start,
                    end,
                    children,
                } => {
                    let region = self.region(nodes, *start, *end, frames)?;
                    self.replace_block(nodes, *start, *end, children, &region, frames, data_set, slots)?;
                }
            }
        }
        Ok(())
    }

    fn replace_leaf(
        &self,
        nodes: &mut [Node],
        index: usize,
        frames: &[Frame],
        data_set: &DataSet,
        slots: &mut [MergeErrors],
    ) {
        let placeholder = &self.placeholders[index];
        let path = localize(&placeholder.path, frames);
        let Some(Node::Element(element)) = node_at_mut(nodes, &path) else {
            return;
        };

        match &placeholder.kind {
            PlaceholderKind::Field(field) => match field.resolve(data_set) {
                Ok(value) => {
                    trace!(key = field.key(), "replacing merge field");
                    let run = wml::field_run(element, &render(&value));
                    if let Some(node) = node_at_mut(nodes, &path) {
                        *node = run;
                    }
                }
                Err(failure) => slots[index].record(field.raw_key(), failure),
            },
            PlaceholderKind::CheckBox(check_box) => match check_box.resolve(data_set) {
                Ok(checked) => wml::set_check_box(element, checked),
                Err(failure) => slots[index].record(check_box.key(), failure),
            },
        }
    }

    /// Locates the siblings spanned by a block: the children of the markers'
    /// nearest common ancestor, from the one holding the start marker to the
    /// one holding the end marker. A block inside a single table row repeats
    /// the whole row.
    fn region(&self, nodes: &[Node], start: usize, end: usize, frames: &[Frame]) -> Result<Region> {
        let start_path = localize(&self.placeholders[start].path, frames);
        let end_path = localize(&self.placeholders[end].path, frames);
        let depth = common_prefix_len(&start_path, &end_path);

        let (Some(&first), Some(&last)) = (start_path.get(depth), end_path.get(depth)) else {
            return Err(DocmergeError::template(format!(
                "start:{} and its end tag overlap",
                self.placeholders[start].raw_key()
            )));
        };

        let parent = start_path[..depth].to_vec();
        let in_row = node_at(nodes, &parent)
            .and_then(Node::as_element)
            .is_some_and(|element| element.is("w:tr"));

        if in_row && let Some((&row, grandparent)) = parent.split_last() {
            return Ok(Region {
                parent: grandparent.to_vec(),
                first: row,
                last: row,
            });
        }

        Ok(Region {
            parent,
            first,
            last,
        })
    }

    /// Moves a placeholder that shares a paragraph with a block marker, but
    /// belongs outside the block, into a paragraph of its own. Returns whether
    /// a paragraph was split, which invalidates every placeholder path.
    ///
    /// Sharing anything other than a paragraph, such as a table row, cannot be
    /// separated and is an error.
    fn split_shared_paragraphs(&self, nodes: &mut Vec<Node>, level: &[TemplateNode]) -> Result<bool> {
        for (position, node) in level.iter().enumerate() {
            let TemplateNode::Block {
                start,
                end,
                children,
            } = node
            else {
                continue;
            };
            if self.split_shared_paragraphs(nodes, children)? {
                return Ok(true);
            }

            let region = self.region(nodes, *start, *end, &[])?;
            let depth = region.parent.len() + 1;
            let before = position
                .checked_sub(1)
                .and_then(|i| level.get(i))
                .map(TemplateNode::last_index);
            let after = level.get(position + 1).map(TemplateNode::first_index);

            if let Some(neighbour) = before
                && region.contains(&self.placeholders[neighbour].path)
            {
                let at = self.placeholders[*start].path.get(depth).copied();
                let at = at.filter(|&at| {
                    self.placeholders[neighbour]
                        .path
                        .get(depth)
                        .is_some_and(|&index| index < at)
                });
                return self.split_or_reject(nodes, &region, region.first, at, neighbour, *start);
            }
            if let Some(neighbour) = after
                && region.contains(&self.placeholders[neighbour].path)
            {
                let at = self.placeholders[*end].path.get(depth).map(|index| index + 1);
                let at = at.filter(|&at| {
                    self.placeholders[neighbour]
                        .path
                        .get(depth)
                        .is_some_and(|&index| index >= at)
                });
                return self.split_or_reject(nodes, &region, region.last, at, neighbour, *start);
            }
        }
        Ok(false)
    }

    fn split_or_reject(
        &self,
        nodes: &mut Vec<Node>,
        region: &Region,
        child: usize,
        at: Option<usize>,
        neighbour: usize,
        start: usize,
    ) -> Result<bool> {
        let mut paragraph = region.parent.clone();
        paragraph.push(child);
        if let Some(at) = at
            && wml::split_paragraph(nodes, &paragraph, at)
        {
            trace!(
                key = self.placeholders[neighbour].raw_key(),
                "moved placeholder out of a block paragraph"
            );
            return Ok(true);
        }

        let shared = node_at(nodes, &paragraph)
            .and_then(Node::as_element)
            .map_or("an element", |element| element.name.as_str());
        Err(DocmergeError::template(format!(
            "{} shares {shared} with start:{} but is outside its block",
            self.placeholders[neighbour].raw_key(),
            self.placeholders[start].field().map_or("", |f| f.key())
        )))
    }

    #[allow(clippy::too_many_arguments)]
    fn replace_block(
        &self,
        nodes: &mut Vec<Node>,
        start: usize,
        end: usize,
        children: &[TemplateNode],
        region: &Region,
        frames: &[Frame],
        data_set: &DataSet,
        slots: &mut [MergeErrors],
    ) -> Result<()> {
        let Some(field) = self.placeholders[start].field() else {
            return Ok(());
        };

        let scopes: Vec<Cow<'_, DataSet>> = match data_set.fetch(field.key()) {
            Ok(Value::Array(items)) => items
                .iter()
                .map(|item| Cow::Owned(DataSet::for_element(item)))
                .collect(),
            Ok(value) if is_truthy(value) => vec![Cow::Borrowed(data_set)],
            Ok(_) => Vec::new(),
            Err(failure) => {
                slots[start].record(field.raw_key(), failure);
                Vec::new()
            }
        };
        debug!(key = field.key(), copies = scopes.len(), "unrolling block");

        let Some(container) = children_at_mut(nodes, &region.parent) else {
            return Ok(());
        };
        let template: Vec<Node> = container[region.first..=region.last].to_vec();

        let frame = Frame {
            depth: region.parent.len(),
            offset: region.first,
        };
        let mut inner_frames = frames.to_vec();
        inner_frames.push(frame);
        let start_path = localize(&self.placeholders[start].path, &inner_frames);
        let end_path = localize(&self.placeholders[end].path, &inner_frames);

        let mut unrolled = Vec::new();
        for scope in &scopes {
            let mut copy = template.clone();
            // Blank the markers in place so no index inside the copy moves.
            for marker in [&end_path, &start_path] {
                if let Some(node) = node_at_mut(&mut copy, marker) {
                    *node = Node::Text(String::new());
                }
            }

            self.replace_level(&mut copy, children, &inner_frames, scope, slots)?;

            if copy.last().is_some_and(|node| !wml::has_content(node)) {
                copy.pop();
            }
            if region.first != region.last && copy.first().is_some_and(|node| !wml::has_content(node)) {
                copy.remove(0);
            }
            unrolled.extend(copy);
        }

        if let Some(container) = children_at_mut(nodes, &region.parent) {
            container.splice(region.first..=region.last, unrolled);
        }
        if let Some(Node::Element(container)) = node_at_mut(nodes, &region.parent) {
            wml::ensure_paragraph(container);
        }
        Ok(())
    }
}
