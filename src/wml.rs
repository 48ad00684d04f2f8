//! WordprocessingML knowledge: where placeholders live and how they are rewritten.

use crate::block::{
    Placeholder, PlaceholderKind, TemplateNode, TreeNode, match_blocks, required_hash, to_tree,
};
use crate::check_box::CheckBox;
use crate::data_set::DataSet;
use crate::engine;
use crate::error::{MergeErrors, Result};
use crate::merge_field::{MergeField, is_merge_field};
use crate::xml::{Document, Element, Node, children_at_mut};
use serde_json::Value;
use tracing::debug;

/// Archive entries whose placeholders get replaced
pub const REPLACEABLE_PART: &str = r"^word/(document|numbering|header\d*|footer\d*)\.xml$";

/// Elements that make a paragraph or row worth keeping once its marker is gone
const CONTENT_ELEMENTS: &[&str] = &[
    "w:drawing",
    "w:pict",
    "w:object",
    "w:fldSimple",
    "w:ffData",
    "w:sym",
];

/// Elements that must hold at least one paragraph or table
const BLOCK_CONTAINERS: &[&str] = &["w:tc", "w:hdr", "w:ftr", "w:txbxContent"];

/// One replaceable part of a document archive.
#[derive(Debug, Clone)]
pub struct WmlFile {
    name: String,
    xml: String,
}

/// Outcome of resolving one part
#[derive(Debug, Clone)]
pub struct Interpolation {
    /// Serialized part, or `None` when the part holds no placeholders
    pub xml: Option<String>,
    pub errors: MergeErrors,
    /// Merge fields still present after replacement
    pub unresolved: usize,
}

impl WmlFile {
    pub fn new(name: impl Into<String>, xml: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xml: xml.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parses the part into a tree with legacy fields normalized.
    ///
    /// # Errors
    ///
    /// Returns `DocmergeError::Xml` if the part is not well-formed.
    pub fn parse(&self) -> Result<Document> {
        let mut document = Document::parse(&self.name, &self.xml)?;
        normalize_complex_fields(&mut document.nodes);
        Ok(document)
    }

    /// The placeholder tree of this part.
    ///
    /// # Errors
    ///
    /// Returns parse, filter and block structure errors.
    pub fn to_tree(&self) -> Result<Vec<TreeNode>> {
        let document = self.parse()?;
        let (placeholders, forest) = scan(&document.nodes)?;
        Ok(to_tree(&forest, &placeholders))
    }

    /// The data shape this part needs.
    ///
    /// # Errors
    ///
    /// Returns parse, filter and block structure errors.
    pub fn required_hash(&self) -> Result<Value> {
        Ok(required_hash(&self.to_tree()?))
    }

    /// Resolves every placeholder of the part against `data_set`.
    ///
    /// # Errors
    ///
    /// Returns parse, filter and block structure errors. Lookup failures are
    /// reported in [`Interpolation::errors`] instead.
    pub fn interpolate(&self, data_set: &DataSet) -> Result<Interpolation> {
        let mut document = self.parse()?;
        let replacement = engine::replace(&mut document.nodes, data_set)?;
        debug!(
            part = %self.name,
            placeholders = replacement.placeholders,
            failures = replacement.errors.len(),
            "interpolated part"
        );

        // Fields the scan could not pair up still count as leftovers
        let unresolved = count_merge_fields(&document.nodes);
        let xml = (replacement.placeholders > 0).then(|| document.serialize());

        Ok(Interpolation {
            xml,
            errors: replacement.errors,
            unresolved,
        })
    }
}

/// Extracts the placeholders of a normalized tree and matches their blocks.
///
/// # Errors
///
/// Returns filter and block structure errors.
pub fn scan(nodes: &[Node]) -> Result<(Vec<Placeholder>, Vec<TemplateNode>)> {
    let placeholders = extract_placeholders(nodes)?;
    let forest = match_blocks(&placeholders)?;
    Ok((placeholders, forest))
}

/// Rewrites legacy `w:fldChar` MERGEFIELDs as `w:fldSimple` elements so both
/// styles are handled by the same code.
pub fn normalize_complex_fields(nodes: &mut Vec<Node>) {
    let mut i = 0;
    while i < nodes.len() {
        if field_char_type(&nodes[i]).as_deref() == Some("begin") {
            if let Some((end, field)) = collapse_complex_field(&nodes[i..]) {
                nodes.splice(i..=i + end, std::iter::once(field));
            }
        } else if let Node::Element(element) = &mut nodes[i] {
            normalize_complex_fields(&mut element.children);
        }
        i += 1;
    }
}

fn field_char_type(node: &Node) -> Option<String> {
    let run = node.as_element().filter(|e| e.is("w:r"))?;
    run.child("w:fldChar")?.attribute("w:fldCharType")
}

/// Starting at a `begin` run, finds the matching `end` run and builds the
/// equivalent simple field. `None` for fields that are not merge fields.
fn collapse_complex_field(nodes: &[Node]) -> Option<(usize, Node)> {
    let mut depth = 0usize;
    let mut separated = false;
    let mut instruction = String::new();
    let mut result_runs = Vec::new();

    for (offset, node) in nodes.iter().enumerate() {
        match field_char_type(node).as_deref() {
            Some("begin") => {
                depth += 1;
                if depth > 1 && separated {
                    result_runs.push(node.clone());
                }
                continue;
            }
            Some("separate") if depth == 1 => {
                separated = true;
                continue;
            }
            Some("end") => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if !is_merge_field(&instruction) {
                        return None;
                    }
                    let mut field = Element::new("w:fldSimple").with_attribute("w:instr", &instruction);
                    field.children = result_runs;
                    return Some((offset, Node::Element(field)));
                }
                if separated {
                    result_runs.push(node.clone());
                }
                continue;
            }
            _ => {}
        }

        let Some(run) = node.as_element().filter(|e| e.is("w:r")) else {
            continue;
        };
        if separated {
            result_runs.push(node.clone());
        } else if depth == 1 {
            for text in run.elements().filter(|e| e.is("w:instrText")) {
                instruction.push_str(&text.text_content());
            }
        }
    }

    None
}

/// Finds merge fields and checkboxes in document order.
///
/// # Errors
///
/// Returns the first field instruction that fails to parse.
pub fn extract_placeholders(nodes: &[Node]) -> Result<Vec<Placeholder>> {
    let mut found = Vec::new();
    let mut path = Vec::new();
    collect_placeholders(nodes, &mut path, &mut found)?;
    Ok(found)
}

fn collect_placeholders(
    nodes: &[Node],
    path: &mut Vec<usize>,
    found: &mut Vec<Placeholder>,
) -> Result<()> {
    for (index, node) in nodes.iter().enumerate() {
        let Node::Element(element) = node else {
            continue;
        };
        path.push(index);
        if let Some(instruction) = merge_field_instruction(element) {
            found.push(Placeholder {
                path: path.clone(),
                kind: PlaceholderKind::Field(MergeField::parse(&instruction)?),
            });
        } else if let Some(name) = check_box_name(element) {
            found.push(Placeholder {
                path: path.clone(),
                kind: PlaceholderKind::CheckBox(CheckBox::new(name)),
            });
        } else {
            collect_placeholders(&element.children, path, found)?;
        }
        path.pop();
    }
    Ok(())
}

fn merge_field_instruction(element: &Element) -> Option<String> {
    if !element.is("w:fldSimple") {
        return None;
    }
    element
        .attribute("w:instr")
        .filter(|instruction| is_merge_field(instruction))
}

fn check_box_name(element: &Element) -> Option<String> {
    if !element.is("w:ffData") || element.child("w:checkBox").is_none() {
        return None;
    }
    element.child("w:name")?.attribute("w:val")
}

/// The run that replaces a `w:fldSimple`, carrying the field's formatting.
#[must_use]
pub fn field_run(field: &Element, text: &str) -> Node {
    let mut run = Element::new("w:r");
    if let Some(template) = field.descendants().into_iter().find(|e| e.is("w:r")) {
        run.attributes = template.attributes.clone();
        if let Some(properties) = template.child("w:rPr") {
            run.children.push(Node::Element(properties.clone()));
        }
    }

    if text.is_empty() {
        run.children.push(text_element(""));
    }
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            run.children.push(Node::Element(Element::new("w:br")));
        }
        for (j, piece) in line.trim_end_matches('\r').split('\t').enumerate() {
            if j > 0 {
                run.children.push(Node::Element(Element::new("w:tab")));
            }
            if !piece.is_empty() {
                run.children.push(text_element(piece));
            }
        }
    }

    Node::Element(run)
}

fn text_element(text: &str) -> Node {
    Node::Element(
        Element::new("w:t")
            .with_attribute("xml:space", "preserve")
            .with_child(Node::text(text)),
    )
}

/// Ticks or clears a legacy form checkbox (`w:ffData`).
pub fn set_check_box(ff_data: &mut Element, checked: bool) {
    let value = if checked { "1" } else { "0" };
    let Some(check_box) = ff_data.child_mut("w:checkBox") else {
        return;
    };
    if let Some(state) = check_box.child_mut("w:checked") {
        state.set_attribute("w:val", value);
    }
    match check_box.child_mut("w:default") {
        Some(default) => default.set_attribute("w:val", value),
        None => check_box.children.push(Node::Element(
            Element::new("w:default").with_attribute("w:val", value),
        )),
    }
}

/// Whether a node carries anything visible
#[must_use]
pub fn has_content(node: &Node) -> bool {
    match node {
        Node::Element(element) => {
            is_content(element) || element.descendants().into_iter().any(is_content)
        }
        Node::CData(text) => !text.is_empty(),
        _ => false,
    }
}

fn is_content(element: &Element) -> bool {
    if element.is("w:t") {
        return !element.text_content().is_empty();
    }
    CONTENT_ELEMENTS.contains(&element.name.as_str())
}

/// Splits the paragraph at `path` before its child `at`. The children from
/// `at` on move into a new paragraph right after it, with the same properties.
/// Returns `false` if `path` is not a paragraph or either half would be empty.
pub fn split_paragraph(nodes: &mut Vec<Node>, path: &[usize], at: usize) -> bool {
    let Some((&index, parent)) = path.split_last() else {
        return false;
    };
    let Some(siblings) = children_at_mut(nodes, parent) else {
        return false;
    };
    let Some(paragraph) = siblings
        .get_mut(index)
        .and_then(Node::as_element_mut)
        .filter(|element| element.is("w:p"))
    else {
        return false;
    };
    if at == 0 || at >= paragraph.children.len() {
        return false;
    }

    let properties = paragraph.children[..at]
        .iter()
        .filter_map(Node::as_element)
        .find(|element| element.is("w:pPr"))
        .cloned();
    let tail = paragraph.children.split_off(at);

    let mut split = Element::new("w:p");
    // Paragraph ids must stay unique
    split.attributes = paragraph
        .attributes
        .iter()
        .filter(|attr| !attr.name.starts_with("w14:"))
        .cloned()
        .collect();
    split.children.extend(properties.map(Node::Element));
    split.children.extend(tail);
    siblings.insert(index + 1, Node::Element(split));
    true
}

/// Adds an empty paragraph to a cell, header, footer or text box left without
/// any paragraph or table.
pub fn ensure_paragraph(container: &mut Element) {
    if BLOCK_CONTAINERS.contains(&container.name.as_str())
        && !container.elements().any(|e| e.is("w:p") || e.is("w:tbl"))
    {
        container.children.push(Node::Element(Element::new("w:p")));
    }
}

/// Counts merge fields left in a tree, in either style.
#[must_use]
pub fn count_merge_fields(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .filter_map(Node::as_element)
        .map(|element| {
            let own = usize::from(
                merge_field_instruction(element).is_some()
                    || (element.is("w:instrText") && is_merge_field(&element.text_content())),
            );
            own + count_merge_fields(&element.children)
        })
        .sum()
}
