//! Category hierarchy reconciliation.
//!
//! Turns the store's flat category list into a forest of owned nodes, orders
//! siblings by name, and walks the result in pre-order for display. Bad data
//! (dangling parents, parent cycles, duplicate ids) never fails the build; it
//! is reported as [`IntegrityWarning`]s next to a well-formed forest.

use crate::category::{CategoryNode, CategoryRecord};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;
use thiserror::Error;
use tracing::{debug, warn};

/// Recoverable data-integrity problems found while building a forest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityWarning {
    #[error("category {id} references unknown parent {parent_id}; treated as root")]
    DanglingParent { id: String, parent_id: String },
    #[error("parent cycle {}; members treated as roots", .members.join(" -> "))]
    Cycle { members: Vec<String> },
    #[error("duplicate category id {id}; last record wins")]
    DuplicateId { id: String },
}

/// Ordered root categories, each owning its subtree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Forest {
    roots: Vec<CategoryNode>,
}

/// Result of [`build_forest`].
#[derive(Debug, Clone, Default)]
pub struct TreeBuild {
    pub forest: Forest,
    pub warnings: Vec<IntegrityWarning>,
}

/// One entry of a category `<select>`: indented label, id as value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub depth: usize,
}

impl Forest {
    /// Wrap a tree the store already nested. Skips reconciliation; the owned
    /// structure cannot contain cycles, but sibling order is left as received.
    pub fn from_nested(roots: Vec<CategoryNode>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[CategoryNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of nodes at every depth.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Sibling-sorted copy of this forest.
    pub fn sorted(mut self) -> Self {
        sort_forest(&mut self.roots);
        self
    }

    /// Pre-order walk yielding `(depth, node)`. Call again to restart.
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder::new(&self.roots)
    }

    /// Write the forest as a nested JSON array of nodes, each carrying its
    /// record fields plus `children`. Driven by an explicit stack, so output
    /// depth is not bounded by the thread's stack.
    pub fn write_json<W: Write>(&self, out: &mut W) -> serde_json::Result<()> {
        enum Step<'a> {
            Open(&'a CategoryNode, bool),
            Close,
        }

        let mut steps: Vec<Step<'_>> = self
            .roots
            .iter()
            .enumerate()
            .rev()
            .map(|(i, node)| Step::Open(node, i > 0))
            .collect();

        out.write_all(b"[").map_err(serde_json::Error::io)?;
        while let Some(step) = steps.pop() {
            match step {
                Step::Open(node, comma) => {
                    if comma {
                        out.write_all(b",").map_err(serde_json::Error::io)?;
                    }
                    // The record is flat; reopen its object to append children.
                    let record = serde_json::to_vec(&node.record)?;
                    let fields = record.strip_suffix(b"}").unwrap_or(&record[..]);
                    out.write_all(fields).map_err(serde_json::Error::io)?;
                    out.write_all(b",\"children\":[")
                        .map_err(serde_json::Error::io)?;

                    steps.push(Step::Close);
                    steps.extend(
                        node.children
                            .iter()
                            .enumerate()
                            .rev()
                            .map(|(i, child)| Step::Open(child, i > 0)),
                    );
                }
                Step::Close => out.write_all(b"]}").map_err(serde_json::Error::io)?,
            }
        }
        out.write_all(b"]").map_err(serde_json::Error::io)
    }

    /// Labels for a category picker, in pre-order.
    pub fn select_options(&self, glyph: &str) -> Vec<SelectOption> {
        self.iter()
            .map(|(depth, node)| SelectOption {
                value: node.id().to_string(),
                label: indent_label(depth, node.name(), glyph),
                depth,
            })
            .collect()
    }
}

impl Drop for Forest {
    // Unlink subtrees one level at a time; the derived drop glue would recurse
    // once per level.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.roots);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl<'a> IntoIterator for &'a Forest {
    type Item = (usize, &'a CategoryNode);
    type IntoIter = PreOrder<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Build and sort in one step; what every category view wants.
pub fn category_tree(records: Vec<CategoryRecord>) -> TreeBuild {
    let TreeBuild { forest, warnings } = build_forest(records);
    TreeBuild {
        forest: forest.sorted(),
        warnings,
    }
}

/// Link flat records into a forest.
///
/// Every distinct id appears exactly once in the output. Records whose parent
/// is unknown, and every member of a parent cycle, become roots. Siblings keep
/// the order in which their ids first appeared in `records`.
pub fn build_forest(records: Vec<CategoryRecord>) -> TreeBuild {
    let mut warnings = Vec::new();

    // Duplicate ids keep their first slot but take the last record.
    let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut slots: Vec<CategoryRecord> = Vec::with_capacity(records.len());
    for record in records {
        match index.get(&record.id) {
            Some(&slot) => {
                warnings.push(IntegrityWarning::DuplicateId {
                    id: record.id.clone(),
                });
                slots[slot] = record;
            }
            None => {
                index.insert(record.id.clone(), slots.len());
                slots.push(record);
            }
        }
    }

    let mut parents: Vec<Option<usize>> = Vec::with_capacity(slots.len());
    for record in &slots {
        let parent = match record.parent_id.as_deref() {
            None => None,
            Some(parent_id) => match index.get(parent_id) {
                Some(&parent) => Some(parent),
                None => {
                    warnings.push(IntegrityWarning::DanglingParent {
                        id: record.id.clone(),
                        parent_id: parent_id.to_string(),
                    });
                    None
                }
            },
        };
        parents.push(parent);
    }

    break_cycles(&mut parents, &slots, &mut warnings);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];
    let mut roots = Vec::new();
    for (slot, parent) in parents.iter().enumerate() {
        match parent {
            Some(parent) => children[*parent].push(slot),
            None => roots.push(slot),
        }
    }

    let forest = Forest {
        roots: assemble(slots, &roots, &children),
    };

    for warning in &warnings {
        warn!("Category integrity: {}", warning);
    }
    debug!(
        "Built category forest: {} roots, {} warnings",
        forest.roots.len(),
        warnings.len()
    );

    TreeBuild { forest, warnings }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Unvisited,
    OnPath,
    Done,
}

/// Detach every node that lies on a parent cycle.
///
/// Each node is walked at most once: a walk stops at a root, at a node already
/// proven acyclic, or when it meets its own path (a cycle).
fn break_cycles(
    parents: &mut [Option<usize>],
    slots: &[CategoryRecord],
    warnings: &mut Vec<IntegrityWarning>,
) {
    let mut state = vec![Walk::Unvisited; parents.len()];
    let mut path: Vec<usize> = Vec::new();

    for start in 0..parents.len() {
        let mut cursor = Some(start);
        while let Some(node) = cursor {
            match state[node] {
                Walk::Done => break,
                Walk::OnPath => {
                    if let Some(begin) = path.iter().position(|&n| n == node) {
                        let members = &path[begin..];
                        for &member in members {
                            parents[member] = None;
                        }
                        warnings.push(IntegrityWarning::Cycle {
                            members: members.iter().map(|&m| slots[m].id.clone()).collect(),
                        });
                    }
                    break;
                }
                Walk::Unvisited => {
                    state[node] = Walk::OnPath;
                    path.push(node);
                    cursor = parents[node];
                }
            }
        }
        for node in path.drain(..) {
            state[node] = Walk::Done;
        }
    }
}

/// Move records into owned nodes bottom-up without recursion.
fn assemble(
    slots: Vec<CategoryRecord>,
    roots: &[usize],
    children: &[Vec<usize>],
) -> Vec<CategoryNode> {
    let mut order = Vec::with_capacity(slots.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(slot) = stack.pop() {
        order.push(slot);
        stack.extend(children[slot].iter().rev());
    }

    // Reverse pre-order visits every child before its parent.
    let mut records: Vec<Option<CategoryRecord>> = slots.into_iter().map(Some).collect();
    let mut built: Vec<Option<CategoryNode>> = (0..records.len()).map(|_| None).collect();
    for &slot in order.iter().rev() {
        let kids = children[slot]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        if let Some(record) = records[slot].take() {
            let mut node = CategoryNode::leaf(record);
            node.children = kids;
            built[slot] = Some(node);
        }
    }

    roots.iter().filter_map(|&root| built[root].take()).collect()
}

/// Order siblings at every level by name (case-folded, then exact), then id.
pub fn sort_forest(roots: &mut [CategoryNode]) {
    let mut pending: Vec<&mut [CategoryNode]> = vec![roots];
    while let Some(level) = pending.pop() {
        level.sort_by(compare_siblings);
        for node in level {
            pending.push(&mut node.children);
        }
    }
}

fn compare_siblings(a: &CategoryNode, b: &CategoryNode) -> Ordering {
    fn folded(name: &str) -> impl Iterator<Item = char> + '_ {
        name.chars().flat_map(char::to_lowercase)
    }

    folded(a.name())
        .cmp(folded(b.name()))
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| a.id().cmp(b.id()))
}

/// `glyph` repeated `depth` times, a space, then the name. Roots are bare.
pub fn indent_label(depth: usize, name: &str, glyph: &str) -> String {
    if depth == 0 {
        return name.to_string();
    }
    format!("{} {}", glyph.repeat(depth), name)
}

/// Lazy pre-order traversal: a parent, then its whole subtree, then the next
/// sibling. Uses an explicit stack so deep trees cannot overflow.
#[derive(Debug, Clone)]
pub struct PreOrder<'a> {
    stack: Vec<(usize, &'a CategoryNode)>,
}

impl<'a> PreOrder<'a> {
    pub fn new(roots: &'a [CategoryNode]) -> Self {
        Self {
            stack: roots.iter().rev().map(|node| (0, node)).collect(),
        }
    }
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = (usize, &'a CategoryNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.children.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, node))
    }
}
