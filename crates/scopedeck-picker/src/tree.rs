use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One level of a directory tree.
///
/// Each entry maps a path segment to `None` for a leaf or to the nested
/// level for a directory. Entries are kept sorted, so the tree does not
/// depend on the order of the source listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DirectoryNode {
    children: BTreeMap<String, Option<DirectoryNode>>,
}

impl DirectoryNode {
    /// Build a tree from flat paths split on `separator`
    pub fn build<I, S>(paths: I, separator: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = Self::default();
        for path in paths {
            root.insert(path.as_ref(), separator);
        }
        root
    }

    /// Insert one path. Empty segments are skipped. A segment already
    /// recorded as a leaf becomes a directory when a longer path runs
    /// through it.
    pub fn insert(&mut self, path: &str, separator: &str) {
        let segments: Vec<&str> = if separator.is_empty() {
            vec![path]
        } else {
            path.split(separator).collect()
        };
        let segments: Vec<&str> = segments.into_iter().filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut current = self;
        for segment in parents {
            let slot = match current.children.entry((*segment).to_string()) {
                Entry::Occupied(entry) => {
                    let slot = entry.into_mut();
                    if slot.is_none() {
                        debug!(segment, path, "Promoting leaf to directory");
                    }
                    slot
                }
                Entry::Vacant(entry) => entry.insert(None),
            };
            current = slot.get_or_insert_with(DirectoryNode::default);
        }
        current.children.entry((*last).to_string()).or_insert(None);
    }

    pub fn children(&self) -> &BTreeMap<String, Option<DirectoryNode>> {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of segments on the longest path
    pub fn depth(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.as_ref().map_or(0, DirectoryNode::depth))
            .max()
            .unwrap_or(0)
    }

    /// Full paths of every leaf, joined with `/`
    pub fn leaves(&self) -> BTreeSet<String> {
        let mut leaves = BTreeSet::new();
        self.collect_leaves("", &mut leaves);
        leaves
    }

    fn collect_leaves(&self, prefix: &str, out: &mut BTreeSet<String>) {
        for (name, child) in &self.children {
            let path = join(prefix, name);
            match child {
                Some(node) => node.collect_leaves(&path, out),
                None => {
                    out.insert(path);
                }
            }
        }
    }
}

pub(crate) fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
