use crate::tree::{join, DirectoryNode};
use crate::TreeError;

/// One rendered entry of a [`TreeView`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub name: String,
    /// Segments from the root joined with `/`
    pub full_path: String,
    pub depth: usize,
    pub parent: Option<usize>,
    pub is_dir: bool,
    pub expanded: bool,
    pub selected: bool,
}

/// Collapsible single-select view over a [`DirectoryNode`].
///
/// Clicking a row toggles it open or closed and makes it the only selected
/// row in the whole tree; the selection callback fires from inside `click`.
pub struct TreeView {
    rows: Vec<Row>,
    on_select: Box<dyn FnMut(&str) + Send>,
}

impl TreeView {
    /// Flatten `node` into collapsed rows and select the first top-level row
    pub fn render<F>(node: &DirectoryNode, on_select: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        let mut rows = Vec::new();
        flatten(node, "", 0, None, &mut rows);
        let mut view = Self {
            rows,
            on_select: Box::new(on_select),
        };
        if !view.rows.is_empty() {
            // Row 0 always exists here
            let _ = view.click(0);
        }
        view
    }

    pub fn click(&mut self, row: usize) -> Result<(), TreeError> {
        let len = self.rows.len();
        if row >= len {
            return Err(TreeError::NoSuchRow { row, len });
        }
        for r in &mut self.rows {
            r.selected = false;
        }
        let clicked = &mut self.rows[row];
        clicked.expanded = !clicked.expanded;
        clicked.selected = true;
        let path = clicked.full_path.clone();
        (self.on_select)(&path);
        Ok(())
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn selected(&self) -> Option<&Row> {
        self.rows.iter().find(|r| r.selected)
    }

    /// Indices of rows whose ancestors are all expanded
    pub fn visible_rows(&self) -> Vec<usize> {
        (0..self.rows.len())
            .filter(|&i| self.ancestors_expanded(i))
            .collect()
    }

    fn ancestors_expanded(&self, mut row: usize) -> bool {
        while let Some(parent) = self.rows[row].parent {
            if !self.rows[parent].expanded {
                return false;
            }
            row = parent;
        }
        true
    }
}

fn flatten(
    node: &DirectoryNode,
    prefix: &str,
    depth: usize,
    parent: Option<usize>,
    rows: &mut Vec<Row>,
) {
    for (name, child) in node.children() {
        let full_path = join(prefix, name);
        let index = rows.len();
        rows.push(Row {
            name: name.clone(),
            full_path: full_path.clone(),
            depth,
            parent,
            is_dir: child.is_some(),
            expanded: false,
            selected: false,
        });
        if let Some(child) = child {
            flatten(child, &full_path, depth + 1, Some(index), rows);
        }
    }
}
