use std::collections::HashSet;

use super::group::{FlatItem, FlatItemKind, GroupTree};

/// UI state captured before an external reload so the cursor, expansion
/// and scroll survive the swap.
#[derive(Debug, Clone, Default)]
pub struct ReloadState {
    pub cursor_session_id: Option<String>,
    pub cursor_group_path: Option<String>,
    pub expanded_groups: HashSet<String>,
    pub view_offset: usize,
}

impl ReloadState {
    pub fn capture(flat: &[FlatItem], cursor: usize, tree: &GroupTree, view_offset: usize) -> Self {
        let mut state = Self {
            expanded_groups: tree.expanded_paths(),
            view_offset,
            ..Default::default()
        };
        if let Some(item) = flat.get(cursor) {
            match item.kind {
                FlatItemKind::Session => state.cursor_session_id = item.session_id.clone(),
                FlatItemKind::Group => state.cursor_group_path = Some(item.path.clone()),
            }
        }
        state
    }

    /// Re-apply expansion to groups that still exist. New groups keep the
    /// state they loaded with.
    pub fn restore_expansion(&self, tree: &mut GroupTree) {
        let paths: Vec<String> = tree.groups().iter().map(|g| g.path.clone()).collect();
        for path in paths {
            tree.set_expanded(&path, self.expanded_groups.contains(&path));
        }
    }

    /// Re-anchor the cursor: session first, then group, then clamp.
    /// Returns `(cursor, view_offset)` valid for the new flat list.
    pub fn restore_cursor(&self, flat: &[FlatItem], old_cursor: usize) -> (usize, usize) {
        let cursor = self
            .cursor_session_id
            .as_ref()
            .and_then(|id| {
                flat.iter()
                    .position(|item| item.session_id.as_deref() == Some(id))
            })
            .or_else(|| {
                self.cursor_group_path.as_ref().and_then(|path| {
                    flat.iter().position(|item| {
                        item.kind == FlatItemKind::Group && item.path == *path
                    })
                })
            })
            .unwrap_or_else(|| {
                if flat.is_empty() {
                    0
                } else {
                    old_cursor.min(flat.len() - 1)
                }
            });

        let view_offset = if flat.is_empty() {
            0
        } else {
            self.view_offset.min(flat.len() - 1)
        };

        (cursor, view_offset)
    }
}
