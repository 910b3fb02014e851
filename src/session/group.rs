use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::instance::Instance;

/// Reserved path of the default group; root-level sessions live here.
pub const DEFAULT_GROUP: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// `/`-separated hierarchical label, e.g. `work/backend`.
    pub path: String,
    pub name: String,
    #[serde(default = "default_expanded")]
    pub expanded: bool,
    #[serde(default)]
    pub order: usize,
}

fn default_expanded() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatItemKind {
    Group,
    Session,
}

/// One row of the flattened display order.
#[derive(Debug, Clone)]
pub struct FlatItem {
    pub kind: FlatItemKind,
    /// Group path (for groups) or owning group path (for sessions).
    pub path: String,
    pub session_id: Option<String>,
    pub label: String,
    pub depth: usize,
}

/// Ordered forest of groups. Sessions attach to exactly one group path;
/// groups are materialized on demand, parents included.
#[derive(Debug, Clone, Default)]
pub struct GroupTree {
    groups: Vec<Group>,
}

impl GroupTree {
    pub fn new(mut groups: Vec<Group>) -> Self {
        groups.retain(|g| !g.path.is_empty());
        groups.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.path.cmp(&b.path)));
        Self { groups }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn contains(&self, path: &str) -> bool {
        path == DEFAULT_GROUP || self.groups.iter().any(|g| g.path == path)
    }

    /// Create the group and any missing ancestors. Existing groups keep
    /// their state.
    pub fn ensure_group(&mut self, path: &str) {
        if path == DEFAULT_GROUP {
            return;
        }
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut prefix = String::new();
        for segment in segments {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if !self.groups.iter().any(|g| g.path == prefix) {
                let order = self.groups.len();
                self.groups.push(Group {
                    path: prefix.clone(),
                    name: segment.to_string(),
                    expanded: true,
                    order,
                });
            }
        }
    }

    pub fn remove_group(&mut self, path: &str) {
        self.groups
            .retain(|g| g.path != path && !g.path.starts_with(&format!("{path}/")));
    }

    pub fn set_expanded(&mut self, path: &str, expanded: bool) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.path == path) {
            group.expanded = expanded;
        }
    }

    pub fn expanded_paths(&self) -> HashSet<String> {
        self.groups
            .iter()
            .filter(|g| g.expanded)
            .map(|g| g.path.clone())
            .collect()
    }

    fn depth_of(path: &str) -> usize {
        path.split('/').filter(|s| !s.is_empty()).count()
    }

    fn is_child_of(child: &str, parent: &str) -> bool {
        match child.rsplit_once('/') {
            Some((prefix, _)) => prefix == parent,
            None => parent == DEFAULT_GROUP,
        }
    }

    /// Pre-order traversal producing the display order: root sessions
    /// first, then each top-level group followed by its sessions and
    /// nested groups. Collapsed groups contribute only their header row.
    pub fn flatten(&self, instances: &[Arc<Instance>]) -> Vec<FlatItem> {
        let mut items = Vec::new();

        for inst in instances {
            if inst.group_path() == DEFAULT_GROUP {
                items.push(FlatItem {
                    kind: FlatItemKind::Session,
                    path: DEFAULT_GROUP.to_string(),
                    session_id: Some(inst.id.clone()),
                    label: inst.title(),
                    depth: 0,
                });
            }
        }

        let top_level: Vec<&Group> = self
            .groups
            .iter()
            .filter(|g| Self::depth_of(&g.path) == 1)
            .collect();
        for group in top_level {
            self.flatten_group(group, instances, &mut items);
        }

        items
    }

    fn flatten_group(&self, group: &Group, instances: &[Arc<Instance>], items: &mut Vec<FlatItem>) {
        let depth = Self::depth_of(&group.path);
        items.push(FlatItem {
            kind: FlatItemKind::Group,
            path: group.path.clone(),
            session_id: None,
            label: group.name.clone(),
            depth: depth - 1,
        });

        if !group.expanded {
            return;
        }

        for inst in instances {
            if inst.group_path() == group.path {
                items.push(FlatItem {
                    kind: FlatItemKind::Session,
                    path: group.path.clone(),
                    session_id: Some(inst.id.clone()),
                    label: inst.title(),
                    depth,
                });
            }
        }

        let children: Vec<&Group> = self
            .groups
            .iter()
            .filter(|g| Self::is_child_of(&g.path, &group.path))
            .collect();
        for child in children {
            self.flatten_group(child, instances, items);
        }
    }
}
