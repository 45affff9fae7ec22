//! Context menu of an interactive marker.

use std::collections::{BTreeMap, BTreeSet};

use crate::{logging::Logger, msgs::visualization_msgs::MenuEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub id: u32,
    pub title: String,
    pub command: String,
    pub command_type: u8,
    pub children: Vec<MenuItem>,
}

impl MenuItem {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Entries arranged under their parents; `parent_id` 0 marks a top level
/// entry. Entries whose parent never appears are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Menu {
    roots: Vec<MenuItem>,
}

impl Menu {
    pub fn from_entries(entries: &[MenuEntry], log: &Logger) -> Self {
        let mut by_parent: BTreeMap<u32, Vec<&MenuEntry>> = BTreeMap::new();
        for entry in entries {
            if entry.id == 0 {
                log.warn(format_args!("menu entry {:?} uses reserved id 0", entry.title));
                continue;
            }
            by_parent.entry(entry.parent_id).or_default().push(entry);
        }

        let mut placed = BTreeSet::new();
        let roots = build_level(0, &by_parent, &mut placed);
        let dropped = entries.iter().filter(|e| e.id != 0 && !placed.contains(&e.id)).count();
        if dropped > 0 {
            log.warn(format_args!("dropped {dropped} menu entries with no reachable parent"));
        }
        Self { roots }
    }

    pub fn roots(&self) -> &[MenuItem] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn find(&self, id: u32) -> Option<&MenuItem> {
        fn search(items: &[MenuItem], id: u32) -> Option<&MenuItem> {
            items.iter().find_map(|item| {
                if item.id == id {
                    Some(item)
                } else {
                    search(&item.children, id)
                }
            })
        }
        search(&self.roots, id)
    }
}

fn build_level(
    parent: u32,
    by_parent: &BTreeMap<u32, Vec<&MenuEntry>>,
    placed: &mut BTreeSet<u32>,
) -> Vec<MenuItem> {
    let Some(entries) = by_parent.get(&parent) else {
        return Vec::new();
    };
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        // duplicate ids and cycles
        if !placed.insert(entry.id) {
            continue;
        }
        items.push(MenuItem {
            id: entry.id,
            title: entry.title.clone(),
            command: entry.command.clone(),
            command_type: entry.command_type,
            children: build_level(entry.id, by_parent, placed),
        });
    }
    items
}
