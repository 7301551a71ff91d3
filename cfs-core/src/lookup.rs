//! Existence and name lookups.
//!
//! The container keeps no name index, so every query is a single linear pass
//! over the nodes with an early exit on the first match.

use log::debug;

use crate::node::{DirectoryNode, FileNode, InodeId, Node, NodeKind, NodeTree};
use crate::path::{PathDescriptor, PathKind};

/// Where a name is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'s> {
    /// Directly under a volume (directories and root-level files).
    VolumeRoot(&'s str),
    /// Inside a directory of a volume.
    Directory { volume: &'s str, directory: &'s str },
}

/// Result of an existence query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Existence {
    pub found: bool,
    pub is_directory: bool,
}

impl Existence {
    const MISSING: Existence = Existence {
        found: false,
        is_directory: false,
    };
}

/// Predicate-driven scans over a [`NodeTree`].
#[derive(Clone, Copy)]
pub struct LookupEngine<'a> {
    tree: &'a NodeTree,
}

impl<'a> LookupEngine<'a> {
    pub fn new(tree: &'a NodeTree) -> Self {
        Self { tree }
    }

    /// Does the path name an existing object, and is it a directory?
    ///
    /// The root and bare volumes always exist.
    pub fn exists(&self, path: &PathDescriptor) -> Existence {
        let (volume, target) = match (path.kind(), &path.volume, &path.target) {
            (PathKind::Root | PathKind::Volume, _, _) => {
                return Existence {
                    found: true,
                    is_directory: true,
                }
            }
            (_, Some(v), Some(t)) => (v.as_str(), t.as_str()),
            _ => return Existence::MISSING,
        };

        let hit = self.tree.nodes().find_map(|node| match node {
            Node::File(f) if f.volume == volume && f.name == target => {
                let parent = self.find_parent_directory(f.id).map(|d| d.name.as_str());
                (parent == path.directory.as_deref()).then_some(false)
            }
            Node::Directory(d)
                if path.directory.is_none() && d.volume == volume && d.name == target =>
            {
                Some(true)
            }
            _ => None,
        });

        debug!("exists {} -> {:?}", path, hit);
        match hit {
            Some(is_directory) => Existence {
                found: true,
                is_directory,
            },
            None => Existence::MISSING,
        }
    }

    /// Directory whose child list holds `file`, if any.
    pub fn find_parent_directory(&self, file: InodeId) -> Option<&'a DirectoryNode> {
        self.tree.directories().find(|d| d.contains(file))
    }

    /// Id of the node of `kind` called `name` within `scope`.
    ///
    /// Names compare exactly and case-sensitively. Directories only exist at
    /// volume root, so a directory scope never finds one.
    pub fn find_node_by_name(&self, kind: NodeKind, scope: Scope<'_>, name: &str) -> Option<InodeId> {
        match (kind, scope) {
            (NodeKind::Directory, Scope::VolumeRoot(volume)) => self
                .tree
                .directories()
                .find(|d| d.volume == volume && d.name == name)
                .map(|d| d.id),
            (NodeKind::Directory, Scope::Directory { .. }) => None,
            (NodeKind::File, scope) => self
                .tree
                .files()
                .find(|f| f.name == name && self.file_in_scope(f, scope))
                .map(|f| f.id),
        }
    }

    pub fn find_directory(&self, volume: &str, name: &str) -> Option<InodeId> {
        self.find_node_by_name(NodeKind::Directory, Scope::VolumeRoot(volume), name)
    }

    /// Id of the file a path names.
    pub fn find_file(&self, path: &PathDescriptor) -> Option<InodeId> {
        let volume = path.volume.as_deref()?;
        let target = path.target.as_deref()?;
        let scope = match path.directory.as_deref() {
            Some(directory) => Scope::Directory { volume, directory },
            None => Scope::VolumeRoot(volume),
        };
        self.find_node_by_name(NodeKind::File, scope, target)
    }

    fn file_in_scope(&self, file: &FileNode, scope: Scope<'_>) -> bool {
        let parent = self.find_parent_directory(file.id);
        match scope {
            Scope::VolumeRoot(volume) => file.volume == volume && parent.is_none(),
            Scope::Directory { volume, directory } => {
                file.volume == volume && parent.is_some_and(|d| d.name == directory)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    fn tree() -> NodeTree {
        let l = Layout::default();
        let mut tree = NodeTree::new();
        tree.create_directory(&PathDescriptor::entry("FV0", "anim")).unwrap();
        tree.create_file(&PathDescriptor::in_directory("FV0", "anim", "clip"), "me", &l)
            .unwrap();
        tree.create_file(&PathDescriptor::entry("FV0", "loose"), "me", &l).unwrap();
        tree.create_file(&PathDescriptor::entry("FV1", "clip"), "me", &l).unwrap();
        tree
    }

    #[test]
    fn test_root_and_volume_exist() {
        let tree = NodeTree::new();
        let lookup = LookupEngine::new(&tree);
        assert!(lookup.exists(&PathDescriptor::root()).found);
        let e = lookup.exists(&PathDescriptor::volume("FV3"));
        assert!(e.found && e.is_directory);
    }

    #[test]
    fn test_exists_directory() {
        let tree = tree();
        let e = LookupEngine::new(&tree).exists(&PathDescriptor::entry("FV0", "anim"));
        assert_eq!(
            e,
            Existence {
                found: true,
                is_directory: true
            }
        );
        assert!(!LookupEngine::new(&tree).exists(&PathDescriptor::entry("FV1", "anim")).found);
    }

    #[test]
    fn test_exists_files_by_scope() {
        let tree = tree();
        let lookup = LookupEngine::new(&tree);

        let e = lookup.exists(&PathDescriptor::in_directory("FV0", "anim", "clip"));
        assert!(e.found && !e.is_directory);

        // Root-level query does not see the in-directory file and vice versa.
        assert!(!lookup.exists(&PathDescriptor::entry("FV0", "clip")).found);
        assert!(!lookup.exists(&PathDescriptor::in_directory("FV0", "anim", "loose")).found);
        assert!(lookup.exists(&PathDescriptor::entry("FV0", "loose")).found);
        assert!(lookup.exists(&PathDescriptor::entry("FV1", "clip")).found);
    }

    #[test]
    fn test_name_lookup_is_case_sensitive() {
        let tree = tree();
        let lookup = LookupEngine::new(&tree);
        assert_eq!(lookup.find_directory("FV0", "anim"), Some(0));
        assert_eq!(lookup.find_directory("FV0", "Anim"), None);
    }

    #[test]
    fn test_find_parent_directory() {
        let tree = tree();
        let lookup = LookupEngine::new(&tree);
        assert_eq!(lookup.find_parent_directory(0).map(|d| d.name.as_str()), Some("anim"));
        assert!(lookup.find_parent_directory(1).is_none());
    }

    #[test]
    fn test_find_file() {
        let tree = tree();
        let lookup = LookupEngine::new(&tree);
        assert_eq!(lookup.find_file(&PathDescriptor::in_directory("FV0", "anim", "clip")), Some(0));
        assert_eq!(lookup.find_file(&PathDescriptor::entry("FV0", "loose")), Some(1));
        assert_eq!(lookup.find_file(&PathDescriptor::entry("FV1", "clip")), Some(2));
        assert_eq!(lookup.find_file(&PathDescriptor::entry("FV2", "clip")), None);
        assert_eq!(
            lookup.find_node_by_name(
                NodeKind::Directory,
                Scope::Directory {
                    volume: "FV0",
                    directory: "anim"
                },
                "clip"
            ),
            None
        );
    }
}
