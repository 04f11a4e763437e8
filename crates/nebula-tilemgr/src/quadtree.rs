//! Arena-backed quadtree over two hemisphere roots.
//!
//! Nodes live in a slot vector and are addressed by [`NodeId`], an index
//! plus a generation counter. Deleting a subtree bumps the generation of
//! every freed slot, so ids held by the loader for pruned nodes stop
//! resolving instead of aliasing a newer node in the same slot.

use crate::tile::{Tile, TileState};

/// Generational handle to a node in a [`QuadTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

struct Node<T> {
    entry: T,
    parent: Option<NodeId>,
    children: [Option<NodeId>; 4],
}

struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Owning quadtree. Each node holds one entry and up to four children;
/// children are indexed by quadrant (0 = NW, 1 = NE, 2 = SW, 3 = SE).
pub struct QuadTree<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    roots: [NodeId; 2],
    len: usize,
}

impl<T> QuadTree<T> {
    /// Tree with the western and eastern hemisphere roots.
    pub fn new(west: T, east: T) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            roots: [NodeId { index: 0, generation: 0 }; 2],
            len: 0,
        };
        tree.roots = [tree.alloc(west, None), tree.alloc(east, None)];
        tree
    }

    fn alloc(&mut self, entry: T, parent: Option<NodeId>) -> NodeId {
        let node = Node {
            entry,
            parent,
            children: [None; 4],
        };
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn roots(&self) -> [NodeId; 2] {
        self.roots
    }

    /// The id still refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.node(id).map(|n| &n.entry)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.node_mut(id).map(|n| &mut n.entry)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Ancestor `generations` levels up (`1` = parent).
    pub fn ancestor(&self, id: NodeId, generations: usize) -> Option<NodeId> {
        let mut cur = id;
        for _ in 0..generations {
            cur = self.parent(cur)?;
        }
        Some(cur)
    }

    pub fn child(&self, id: NodeId, quadrant: usize) -> Option<NodeId> {
        self.node(id).and_then(|n| n.children[quadrant])
    }

    pub fn children(&self, id: NodeId) -> [Option<NodeId>; 4] {
        self.node(id).map_or([None; 4], |n| n.children)
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.node(id)
            .is_some_and(|n| n.children.iter().any(Option::is_some))
    }

    /// Attach `entry` as the child of `parent` in `quadrant`, replacing (and
    /// deleting) any existing subtree there. Returns `None` if `parent` is
    /// no longer in the tree.
    pub fn add_child(&mut self, parent: NodeId, quadrant: usize, entry: T) -> Option<NodeId> {
        if !self.contains(parent) {
            return None;
        }
        self.del_child(parent, quadrant);
        let id = self.alloc(entry, Some(parent));
        if let Some(node) = self.node_mut(parent) {
            node.children[quadrant] = Some(id);
        }
        Some(id)
    }

    /// Delete the child subtree in `quadrant`. Returns the removed ids.
    pub fn del_child(&mut self, parent: NodeId, quadrant: usize) -> Vec<NodeId> {
        let Some(child) = self.node_mut(parent).and_then(|n| n.children[quadrant].take()) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        self.free_subtree(child, &mut removed);
        removed
    }

    /// Delete all four child subtrees. Returns the removed ids.
    pub fn del_children(&mut self, parent: NodeId) -> Vec<NodeId> {
        let mut removed = Vec::new();
        for quadrant in 0..4 {
            if let Some(child) = self.node_mut(parent).and_then(|n| n.children[quadrant].take()) {
                self.free_subtree(child, &mut removed);
            }
        }
        removed
    }

    fn free_subtree(&mut self, root: NodeId, removed: &mut Vec<NodeId>) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.generation != id.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                stack.extend(node.children.into_iter().flatten());
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                self.len -= 1;
                removed.push(id);
            }
        }
    }

    /// Number of live nodes, roots included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All live nodes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|n| {
                (
                    NodeId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    &n.entry,
                )
            })
        })
    }
}

impl<T: Tile> QuadTree<T> {
    /// Deepest rendered node on the path to `(lvl, ilat, ilng)`.
    ///
    /// Longitude wraps around the date line. The walk stops at the first
    /// missing or inactive child and returns its parent, so the result may
    /// be a coarser tile covering the requested one. Returns `None` when an
    /// ancestor is invisible or the latitude index is out of range.
    pub fn find_node(&self, lvl: u32, ilat: i32, ilng: i32) -> Option<NodeId> {
        let nlat = 1i32 << lvl;
        if ilat < 0 || ilat >= nlat {
            return None;
        }
        let nlng = 2i32 << lvl;
        let ilng = ilng.rem_euclid(nlng);

        let mut id = self.roots[((ilng >> lvl) & 1) as usize];
        for i in (0..lvl).rev() {
            let node = self.node(id)?;
            if node.entry.state() == TileState::Invisible {
                return None;
            }
            let sub = (((ilat >> i) & 1) * 2 + ((ilng >> i) & 1)) as usize;
            match node.children[sub] {
                Some(child) if self.get(child).is_some_and(|t| t.state().is_active()) => id = child,
                _ => break,
            }
        }
        Some(id)
    }
}
