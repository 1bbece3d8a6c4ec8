//! Height-balanced binary tree over an index arena.
//!
//! Nodes carry parent links and subtree sizes, so callers get O(log n)
//! rank navigation (`offset`) on top of the usual ordered operations. The
//! tree does not compare keys itself; insertion and lower-bound take the
//! ordering as a closure, which lets the sorted set order by (score, name)
//! without the arena knowing about either.

pub type NodeId = u32;

#[derive(Debug)]
struct AvlNode<T> {
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: u32,
    count: u32,
    data: T,
}

#[derive(Debug)]
pub struct AvlTree<T> {
    nodes: Vec<Option<AvlNode<T>>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
}

impl<T> Default for AvlTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AvlTree<T> {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), free: Vec::new(), root: None }
    }

    #[cfg(test)]
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.count(self.root) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn data(&self, id: NodeId) -> &T {
        &self.node(id).data
    }

    pub fn data_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.node_mut(id).data
    }

    /// Allocate a detached node. It joins the tree on `insert_with`.
    pub fn alloc(&mut self, data: T) -> NodeId {
        let node = AvlNode { parent: None, left: None, right: None, height: 1, count: 1, data };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    /// Return a detached node's slot to the free list, yielding its data.
    pub fn release(&mut self, id: NodeId) -> T {
        let node = self.nodes[id as usize].take().expect("released node must be live");
        self.free.push(id);
        node.data
    }

    fn node(&self, id: NodeId) -> &AvlNode<T> {
        self.nodes[id as usize].as_ref().expect("node id must be live")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut AvlNode<T> {
        self.nodes[id as usize].as_mut().expect("node id must be live")
    }

    fn height(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |id| self.node(id).height)
    }

    fn count(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |id| self.node(id).count)
    }

    fn update(&mut self, id: NodeId) {
        let (l, r) = {
            let n = self.node(id);
            (n.left, n.right)
        };
        let height = 1 + self.height(l).max(self.height(r));
        let count = 1 + self.count(l) + self.count(r);
        let n = self.node_mut(id);
        n.height = height;
        n.count = count;
    }

    fn rot_left(&mut self, id: NodeId) -> NodeId {
        let parent = self.node(id).parent;
        let new_top = self.node(id).right.expect("left rotation needs a right child");
        let inner = self.node(new_top).left;
        // lesser values of the new top move under the old top
        self.node_mut(id).right = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(id);
        }
        self.node_mut(new_top).parent = parent;
        self.node_mut(new_top).left = Some(id);
        self.node_mut(id).parent = Some(new_top);
        self.update(id);
        self.update(new_top);
        new_top
    }

    fn rot_right(&mut self, id: NodeId) -> NodeId {
        let parent = self.node(id).parent;
        let new_top = self.node(id).left.expect("right rotation needs a left child");
        let inner = self.node(new_top).right;
        self.node_mut(id).left = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(id);
        }
        self.node_mut(new_top).parent = parent;
        self.node_mut(new_top).right = Some(id);
        self.node_mut(id).parent = Some(new_top);
        self.update(id);
        self.update(new_top);
        new_top
    }

    // left subtree is taller by 2
    fn fix_left(&mut self, id: NodeId) -> NodeId {
        let left = self.node(id).left.expect("left-heavy node has a left child");
        if self.height(self.node(left).left) < self.height(self.node(left).right) {
            let new_left = self.rot_left(left);
            self.node_mut(id).left = Some(new_left);
        }
        self.rot_right(id)
    }

    // right subtree is taller by 2
    fn fix_right(&mut self, id: NodeId) -> NodeId {
        let right = self.node(id).right.expect("right-heavy node has a right child");
        if self.height(self.node(right).right) < self.height(self.node(right).left) {
            let new_right = self.rot_right(right);
            self.node_mut(id).right = Some(new_right);
        }
        self.rot_left(id)
    }

    /// Propagate height/size updates from `id` to the root, rotating where
    /// subtree heights differ by 2. Returns the tree's new root.
    fn fix(&mut self, mut id: NodeId) -> NodeId {
        loop {
            let parent = self.node(id).parent;
            // remember which side we hang off before rotations change it
            let from_left = parent.map(|p| self.node(p).left == Some(id));

            self.update(id);
            let lh = self.height(self.node(id).left);
            let rh = self.height(self.node(id).right);
            let mut fixed = id;
            if lh == rh + 2 {
                fixed = self.fix_left(id);
            } else if lh + 2 == rh {
                fixed = self.fix_right(id);
            }

            match (parent, from_left) {
                (Some(p), Some(true)) => {
                    self.node_mut(p).left = Some(fixed);
                    id = p;
                }
                (Some(p), Some(false)) => {
                    self.node_mut(p).right = Some(fixed);
                    id = p;
                }
                _ => return fixed,
            }
        }
    }

    /// Link `id` into the tree at its ordered position. The node may be
    /// freshly allocated or previously detached; its links are reset here.
    pub fn insert_with(&mut self, id: NodeId, mut less: impl FnMut(&T, &T) -> bool) {
        {
            let n = self.node_mut(id);
            n.parent = None;
            n.left = None;
            n.right = None;
            n.height = 1;
            n.count = 1;
        }

        let mut parent = None;
        let mut went_left = false;
        let mut cur = self.root;
        while let Some(c) = cur {
            parent = Some(c);
            went_left = less(self.data(id), self.data(c));
            cur = if went_left { self.node(c).left } else { self.node(c).right };
        }

        self.node_mut(id).parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(p) => {
                if went_left {
                    self.node_mut(p).left = Some(id);
                } else {
                    self.node_mut(p).right = Some(id);
                }
                self.root = Some(self.fix(id));
            }
        }
    }

    // Splice out a node with at most one child; returns the new tree root.
    fn detach_easy(&mut self, id: NodeId) -> Option<NodeId> {
        let (left, right, parent) = {
            let n = self.node(id);
            (n.left, n.right, n.parent)
        };
        debug_assert!(left.is_none() || right.is_none());
        let child = left.or(right);
        if let Some(c) = child {
            self.node_mut(c).parent = parent;
        }
        let Some(p) = parent else {
            return child;
        };
        if self.node(p).left == Some(id) {
            self.node_mut(p).left = child;
        } else {
            self.node_mut(p).right = child;
        }
        Some(self.fix(p))
    }

    /// Unlink `id` from the tree. The slot stays allocated; pair with
    /// `release` to free it, or `insert_with` to re-link it.
    pub fn detach(&mut self, id: NodeId) {
        let (left, right) = {
            let n = self.node(id);
            (n.left, n.right)
        };
        if left.is_none() || right.is_none() {
            self.root = self.detach_easy(id);
            return;
        }

        // two children: the in-order successor takes the victim's place
        let mut succ = right.expect("two-child node has a right child");
        while let Some(l) = self.node(succ).left {
            succ = l;
        }
        let mut root = self.detach_easy(succ);

        // adopt the victim's links, read after the detach above: detaching
        // the successor may have rebalanced around the victim
        let (vp, vl, vr, vh, vc) = {
            let n = self.node(id);
            (n.parent, n.left, n.right, n.height, n.count)
        };
        {
            let s = self.node_mut(succ);
            s.parent = vp;
            s.left = vl;
            s.right = vr;
            s.height = vh;
            s.count = vc;
        }
        if let Some(c) = vl {
            self.node_mut(c).parent = Some(succ);
        }
        if let Some(c) = vr {
            self.node_mut(c).parent = Some(succ);
        }
        match vp {
            None => root = Some(succ),
            Some(p) => {
                if self.node(p).left == Some(id) {
                    self.node_mut(p).left = Some(succ);
                } else {
                    self.node_mut(p).right = Some(succ);
                }
            }
        }
        self.root = root;
    }

    /// First node for which `less(data)` is false, i.e. the least node
    /// >= the probe encoded by `less`.
    pub fn lower_bound(&self, mut less: impl FnMut(&T) -> bool) -> Option<NodeId> {
        let mut found = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            let n = self.node(id);
            if less(&n.data) {
                cur = n.right;
            } else {
                found = Some(id);
                cur = n.left;
            }
        }
        found
    }

    /// Walk `offset` steps through the in-order sequence, descending or
    /// climbing by subtree sizes. None when the walk leaves the sequence.
    pub fn offset(&self, start: NodeId, offset: i64) -> Option<NodeId> {
        let mut pos: i64 = 0;
        let mut id = start;
        while pos != offset {
            let (left, right, parent) = {
                let n = self.node(id);
                (n.left, n.right, n.parent)
            };
            let lcount = self.count(left) as i64;
            let rcount = self.count(right) as i64;
            if pos < offset && pos + rcount >= offset {
                // target is inside the right subtree
                let r = right.expect("non-zero right count implies a right child");
                id = r;
                pos += self.count(self.node(r).left) as i64 + 1;
            } else if pos > offset && pos - lcount <= offset {
                // target is inside the left subtree
                let l = left.expect("non-zero left count implies a left child");
                id = l;
                pos -= self.count(self.node(l).right) as i64 + 1;
            } else {
                let Some(p) = parent else {
                    return None;
                };
                if self.node(p).right == Some(id) {
                    pos -= lcount + 1;
                } else {
                    pos += rcount + 1;
                }
                id = p;
            }
        }
        Some(id)
    }
}
