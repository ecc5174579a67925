use foundation::bounds::Aabb2;
use foundation::math::precision::stable_total_cmp_f64;

/// A deterministic, build-once bounding volume hierarchy over `Aabb2` items.
///
/// Ordering contract:
/// - `query` returns item slots in ascending order.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<Node>,
    len: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        bounds: Aabb2,
        items: Vec<Item>,
    },
    Internal {
        bounds: Aabb2,
        left: usize,
        right: usize,
    },
}

/// A bounded item; `slot` is an opaque caller-side index.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Item {
    pub slot: usize,
    pub bounds: Aabb2,
}

const LEAF_MAX: usize = 8;

impl Bvh {
    pub fn build(items: Vec<Item>) -> Self {
        let mut nodes = Vec::new();
        let mut items = items;
        let len = items.len();
        if !items.is_empty() {
            let _root = build_node(&mut nodes, &mut items);
        }
        Self { nodes, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn bounds(&self) -> Option<Aabb2> {
        self.nodes.first().map(|n| match n {
            Node::Leaf { bounds, .. } | Node::Internal { bounds, .. } => *bounds,
        })
    }

    /// Appends the slots of items intersecting `query` to `hits`, unsorted.
    pub fn query_into(&self, query: &Aabb2, hits: &mut Vec<usize>) {
        if self.nodes.is_empty() {
            return;
        }

        let mut stack: Vec<usize> = vec![0];
        while let Some(idx) = stack.pop() {
            match &self.nodes[idx] {
                Node::Leaf { bounds, items } => {
                    if !bounds.intersects(query) {
                        continue;
                    }
                    hits.extend(
                        items
                            .iter()
                            .filter(|item| item.bounds.intersects(query))
                            .map(|item| item.slot),
                    );
                }
                Node::Internal {
                    bounds,
                    left,
                    right,
                } => {
                    if !bounds.intersects(query) {
                        continue;
                    }
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }
    }

    /// Query the BVH for items that intersect `query`, in ascending slot order.
    pub fn query(&self, query: &Aabb2) -> Vec<usize> {
        let mut hits = Vec::new();
        self.query_into(query, &mut hits);
        hits.sort_unstable();
        hits.dedup();
        hits
    }
}

fn build_node(nodes: &mut Vec<Node>, items: &mut [Item]) -> usize {
    let bounds = bounds_for_items(items);
    if items.len() <= LEAF_MAX {
        let idx = nodes.len();
        nodes.push(Node::Leaf {
            bounds,
            items: items.to_vec(),
        });
        return idx;
    }

    let axis = if bounds.width() >= bounds.height() { 0 } else { 1 };
    items.sort_by(|a, b| {
        let ca = a.bounds.center()[axis];
        let cb = b.bounds.center()[axis];
        stable_total_cmp_f64(ca, cb).then_with(|| a.slot.cmp(&b.slot))
    });

    let mid = items.len() / 2;
    let (left_items, right_items) = items.split_at_mut(mid);

    let idx = nodes.len();
    // Placeholder; patched once both children exist.
    nodes.push(Node::Leaf {
        bounds,
        items: Vec::new(),
    });

    let left = build_node(nodes, left_items);
    let right = build_node(nodes, right_items);

    nodes[idx] = Node::Internal {
        bounds,
        left,
        right,
    };
    idx
}

fn bounds_for_items(items: &[Item]) -> Aabb2 {
    items[1..]
        .iter()
        .fold(items[0].bounds, |acc, item| acc.union(&item.bounds))
}
