//! Associative priority queue.

use std::mem;

/// An associative container optimized for extraction of the value with the
/// lowest key and deletion of arbitrary key-value pairs.
///
/// This implementation has the same theoretical complexity for insert and pull
/// operations as a conventional array-based binary heap but does differ from
/// the latter in some important aspects:
///
/// - elements can be deleted in *O*(log(*N*)) time rather than *O*(*N*) time
///   using a unique index returned at insertion time,
/// - same-key elements are guaranteed to be pulled in FIFO order,
/// - a pulled element can be re-inserted with its original epoch, in which case
///   it is sorted exactly as if it had never left the queue.
///
/// Under the hood, the priority queue relies on a binary heap cross-indexed
/// with values stored in a slab allocator. Each item of the binary heap
/// contains an index pointing to the associated slab-allocated node, as well as
/// the user-provided key. Each slab node contains the value associated to the
/// key and a back-pointing index to the binary heap. The heap items also
/// contain a unique epoch which allows same-key nodes to be sorted by insertion
/// order. The epoch is used as well to build unique indices that enable
/// efficient deletion of arbitrary key-value pairs.
///
/// The slab-based design is what makes *O*(log(*N*)) deletion possible, but it
/// does come with some trade-offs:
///
/// - its memory footprint is higher because it needs 2 extra pointer-sized
///   indices for each element to cross-index the heap and the slab,
/// - its computational footprint is higher because of the extra cost associated
///   with random slab access; that being said, array-based binary heaps are not
///   extremely cache-friendly to start with so unless the slab becomes very
///   fragmented, this is not expected to introduce more than a reasonable
///   constant-factor penalty compared to a conventional binary heap.
///
/// The computational penalty is partially offset by the fact that the value
/// never needs to be moved from the moment it is inserted until it is pulled.
pub(crate) struct PriorityQueue<K, V>
where
    K: Copy + Clone + Ord,
{
    heap: Vec<Item<K>>,
    slab: Vec<Node<V>>,
    first_free_node: Option<usize>,
    next_epoch: u64,
}

impl<K: Copy + Ord, V> PriorityQueue<K, V> {
    /// Creates an empty `PriorityQueue`.
    pub(crate) fn new() -> Self {
        Self {
            heap: Vec::new(),
            slab: Vec::new(),
            first_free_node: None,
            next_epoch: 0,
        }
    }

    /// Returns the number of key-value pairs in the priority queue.
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns the epoch that will be assigned by the next call to
    /// [`insert`](Self::insert).
    pub(crate) fn next_epoch(&self) -> u64 {
        self.next_epoch
    }

    /// Inserts a new key-value pair and returns a unique insertion key.
    ///
    /// This operation has *O*(log(*N*)) amortized worse-case theoretical
    /// complexity and *O*(1) amortized theoretical complexity for a
    /// sufficiently random heap.
    pub(crate) fn insert(&mut self, key: K, value: V) -> InsertKey {
        let epoch = self.next_epoch;
        assert_ne!(epoch, u64::MAX);
        self.next_epoch += 1;

        self.insert_unique(UniqueKey { key, epoch }, value)
    }

    /// Re-inserts a key-value pair that was previously pulled from this queue,
    /// restoring its original epoch.
    ///
    /// The pair is ordered among same-key pairs as if it had never been
    /// pulled. Providing an epoch that is still in use in the queue is a logic
    /// error and breaks the FIFO guarantee for that key.
    pub(crate) fn reinsert(&mut self, key: K, epoch: u64, value: V) -> InsertKey {
        debug_assert!(epoch < self.next_epoch);

        self.insert_unique(UniqueKey { key, epoch }, value)
    }

    /// Pulls the value with the lowest key.
    ///
    /// If there are several equal lowest keys, the value which was inserted
    /// first is returned.
    ///
    /// This operation has *O*(log(N)) non-amortized theoretical complexity.
    pub(crate) fn pull(&mut self) -> Option<(K, V)> {
        let item = self.heap.first()?;
        let top_slab_idx = item.slab_idx;
        let key = item.key.key;

        // Free the top node, extracting its value.
        let value = mem::replace(
            &mut self.slab[top_slab_idx],
            Node::FreeNode(FreeNode {
                next: self.first_free_node,
            }),
        )
        .unwrap_value();

        self.first_free_node = Some(top_slab_idx);

        // Sift the last node at the bottom of the heap from the top of the heap.
        let last_item = self.heap.pop().unwrap();
        if last_item.slab_idx != top_slab_idx {
            self.sift_down(last_item, 0);
        }

        Some((key, value))
    }

    /// Peeks a reference to the key-value pair with the lowest key, leaving it
    /// in the queue.
    ///
    /// If there are several equal lowest keys, a reference to the key-value
    /// pair which was inserted first is returned.
    ///
    /// This operation has *O*(1) non-amortized theoretical complexity.
    pub(crate) fn peek(&self) -> Option<(&K, &V)> {
        let item = self.heap.first()?;
        let top_slab_idx = item.slab_idx;
        let key = &item.key.key;
        let value = self.slab[top_slab_idx].unwrap_value_ref();

        Some((key, value))
    }

    /// Returns a reference to the value associated to the provided insertion
    /// key if it is still in the queue.
    pub(crate) fn get(&self, insert_key: InsertKey) -> Option<&V> {
        self.heap_index(insert_key)?;

        Some(self.slab[insert_key.slab_idx].unwrap_value_ref())
    }

    /// Deletes the key-value pair associated to the provided insertion key if
    /// it is still in the queue and returns it.
    ///
    /// Using an insertion key returned from another `PriorityQueue` is a logic
    /// error and could result in the deletion of an arbitrary key-value pair.
    ///
    /// This operation has guaranteed *O*(log(*N*)) theoretical complexity.
    pub(crate) fn delete(&mut self, insert_key: InsertKey) -> Option<(K, V)> {
        let slab_idx = insert_key.slab_idx;
        let heap_idx = self.heap_index(insert_key)?;
        let key = self.heap[heap_idx].key.key;

        // If the last item of the heap is not the one to be deleted, sift it up
        // or down as appropriate starting from the vacant spot.
        let last_item = self.heap.pop().unwrap();
        if let Some(item) = self.heap.get(heap_idx) {
            if last_item.key < item.key {
                self.sift_up(last_item, heap_idx);
            } else {
                self.sift_down(last_item, heap_idx);
            }
        }

        // Free the deleted node in the slab.
        let value = mem::replace(
            &mut self.slab[slab_idx],
            Node::FreeNode(FreeNode {
                next: self.first_free_node,
            }),
        )
        .unwrap_value();
        self.first_free_node = Some(slab_idx);

        Some((key, value))
    }

    /// Removes all key-value pairs, keeping the epoch counter running.
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.slab.clear();
        self.first_free_node = None;
    }

    /// Returns an iterator visiting all values with their insertion keys, in
    /// heap order rather than sorted order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (InsertKey, &K, &V)> + '_ {
        self.heap.iter().map(move |item| {
            (
                InsertKey {
                    slab_idx: item.slab_idx,
                    epoch: item.key.epoch,
                },
                &item.key.key,
                self.slab[item.slab_idx].unwrap_value_ref(),
            )
        })
    }

    /// Returns the heap index of the node designated by the insertion key, if
    /// this node is still in the heap.
    fn heap_index(&self, insert_key: InsertKey) -> Option<usize> {
        // Check that (i) there is a node at this index, (ii) this node is in
        // the heap and (iii) this node has the correct epoch.
        match self.slab.get(insert_key.slab_idx) {
            Some(Node::HeapNode(node)) if self.heap[node.heap_idx].key.epoch == insert_key.epoch => {
                Some(node.heap_idx)
            }
            _ => None,
        }
    }

    /// Adds a node to the slab and sifts its key up from the bottom of the
    /// heap.
    fn insert_unique(&mut self, unique_key: UniqueKey<K>, value: V) -> InsertKey {
        // Add a new node to the slab, either by re-using a free node or by
        // appending a new one.
        let slab_idx = match self.first_free_node {
            Some(idx) => {
                self.first_free_node = self.slab[idx].unwrap_next_free_node();

                self.slab[idx] = Node::HeapNode(HeapNode {
                    value,
                    heap_idx: 0, // temporary value overridden in `sift_up`
                });

                idx
            }
            None => {
                let idx = self.slab.len();
                self.slab.push(Node::HeapNode(HeapNode {
                    value,
                    heap_idx: 0, // temporary value overridden in `sift_up`
                }));

                idx
            }
        };

        // Add a new node at the bottom of the heap.
        let heap_idx = self.heap.len();
        self.heap.push(Item {
            key: unique_key, // temporary value overridden in `sift_up`
            slab_idx: 0,     // temporary value overridden in `sift_up`
        });

        // Sift up the new node.
        self.sift_up(
            Item {
                key: unique_key,
                slab_idx,
            },
            heap_idx,
        );

        InsertKey {
            slab_idx,
            epoch: unique_key.epoch,
        }
    }

    /// Take a heap item and, starting at `heap_idx`, move it up the heap while
    /// a parent has a larger key.
    #[inline]
    fn sift_up(&mut self, item: Item<K>, heap_idx: usize) {
        let mut child_heap_idx = heap_idx;
        let key = &item.key;

        while child_heap_idx != 0 {
            let parent_heap_idx = (child_heap_idx - 1) / 2;

            // Stop when the key is larger or equal to the parent's.
            if key >= &self.heap[parent_heap_idx].key {
                break;
            }

            // Move the parent down one level.
            self.heap[child_heap_idx] = self.heap[parent_heap_idx];
            let parent_slab_idx = self.heap[parent_heap_idx].slab_idx;
            *self.slab[parent_slab_idx].unwrap_heap_index_mut() = child_heap_idx;

            // Make the former parent the new child.
            child_heap_idx = parent_heap_idx;
        }

        // Move the original item to the current child.
        self.heap[child_heap_idx] = item;
        *self.slab[item.slab_idx].unwrap_heap_index_mut() = child_heap_idx;
    }

    /// Take a heap item and, starting at `heap_idx`, move it down the heap
    /// while a child has a smaller key.
    #[inline]
    fn sift_down(&mut self, item: Item<K>, heap_idx: usize) {
        let mut parent_heap_idx = heap_idx;
        let mut child_heap_idx = 2 * parent_heap_idx + 1;
        let key = &item.key;

        while child_heap_idx < self.heap.len() {
            // If the sibling exists and has a smaller key, make it the
            // candidate for swapping.
            if let Some(other_child) = self.heap.get(child_heap_idx + 1) {
                child_heap_idx += (self.heap[child_heap_idx].key > other_child.key) as usize;
            }

            // Stop when the key is smaller or equal to the child with the smallest key.
            if key <= &self.heap[child_heap_idx].key {
                break;
            }

            // Move the child up one level.
            self.heap[parent_heap_idx] = self.heap[child_heap_idx];
            let child_slab_idx = self.heap[child_heap_idx].slab_idx;
            *self.slab[child_slab_idx].unwrap_heap_index_mut() = parent_heap_idx;

            // Make the child the new parent.
            parent_heap_idx = child_heap_idx;
            child_heap_idx = 2 * parent_heap_idx + 1;
        }

        // Move the original item to the current parent.
        self.heap[parent_heap_idx] = item;
        *self.slab[item.slab_idx].unwrap_heap_index_mut() = parent_heap_idx;
    }
}

/// Data related to a single key-value pair stored in the heap.
#[derive(Copy, Clone)]
struct Item<K: Copy> {
    // A unique key by which the heap is sorted.
    key: UniqueKey<K>,
    // An index pointing to the corresponding node in the slab.
    slab_idx: usize,
}

/// Data related to a single key-value pair stored in the slab.
enum Node<V> {
    FreeNode(FreeNode),
    HeapNode(HeapNode<V>),
}

impl<V> Node<V> {
    /// Unwraps the `FreeNode::next` field.
    fn unwrap_next_free_node(&self) -> Option<usize> {
        match self {
            Self::FreeNode(n) => n.next,
            _ => panic!("the node was expected to be a free node"),
        }
    }

    /// Unwraps the `HeapNode::value` field.
    fn unwrap_value(self) -> V {
        match self {
            Self::HeapNode(n) => n.value,
            _ => panic!("the node was expected to be a heap node"),
        }
    }

    /// Unwraps the `HeapNode::value` field.
    fn unwrap_value_ref(&self) -> &V {
        match self {
            Self::HeapNode(n) => &n.value,
            _ => panic!("the node was expected to be a heap node"),
        }
    }

    /// Unwraps a mutable reference to the `HeapNode::heap_idx` field.
    fn unwrap_heap_index_mut(&mut self) -> &mut usize {
        match self {
            Self::HeapNode(n) => &mut n.heap_idx,
            _ => panic!("the node was expected to be a heap node"),
        }
    }
}

/// A node that is no longer in the binary heap.
struct FreeNode {
    // An index pointing to the next free node, if any.
    next: Option<usize>,
}

/// A node currently in the binary heap.
struct HeapNode<V> {
    // The value associated to this node.
    value: V,
    // Index of the node in the heap.
    heap_idx: usize,
}

/// A unique insertion key that can be used for key-value pair deletion.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct InsertKey {
    // An index pointing to a node in the slab.
    slab_idx: usize,
    // The epoch when the node was inserted.
    epoch: u64,
}

#[cfg(test)]
impl InsertKey {
    /// Returns the insertion epoch, which orders same-key pairs.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// A unique key made of the user-provided key complemented by a unique epoch.
///
/// Implementation note: `UniqueKey` automatically derives `PartialOrd`, which
/// implies that lexicographic order between `key` and `epoch` must be preserved
/// to make sure that `key` has a higher sorting priority than `epoch`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct UniqueKey<K: Copy + Clone> {
    /// The user-provided key.
    key: K,
    /// A unique epoch that indicates the insertion date.
    epoch: u64,
}
