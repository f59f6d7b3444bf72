//! The B+tree index (storage-core component C5): an ordered key→document-id
//! multimap over page-backed nodes (§4.5), with split/borrow/merge
//! rebalancing and a leaf chain for range scans.

mod node;
mod tree;

pub use tree::{BTree, Direction, DEFAULT_MAX_KEYS};
pub(crate) use node::Node;

use crate::cache::PageCache;
use crate::errors::Result;
use crate::store::{PageStore, NONE_PAGE};

/// Frees every page belonging to the tree rooted at `root`, including leaf
/// and internal nodes. Used when an index is dropped or a collection is
/// deleted outright — nothing short of a full walk can recover a B+tree's
/// pages, since unlike the heap chain a tree has no single linear thread
/// through every page.
pub(crate) fn free_tree(store: &mut PageStore, cache: &PageCache, root: u32) -> Result<()> {
    if root == NONE_PAGE {
        return Ok(());
    }
    let mut stack = vec![root];
    while let Some(page_id) = stack.pop() {
        let page = cache.fetch(page_id, store)?;
        cache.unpin(page_id);
        let node = Node::from_page(&page)?;
        if let Node::Internal { children, .. } = node {
            stack.extend(children);
        }
        store.free_page(page_id)?;
    }
    Ok(())
}
