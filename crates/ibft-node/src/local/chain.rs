//! In-memory committed chain

use crate::error::{NodeError, Result};
use ibft_core::{Block, BlockHeader, Hash};
use ibft_snapshot::ChainReader;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct ChainInner {
    blocks: Vec<Block>,
    index: HashMap<Hash, u64>,
}

/// Append-only list of committed blocks, starting at genesis
pub struct LocalChain {
    inner: RwLock<ChainInner>,
}

impl LocalChain {
    pub fn new(genesis: Block) -> Self {
        let mut inner = ChainInner::default();
        inner.index.insert(genesis.hash(), genesis.number());
        inner.blocks.push(genesis);
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn head(&self) -> Block {
        self.inner.read().blocks.last().cloned().unwrap_or_default()
    }

    /// Number of the head block
    pub fn height(&self) -> u64 {
        self.inner.read().blocks.len().saturating_sub(1) as u64
    }

    pub fn block(&self, number: u64) -> Option<Block> {
        let index = usize::try_from(number).ok()?;
        self.inner.read().blocks.get(index).cloned()
    }

    /// Blocks `from..=head`
    pub fn blocks_from(&self, from: u64) -> Vec<Block> {
        let inner = self.inner.read();
        let start = usize::try_from(from).unwrap_or(usize::MAX);
        inner.blocks.iter().skip(start).cloned().collect()
    }

    pub fn contains(&self, hash: &Hash, number: u64) -> bool {
        self.inner.read().index.get(hash) == Some(&number)
    }

    /// Append `block` on top of the head
    ///
    /// Returns false when the same block is already at that height.
    pub fn append(&self, block: Block) -> Result<bool> {
        let mut inner = self.inner.write();
        let hash = block.hash();
        let number = block.number();
        if inner.index.get(&hash) == Some(&number) {
            return Ok(false);
        }

        let head = inner.blocks.last().map(|b| (b.number(), b.hash()));
        match head {
            Some((head_number, head_hash))
                if number == head_number + 1 && block.parent_hash() == head_hash =>
            {
                inner.index.insert(hash, number);
                inner.blocks.push(block);
                Ok(true)
            }
            Some((head_number, _)) => Err(NodeError::NotNextBlock {
                number,
                head: head_number,
            }),
            None => Err(NodeError::NotNextBlock { number, head: 0 }),
        }
    }
}

impl ChainReader for LocalChain {
    fn header_by_hash(&self, hash: &Hash) -> Option<BlockHeader> {
        let inner = self.inner.read();
        let number = *inner.index.get(hash)?;
        inner
            .blocks
            .get(usize::try_from(number).ok()?)
            .map(|block| block.header.clone())
    }

    fn header_by_number(&self, number: u64) -> Option<BlockHeader> {
        self.block(number).map(|block| block.header)
    }
}
