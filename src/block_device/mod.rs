//! datalogger - Block Device support
//!
//! The contract a filesystem layer needs from the storage underneath it.

mod block;
pub use block::*;

/// Represents a block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Read one or more blocks, starting at the given block index.
    fn read_blocks(&mut self, start_block_idx: BlockIdx, blocks: &mut [Block])
        -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index.
    fn write_blocks(&mut self, start_block_idx: BlockIdx, blocks: &[Block])
        -> Result<(), Self::Error>;
    /// Determine how many blocks this device can hold. A device that cannot
    /// tell reports zero.
    fn block_count(&mut self) -> BlockCount;

    /// Read exactly one block.
    fn read_block(&mut self, block_idx: BlockIdx) -> Result<Block, Self::Error> {
        let mut blocks = [Block::new()];
        self.read_blocks(block_idx, &mut blocks)?;
        let [block] = blocks;
        Ok(block)
    }
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn read_blocks(
        &mut self,
        start_block_idx: BlockIdx,
        blocks: &mut [Block],
    ) -> Result<(), Self::Error> {
        (*self).read_blocks(start_block_idx, blocks)
    }

    fn write_blocks(&mut self, start_block_idx: BlockIdx, blocks: &[Block]) -> Result<(), Self::Error> {
        (*self).write_blocks(start_block_idx, blocks)
    }

    fn block_count(&mut self) -> BlockCount {
        (*self).block_count()
    }
}

/// The only way a [`MemoryBlockDevice`] can fail.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutOfRange(pub BlockIdx);

/// A block device backed by a slice of RAM. Useful on the host and for
/// staging a filesystem image before it is written out to a card.
#[derive(Debug)]
pub struct MemoryBlockDevice<'a> {
    memory: &'a mut [u8],
}

impl<'a> MemoryBlockDevice<'a> {
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self { memory }
    }

    fn block_range(&self, block_idx: BlockIdx) -> Result<core::ops::Range<usize>, OutOfRange> {
        let start = block_idx.0 as usize * Block::LEN;
        let end = start + Block::LEN;
        if end > self.memory.len() {
            return Err(OutOfRange(block_idx));
        }
        Ok(start..end)
    }
}

impl<'a> BlockDevice for MemoryBlockDevice<'a> {
    type Error = OutOfRange;

    fn read_blocks(
        &mut self,
        start_block_idx: BlockIdx,
        blocks: &mut [Block],
    ) -> Result<(), Self::Error> {
        let mut idx = start_block_idx;
        for block in blocks.iter_mut() {
            let range = self.block_range(idx)?;
            block.contents.copy_from_slice(&self.memory[range]);
            idx += BlockCount(1);
        }
        Ok(())
    }

    fn write_blocks(&mut self, start_block_idx: BlockIdx, blocks: &[Block]) -> Result<(), Self::Error> {
        let mut idx = start_block_idx;
        for block in blocks.iter() {
            let range = self.block_range(idx)?;
            self.memory[range].copy_from_slice(&block.contents);
            idx += BlockCount(1);
        }
        Ok(())
    }

    fn block_count(&mut self) -> BlockCount {
        BlockCount((self.memory.len() / Block::LEN) as u32)
    }
}
