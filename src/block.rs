//! Per-(disk, index) block state (C1): the enum, its flags, and the
//! transitions `sync_process` is allowed to perform.

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// Logical block position, shared across all disks and all parity levels.
pub type BlockOff = u32;

/// Index into a disk's file arena.
pub type FileRef = u32;

/// A block's lifecycle state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BlockState {
    /// Position unused on this disk.
    Empty,
    /// Backed by a live file; hash authoritative; parity covers it.
    Blk,
    /// Backed by a live file whose content differs from what parity encodes.
    Chg,
    /// New/replacement block; hash already known, parity not yet updated.
    Rep,
    /// Position no longer has a file but parity still encodes its content.
    Deleted,
}

/// One block slot in a disk's block array.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub state: BlockState,
    /// Owning file, when `state` is BLK/CHG/REP.
    pub file: Option<FileRef>,
    /// Offset within `file`, in block units.
    pub file_pos: u32,
    pub hash: Hash,
}

impl Block {
    pub fn empty() -> Self
    {
        Self {
            state: BlockState::Empty,
            file: None,
            file_pos: 0,
            hash: Hash::default(),
        }
    }

    pub fn new(state: BlockState, file: FileRef, file_pos: u32, hash: Hash) -> Self
    {
        Self { state, file: Some(file), file_pos, hash }
    }

    /// A DELETED block: no current file, hash preserved for reconstruction.
    pub fn deleted(hash: Hash) -> Self
    {
        Self { state: BlockState::Deleted, file: None, file_pos: 0, hash }
    }
}

/// `block_has_file(b) <=> state in {BLK, CHG, REP}`.
pub fn block_has_file(b: &Block) -> bool
{
    matches!(b.state, BlockState::Blk | BlockState::Chg | BlockState::Rep)
}

/// `block_has_updated_hash(b) <=> state in {BLK, REP}`.
pub fn block_has_updated_hash(b: &Block) -> bool
{
    matches!(b.state, BlockState::Blk | BlockState::Rep)
}

/// `block_has_invalid_parity(b) <=> state in {CHG, REP, DELETED}`.
pub fn block_has_invalid_parity(b: &Block) -> bool
{
    matches!(b.state, BlockState::Chg | BlockState::Rep | BlockState::Deleted)
}

/// Applies the post-commit transition to a block whose index was just
/// rewritten cleanly. No-op for BLK/EMPTY (both map to themselves).
pub fn commit_transition(state: BlockState) -> BlockState
{
    match state {
        BlockState::Chg => BlockState::Blk,
        BlockState::Rep => BlockState::Blk,
        BlockState::Deleted => BlockState::Empty,
        BlockState::Blk => BlockState::Blk,
        BlockState::Empty => BlockState::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;

    fn real_hash() -> Hash
    {
        Array([1u8; crate::hash::HASH_SIZE])
    }

    #[test]
    fn predicates_match_state_table()
    {
        let empty = Block::empty();
        let blk = Block::new(BlockState::Blk, 0, 0, real_hash());
        let chg = Block::new(BlockState::Chg, 0, 0, Hash::default());
        let rep = Block::new(BlockState::Rep, 0, 0, real_hash());
        let deleted = Block::deleted(real_hash());

        assert!(!block_has_file(&empty));
        assert!(block_has_file(&blk));
        assert!(block_has_file(&chg));
        assert!(block_has_file(&rep));
        assert!(!block_has_file(&deleted));

        assert!(!block_has_updated_hash(&empty));
        assert!(block_has_updated_hash(&blk));
        assert!(!block_has_updated_hash(&chg));
        assert!(block_has_updated_hash(&rep));
        assert!(!block_has_updated_hash(&deleted));

        assert!(!block_has_invalid_parity(&empty));
        assert!(!block_has_invalid_parity(&blk));
        assert!(block_has_invalid_parity(&chg));
        assert!(block_has_invalid_parity(&rep));
        assert!(block_has_invalid_parity(&deleted));
    }

    #[test]
    fn commit_transitions_match_table()
    {
        assert_eq!(commit_transition(BlockState::Chg), BlockState::Blk);
        assert_eq!(commit_transition(BlockState::Rep), BlockState::Blk);
        assert_eq!(commit_transition(BlockState::Deleted), BlockState::Empty);
        assert_eq!(commit_transition(BlockState::Blk), BlockState::Blk);
        assert_eq!(commit_transition(BlockState::Empty), BlockState::Empty);
    }
}
