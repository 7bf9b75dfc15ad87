//! Per-index metadata (C2): the packed `(timestamp, bad, rehash)` triple.

use serde::{Deserialize, Serialize};

/// `(timestamp_seconds, bad, rehash)`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Info {
    /// Wall-clock seconds when parity at this index was last written.
    pub timestamp: u64,
    /// Index is known suspect; scrub/fix must re-examine.
    pub bad: bool,
    /// Stored hashes at this index used the previous hash algorithm/seed.
    pub rehash: bool,
}

/// `info_make(timestamp, bad, rehash)`.
pub fn info_make(timestamp: u64, bad: bool, rehash: bool) -> Info
{
    Info { timestamp, bad, rehash }
}

/// `info_set_bad`: preserve timestamp/rehash, set `bad`.
pub fn info_set_bad(info: Info) -> Info
{
    Info { bad: true, ..info }
}

/// Growable per-index metadata array, indexed by [`crate::block::BlockOff`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InfoArray(Vec<Info>);

impl InfoArray {
    pub fn new(len: usize) -> Self
    {
        Self(vec![Info::default(); len])
    }

    pub fn len(&self) -> usize
    {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.0.is_empty()
    }

    pub fn resize(&mut self, len: usize)
    {
        self.0.resize(len, Info::default());
    }

    /// `info_get(i)`.
    pub fn get(&self, i: u32) -> Info
    {
        self.0[i as usize]
    }

    /// `info_set(i, info)`, aka `tommy_arrayblk_set` in the collaborator API.
    pub fn set(&mut self, i: u32, info: Info)
    {
        self.0[i as usize] = info;
    }

    pub fn get_bad(&self, i: u32) -> bool
    {
        self.0[i as usize].bad
    }

    pub fn get_rehash(&self, i: u32) -> bool
    {
        self.0[i as usize].rehash
    }
}
