// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Virtual buckets allocated per physical node before folding back onto the node range.
pub const VIRTUAL_NODES_PER_NODE: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("node count must be positive")]
    ZeroNodes,
    #[error("node count {0} exceeds the virtual bucket space")]
    TooManyNodes(usize),
}

/// Maps object keys onto a fixed number of nodes.
///
/// The key is fingerprinted with xxh3-64, placed into one of
/// `nodes * VIRTUAL_NODES_PER_NODE` buckets with jump consistent hashing, and
/// the bucket is reduced modulo `nodes`. The oversampling evens out the skew
/// a plain `fingerprint % nodes` shows for small clusters.
///
/// Placement is only stable for a fixed node count: the same key hashed by two
/// partitioners of different sizes may land anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    nodes: usize,
    virtual_nodes: i32,
}

impl Partitioner {
    pub fn new(nodes: usize) -> Result<Self, PartitionError> {
        if nodes == 0 {
            return Err(PartitionError::ZeroNodes);
        }
        let virtual_nodes = nodes
            .checked_mul(VIRTUAL_NODES_PER_NODE)
            .and_then(|v| i32::try_from(v).ok())
            .ok_or(PartitionError::TooManyNodes(nodes))?;

        Ok(Self {
            nodes,
            virtual_nodes,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes as usize
    }

    /// Node index in `[0, node_count)` responsible for `key`.
    pub fn hash(&self, key: &str) -> usize {
        let fingerprint = xxh3_64(key.as_bytes());
        jump_hash(fingerprint, self.virtual_nodes) as usize % self.nodes
    }
}

/// Jump consistent hash (Lamping & Veach, 2014).
///
/// Returns a bucket in `[0, buckets)`. Growing `buckets` by one only ever moves
/// a key into the new bucket. `buckets` must be positive.
pub fn jump_hash(mut key: u64, buckets: i32) -> i32 {
    let mut b: i64 = -1;
    let mut j: i64 = 0;

    while j < i64::from(buckets) {
        b = j;
        key = key.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        j = (((b + 1) as f64) * ((1u64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
    }

    b as i32
}
