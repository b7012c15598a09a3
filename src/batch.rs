use crate::parser::PendingScan;
use serde::{Deserialize, Serialize};

// The agent's context window and the audit prompt degrade past ~10 jobs per
// call, so the mini-batch size is hard-bounded no matter what the config says.
pub const MINI_BATCH_MIN: usize = 1;
pub const MINI_BATCH_MAX: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_number: u32,
    pub scans: Vec<PendingScan>,
    pub mini_batches: Vec<MiniBatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiniBatch {
    pub mini_batch_number: u32,
    pub scans: Vec<PendingScan>,
}

pub fn clamp_mini_batch_size(size: usize) -> usize {
    size.clamp(MINI_BATCH_MIN, MINI_BATCH_MAX)
}

/// Greedy left-to-right partition. Batch numbering is 1-based and global,
/// mini-batch numbering is 1-based and restarts per batch. Input order is
/// preserved end-to-end.
pub fn organize_batches(
    scans: &[PendingScan],
    batch_size: usize,
    mini_batch_size: usize,
) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mini_batch_size = clamp_mini_batch_size(mini_batch_size);

    scans
        .chunks(batch_size)
        .enumerate()
        .map(|(bi, chunk)| Batch {
            batch_number: bi as u32 + 1,
            scans: chunk.to_vec(),
            mini_batches: chunk
                .chunks(mini_batch_size)
                .enumerate()
                .map(|(mi, mchunk)| MiniBatch {
                    mini_batch_number: mi as u32 + 1,
                    scans: mchunk.to_vec(),
                })
                .collect(),
        })
        .collect()
}
