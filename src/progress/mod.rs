mod reassembler;
mod snapshot;
#[cfg(test)]
mod tests;

pub use reassembler::{CycleAssembler, ProgressReassembler, ReassemblerStats, SCRATCH_SLOTS};
pub use snapshot::{parse_speed, ProgressSnapshot, SnapshotSlot};
