/// Counters describing one pack transfer.
///
/// Values only grow during a transfer and start from zero for every
/// operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Object count announced by the pack header.
    pub total_objects: u32,
    /// Entries read off the stream so far.
    pub received_objects: u32,
    /// Objects whose id is known (bases immediately, deltas once resolved).
    pub indexed_objects: u32,
    pub total_deltas: u32,
    pub indexed_deltas: u32,
    /// Raw pack bytes consumed from the transport.
    pub received_bytes: u64,
}

impl TransferProgress {
    pub fn is_complete(&self) -> bool {
        self.indexed_objects == self.total_objects
    }
}
