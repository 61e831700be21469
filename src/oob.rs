//! Out-of-band sequence registrations.
//!
//! Patterns that divert the incoming stream are registered once, at engine
//! construction time, as a data-only table: each entry pairs a fixed byte
//! pattern with a tagged action evaluated by the dispatch task. Registration
//! order is the tie-break when two patterns complete on the same byte, the
//! first registered match wins.

use crate::frame;
use crate::sequence::SequenceMatcher;
use heapless::Vec;

/// Maximum number of registrations per engine
pub const MAX_OOB_HANDLERS: usize = 4;

/// What the dispatcher does once a registered pattern completes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OobAction {
    /// Parse the `<cid><len4>` header, read exactly `len` payload bytes from
    /// the raw stream and enqueue the packet on the connection's queue
    BulkData,

    /// Claim the byte completing the match without further handling. Bytes
    /// of a longer pattern prefix have already been forwarded to the
    /// command-response stream, so this strips single-byte markers exactly
    /// and longer patterns only of their final byte.
    Discard,
}

/// Table is fixed-size, registration happens at construction time only
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TableFull;

pub(crate) struct OobEntry {
    pub(crate) matcher: SequenceMatcher<'static>,
    pub(crate) action: OobAction,
}

/// Ordered set of (pattern, action) registrations
pub struct OobTable {
    pub(crate) entries: Vec<OobEntry, MAX_OOB_HANDLERS>,
}

impl OobTable {
    /// Empty table. Useful when the command-response stream is the only
    /// consumer, e.g. during module provisioning.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Table with the standard bulk-data registration `<ESC>Z` the module
    /// uses for incoming socket payloads
    pub fn bulk_data() -> Self {
        let mut table = Self::new();

        // Table holds more than one slot
        let _ = table.register(frame::BULK_DATA_IN, OobAction::BulkData);
        table
    }

    /// Appends a registration. Later entries lose ties against earlier ones.
    pub fn register(&mut self, pattern: &'static [u8], action: OobAction) -> Result<(), TableFull> {
        self.entries
            .push(OobEntry {
                matcher: SequenceMatcher::new(pattern),
                action,
            })
            .map_err(|_| TableFull)
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OobTable {
    fn default() -> Self {
        Self::bulk_data()
    }
}
