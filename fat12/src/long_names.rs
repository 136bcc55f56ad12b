// VFAT long-filename fragment codec
// A fragment carries 13 UTF-16LE characters split across three byte ranges;
// fragments are written highest-sequence first, directly before their short
// entry, and bound to it by a one-byte checksum.

use log::warn;

use crate::shortname::lfn_checksum;

pub const LFN_ATTR: u8 = 0x0F;
pub const CHARS_PER_FRAGMENT: usize = 13;
const LAST_FRAGMENT_FLAG: u8 = 0x40;
const SEQUENCE_MASK: u8 = 0x3F;

// Byte ranges of the three character runs within a fragment
const CHAR_RUNS: [(usize, usize); 3] = [(1, 11), (14, 26), (28, 32)];

/// Number of fragments `name` needs (0 when it fits an 8.3 entry verbatim —
/// the caller decides that; this only measures length).
pub fn fragments_needed(name: &str) -> usize {
    let chars = name.encode_utf16().count();
    (chars + CHARS_PER_FRAGMENT - 1) / CHARS_PER_FRAGMENT
}

/// Build the fragment entries for `long_name`, in physical write order:
/// last fragment (0x40 flag set) first, sequence 1 last.
pub fn build_lfn_entries(long_name: &str, short_raw: &[u8; 11]) -> Vec<[u8; 32]> {
    let checksum = lfn_checksum(short_raw);
    let utf16: Vec<u16> = long_name.encode_utf16().collect();
    let count = fragments_needed(long_name);
    let mut entries = Vec::with_capacity(count);

    for fragment in (0..count).rev() {
        let mut entry = [0u8; 32];
        entry[0] = if fragment == count - 1 {
            LAST_FRAGMENT_FLAG | (fragment as u8 + 1)
        } else {
            fragment as u8 + 1
        };
        entry[11] = LFN_ATTR;
        entry[12] = 0;
        entry[13] = checksum;
        // first-cluster word stays zero ([26:28])

        let base = fragment * CHARS_PER_FRAGMENT;
        let mut slot = 0;
        for &(start, end) in &CHAR_RUNS {
            let mut offset = start;
            while offset < end {
                let value = match base + slot {
                    i if i < utf16.len() => utf16[i],
                    // terminator, then 0xFFFF padding
                    i if i == utf16.len() => 0x0000,
                    _ => 0xFFFF,
                };
                entry[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
                offset += 2;
                slot += 1;
            }
        }
        entries.push(entry);
    }
    entries
}

/// Decode the character payload of one fragment.
fn fragment_text(entry: &[u8]) -> String {
    let mut units = Vec::with_capacity(CHARS_PER_FRAGMENT);
    for &(start, end) in &CHAR_RUNS {
        let mut offset = start;
        while offset < end {
            let value = u16::from_le_bytes([entry[offset], entry[offset + 1]]);
            offset += 2;
            if value == 0x0000 || value == 0xFFFF {
                return String::from_utf16_lossy(&units);
            }
            units.push(value);
        }
    }
    String::from_utf16_lossy(&units)
}

/// Collects fragments while scanning a directory, then resolves them against
/// the short entry they precede.
#[derive(Default)]
pub struct LfnAccumulator {
    fragments: Vec<(u8, u8, String)>,
}

impl LfnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any pending fragments (deleted entry seen mid-group).
    pub fn reset(&mut self) {
        self.fragments.clear();
    }

    /// Number of fragment slots currently pending.
    pub fn pending(&self) -> usize {
        self.fragments.len()
    }

    /// Record one fragment entry (attribute byte must be 0x0F).
    pub fn push(&mut self, entry: &[u8]) {
        let sequence = entry[0] & SEQUENCE_MASK;
        let checksum = entry[13];
        self.fragments.push((sequence, checksum, fragment_text(entry)));
    }

    /// Resolve the accumulated fragments against the short entry that
    /// follows them. A checksum mismatch discards the long name — stale
    /// fragments left by a crashed writer must not attach to an unrelated
    /// entry.
    pub fn take(&mut self, short_raw: &[u8; 11]) -> Option<String> {
        let fragments = std::mem::take(&mut self.fragments);
        if fragments.is_empty() {
            return None;
        }
        let expected = lfn_checksum(short_raw);
        if fragments.iter().any(|&(_, checksum, _)| checksum != expected) {
            warn!(
                "discarding {} orphaned LFN fragment(s) with stale checksum",
                fragments.len()
            );
            return None;
        }
        let mut ordered = fragments;
        ordered.sort_by_key(|&(sequence, _, _)| sequence);
        let name: String = ordered.into_iter().map(|(_, _, text)| text).collect();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}
