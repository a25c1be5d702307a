// SPDX-License-Identifier: Apache-2.0

//! The shared-cache blob format.
//!
//! One blob per ROM method: a balanced binary search tree over the method's
//! persistable entries, ordered by PC offset. Each node is a fixed header
//! `{pc_offset: u32, left: u8, right: u16, tag: u8}` followed by a
//! variant payload. Child offsets are relative to the node's own start;
//! the balanced middle-out layout keeps the left child adjacent (so its
//! offset is just the node's footprint, which must fit in 8 bits) and the
//! right child behind the whole left subtree (16 bits).
//!
//! Call-graph entries persist only their dominant class, identified by a
//! (class chain, loader chain) offset pair; all non-dominant weight is
//! folded into the residue.

use crate::entry::{CallGraphSnapshot, EntryData, ProfileEntry};
use jitc_vm::{ClassId, SharedCache, VmRuntime};

const HEADER_SIZE: usize = 8;

const TAG_BRANCH: u8 = 1;
const TAG_SWITCH: u8 = 2;
const TAG_CALL_GRAPH: u8 = 3;

/// Why a blob could not be laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// A left child landed more than 255 bytes from its parent.
    #[error("left child too far from parent")]
    LeftChildTooFar,
    /// A right child landed more than 65535 bytes from its parent.
    #[error("right child too far from parent")]
    RightChildTooFar,
}

/// Decoded payload of one stored node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoredPayload {
    Branch {
        taken: u16,
        not_taken: u16,
    },
    Switch {
        slots: [(u32, u32); 4],
    },
    CallGraph {
        chain: u32,
        loader_chain: u32,
        weight: u16,
        residue: u16,
        too_big: bool,
    },
}

/// One node ready for layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoredEntry {
    pub pc_offset: u32,
    pub payload: StoredPayload,
}

impl StoredEntry {
    pub(crate) fn footprint(&self) -> usize {
        HEADER_SIZE
            + match self.payload {
                StoredPayload::Branch { .. } => 4,
                StoredPayload::Switch { .. } => 32,
                StoredPayload::CallGraph { .. } => 16,
            }
    }
}

/// Serializes a live entry for storage, or `None` when the entry has no
/// persistable form (empty, or a call-graph whose dominant class has no
/// cache-resident identity).
pub(crate) fn prepare_entry(
    entry: &ProfileEntry,
    pc_offset: u32,
    vm: &dyn VmRuntime,
    scc: &dyn SharedCache,
) -> Option<StoredEntry> {
    let payload = match entry.data() {
        EntryData::Branch(branch) => {
            let (taken, not_taken) = branch.counts();
            StoredPayload::Branch { taken, not_taken }
        }
        EntryData::Switch(switch) => StoredPayload::Switch {
            slots: switch.snapshot(),
        },
        EntryData::CallGraph(cg) => {
            let snapshot = cg.snapshot();
            let (dominant, weight) = cg.dominant_slot()?;
            if vm.is_unloaded_class(dominant) {
                return None;
            }
            let chain = scc.remember_class(dominant)?;
            let loader_chain = scc.class_chain_identifying_loader(dominant)?;
            let sum: u32 = snapshot
                .slots
                .iter()
                .map(|&(_, w)| u32::from(w))
                .sum::<u32>()
                + u32::from(snapshot.residue);
            StoredPayload::CallGraph {
                chain: chain.0,
                loader_chain: loader_chain.0,
                weight,
                residue: (sum - u32::from(weight)).min(0x7FFF) as u16,
                too_big: snapshot.too_big_to_be_inlined,
            }
        }
    };
    Some(StoredEntry { pc_offset, payload })
}

/// Lays out `entries` (sorted by ascending `pc_offset`) as a balanced BST.
pub(crate) fn build_blob(entries: &[StoredEntry]) -> Result<Vec<u8>, LayoutError> {
    let total: usize = entries.iter().map(StoredEntry::footprint).sum();
    let mut blob = vec![0u8; total];
    let written = layout(entries, 0, &mut blob)?;
    debug_assert_eq!(written, total);
    Ok(blob)
}

/// Middle-out recursion: the shallowest feasible tree over a sorted slice.
fn layout(entries: &[StoredEntry], base: usize, blob: &mut [u8]) -> Result<usize, LayoutError> {
    if entries.is_empty() {
        return Ok(0);
    }
    let mid = (entries.len() - 1) / 2;
    let node = &entries[mid];
    let bytes = node.footprint();
    write_node(node, base, blob);

    let left = layout(&entries[..mid], base + bytes, blob)?;
    if left > 0 {
        if bytes > u8::MAX as usize {
            return Err(LayoutError::LeftChildTooFar);
        }
        blob[base + 4] = bytes as u8;
    }
    let right = layout(&entries[mid + 1..], base + bytes + left, blob)?;
    if right > 0 {
        let distance = bytes + left;
        if distance > u16::MAX as usize {
            return Err(LayoutError::RightChildTooFar);
        }
        blob[base + 5..base + 7].copy_from_slice(&(distance as u16).to_le_bytes());
    }
    Ok(bytes + left + right)
}

fn write_node(node: &StoredEntry, base: usize, blob: &mut [u8]) {
    blob[base..base + 4].copy_from_slice(&node.pc_offset.to_le_bytes());
    // Child offsets are patched by the caller once subtree sizes are known.
    blob[base + 4] = 0;
    blob[base + 5..base + 7].copy_from_slice(&0u16.to_le_bytes());
    let payload_base = base + HEADER_SIZE;
    match node.payload {
        StoredPayload::Branch { taken, not_taken } => {
            blob[base + 7] = TAG_BRANCH;
            blob[payload_base..payload_base + 2].copy_from_slice(&taken.to_le_bytes());
            blob[payload_base + 2..payload_base + 4].copy_from_slice(&not_taken.to_le_bytes());
        }
        StoredPayload::Switch { slots } => {
            blob[base + 7] = TAG_SWITCH;
            for (i, (value, count)) in slots.iter().enumerate() {
                let at = payload_base + i * 8;
                blob[at..at + 4].copy_from_slice(&value.to_le_bytes());
                blob[at + 4..at + 8].copy_from_slice(&count.to_le_bytes());
            }
        }
        StoredPayload::CallGraph {
            chain,
            loader_chain,
            weight,
            residue,
            too_big,
        } => {
            blob[base + 7] = TAG_CALL_GRAPH;
            blob[payload_base..payload_base + 4].copy_from_slice(&chain.to_le_bytes());
            blob[payload_base + 4..payload_base + 8].copy_from_slice(&loader_chain.to_le_bytes());
            blob[payload_base + 8..payload_base + 10].copy_from_slice(&weight.to_le_bytes());
            blob[payload_base + 10..payload_base + 12].copy_from_slice(&residue.to_le_bytes());
            blob[payload_base + 12] = u8::from(too_big);
        }
    }
}

/// BST search for a PC offset inside a blob.
pub(crate) fn find_in_blob(blob: &[u8], pc_offset: u32) -> Option<StoredEntry> {
    let mut at = 0usize;
    loop {
        if at + HEADER_SIZE > blob.len() {
            return None;
        }
        let node_pc = u32::from_le_bytes(blob[at..at + 4].try_into().ok()?);
        if pc_offset == node_pc {
            return decode_node(blob, at);
        }
        let step = if pc_offset < node_pc {
            usize::from(blob[at + 4])
        } else {
            usize::from(u16::from_le_bytes(blob[at + 5..at + 7].try_into().ok()?))
        };
        if step == 0 {
            return None;
        }
        at += step;
    }
}

fn decode_node(blob: &[u8], at: usize) -> Option<StoredEntry> {
    let pc_offset = u32::from_le_bytes(blob[at..at + 4].try_into().ok()?);
    let tag = blob[at + 7];
    let payload_base = at + HEADER_SIZE;
    let payload = match tag {
        TAG_BRANCH => StoredPayload::Branch {
            taken: u16::from_le_bytes(blob.get(payload_base..payload_base + 2)?.try_into().ok()?),
            not_taken: u16::from_le_bytes(
                blob.get(payload_base + 2..payload_base + 4)?.try_into().ok()?,
            ),
        },
        TAG_SWITCH => {
            let mut slots = [(0u32, 0u32); 4];
            for (i, slot) in slots.iter_mut().enumerate() {
                let slot_base = payload_base + i * 8;
                *slot = (
                    u32::from_le_bytes(blob.get(slot_base..slot_base + 4)?.try_into().ok()?),
                    u32::from_le_bytes(blob.get(slot_base + 4..slot_base + 8)?.try_into().ok()?),
                );
            }
            StoredPayload::Switch { slots }
        }
        TAG_CALL_GRAPH => StoredPayload::CallGraph {
            chain: u32::from_le_bytes(blob.get(payload_base..payload_base + 4)?.try_into().ok()?),
            loader_chain: u32::from_le_bytes(
                blob.get(payload_base + 4..payload_base + 8)?.try_into().ok()?,
            ),
            weight: u16::from_le_bytes(
                blob.get(payload_base + 8..payload_base + 10)?.try_into().ok()?,
            ),
            residue: u16::from_le_bytes(
                blob.get(payload_base + 10..payload_base + 12)?.try_into().ok()?,
            ),
            too_big: *blob.get(payload_base + 12)? != 0,
        },
        _ => return None,
    };
    Some(StoredEntry { pc_offset, payload })
}

/// Reconstitutes a stored node into a live entry at `pc`.
///
/// Call-graph nodes require their dominant class to resolve through the
/// shared cache and to be initialized in this run; otherwise the entry
/// comes back classless (weights only in the residue).
pub(crate) fn materialize(
    stored: &StoredEntry,
    pc: u64,
    epoch: u64,
    vm: &dyn VmRuntime,
    scc: &dyn SharedCache,
) -> ProfileEntry {
    use crate::entry::{BranchData, CallGraphData, SwitchData};
    let data = match stored.payload {
        StoredPayload::Branch { taken, not_taken } => {
            let branch = BranchData::default();
            branch.set_counts(taken, not_taken);
            EntryData::Branch(branch)
        }
        StoredPayload::Switch { slots } => {
            let switch = SwitchData::default();
            switch.restore(slots);
            EntryData::Switch(switch)
        }
        StoredPayload::CallGraph {
            chain,
            loader_chain,
            weight,
            residue,
            too_big,
        } => {
            let resolved = resolve_class(chain, loader_chain, vm, scc);
            let cg = CallGraphData::default();
            let mut slots = [(None, 0u16); crate::entry::NUM_CS_SLOTS];
            if let Some(class) = resolved {
                slots[0] = (Some(class), weight);
            }
            cg.restore(&CallGraphSnapshot {
                slots,
                residue,
                too_big_to_be_inlined: too_big,
            });
            EntryData::CallGraph(cg)
        }
    };
    let entry = ProfileEntry::new(pc, data, epoch);
    // Entries loaded from the cache never go back in.
    entry.set_cannot_persist();
    entry.set_persistent_entry_read();
    entry
}

fn resolve_class(
    chain: u32,
    loader_chain: u32,
    vm: &dyn VmRuntime,
    scc: &dyn SharedCache,
) -> Option<ClassId> {
    if chain == 0 || loader_chain == 0 {
        return None;
    }
    let class = scc.lookup_class_from_chain_and_loader(
        jitc_vm::ClassChainOffset(chain),
        jitc_vm::ClassChainOffset(loader_chain),
    )?;
    // Receivers from a previous run may not have initialized yet in this
    // one; the optimizer assumes profiled receivers are initialized.
    vm.is_class_initialized(class).then_some(class)
}
