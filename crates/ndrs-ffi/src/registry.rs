//! Process-wide handle table
//!
//! Handles are opaque 64-bit tokens: generation counter in the upper 32
//! bits, slot index in the lower 32. A handle is valid only while its
//! slot is occupied and the generations match, so a released handle is
//! detected as stale even after the slot is reused. Generations start at
//! 1 and skip 0 on wrap - a valid handle is never numerically 0.
//!
//! The table serializes all mutation behind one mutex; it is shared
//! between caller threads and the job executor's workers. Per-slot
//! refcounts back `retain`/`release`; storage lifetime is governed
//! separately by the `Arc<Storage>` inside each array.

use std::sync::{Arc, Mutex};

use ndrs_core::{NdError, Result};
use ndrs_cpu::NdArray;
use once_cell::sync::Lazy;

struct Entry {
    array: Arc<NdArray>,
    refcount: u32,
}

struct Slot {
    generation: u32,
    occupant: Option<Entry>,
}

struct HandleTable {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

static TABLE: Lazy<Mutex<HandleTable>> = Lazy::new(|| {
    Mutex::new(HandleTable {
        slots: Vec::new(),
        free_list: Vec::new(),
    })
});

fn encode(generation: u32, index: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(index)
}

fn decode(handle: u64) -> (u32, u32) {
    ((handle >> 32) as u32, handle as u32)
}

fn bump_generation(generation: u32) -> u32 {
    let next = generation.wrapping_add(1);
    if next == 0 {
        1
    } else {
        next
    }
}

impl HandleTable {
    fn slot_mut(&mut self, handle: u64) -> Result<&mut Slot> {
        let (generation, index) = decode(handle);
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(NdError::StaleHandle)?;
        if slot.generation != generation || slot.occupant.is_none() {
            return Err(NdError::StaleHandle);
        }
        Ok(slot)
    }
}

/// Register an array and hand back a fresh handle with refcount 1.
pub fn insert(array: NdArray) -> Result<u64> {
    let entry = Entry {
        array: Arc::new(array),
        refcount: 1,
    };
    let mut table = TABLE.lock().unwrap();
    if let Some(index) = table.free_list.pop() {
        let slot = &mut table.slots[index as usize];
        debug_assert!(slot.occupant.is_none());
        slot.occupant = Some(entry);
        return Ok(encode(slot.generation, index));
    }
    let index = table.slots.len();
    if index > u32::MAX as usize {
        return Err(NdError::Oom("handle table exhausted".into()));
    }
    table.slots.push(Slot {
        generation: 1,
        occupant: Some(entry),
    });
    Ok(encode(1, index as u32))
}

/// Look up a handle, returning a strong reference to its array.
pub fn resolve(handle: u64) -> Result<Arc<NdArray>> {
    let mut table = TABLE.lock().unwrap();
    let slot = table.slot_mut(handle)?;
    Ok(Arc::clone(&slot.occupant.as_ref().unwrap().array))
}

/// Bump a handle's refcount.
pub fn retain(handle: u64) -> Result<()> {
    let mut table = TABLE.lock().unwrap();
    let slot = table.slot_mut(handle)?;
    let entry = slot.occupant.as_mut().unwrap();
    entry.refcount = entry.refcount.saturating_add(1);
    Ok(())
}

/// Drop one reference; the last release retires the slot (generation
/// bump, array dropped, slot recycled).
pub fn release(handle: u64) -> Result<()> {
    let mut table = TABLE.lock().unwrap();
    let (_, index) = decode(handle);
    let retired = {
        let slot = table.slot_mut(handle)?;
        let entry = slot.occupant.as_mut().unwrap();
        entry.refcount -= 1;
        if entry.refcount == 0 {
            slot.occupant = None;
            slot.generation = bump_generation(slot.generation);
            true
        } else {
            false
        }
    };
    if retired {
        table.free_list.push(index);
    }
    Ok(())
}
