//! Pending-packet cache.
//!
//! Encoded packets produced before the container header can be written are
//! parked here. The cache is an arena: each packet is moved into a slot and
//! addressed by an opaque [`PacketHandle`]; releasing a handle (or draining
//! the cache) moves the packet back out. Arrival order is preserved so the
//! replay after the header matches the order packets were produced in.

use std::collections::VecDeque;

/// Opaque reference to a packet parked in a [`PacketCache`].
///
/// A handle is invalidated when its packet is released; a stale handle
/// never aliases a later packet in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketHandle {
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<P> {
    generation: u64,
    packet: Option<P>,
}

/// Arena of packets waiting for the container header.
#[derive(Debug)]
pub struct PacketCache<P> {
    slots: Vec<Slot<P>>,
    free: Vec<usize>,
    order: VecDeque<PacketHandle>,
    len: usize,
    generation: u64,
}

impl<P> Default for PacketCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PacketCache<P> {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: VecDeque::new(),
            len: 0,
            generation: 0,
        }
    }

    /// Number of packets currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no packet is held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move a packet into the cache.
    pub fn insert(&mut self, packet: P) -> PacketHandle {
        self.generation += 1;
        let generation = self.generation;

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Slot {
                    generation,
                    packet: Some(packet),
                };
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation,
                    packet: Some(packet),
                });
                self.slots.len() - 1
            }
        };

        let handle = PacketHandle { slot, generation };
        self.order.push_back(handle);
        self.len += 1;
        handle
    }

    /// Borrow a held packet.
    pub fn get(&self, handle: PacketHandle) -> Option<&P> {
        self.slots
            .get(handle.slot)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.packet.as_ref())
    }

    /// Take a packet back out, invalidating its handle.
    pub fn release(&mut self, handle: PacketHandle) -> Option<P> {
        let slot = self.slots.get_mut(handle.slot)?;
        if slot.generation != handle.generation {
            return None;
        }

        let packet = slot.packet.take()?;
        self.free.push(handle.slot);
        self.len -= 1;
        Some(packet)
    }

    /// Release every held packet, oldest first.
    pub fn drain_in_order(&mut self) -> Vec<P> {
        let mut packets = Vec::with_capacity(self.len);
        while let Some(handle) = self.order.pop_front() {
            if let Some(packet) = self.release(handle) {
                packets.push(packet);
            }
        }
        packets
    }

    /// Drop every held packet.
    pub fn clear(&mut self) {
        self.order.clear();
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }
}
