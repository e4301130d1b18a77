//! Packet identifier allocation.
//!
//! SUBSCRIBE, UNSUBSCRIBE and QoS 1 PUBLISH carry a non-zero 16-bit id that
//! must not be reused while its acknowledgment is outstanding, otherwise
//! the event loop could hand an ack to the wrong caller.

const WORDS: usize = (u16::MAX as usize + 1) / 64;

/// Hands out unused, non-zero packet ids in rotating order.
#[derive(Debug, Clone)]
pub struct PacketIdAllocator {
    next_id: u16,
    /// One bit per id; id 0 is never set.
    in_use: Box<[u64; WORDS]>,
    count: usize,
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            in_use: Box::new([0; WORDS]),
            count: 0,
        }
    }

    /// Allocate the next free id, or `None` if all 65535 are in flight.
    pub fn allocate(&mut self) -> Option<u16> {
        if self.count == u16::MAX as usize {
            return None;
        }
        while self.is_in_use(self.next_id) {
            self.advance();
        }
        let id = self.next_id;
        self.set(id, true);
        self.count += 1;
        self.advance();
        Some(id)
    }

    /// Return an id once its exchange has finished or failed.
    pub fn release(&mut self, id: u16) {
        if id != 0 && self.is_in_use(id) {
            self.set(id, false);
            self.count -= 1;
        }
    }

    pub fn is_in_use(&self, id: u16) -> bool {
        let (word, bit) = Self::slot(id);
        self.in_use[word] & bit != 0
    }

    pub fn in_use_count(&self) -> usize {
        self.count
    }

    /// Forget every allocation and restart at 1.
    pub fn clear(&mut self) {
        self.in_use.fill(0);
        self.count = 0;
        self.next_id = 1;
    }

    fn slot(id: u16) -> (usize, u64) {
        (id as usize / 64, 1u64 << (id % 64))
    }

    fn set(&mut self, id: u16, used: bool) {
        let (word, bit) = Self::slot(id);
        if used {
            self.in_use[word] |= bit;
        } else {
            self.in_use[word] &= !bit;
        }
    }

    /// Step to the following id, skipping 0.
    fn advance(&mut self) {
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
    }
}
