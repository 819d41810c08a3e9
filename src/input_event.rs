//! Fixed ring buffer for input events (keyboard, mouse), shared between an
//! interrupt-side producer and a polling consumer. The producer never
//! blocks: on overflow the oldest event is overwritten.

use spin::Mutex;

/// Ring capacity. Power of two; indices wrap by masking.
pub const EVENT_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

struct EventRing {
    events: [InputEvent; EVENT_BUFFER_SIZE],
    head: usize,
    tail: usize,
}

pub struct InputEventBuffer {
    ring: Mutex<EventRing>,
}

impl InputEventBuffer {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(EventRing {
                events: [InputEvent::default(); EVENT_BUFFER_SIZE],
                head: 0,
                tail: 0,
            }),
        }
    }

    /// Store an event, overwriting the oldest one if the ring is full.
    pub fn put(&self, event: InputEvent) {
        let mut ring = self.ring.lock();
        let slot = ring.head & (EVENT_BUFFER_SIZE - 1);
        ring.events[slot] = event;
        ring.head = ring.head.wrapping_add(1);
        if ring.head.wrapping_sub(ring.tail) > EVENT_BUFFER_SIZE {
            let tail = ring.head.wrapping_sub(EVENT_BUFFER_SIZE);
            ring.tail = tail;
        }
    }

    /// Pop the oldest event, or `None` if the ring is empty.
    pub fn get(&self) -> Option<InputEvent> {
        let mut ring = self.ring.lock();
        if ring.head == ring.tail {
            return None;
        }
        let event = ring.events[ring.tail & (EVENT_BUFFER_SIZE - 1)];
        ring.tail = ring.tail.wrapping_add(1);
        Some(event)
    }
}

impl Default for InputEventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: u16) -> InputEvent {
        InputEvent {
            kind: 1,
            code,
            value: 1,
        }
    }

    #[test]
    fn test_fifo_and_empty() {
        let buf = InputEventBuffer::new();
        assert_eq!(buf.get(), None);
        buf.put(key(10));
        buf.put(key(11));
        assert_eq!(buf.get(), Some(key(10)));
        assert_eq!(buf.get(), Some(key(11)));
        assert_eq!(buf.get(), None);
    }

    #[test]
    fn test_overflow_overwrites_oldest() {
        let buf = InputEventBuffer::new();
        for i in 0..(EVENT_BUFFER_SIZE as u16 + 8) {
            buf.put(key(i));
        }
        // The first 8 events were overwritten.
        assert_eq!(buf.get(), Some(key(8)));
        let mut last = None;
        while let Some(ev) = buf.get() {
            last = Some(ev);
        }
        assert_eq!(last, Some(key(EVENT_BUFFER_SIZE as u16 + 7)));
    }
}
