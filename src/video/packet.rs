use crate::av::{CodecId, Packet};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Slots per video stream.
pub const VIDEO_PACKET_MAX: usize = 256;
/// Initial slot allocation; slots grow in half size steps.
pub const VIDEO_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct Slot {
    data: BytesMut,
    pts: Option<i64>,
    dts: Option<i64>,
    codec: CodecId,
}

impl Slot {
    fn reset(&mut self) {
        self.data.clear();
        self.pts = None;
        self.dts = None;
        self.codec = CodecId::None;
    }
}

/// Ring of access unit buffers between the PES producer and the decoder.
///
/// The producer appends to the slot at the write index until it seals it;
/// `filled` counts sealed slots and is bumped only after the slot is
/// complete. A sealed slot tagged [`CodecId::None`] is a close command.
#[derive(Debug)]
pub struct PacketRing {
    slots: Vec<Mutex<Slot>>,
    write: AtomicUsize,
    read: AtomicUsize,
    filled: AtomicUsize,
}

impl Default for PacketRing {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRing {
    pub fn new() -> Self {
        Self {
            slots: (0..VIDEO_PACKET_MAX)
                .map(|_| Mutex::new(Slot::default()))
                .collect(),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            filled: AtomicUsize::new(0),
        }
    }

    /// Sealed slots waiting for the decoder.
    pub fn filled(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    pub fn write_index(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    pub fn read_index(&self) -> usize {
        self.read.load(Ordering::Acquire)
    }

    /// Bytes accumulated in the open slot.
    pub fn pending(&self) -> usize {
        self.slots[self.write_index()].lock().data.len()
    }

    /// Appends to the open slot. Timestamps are kept from the first call.
    pub fn enqueue(&self, pts: Option<i64>, dts: Option<i64>, data: &[u8]) {
        let mut slot = self.slots[self.write_index()].lock();
        if slot.data.is_empty() {
            slot.pts = pts;
            slot.dts = dts;
        }
        if slot.data.capacity() == 0 {
            slot.data.reserve(VIDEO_BUFFER_SIZE);
        }
        let needed = slot.data.len() + data.len();
        if needed >= slot.data.capacity() {
            let step = VIDEO_BUFFER_SIZE / 2;
            slot.data.reserve((data.len() + step) / step * step);
        }
        slot.data.extend_from_slice(data);
    }

    /// Closes the open slot under `codec` and opens the next one.
    ///
    /// An empty slot is only sealed as a close command. Without a free slot
    /// the open slot is dropped. Returns true when a slot was sealed.
    pub fn seal(&self, codec: CodecId) -> bool {
        let write = self.write_index();
        {
            let mut slot = self.slots[write].lock();
            if slot.data.is_empty() {
                if codec != CodecId::None {
                    return false;
                }
                log::debug!("video: possible stream change loss");
            }

            if self.filled() >= VIDEO_PACKET_MAX - 1 {
                log::error!("video: no empty slot in packet ringbuffer");
                slot.reset();
                return false;
            }
            slot.codec = codec;
        }

        let next = (write + 1) % VIDEO_PACKET_MAX;
        self.slots[next].lock().reset();
        self.write.store(next, Ordering::Release);
        self.filled.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Drops whatever the open slot collected.
    pub fn reset_current(&self) {
        self.slots[self.write_index()].lock().reset();
    }

    /// Consumer: forgets every sealed slot.
    ///
    /// The read index moves by exactly the slots taken from `filled`, so a
    /// seal landing in between stays queued.
    pub fn clear(&self) {
        let dropped = self.filled.swap(0, Ordering::AcqRel);
        let read = self.read_index();
        for i in 0..dropped {
            self.slots[(read + i) % VIDEO_PACKET_MAX].lock().reset();
        }
        self.read
            .store((read + dropped) % VIDEO_PACKET_MAX, Ordering::Release);
    }

    /// Consumer: removes the oldest sealed slot.
    pub fn pop(&self) -> Option<Packet> {
        if self.filled() == 0 {
            return None;
        }
        let read = self.read_index();
        let packet = {
            let mut slot = self.slots[read].lock();
            let packet = Packet::new(slot.data.split().freeze())
                .with_codec(slot.codec)
                .with_pts(slot.pts)
                .with_dts(slot.dts);
            slot.reset();
            packet
        };
        self.read.store((read + 1) % VIDEO_PACKET_MAX, Ordering::Release);
        self.filled.fetch_sub(1, Ordering::AcqRel);
        Some(packet)
    }

    /// Drops everything, sealed or not.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.lock().reset();
        }
        self.filled.store(0, Ordering::Release);
        self.read.store(0, Ordering::Release);
        self.write.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_seal_with_codec_is_ignored() {
        let ring = PacketRing::new();
        assert!(!ring.seal(CodecId::H264));
        assert_eq!((ring.filled(), ring.write_index()), (0, 0));

        // a close command is sealed even when empty
        assert!(ring.seal(CodecId::None));
        assert_eq!((ring.filled(), ring.write_index()), (1, 1));
    }

    #[test]
    fn sealed_slots_come_out_in_order() {
        let ring = PacketRing::new();
        ring.enqueue(Some(10), None, &[1, 2]);
        ring.enqueue(Some(99), None, &[3]);
        assert!(ring.seal(CodecId::Mpeg2Video));
        ring.enqueue(Some(20), Some(18), &[4]);
        assert!(ring.seal(CodecId::H264));

        let first = ring.pop().unwrap();
        assert_eq!(&first.data[..], &[1, 2, 3]);
        assert_eq!((first.codec, first.pts), (CodecId::Mpeg2Video, Some(10)));
        let second = ring.pop().unwrap();
        assert_eq!((second.codec, second.pts, second.dts), (CodecId::H264, Some(20), Some(18)));
        assert!(ring.pop().is_none());
    }

    #[test]
    fn full_ring_drops_open_slot() {
        let ring = PacketRing::new();
        for i in 0..VIDEO_PACKET_MAX - 1 {
            ring.enqueue(None, None, &[i as u8]);
            assert!(ring.seal(CodecId::H264));
        }
        let write = ring.write_index();
        ring.enqueue(None, None, &[0xAA]);
        assert!(!ring.seal(CodecId::H264));
        assert_eq!(ring.filled(), VIDEO_PACKET_MAX - 1);
        assert_eq!(ring.write_index(), write);
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn large_access_units_grow_the_slot() {
        let ring = PacketRing::new();
        let big = vec![7u8; VIDEO_BUFFER_SIZE + 10];
        ring.enqueue(None, None, &big);
        ring.enqueue(None, None, &big);
        assert_eq!(ring.pending(), 2 * big.len());
    }

    #[test]
    fn clear_drops_sealed_slots_only() {
        let ring = PacketRing::new();
        ring.enqueue(None, None, &[1]);
        ring.seal(CodecId::Hevc);
        ring.enqueue(None, None, &[2]);
        ring.clear();
        assert_eq!(ring.filled(), 0);
        assert_eq!(ring.read_index(), ring.write_index());
        assert_eq!(ring.pending(), 1);
    }

    #[test]
    fn clear_racing_seal_keeps_indices_consistent() {
        let ring = Arc::new(PacketRing::new());
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for i in 0..20_000u32 {
                    ring.enqueue(None, None, &i.to_be_bytes());
                    ring.seal(CodecId::H264);
                }
            })
        };
        while !producer.is_finished() {
            ring.clear();
            let (read, filled, write) = (ring.read_index(), ring.filled(), ring.write_index());
            // a seal may have moved write but not yet counted the slot
            let ahead = (write + VIDEO_PACKET_MAX - read) % VIDEO_PACKET_MAX;
            assert!(ahead >= filled, "read {} filled {} write {}", read, filled, write);
        }
        producer.join().unwrap();

        assert_eq!(
            (ring.read_index() + ring.filled()) % VIDEO_PACKET_MAX,
            ring.write_index()
        );
        while ring.pop().is_some() {}
        assert_eq!(ring.read_index(), ring.write_index());
    }
}
