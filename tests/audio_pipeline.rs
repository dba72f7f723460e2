#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use vdkplay::audio::{AudioOutput, CaptureHandle, CaptureSink};
    use vdkplay::av::{AudioDecoder, CodecId, ElementaryFrame};
    use vdkplay::config::Config;
    use vdkplay::device::{Device, AUDIO_MIN_BUFFER_FREE};
    use vdkplay::format::ts::PESHeader;
    use bytes::BytesMut;

    /// 24 ms of 48 kHz stereo
    const CHUNK_FRAMES: usize = 1152;

    struct Discard;

    impl AudioDecoder for Discard {
        fn open(&mut self, _codec: CodecId) {}
        fn close(&mut self) {}
        fn decode(&mut self, _frame: &ElementaryFrame<'_>) {}
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Stereo chunk whose samples count up from `first`.
    fn chunk(first: &mut u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHUNK_FRAMES * 4);
        for _ in 0..CHUNK_FRAMES * 2 {
            out.extend_from_slice(&(*first as i16).to_ne_bytes());
            *first = first.wrapping_add(1);
        }
        out
    }

    fn device() -> (Device, CaptureHandle) {
        let config = Config::default();
        let (sink, handle) = CaptureSink::new(8192);
        let audio = AudioOutput::new(&config, Box::new(sink), None).unwrap();
        let device = Device::new(config, Arc::new(audio), Box::new(Discard));
        (device, handle)
    }

    #[test]
    fn test_full_ring_refuses_then_resumes_in_order() {
        let (mut device, capture) = device();
        capture.set_gate(false);
        let audio = device.audio().clone();
        audio.setup(48000, 2, false).unwrap();

        let mut counter = 0u16;
        let mut expected = Vec::new();
        loop {
            let data = chunk(&mut counter);
            let written = audio.enqueue(&data);
            expected.extend_from_slice(&data[..written]);
            if written < data.len() {
                break;
            }
        }
        // short write, then nothing fits
        assert_eq!(audio.free_bytes(), 0);
        assert_eq!(audio.enqueue(&chunk(&mut counter.clone())), 0);
        assert!(audio.free_bytes() < AUDIO_MIN_BUFFER_FREE);

        let mut pes = BytesMut::new();
        PESHeader::new(0xC0).with_pts(0).write_to(&mut pes).unwrap();
        pes.extend_from_slice(&[0u8; 64]);
        assert_eq!(device.play_audio(&pes, 0xC0), 0);
        assert!(!device.poll(0));
        assert!(audio.is_running());

        capture.set_gate(true);
        assert!(wait_for(|| capture.captured_len() == expected.len()));
        assert!(wait_for(|| !audio.is_running()));
        assert_eq!(audio.used_bytes(), 0);
        assert!(device.poll(0));

        // the ring continues where the producer left off; hold the sink
        // so the worker can't run dry below the start threshold
        capture.set_gate(false);
        let mut resumed = Vec::new();
        while resumed.len() < 300 * 1024 {
            let data = chunk(&mut counter);
            assert_eq!(audio.enqueue(&data), data.len());
            resumed.extend_from_slice(&data);
        }
        assert!(audio.used_bytes() > 4 * audio.start_threshold());
        assert!(wait_for(|| audio.is_running()));
        capture.set_gate(true);
        expected.extend_from_slice(&resumed);
        assert!(wait_for(|| capture.captured_len() == expected.len()));
        assert!(capture.captured() == expected);
    }

    #[test]
    fn test_flush_drops_buffered_audio() {
        let (device, capture) = device();
        capture.set_gate(false);
        let audio = device.audio().clone();
        audio.setup(48000, 2, false).unwrap();
        let mut counter = 0;
        for _ in 0..100 {
            audio.enqueue(&chunk(&mut counter));
        }
        audio.flush();
        assert!(wait_for(|| audio.ring().filled() == 0));
        capture.set_gate(true);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(audio.used_bytes(), 0);
        assert!(capture.flushes() >= 1);
        assert_eq!(capture.captured_len(), 0);
    }

    #[test]
    fn test_format_change_reconfigures_sink() {
        let (device, capture) = device();
        let audio = device.audio().clone();
        audio.setup(48000, 2, false).unwrap();
        let mut counter = 0;
        let mut total = 0;
        for _ in 0..70 {
            total += audio.enqueue(&chunk(&mut counter));
        }
        assert_eq!(total, 70 * CHUNK_FRAMES * 4);
        assert!(wait_for(|| capture.captured_len() == total));

        audio.setup(44100, 6, false).unwrap();
        assert!(wait_for(|| capture.formats().len() == 2));
        assert_eq!(capture.formats(), vec![(48000, 2, false), (44100, 6, false)]);
    }
}
