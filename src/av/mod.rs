use std::fmt;

/// Codec of an elementary stream, detected from the bitstream itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodecId {
    /// No codec; on a sealed video slot this is the close command.
    #[default]
    None,
    MpegAudio,
    Ac3,
    Eac3,
    AacAdts,
    AacLatm,
    PcmDvd,
    Mpeg2Video,
    H264,
    Hevc,
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecId::None => "none",
            CodecId::MpegAudio => "mp2/mp3",
            CodecId::Ac3 => "ac-3",
            CodecId::Eac3 => "e-ac-3",
            CodecId::AacAdts => "aac",
            CodecId::AacLatm => "aac-latm",
            CodecId::PcmDvd => "pcm-dvd",
            CodecId::Mpeg2Video => "mpeg2",
            CodecId::H264 => "h264",
            CodecId::Hevc => "hevc",
        };
        f.write_str(name)
    }
}

/// Audio decoder driven by the demuxers.
///
/// `open`/`close` are called once per codec transition, `decode` once per
/// emitted frame. The decoder feeds its output back through
/// [`crate::audio::AudioOutput`].
pub trait AudioDecoder: Send {
    fn open(&mut self, codec: CodecId);
    fn close(&mut self);
    fn decode(&mut self, frame: &ElementaryFrame<'_>);
}

/// Video decoder fed with sealed packet slots.
pub trait VideoDecoder: Send {
    /// Called before the first packet of a new codec.
    fn open(&mut self, codec: CodecId);
    fn close(&mut self);
    /// Drop any frames queued inside the decoder.
    fn flush_buffers(&mut self);
    fn decode(&mut self, packet: &Packet);
}

/// Video side of the A/V clock.
pub trait HostClock: Send + Sync {
    /// PTS of the first video frame of the current stream, if known.
    fn video_start_pts(&self) -> Option<i64>;
    /// Forget the video start PTS once audio starts.
    fn clear_video_start(&self);
    /// Hand the audio start PTS to the video clock. Returns false while the
    /// video side is busy and the call should be retried.
    fn set_audio_start(&self, pts: i64) -> bool;
}

/// Tracks the codec currently opened on an [`AudioDecoder`].
#[derive(Debug, Default)]
pub struct CodecSwitch {
    current: CodecId,
}

impl CodecSwitch {
    pub fn current(&self) -> CodecId {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = CodecId::None;
    }

    /// Emits `frame`, closing and reopening the decoder when the codec changed.
    pub fn emit(&mut self, decoder: &mut dyn AudioDecoder, frame: &ElementaryFrame<'_>) {
        if frame.codec != self.current {
            log::debug!("audio: codec {} -> {}", self.current, frame.codec);
            decoder.close();
            decoder.open(frame.codec);
            self.current = frame.codec;
        }
        decoder.decode(frame);
    }

    /// Closes the decoder for a codec played without it.
    pub fn bypass(&mut self, decoder: &mut dyn AudioDecoder, codec: CodecId) {
        if self.current != codec {
            log::debug!("audio: codec {} -> {} (bypass)", self.current, codec);
            decoder.close();
            self.current = codec;
        }
    }
}

mod packet;
pub use packet::*;
