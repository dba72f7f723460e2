use super::CodecId;
use bytes::Bytes;

/// One compressed audio frame carved out of a parser scratch buffer.
///
/// Only valid for the duration of the decode call.
#[derive(Debug, Clone, Copy)]
pub struct ElementaryFrame<'a> {
    pub codec: CodecId,
    pub data: &'a [u8],
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

impl<'a> ElementaryFrame<'a> {
    pub fn new(codec: CodecId, data: &'a [u8]) -> Self {
        Self {
            codec,
            data,
            pts: None,
            dts: None,
        }
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.dts = dts;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A sealed video access unit.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub codec: CodecId,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            codec: CodecId::None,
            pts: None,
            dts: None,
        }
    }

    pub fn with_codec(mut self, codec: CodecId) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.dts = dts;
        self
    }
}
