use super::parser::TsDemuxer;
use super::types::TS_PACKET_SIZE;
use crate::av::AudioDecoder;
use crate::error::Result;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Pulls transport packets from an async byte source into a [`TsDemuxer`].
pub struct TsReader<R> {
    reader: R,
    demuxer: TsDemuxer,
}

impl<R: AsyncRead + Unpin> TsReader<R> {
    pub fn new(reader: R, demuxer: TsDemuxer) -> Self {
        Self { reader, demuxer }
    }

    pub fn demuxer(&self) -> &TsDemuxer {
        &self.demuxer
    }

    /// Reads one complete TS packet; false at a clean end of stream.
    async fn read_packet_data(&mut self, packet: &mut [u8; TS_PACKET_SIZE]) -> Result<bool> {
        match self.reader.read_exact(packet).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Feeds packets until the source ends; returns the packets read.
    pub async fn run(&mut self, decoder: &mut dyn AudioDecoder) -> Result<u64> {
        let mut packet = [0u8; TS_PACKET_SIZE];
        let mut count = 0;
        while self.read_packet_data(&mut packet).await? {
            self.demuxer.demux(&packet, decoder);
            count += 1;
        }
        log::debug!("tsreader: end of stream after {} packets", count);
        Ok(count)
    }

    pub fn into_demuxer(self) -> TsDemuxer {
        self.demuxer
    }
}

/// Runs `demuxer` over `reader` until EOF and hands the demuxer back.
pub async fn demux_reader<R: AsyncRead + Unpin>(
    reader: R,
    demuxer: TsDemuxer,
    decoder: &mut dyn AudioDecoder,
) -> Result<TsDemuxer> {
    let mut reader = TsReader::new(reader, demuxer);
    reader.run(decoder).await?;
    Ok(reader.into_demuxer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::CodecId;
    use crate::codec::ac3::tests::ac3_frame;
    use crate::format::ts::demuxer::tests::{Event, RecordingDecoder};
    use crate::format::ts::types::{TS_HEADER_SIZE, TS_SYNC_BYTE};

    #[tokio::test]
    async fn test_reads_until_eof() {
        let mut payload = vec![0x00, 0x00, 0x01, 0xBD, 0x00, 0x00, 0x80, 0x00, 0x00];
        for _ in 0..4 {
            payload.extend(ac3_frame(0, 4));
        }
        let mut stream = Vec::new();
        for (i, chunk) in payload.chunks(TS_PACKET_SIZE - TS_HEADER_SIZE).enumerate() {
            let start = if i == 0 { 0x40 } else { 0x00 };
            stream.extend([TS_SYNC_BYTE, start, 0x44, 0x10]);
            stream.extend(chunk);
            stream.resize(stream.len() + TS_PACKET_SIZE - TS_HEADER_SIZE - chunk.len(), 0);
        }
        // trailing garbage shorter than a packet
        stream.extend([TS_SYNC_BYTE, 0x00]);

        let mut reader = TsReader::new(&stream[..], TsDemuxer::new());
        let mut decoder = RecordingDecoder::default();
        let count = reader.run(&mut decoder).await.unwrap();

        assert_eq!(count, (stream.len() / TS_PACKET_SIZE) as u64);
        let decodes = decoder
            .events
            .iter()
            .filter(|e| matches!(e, Event::Decode(CodecId::Ac3, 192, None)))
            .count();
        assert_eq!(decodes, 3);
    }
}
