//! Decoders for hijacked output streams.
//!
//! Without a TTY the daemon frames output as
//! `[stream, 0, 0, 0, len_be32] payload`; with a TTY the bytes arrive
//! verbatim.

use std::io;

use bollard::container::LogOutput;
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

const FRAME_HEADER_LEN: usize = 8;
const LENGTH_OFFSET: usize = 4;

const STREAM_STDIN: u8 = 0;
const STREAM_STDOUT: u8 = 1;
const STREAM_STDERR: u8 = 2;
const STREAM_SYSTEM_ERROR: u8 = 3;

/// Decodes session output into [`LogOutput`] chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCodec {
    /// Raw TTY bytes, surfaced as [`LogOutput::Console`].
    Raw,
    /// Frames carrying a stream selector and a big-endian length.
    Multiplexed,
}

impl OutputCodec {
    /// Selects the codec matching the session's TTY mode.
    #[must_use]
    pub const fn for_tty(tty: bool) -> Self {
        if tty { Self::Raw } else { Self::Multiplexed }
    }
}

impl Decoder for OutputCodec {
    type Item = LogOutput;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::Raw => Ok(decode_raw(src)),
            Self::Multiplexed => decode_frame(src),
        }
    }
}

fn decode_raw(src: &mut BytesMut) -> Option<LogOutput> {
    if src.is_empty() {
        return None;
    }
    Some(LogOutput::Console {
        message: src.split().freeze(),
    })
}

fn decode_frame(src: &mut BytesMut) -> io::Result<Option<LogOutput>> {
    loop {
        let Some(header) = src.get(..FRAME_HEADER_LEN) else {
            src.reserve(FRAME_HEADER_LEN);
            return Ok(None);
        };
        let stream = header.first().copied().unwrap_or_default();
        let mut length_bytes = header.get(LENGTH_OFFSET..).unwrap_or_default();
        let payload_len = usize::try_from(length_bytes.get_u32()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "frame length exceeds address space")
        })?;

        let frame_len = FRAME_HEADER_LEN.saturating_add(payload_len);
        if src.len() < frame_len {
            src.reserve(frame_len.saturating_sub(src.len()));
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let message = src.split_to(payload_len).freeze();
        if message.is_empty() {
            continue;
        }

        return match stream {
            STREAM_STDIN | STREAM_STDOUT => Ok(Some(LogOutput::StdOut { message })),
            STREAM_STDERR | STREAM_SYSTEM_ERROR => Ok(Some(LogOutput::StdErr { message })),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown stream selector {other} in multiplexed output"),
            )),
        };
    }
}

#[cfg(test)]
mod tests {
    use bollard::container::LogOutput;
    use bytes::{BufMut, BytesMut};
    use rstest::rstest;
    use tokio_util::codec::Decoder;

    use super::OutputCodec;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(stream);
        buf.put_bytes(0, 3);
        buf.put_u32(u32::try_from(payload.len()).expect("test payload fits in u32"));
        buf.put_slice(payload);
        buf.to_vec()
    }

    fn decode_in_chunks(input: &[u8], chunk_size: usize) -> Vec<LogOutput> {
        let mut codec = OutputCodec::Multiplexed;
        let mut buffer = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in input.chunks(chunk_size) {
            buffer.extend_from_slice(chunk);
            while let Some(item) = codec.decode(&mut buffer).expect("frames should decode") {
                decoded.push(item);
            }
        }
        assert!(buffer.is_empty(), "undecoded bytes left behind");
        decoded
    }

    fn interleaved() -> Vec<u8> {
        [
            frame(1, b"out-1 "),
            frame(2, b"err-1 "),
            frame(2, b"err-2 "),
            frame(0, b"echo "),
            frame(1, b"out-2"),
        ]
        .concat()
    }

    fn split_streams(items: &[LogOutput]) -> (Vec<u8>, Vec<u8>) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for item in items {
            match item {
                LogOutput::StdErr { message } => stderr.extend_from_slice(message),
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.extend_from_slice(message);
                }
                LogOutput::StdIn { .. } => panic!("stdin frames are reported as stdout"),
            }
        }
        (stdout, stderr)
    }

    #[rstest]
    #[case::byte_at_a_time(1)]
    #[case::header_straddling(5)]
    #[case::odd_chunks(7)]
    #[case::single_read(4096)]
    fn interleaved_frames_decode_under_any_chunking(#[case] chunk_size: usize) {
        let items = decode_in_chunks(&interleaved(), chunk_size);
        let (stdout, stderr) = split_streams(&items);

        assert_eq!(stdout, b"out-1 echo out-2");
        assert_eq!(stderr, b"err-1 err-2 ");
        assert_eq!(items.len(), 5);
    }

    #[rstest]
    fn empty_frames_are_skipped() {
        let input = [frame(1, b""), frame(2, b"late")].concat();
        let items = decode_in_chunks(&input, input.len());
        assert_eq!(split_streams(&items), (Vec::new(), b"late".to_vec()));
    }

    #[rstest]
    fn system_error_frames_are_reported_as_stderr() {
        let items = decode_in_chunks(&frame(3, b"oci runtime error"), 64);
        assert_eq!(split_streams(&items).1, b"oci runtime error");
    }

    #[rstest]
    fn unknown_stream_selector_is_invalid_data() {
        let mut codec = OutputCodec::Multiplexed;
        let mut buffer = BytesMut::from(frame(9, b"x").as_slice());
        let error = codec
            .decode(&mut buffer)
            .expect_err("selector 9 should be rejected");
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    }

    #[rstest]
    fn raw_codec_passes_bytes_through() {
        let mut codec = OutputCodec::for_tty(true);
        let mut buffer = BytesMut::from(&b"\x1b[31mred\x1b[0m"[..]);
        let item = codec.decode(&mut buffer).expect("raw decode is infallible");
        assert!(matches!(
            item,
            Some(LogOutput::Console { ref message }) if message.as_ref() == b"\x1b[31mred\x1b[0m"
        ));
        assert!(codec.decode(&mut buffer).expect("raw decode is infallible").is_none());
    }

    #[rstest]
    #[case::tty(true, OutputCodec::Raw)]
    #[case::no_tty(false, OutputCodec::Multiplexed)]
    fn codec_follows_tty_mode(#[case] tty: bool, #[case] expected: OutputCodec) {
        assert_eq!(OutputCodec::for_tty(tty), expected);
    }
}
