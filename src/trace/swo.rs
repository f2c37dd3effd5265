//! Instrumentation trace (ITM) decoding of the SWO byte stream.
//!
//! Every packet starts with a header byte: bits `[7:3]` hold the stimulus
//! channel, bits `[2:0]` the size class (`1`, `2` or `3` for 1, 2 or 4 data
//! bytes). Any other size class is a packet without data; the next byte is a
//! header again. Data bytes of enabled channels are collected and forwarded to
//! the display sink when the buffer fills up, or once the stream has been idle
//! for [`IDLE_FLUSH`].

use std::io::Read;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::target::DisplaySink;
use crate::transport::ByteStream;

/// Size of the decoded output buffer, and of each read from the source.
pub const SWO_BUFFER_SIZE: usize = 512;

/// Decoded output is held back for at most this long once the source is idle.
pub const IDLE_FLUSH: Duration = Duration::from_millis(50);

/// Mask with one bit per listed channel. An empty list enables every channel;
/// channels above 31 are ignored.
///
/// ```
/// use gdbcom::trace::channel_mask;
///
/// assert_eq!(channel_mask(&[]), 0xffff_ffff);
/// assert_eq!(channel_mask(&[0, 3, 40]), 0b1001);
/// ```
pub fn channel_mask(channels: &[u8]) -> u32 {
    if channels.is_empty() {
        return u32::MAX;
    }
    channels.iter().fold(0, |mask, &channel| {
        if channel > 31 {
            warn!("ignoring swo channel {}", channel);
            mask
        } else {
            mask | 1 << channel
        }
    })
}

// =============================================================================
// Decoder
// =============================================================================

/// Byte-at-a-time ITM decoder.
#[derive(Debug)]
pub struct SwoDecoder {
    mask: u32,
    /// Data bytes still expected for the current packet; zero while waiting
    /// for a header.
    remaining: u8,
    print: bool,
    out: Vec<u8>,
    last_flush: Option<Instant>,
}
impl SwoDecoder {
    pub fn new(mask: u32) -> Self {
        SwoDecoder {
            mask,
            remaining: 0,
            print: false,
            out: Vec::with_capacity(SWO_BUFFER_SIZE),
            last_flush: None,
        }
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn set_mask(&mut self, mask: u32) {
        self.mask = mask;
    }

    /// Number of decoded bytes not yet handed to a sink.
    pub fn pending(&self) -> usize {
        self.out.len()
    }

    /// Decode `bytes`, forwarding full buffers to `sink`.
    pub fn decode<D>(&mut self, bytes: &[u8], now: Instant, sink: &mut D)
    where
        D: DisplaySink + ?Sized,
    {
        for &byte in bytes {
            self.push(byte, now, sink);
        }
    }

    /// The source had nothing to read. Forward pending output if it has been
    /// waiting for longer than [`IDLE_FLUSH`].
    pub fn idle<D>(&mut self, now: Instant, sink: &mut D)
    where
        D: DisplaySink + ?Sized,
    {
        if self.out.is_empty() {
            return;
        }
        let since = *self.last_flush.get_or_insert(now);
        if now.saturating_duration_since(since) > IDLE_FLUSH {
            self.flush(now, sink);
        }
    }

    /// Drop the packet being decoded and any pending output, and wait for a
    /// header.
    pub fn reset(&mut self) {
        self.remaining = 0;
        self.print = false;
        self.out.clear();
    }

    fn push<D>(&mut self, byte: u8, now: Instant, sink: &mut D)
    where
        D: DisplaySink + ?Sized,
    {
        if self.remaining == 0 {
            let channel = byte >> 3;
            self.remaining = match byte & 0x7 {
                1 => 1,
                2 => 2,
                3 => 4,
                _ => 0,
            };
            self.print = self.remaining != 0 && self.mask & (1 << channel) != 0;
            trace!(
                "swo header {:#04x}: channel {}, {} bytes{}",
                byte,
                channel,
                self.remaining,
                if self.print { "" } else { " (muted)" }
            );
            return;
        }

        if self.print {
            self.out.push(byte);
            if self.out.len() == SWO_BUFFER_SIZE {
                self.flush(now, sink);
            }
        }
        self.remaining -= 1;
    }

    fn flush<D>(&mut self, now: Instant, sink: &mut D)
    where
        D: DisplaySink + ?Sized,
    {
        sink.display(&self.out);
        self.out.clear();
        self.last_flush = Some(now);
    }
}

// =============================================================================
// Source
// =============================================================================

/// SWO decoding from a secondary byte stream.
pub struct TraceSwo {
    source: Option<Box<dyn ByteStream>>,
    decoder: SwoDecoder,
}
impl Default for TraceSwo {
    fn default() -> Self {
        TraceSwo {
            source: None,
            decoder: SwoDecoder::new(0),
        }
    }
}
impl TraceSwo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `source`, showing `channels` (all of them when empty).
    pub fn attach(&mut self, source: Box<dyn ByteStream>, channels: &[u8]) {
        self.decoder.reset();
        self.decoder.set_mask(channel_mask(channels));
        self.source = Some(source);
        info!("swo attached, channel mask {:#010x}", self.decoder.mask());
    }

    /// Stop decoding and clear the channel mask.
    pub fn detach(&mut self) {
        if self.source.take().is_some() {
            info!("swo detached");
        }
        self.decoder.reset();
        self.decoder.set_mask(0);
    }

    /// Show only `channels` from now on. An empty list mutes every channel.
    pub fn set_channels(&mut self, channels: &[u8]) {
        let mask = if channels.is_empty() {
            0
        } else {
            channel_mask(channels)
        };
        self.set_mask(mask);
    }

    pub fn set_mask(&mut self, mask: u32) {
        debug!("swo channel mask {:#010x}", mask);
        self.decoder.set_mask(mask);
    }

    pub fn mask(&self) -> u32 {
        self.decoder.mask()
    }

    /// `true` when a source is attached and at least one channel is shown.
    pub fn is_enabled(&self) -> bool {
        self.source.is_some() && self.decoder.mask() != 0
    }

    /// Read what the source has available and decode it. A failing source is
    /// detached and reported on `sink`.
    pub fn poll<D>(&mut self, now: Instant, sink: &mut D)
    where
        D: DisplaySink + ?Sized,
    {
        if !self.is_enabled() {
            return;
        }
        let mut buf = [0u8; SWO_BUFFER_SIZE];
        let read = match self.source.as_mut() {
            Some(source) => read_available(&mut **source, &mut buf),
            None => return,
        };
        match read {
            Ok(0) => self.decoder.idle(now, sink),
            Ok(n) => self.decoder.decode(&buf[..n], now, sink),
            Err(e) => {
                warn!("swo read failed: {}", e);
                self.detach();
                sink.display(format!("\r\ntraceswo: {}\r\n", e).as_bytes());
            }
        }
    }
}
impl std::fmt::Debug for TraceSwo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSwo")
            .field("attached", &self.source.is_some())
            .field("decoder", &self.decoder)
            .finish()
    }
}

fn read_available(source: &mut dyn ByteStream, buf: &mut [u8]) -> std::io::Result<usize> {
    let available = source.bytes_to_read()?;
    if available == 0 {
        return Ok(0);
    }
    let len = available.min(buf.len());
    match source.read(&mut buf[..len]) {
        Err(ref e) if crate::transport::is_transient(e) => Ok(0),
        other => other,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockStream;

    fn decode(mask: u32, bytes: &[u8]) -> (Vec<u8>, SwoDecoder) {
        let mut shown = Vec::new();
        let mut decoder = SwoDecoder::new(mask);
        decoder.decode(bytes, Instant::now(), &mut |text: &[u8]| {
            shown.extend_from_slice(text)
        });
        (shown, decoder)
    }

    #[test]
    fn one_byte_packet_on_enabled_channel() {
        let (shown, decoder) = decode(1 << 1, &[0x09, b'A']);
        assert!(shown.is_empty());
        assert_eq!(decoder.out, b"A");
    }

    #[test]
    fn one_byte_packet_on_muted_channel() {
        let (_, decoder) = decode(1 << 2, &[0x09, b'A']);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn size_classes() {
        // channel 0: 2 bytes, 4 bytes, then 1 byte
        let (_, decoder) = decode(1, &[0x02, b'a', b'b', 0x03, b'c', b'd', b'e', b'f', 0x01, b'g']);
        assert_eq!(decoder.out, b"abcdefg");
    }

    #[test]
    fn invalid_size_class_is_an_empty_packet() {
        // 0x0c is channel 1, size class 4: no data, next byte is a header.
        let (_, decoder) = decode(u32::MAX, &[0x0c, 0x09, b'x']);
        assert_eq!(decoder.out, b"x");
    }

    #[test]
    fn channel_31() {
        let (_, decoder) = decode(1 << 31, &[0xf9, b'z', 0x01, b'n']);
        assert_eq!(decoder.out, b"z");
    }

    #[test]
    fn full_buffer_is_flushed_immediately() {
        let mut input = Vec::new();
        for _ in 0..SWO_BUFFER_SIZE + 3 {
            input.extend_from_slice(&[0x01, b'.']);
        }
        let (shown, decoder) = decode(1, &input);
        assert_eq!(shown.len(), SWO_BUFFER_SIZE);
        assert_eq!(decoder.pending(), 3);
    }

    #[test]
    fn idle_output_is_flushed_after_timeout() {
        let start = Instant::now();
        let mut shown = Vec::new();
        let mut sink = |text: &[u8]| shown.extend_from_slice(text);
        let mut decoder = SwoDecoder::new(1);
        decoder.decode(&[0x01, b'h', 0x01, b'i'], start, &mut sink);

        decoder.idle(start, &mut sink);
        decoder.idle(start + IDLE_FLUSH, &mut sink);
        assert_eq!(decoder.pending(), 2);

        decoder.idle(start + IDLE_FLUSH + Duration::from_millis(1), &mut sink);
        assert_eq!(decoder.pending(), 0);
        drop(sink);
        assert_eq!(shown, b"hi");
    }

    #[test]
    fn masks() {
        assert_eq!(channel_mask(&[]), u32::MAX);
        assert_eq!(channel_mask(&[1, 2, 3]), 0b1110);
        assert_eq!(channel_mask(&[31, 32, 255]), 1 << 31);
    }

    #[test]
    fn attach_without_channels_shows_everything() {
        let mut swo = TraceSwo::new();
        assert!(!swo.is_enabled());
        swo.attach(Box::new(MockStream::new()), &[]);
        assert_eq!(swo.mask(), u32::MAX);
        assert!(swo.is_enabled());

        swo.set_channels(&[]);
        assert!(!swo.is_enabled());
        swo.set_channels(&[5]);
        assert_eq!(swo.mask(), 1 << 5);

        swo.detach();
        assert_eq!(swo.mask(), 0);
        assert!(!swo.is_enabled());
    }

    #[test]
    fn attach_with_out_of_range_channels_only() {
        let mut swo = TraceSwo::new();
        swo.attach(Box::new(MockStream::new()), &[32, 99]);
        assert!(!swo.is_enabled());
    }

    #[test]
    fn poll_decodes_the_source() {
        let source = MockStream::new();
        let mut swo = TraceSwo::new();
        swo.attach(Box::new(source.clone()), &[1]);
        source.feed(&[0x09, b'A', 0x11, b'B']);

        let mut shown = Vec::new();
        let start = Instant::now();
        swo.poll(start, &mut |text: &[u8]| shown.extend_from_slice(text));
        assert!(shown.is_empty());
        swo.poll(start, &mut |text: &[u8]| shown.extend_from_slice(text));
        swo.poll(start + Duration::from_millis(60), &mut |text: &[u8]| {
            shown.extend_from_slice(text)
        });
        assert_eq!(shown, b"A");
    }

    #[test]
    fn failing_source_is_detached_and_reported() {
        let source = MockStream::new();
        let mut swo = TraceSwo::new();
        swo.attach(Box::new(source.clone()), &[]);
        source.break_link();

        let mut shown = Vec::new();
        swo.poll(Instant::now(), &mut |text: &[u8]| shown.extend_from_slice(text));
        assert!(!swo.is_enabled());
        assert!(String::from_utf8_lossy(&shown).contains("traceswo:"));
    }
}
