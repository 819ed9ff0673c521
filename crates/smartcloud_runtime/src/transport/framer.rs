//! Stream framing for byte-oriented links
//!
//! Serial reads deliver arbitrary chunks. The assembler buffers them and cuts
//! out complete frames by locating the `"SMARTCLOUD" AA AA` marker, which sits
//! four bytes (the IP field) after the start of every frame.

use smartcloud_protocol::packet::{BASE_LENGTH, HEADER, SEPARATOR, frame_len_for};

const IP_LEN: usize = 4;
const MARKER_LEN: usize = 12;
/// Bytes up to and including the length field
const PREFIX_LEN: usize = IP_LEN + MARKER_LEN + 1;
/// Enough to hold a partial marker and its IP prefix across chunk boundaries
const TAIL_KEEP: usize = IP_LEN + MARKER_LEN - 1;

pub const DEFAULT_BUFFER_LIMIT: usize = 1024;

#[derive(Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    limit: usize,
    discarded: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LIMIT)
    }
}

impl FrameAssembler {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit),
            limit,
            discarded: 0,
        }
    }

    /// Append received bytes; the oldest bytes go once the limit is hit
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.drop_front(excess);
        }
    }

    /// Next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(pos) = find_marker(&self.buf) else {
                let keep_from = self.buf.len().saturating_sub(TAIL_KEEP);
                self.drop_front(keep_from);
                return None;
            };

            if pos < IP_LEN {
                // Marker with no room for the IP field; skip past it
                self.drop_front(pos + 1);
                continue;
            }

            self.drop_front(pos - IP_LEN);

            if self.buf.len() < PREFIX_LEN {
                return None;
            }

            let length = self.buf[PREFIX_LEN - 1];
            if (length as usize) < BASE_LENGTH {
                self.drop_front(IP_LEN + 1);
                continue;
            }

            let total = frame_len_for(length);
            if self.buf.len() < total {
                return None;
            }

            return Some(self.buf.drain(..total).collect());
        }
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes thrown away as garbage or overflow so far
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.discarded += self.buf.len();
        self.buf.clear();
    }

    fn drop_front(&mut self, n: usize) {
        if n > 0 {
            self.buf.drain(..n);
            self.discarded += n;
        }
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(MARKER_LEN)
        .position(|w| &w[..10] == HEADER && w[10..] == SEPARATOR)
}
