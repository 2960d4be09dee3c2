//! H.264 Annex B bitstream parsing
//!
//! `screenrecord` writes a bare elementary stream: NAL units separated by
//! `00 00 01` / `00 00 00 01` start codes with no container around them.
//! The parser splits incoming bytes into NAL units and groups those into
//! access units, one per decoded picture. Data may arrive in arbitrary
//! pieces; an incomplete trailing NAL unit is kept until its end shows up.

use crate::types::Packet;

/// Give up on data that never contains a start code past this size
const MAX_PENDING: usize = 16 * 1024 * 1024;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit types (ITU-T H.264 table 7-1) the parser cares about
pub mod nal {
    pub const SLICE: u8 = 1;
    pub const IDR: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}

/// Incremental Annex B splitter
#[derive(Debug, Default)]
pub struct AnnexBParser {
    /// Unconsumed input, starts at a start code once synchronized
    pending: Vec<u8>,
    /// Offset in `pending` where the next start code search resumes
    scan_from: usize,
    /// Access unit being assembled
    unit: Vec<u8>,
    unit_has_vcl: bool,
    unit_is_idr: bool,
    next_pts: i64,
    dropped_bytes: u64,
}

impl AnnexBParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every access unit completed by them
    pub fn parse(&mut self, data: &[u8]) -> Vec<Packet> {
        self.pending.extend_from_slice(data);
        let mut packets = Vec::new();

        // Resynchronize: drop anything before the first start code
        let (first, first_len) = match find_start_code(&self.pending, 0) {
            Some(found) => found,
            None => {
                self.discard_unsynced();
                return packets;
            }
        };
        if first > 0 {
            tracing::debug!("Discarding {} bytes before start code", first);
            self.dropped_bytes += first as u64;
            self.pending.drain(..first);
            self.scan_from = 0;
        }

        let mut cursor = 0;
        let mut header_len = first_len;
        let mut search = self.scan_from.max(header_len);
        while let Some((next, next_len)) = find_start_code(&self.pending, search) {
            let nal_unit = self.pending[cursor + header_len..next].to_vec();
            self.push_nal(&nal_unit, &mut packets);
            cursor = next;
            header_len = next_len;
            search = next + next_len;
        }

        self.pending.drain(..cursor);

        if self.pending.len() > MAX_PENDING {
            tracing::warn!(
                "NAL unit exceeds {} bytes without terminating, dropping it",
                MAX_PENDING
            );
            self.dropped_bytes += self.pending.len() as u64;
            self.pending.clear();
            self.scan_from = 0;
            return packets;
        }

        // The header of the pending NAL unit already tells whether the
        // current access unit is complete
        if self.unit_has_vcl && self.starts_new_unit(&self.pending[header_len..]) {
            packets.push(self.take_unit());
        }

        // A start code may straddle the boundary with the next chunk
        self.scan_from = self.pending.len().saturating_sub(3).max(header_len);
        packets
    }

    /// Emit whatever is buffered, treating end of input as the end of a NAL unit
    pub fn flush(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        if let Some((start, len)) = find_start_code(&self.pending, 0) {
            let nal_unit = self.pending[start + len..].to_vec();
            self.push_nal(&nal_unit, &mut packets);
        }
        self.pending.clear();
        self.scan_from = 0;
        if self.unit_has_vcl {
            packets.push(self.take_unit());
        } else {
            self.unit.clear();
        }
        packets
    }

    /// Bytes thrown away because they could not be attributed to a NAL unit
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Bytes held back waiting for more input
    pub fn buffered(&self) -> usize {
        self.pending.len() + self.unit.len()
    }

    fn discard_unsynced(&mut self) {
        if self.pending.len() > MAX_PENDING {
            tracing::warn!(
                "No start code in {} bytes, dropping them",
                self.pending.len()
            );
        }
        // Keep a possible partial start code at the tail
        let keep = self.pending.len().min(3);
        let drop = self.pending.len() - keep;
        if drop > 0 {
            self.dropped_bytes += drop as u64;
            self.pending.drain(..drop);
        }
        self.scan_from = 0;
    }

    fn push_nal(&mut self, nal_unit: &[u8], packets: &mut Vec<Packet>) {
        // Trailing zero bytes belong to the next start code
        let end = nal_unit
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let nal_unit = &nal_unit[..end];
        let Some(&header) = nal_unit.first() else {
            return;
        };

        if header & 0x80 != 0 {
            tracing::debug!("Dropping NAL unit with forbidden_zero_bit set");
            self.dropped_bytes += nal_unit.len() as u64;
            return;
        }

        let nal_type = header & 0x1f;
        let is_vcl = is_vcl(nal_type);

        if self.unit_has_vcl && self.starts_new_unit(nal_unit) {
            packets.push(self.take_unit());
        }

        self.unit.extend_from_slice(&START_CODE);
        self.unit.extend_from_slice(nal_unit);
        if is_vcl {
            self.unit_has_vcl = true;
            self.unit_is_idr |= nal_type == nal::IDR;
        }
    }

    /// Whether a NAL unit beginning with `prefix` opens a new access unit
    ///
    /// Only meaningful once the current unit holds a slice. Returns false when
    /// `prefix` is too short to decide.
    fn starts_new_unit(&self, prefix: &[u8]) -> bool {
        let Some(&header) = prefix.first() else {
            return false;
        };
        let nal_type = header & 0x1f;
        if is_vcl(nal_type) {
            // first_mb_in_slice == 0 is coded as a single '1' bit
            prefix.get(1).is_some_and(|b| b & 0x80 != 0)
        } else {
            matches!(nal_type, nal::SEI..=nal::AUD | 14..=18)
        }
    }

    fn take_unit(&mut self) -> Packet {
        let packet = Packet::new(
            std::mem::take(&mut self.unit),
            self.next_pts,
            self.unit_is_idr,
        );
        self.next_pts += 1;
        self.unit_has_vcl = false;
        self.unit_is_idr = false;
        packet
    }
}

fn is_vcl(nal_type: u8) -> bool {
    (nal::SLICE..=nal::IDR).contains(&nal_type)
}

/// Locate the next start code at or after `from`
///
/// Returns its offset and length; a zero byte directly before `00 00 01`
/// makes it the four byte form.
fn find_start_code(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    if buf.len() < 3 {
        return None;
    }
    (from..buf.len() - 2)
        .find(|&i| buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1)
        .map(|i| {
            if i > from && buf[i - 1] == 0 {
                (i - 1, 4)
            } else {
                (i, 3)
            }
        })
}
