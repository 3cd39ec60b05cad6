//! CCSDS Encapsulation Packet Protocol header.
//!
//! Packets carried over `mapp` channels start with a 1, 2, 4 or 8 byte EPP
//! header. The downlink relay strips it, the packet channel of the output
//! stack validates it, and the `uslpbus` tool can prepend one.
//!
//! The length field holds the total packet length minus one.

use thiserror::Error;

pub const PVN: u8 = 0x07;

pub const PROTOCOL_ID_IDLE: u8 = 0x00;
pub const PROTOCOL_ID_IPE: u8 = 0x02;
pub const PROTOCOL_ID_EXTENDED: u8 = 0x06;
pub const PROTOCOL_ID_PRIVATE: u8 = 0x07;

pub const MIN_HEADER_SIZE: usize = 1;
pub const MAX_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EppError {
    #[error("buffer is empty")]
    Empty,
    #[error("not an EPP header (PVN {0:#x})")]
    BadVersion(u8),
    #[error("EPP header size {header} is greater than buffer size {buffer}")]
    Truncated { header: usize, buffer: usize },
    #[error("EPP packet length {0} is out of range")]
    BadLength(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EppHeader {
    pub protocol_id: u8,
    pub user_defined_field: Option<u8>,
    pub protocol_id_extension: Option<u8>,
    pub ccsds_field: Option<u16>,
    /// Total packet length in octets, header included.
    pub packet_len: u32,
}

/// Header size announced by the first byte, or `None` if it is not EPP.
pub fn probe_header_size(first: u8) -> Option<usize> {
    if (first >> 5) & 0x07 != PVN {
        return None;
    }

    Some(match first & 0x03 {
        0x00 => 1,
        0x01 => 2,
        0x02 => 4,
        _ => 8,
    })
}

impl EppHeader {
    /// Smallest header able to describe this packet.
    pub fn size(&self) -> usize {
        let len_field = self.packet_len.saturating_sub(1);

        if self.ccsds_field.is_some() || len_field > 0xFFFF {
            return 8;
        }

        if self.protocol_id == PROTOCOL_ID_EXTENDED
            || self.protocol_id_extension.is_some()
            || self.user_defined_field.is_some()
            || len_field > 0xFF
        {
            return 4;
        }

        if self.packet_len > 1 {
            return 2;
        }

        1
    }

    pub fn payload_len(&self) -> usize {
        (self.packet_len as usize).saturating_sub(self.size())
    }

    /// Sets `packet_len` so that header plus `payload_len` octets fit, growing
    /// the header as needed.
    pub fn accommodate(&mut self, payload_len: usize) -> Result<u32, EppError> {
        let mut header_size = self.size();
        loop {
            let total = payload_len + header_size;
            self.packet_len =
                u32::try_from(total).map_err(|_| EppError::BadLength(total as u64))?;

            let grown = self.size();
            if grown == header_size {
                return Ok(self.packet_len);
            }
            header_size = grown;
        }
    }

    pub fn read(data: &[u8]) -> Result<Self, EppError> {
        let first = *data.first().ok_or(EppError::Empty)?;
        let header_size = probe_header_size(first).ok_or(EppError::BadVersion(first >> 5))?;
        if header_size > data.len() {
            return Err(EppError::Truncated { header: header_size, buffer: data.len() });
        }

        let mut header = EppHeader {
            protocol_id: (first >> 2) & 0x07,
            ..EppHeader::default()
        };

        let len_field: u64 = match header_size {
            1 => 0,
            2 => u64::from(data[1]),
            4 => {
                header.load_second_byte(data[1]);
                u64::from(u16::from_be_bytes([data[2], data[3]]))
            }
            _ => {
                header.load_second_byte(data[1]);
                header.ccsds_field = Some(u16::from_be_bytes([data[2], data[3]]));
                u64::from(u32::from_be_bytes([data[4], data[5], data[6], data[7]]))
            }
        };

        header.packet_len =
            u32::try_from(len_field + 1).map_err(|_| EppError::BadLength(len_field + 1))?;
        Ok(header)
    }

    pub fn write(&self) -> Vec<u8> {
        let header_size = self.size();
        let len_field = self.packet_len.saturating_sub(1);
        let mut out = Vec::with_capacity(header_size);

        let len_of_len = match header_size {
            1 => 0x00,
            2 => 0x01,
            4 => 0x02,
            _ => 0x03,
        };
        out.push((PVN << 5) | ((self.protocol_id & 0x07) << 2) | len_of_len);

        match header_size {
            1 => {}
            2 => out.push(len_field as u8),
            4 => {
                out.push(self.second_byte());
                out.extend_from_slice(&(len_field as u16).to_be_bytes());
            }
            _ => {
                out.push(self.second_byte());
                out.extend_from_slice(&self.ccsds_field.unwrap_or(0).to_be_bytes());
                out.extend_from_slice(&len_field.to_be_bytes());
            }
        }

        out
    }

    /// Prepends the smallest fitting header to `payload`.
    pub fn wrap(protocol_id: u8, payload: &[u8]) -> Result<Vec<u8>, EppError> {
        let mut header = EppHeader { protocol_id, ..EppHeader::default() };
        header.accommodate(payload.len())?;

        let mut packet = header.write();
        packet.extend_from_slice(payload);
        Ok(packet)
    }

    /// Splits a whole packet into header and payload.
    pub fn split(packet: &[u8]) -> Result<(Self, &[u8]), EppError> {
        let header = Self::read(packet)?;
        // the length-of-length bits decide, not the smallest encoding
        let first = packet[0];
        let header_size = probe_header_size(first).ok_or(EppError::BadVersion(first >> 5))?;
        Ok((header, &packet[header_size..]))
    }

    fn second_byte(&self) -> u8 {
        let ext = self.protocol_id_extension.unwrap_or(0) & 0x0F;
        let user = self.user_defined_field.unwrap_or(0) & 0x0F;
        (user << 4) | ext
    }

    fn load_second_byte(&mut self, byte: u8) {
        self.protocol_id_extension = Some(byte & 0x0F);
        self.user_defined_field = Some((byte >> 4) & 0x0F);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_rejects_foreign_version() {
        assert_eq!(probe_header_size(0x00), None);
        assert_eq!(probe_header_size(0xE0), Some(1));
        assert_eq!(probe_header_size(0xE1), Some(2));
        assert_eq!(probe_header_size(0xE2), Some(4));
        assert_eq!(probe_header_size(0xE3), Some(8));
    }

    #[test]
    fn test_wrap_small_payload_uses_two_byte_header() {
        let packet = EppHeader::wrap(PROTOCOL_ID_PRIVATE, &[1, 2, 3]).unwrap();
        assert_eq!(packet.len(), 5);
        assert_eq!(packet[0], 0xE0 | (PROTOCOL_ID_PRIVATE << 2) | 0x01);
        // total length 5, stored minus one
        assert_eq!(packet[1], 4);
        assert_eq!(&packet[2..], &[1, 2, 3]);
    }

    #[test]
    fn test_header_grows_when_length_does_not_fit() {
        let payload = vec![0xAB; 300];
        let packet = EppHeader::wrap(PROTOCOL_ID_IPE, &payload).unwrap();
        let (header, data) = EppHeader::split(&packet).unwrap();

        assert_eq!(header.size(), 4);
        assert_eq!(header.packet_len as usize, packet.len());
        assert_eq!(header.payload_len(), 300);
        assert_eq!(data, payload.as_slice());
    }

    #[test]
    fn test_boundary_payload_grows_header() {
        // 254 + 2 = 256 total, length field 255 still fits one byte
        let fits = EppHeader::wrap(PROTOCOL_ID_PRIVATE, &[0; 254]).unwrap();
        assert_eq!(EppHeader::read(&fits).unwrap().size(), 2);

        // 255 + 2 = 257 total, length field 256 needs the 4 byte header
        let grows = EppHeader::wrap(PROTOCOL_ID_PRIVATE, &[0; 255]).unwrap();
        assert_eq!(EppHeader::read(&grows).unwrap().size(), 4);
        assert_eq!(grows.len(), 259);
    }

    #[test]
    fn test_split_uses_declared_header_size() {
        // two byte header with a zero length field, then payload
        let packet = [0xE0 | (PROTOCOL_ID_PRIVATE << 2) | 0x01, 0x00, 0xAA, 0xBB];
        let (header, data) = EppHeader::split(&packet).unwrap();

        assert_eq!(header.packet_len, 1);
        assert_eq!(data, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_truncated_header() {
        assert_eq!(
            EppHeader::read(&[0xE2, 0x00]),
            Err(EppError::Truncated { header: 4, buffer: 2 })
        );
        assert_eq!(EppHeader::read(&[]), Err(EppError::Empty));
    }
}
