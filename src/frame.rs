//! Bulk-data wire framing.
//!
//! The module multiplexes raw socket payloads over the serial link by
//! prefixing them with a fixed-width header: the escape marker, a direction
//! tag, one hex digit for the connection id and a 4-digit zero-padded decimal
//! length, followed by exactly `length` payload bytes. The format is the
//! literal external protocol of the GS1500M firmware and must stay bit-exact.

/// Escape marker starting every framed exchange
pub const ESC: u8 = 0x1B;

/// Prefix announcing an incoming framed payload: `<ESC>Z<cid><len4>`
pub const BULK_DATA_IN: &[u8] = &[ESC, b'Z'];

/// Token confirming the module accepted an outgoing payload: `<ESC>O`
pub const DATA_ACCEPTED: &[u8] = &[ESC, b'O'];

/// Header bytes following [BULK_DATA_IN]: 1 hex cid digit + 4 length digits
pub const BULK_HEADER_LEN: usize = 5;

/// Number of logical connections multiplexed over the link
pub const MAX_CONNECTIONS: usize = 16;

/// Largest payload length the 4-digit header can express
pub const MAX_BULK_LEN: usize = 9999;

/// Largest payload the module accepts in a single outgoing frame. Longer
/// sends are split into parts of this size, each acknowledged separately.
pub const MAX_PART_LEN: usize = 1400;

/// Framing violations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Connection id is not a hex digit or exceeds the connection count
    InvalidConnectionId,

    /// Length field is not 4 decimal digits or exceeds the configured bounds
    InvalidLength,
}

/// Encodes the complete outgoing frame prefix `<ESC>Z<cid><len4>`
pub fn encode_bulk_header(cid: usize, length: usize) -> Result<[u8; 2 + BULK_HEADER_LEN], FrameError> {
    if cid >= MAX_CONNECTIONS {
        return Err(FrameError::InvalidConnectionId);
    }

    if length > MAX_BULK_LEN {
        return Err(FrameError::InvalidLength);
    }

    Ok([
        ESC,
        b'Z',
        encode_cid_digit(cid),
        b'0' + (length / 1000) as u8,
        b'0' + (length / 100 % 10) as u8,
        b'0' + (length / 10 % 10) as u8,
        b'0' + (length % 10) as u8,
    ])
}

/// Decodes the 5 header bytes following [BULK_DATA_IN] back to
/// `(connection id, payload length)`.
pub fn parse_bulk_header(header: &[u8; BULK_HEADER_LEN]) -> Result<(usize, usize), FrameError> {
    let cid = parse_cid_digit(header[0])?;

    let mut length = 0;
    for &digit in &header[1..] {
        if !digit.is_ascii_digit() {
            return Err(FrameError::InvalidLength);
        }

        length = length * 10 + usize::from(digit - b'0');
    }

    Ok((cid, length))
}

/// Single lowercase hex digit used for the connection id on the wire
pub fn encode_cid_digit(cid: usize) -> u8 {
    match cid {
        0..=9 => b'0' + cid as u8,
        _ => b'a' + (cid - 10) as u8,
    }
}

/// Parses a connection id digit. The module emits lowercase hex, uppercase is
/// accepted as well.
pub fn parse_cid_digit(digit: u8) -> Result<usize, FrameError> {
    match digit {
        b'0'..=b'9' => Ok(usize::from(digit - b'0')),
        b'a'..=b'f' => Ok(usize::from(digit - b'a') + 10),
        b'A'..=b'F' => Ok(usize::from(digit - b'A') + 10),
        _ => Err(FrameError::InvalidConnectionId),
    }
}
