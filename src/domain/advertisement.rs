//! Advertisement Payload Decoding
//!
//! Legacy advertising data is a sequence of AD structures:
//!
//! ```text
//! [len][type][value ... (len - 1 bytes)] [len][type][value ...] ...
//! ```
//!
//! `len` counts the type byte plus the value, not itself.

/// AD type: Flags
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// AD type: Complete Local Name
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// LE General Discoverable, BR/EDR not supported
const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Extract the complete local name from raw advertisement data
///
/// Returns `None` when no complete-name element is present or when an
/// element's length field runs past the end of the buffer.
pub fn parse_name(data: &[u8]) -> Option<String> {
    let mut cursor = 0;

    while cursor < data.len() {
        let len = data[cursor] as usize;
        // Zero length terminates the significant part of the payload
        if len == 0 {
            return None;
        }

        let end = cursor + 1 + len;
        if end > data.len() {
            return None;
        }

        let ad_type = data[cursor + 1];
        if ad_type == AD_TYPE_COMPLETE_NAME {
            let value = &data[cursor + 2..end];
            return Some(String::from_utf8_lossy(value).into_owned());
        }

        cursor = end;
    }

    None
}

/// Build an advertisement payload carrying the flags element and a complete name
pub fn encode_name(name: &str) -> Vec<u8> {
    let name = name.as_bytes();
    // A single AD structure can carry at most 254 value bytes
    let name = &name[..name.len().min(u8::MAX as usize - 1)];

    let mut payload = Vec::with_capacity(5 + name.len());
    payload.extend_from_slice(&[0x02, AD_TYPE_FLAGS, FLAGS_GENERAL_DISCOVERABLE]);
    payload.push(name.len() as u8 + 1);
    payload.push(AD_TYPE_COMPLETE_NAME);
    payload.extend_from_slice(name);
    payload
}
