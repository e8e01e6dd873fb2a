//! OBD-II reply framing
//!
//! A mode reply echoes `mode + 0x40` and the request parameters before
//! the data bytes, but adapters with headers enabled prepend CAN ids and
//! length nibbles, and several ECUs may answer in one buffer without
//! clean separators. Everything here therefore locates the expected echo
//! inside the hex stream instead of assuming a fixed offset.

use crate::codec::dtc::DtcCode;
use crate::codec::text;
use crate::error::ProtocolError;

/// Locate an echo byte sequence in the reply and return the `n` data
/// bytes that follow it. `None` when the echo is absent or the data is
/// shorter than requested.
pub fn extract_after_echo(reply: &str, echo: &[u8], n: usize) -> Option<Vec<u8>> {
    let stream = text::hex_stream(reply);
    let echo_hex = hex::encode_upper(echo);
    let idx = stream.find(&echo_hex)?;
    let data = &stream[idx + echo_hex.len()..];
    if data.len() < n * 2 {
        return None;
    }
    Some(text::hex_pairs(&data[..n * 2]))
}

/// Extract the data bytes of a mode 01/02 reply for one PID.
pub fn extract_pid_data(reply: &str, mode: u8, pid: u8, n: usize) -> Option<Vec<u8>> {
    extract_after_echo(reply, &[mode.wrapping_add(0x40), pid], n)
}

/// Parse a stored/pending/permanent DTC reply (modes 03/07/0A).
///
/// The byte after each mode echo is the ISO 15765-4 DTC count, followed
/// by 2-byte code pairs; zero pairs are padding and are filtered, never
/// reported. Every echo occurrence in the buffer is walked so that
/// concatenated multi-ECU replies contribute all their codes.
pub fn parse_dtc_response(reply: &str, mode: u8) -> Result<Vec<DtcCode>, ProtocolError> {
    if reply.contains("NO DATA") {
        // A silent bus means no codes of this kind, not a failure.
        return Ok(Vec::new());
    }
    if text::has_error_marker(reply) {
        return Err(ProtocolError::AdapterReported(reply.to_string()));
    }

    let stream = text::hex_stream(reply);
    let echo = format!("{:02X}", mode.wrapping_add(0x40));
    let mut codes = Vec::new();
    let mut found_echo = false;
    let mut cursor = 0usize;

    while let Some(rel) = stream[cursor..].find(&echo) {
        let idx = cursor + rel;
        found_echo = true;
        let after = &stream[idx + 2..];
        if after.len() < 2 {
            break;
        }
        let count = usize::from_str_radix(&after[..2], 16).unwrap_or(0);
        let body = &after[2..];
        let take = count.min(body.len() / 4);
        for pair in 0..take {
            let bytes = text::hex_pairs(&body[pair * 4..pair * 4 + 4]);
            if let Some(code) = DtcCode::from_obd_pair(bytes[0], bytes[1]) {
                if !codes.contains(&code) {
                    codes.push(code);
                }
            }
        }
        cursor = idx + 2 + 2 + take * 4;
    }

    if !found_echo {
        return Err(ProtocolError::malformed(
            "locating DTC mode echo",
            &text::hex_pairs(&stream),
        ));
    }
    Ok(codes)
}

/// Whether a mode 04 clear request was acknowledged.
pub fn clear_acknowledged(reply: &str) -> bool {
    !text::has_error_marker(reply) && text::hex_stream(reply).contains("44")
}

/// Reassemble the VIN from a mode 09 PID 02 reply.
///
/// Each `49 02` echo starts a record whose first byte is a sequence
/// index; the remaining bytes are VIN characters. Padding and
/// non-printable bytes are dropped.
pub fn parse_vin(reply: &str) -> Option<String> {
    let stream = text::hex_stream(reply);
    let mut vin = String::new();
    for segment in stream.split("4902").skip(1) {
        if segment.len() < 2 {
            continue;
        }
        for byte in text::hex_pairs(&segment[2..]) {
            if byte.is_ascii_graphic() {
                vin.push(byte as char);
            }
        }
    }
    if vin.is_empty() {
        None
    } else {
        Some(vin)
    }
}

/// Decode a PID-support bitmap reply (`0100`, `0120`, ...) into the PIDs
/// the vehicle claims to support.
pub fn parse_pid_bitmap(reply: &str, base_pid: u8) -> Option<Vec<u8>> {
    let data = extract_pid_data(reply, 0x01, base_pid, 4)?;
    let mut pids = Vec::new();
    for (byte_idx, byte) in data.iter().enumerate() {
        for bit in 0..8u8 {
            if byte & (0x80 >> bit) != 0 {
                pids.push(base_pid + (byte_idx as u8) * 8 + bit + 1);
            }
        }
    }
    Some(pids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn code_strings(codes: &[DtcCode]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn stored_dtc_reply_with_zero_padding() {
        let codes = parse_dtc_response("43 01 03 01 00 00", 0x03).unwrap();
        assert_eq!(code_strings(&codes), vec!["P0301"]);
    }

    #[test]
    fn stored_dtc_reply_with_headers() {
        let codes = parse_dtc_response("7E8 06 43 01 03 01 00 00", 0x03).unwrap();
        assert_eq!(code_strings(&codes), vec!["P0301"]);
    }

    #[test]
    fn multi_ecu_replies_contribute_all_codes() {
        let reply = "7E8 06 43 01 03 01 00 00 7E9 06 43 01 44 20 00 00";
        let codes = parse_dtc_response(reply, 0x03).unwrap();
        assert_eq!(code_strings(&codes), vec!["P0301", "C0420"]);
    }

    #[test]
    fn zero_count_reply_yields_no_codes() {
        let codes = parse_dtc_response("43 00", 0x03).unwrap();
        assert!(codes.is_empty());
    }

    #[test]
    fn no_data_means_no_codes() {
        let codes = parse_dtc_response("NO DATA", 0x07).unwrap();
        assert!(codes.is_empty());
    }

    #[test]
    fn garbage_reply_is_malformed() {
        assert!(parse_dtc_response("DE AD BE EF", 0x03).is_err());
    }

    #[test]
    fn pending_mode_uses_its_own_echo() {
        let codes = parse_dtc_response("47 01 01 23 00 00", 0x07).unwrap();
        assert_eq!(code_strings(&codes), vec!["P0123"]);
    }

    #[test]
    fn pid_data_found_behind_header_noise() {
        let data = extract_pid_data("7E8 04 41 0C 1A F8", 0x01, 0x0C, 2).unwrap();
        assert_eq!(data, vec![0x1A, 0xF8]);
    }

    #[test]
    fn pid_data_requires_full_width() {
        assert_eq!(extract_pid_data("41 0C 1A", 0x01, 0x0C, 2), None);
        assert_eq!(extract_pid_data("NO DATA", 0x01, 0x0C, 2), None);
    }

    #[test]
    fn vin_reassembles_from_multiline_reply() {
        let reply = "014 0: 49 02 01 31 44 34 1: 47 50 30 30 52 35 35 2: 42 31 32 33 34 35 36";
        assert_eq!(parse_vin(reply).unwrap(), "1D4GP00R55B123456");
    }

    #[test]
    fn vin_reassembles_from_segmented_records() {
        // K-line style: every message repeats the 49 02 echo with an index
        let reply = "49 02 01 31 44 34 47 50 49 02 02 30 30 52 35 35 49 02 03 42 31 32 33 34";
        assert_eq!(parse_vin(reply).unwrap(), "1D4GP00R55B1234");
    }

    #[test]
    fn bitmap_decodes_supported_pids() {
        // 0xBE3EB811: taken from a real 0100 reply
        let pids = parse_pid_bitmap("41 00 BE 3E B8 11", 0x00).unwrap();
        assert!(pids.contains(&0x01));
        assert!(pids.contains(&0x0C));
        assert!(pids.contains(&0x20));
        assert!(!pids.contains(&0x02));
    }

    #[test]
    fn clear_ack_detection() {
        assert!(clear_acknowledged("44"));
        assert!(clear_acknowledged("7E8 01 44"));
        assert!(!clear_acknowledged("NO DATA"));
    }
}
