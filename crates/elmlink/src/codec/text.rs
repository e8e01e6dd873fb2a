//! Adapter reply text handling
//!
//! ELM327-class adapters answer in ASCII, terminate with `>` and sprinkle
//! replies with CR/LF, echoed prompts, `SEARCHING...` banners and, on CAN
//! buses with several responders, concatenated frames without clean
//! separators. Everything here normalizes that text or hunts for hex
//! inside it.

/// Adapter prompt byte terminating every reply.
pub const PROMPT: u8 = b'>';

/// Substrings that mark a failed command or probe.
pub const ERROR_MARKERS: &[&str] = &[
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS ERROR",
    "NO DATA",
    "ERROR",
    "STOPPED",
    "?",
];

/// Collapse a raw reply into one uppercase line: everything before the
/// prompt, embedded CR/LF reduced to single spaces.
pub fn normalize(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let before_prompt = text.split('>').next().unwrap_or("");

    let mut out = String::with_capacity(before_prompt.len());
    let mut last_was_space = true;
    for ch in before_prompt.chars() {
        let ch = if ch.is_control() || ch == ' ' { ' ' } else { ch };
        if ch == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch.to_ascii_uppercase());
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Whether the reply contains any of the adapter's failure markers.
pub fn has_error_marker(reply: &str) -> bool {
    ERROR_MARKERS.iter().any(|m| reply.contains(m))
}

/// Reduce a normalized reply to its bare hex characters.
///
/// Multi-line CAN replies carry a total-length prefix and `0:`/`1:` line
/// ordinals; both are dropped before filtering so they cannot shift the
/// nibble stream.
pub fn hex_stream(reply: &str) -> String {
    let mut tokens: Vec<&str> = reply.split_whitespace().collect();
    if tokens.len() > 1 && tokens[1].ends_with(':') && tokens[0].len() % 2 == 1 {
        tokens.remove(0);
    }
    tokens.retain(|t| !t.contains(':'));

    tokens
        .join("")
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect()
}

/// Length of the longest run of consecutive hex characters once spaces
/// are removed.
pub fn longest_hex_run(reply: &str) -> usize {
    let mut best = 0usize;
    let mut current = 0usize;
    for ch in reply.chars().filter(|c| *c != ' ') {
        if ch.is_ascii_hexdigit() {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// Judge a `0100` protocol probe reply: no failure marker, and either the
/// literal `41 00` echo or a solid block of at least 8 hex characters.
pub fn probe_succeeded(reply: &str) -> bool {
    if reply.is_empty() || has_error_marker(reply) {
        return false;
    }
    if reply.contains("41 00") || reply.contains("4100") {
        return true;
    }
    longest_hex_run(reply) >= 8
}

/// Decode an even-length hex substring into bytes. Odd trailing nibbles
/// are discarded rather than misaligning everything after them.
pub fn hex_pairs(stream: &str) -> Vec<u8> {
    let even = &stream[..stream.len() - stream.len() % 2];
    hex::decode(even).unwrap_or_default()
}
