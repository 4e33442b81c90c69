//! Fixed-width patching of the display name inside a compiled (binary XML)
//! `AndroidManifest.xml`.
//!
//! The template is built with a 50 character placeholder as its app label. In
//! the compiled string pool that label is stored as UTF-16LE code units behind
//! a length prefix and followed by a null terminator. The patch overwrites the
//! code units only and pads with zeros up to the placeholder's original byte
//! length, so no length prefix, string offset or chunk size elsewhere in the
//! file has to change. This only holds because the patched width is constant;
//! variable-width edits need a real string pool writer.
//!
//! The declared string length keeps its placeholder value. Android stops at
//! the first null code unit when rendering the label, which is what makes the
//! padded form display correctly.

/// Placeholder label compiled into the binary-patch template: the marker
/// `PLACEHOLDER_APP_NAME` right-padded with `_` to 50 characters.
pub const APP_NAME_SENTINEL: &str = "PLACEHOLDER_APP_NAME______________________________";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched { occurrences: usize, truncated: bool },
    SentinelMissing,
}

pub fn encode_utf16le(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

/// Encodes `name` into exactly `width` bytes of UTF-16LE, truncating whole
/// code units and zero-filling the rest. Returns whether truncation happened.
pub fn fixed_width_utf16le(name: &str, width: usize) -> (Vec<u8>, bool) {
    let max_units = width / 2;
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut keep = units.len().min(max_units);
    let truncated = keep < units.len();
    // never leave half of a surrogate pair behind
    if truncated && keep > 0 && (0xD800..=0xDBFF).contains(&units[keep - 1]) {
        keep -= 1;
    }

    let mut out = Vec::with_capacity(width);
    for unit in &units[..keep] {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.resize(width, 0);
    (out, truncated)
}

/// Replaces every non-overlapping occurrence of `sentinel` (UTF-16LE) in
/// `manifest` with `name`, keeping the buffer length unchanged.
pub fn patch_display_name(manifest: &[u8], sentinel: &str, name: &str) -> (Vec<u8>, PatchOutcome) {
    let needle = encode_utf16le(sentinel);
    if needle.is_empty() {
        return (manifest.to_vec(), PatchOutcome::SentinelMissing);
    }
    let (replacement, truncated) = fixed_width_utf16le(name, needle.len());

    let mut out = Vec::with_capacity(manifest.len());
    let mut occurrences = 0usize;
    let mut pos = 0usize;
    while pos + needle.len() <= manifest.len() {
        if manifest[pos..pos + needle.len()] == needle[..] {
            out.extend_from_slice(&replacement);
            pos += needle.len();
            occurrences += 1;
        } else {
            out.push(manifest[pos]);
            pos += 1;
        }
    }
    out.extend_from_slice(&manifest[pos..]);

    if occurrences == 0 {
        (out, PatchOutcome::SentinelMissing)
    } else {
        (
            out,
            PatchOutcome::Patched {
                occurrences,
                truncated,
            },
        )
    }
}
