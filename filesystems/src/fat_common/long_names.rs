// Long filename support for FAT12/16/32 (VFAT)
// Name validation, 8.3 fitting, numeric-tail aliases and LFN record generation

use phat_core::{PhatError, PhatResult};

use super::constants::*;
use super::directory::{attributes::ATTR_LONG_NAME, LfnEntry};

/// Characters never allowed in a long name.
const FORBIDDEN_CHARS: &[char] = &['"', '*', '/', ':', '<', '>', '?', '\\', '|'];

/// Characters allowed in a long name but not in a short one.
const SHORT_NAME_REPLACED: &[u8] = b"+,;=[]";

/// Highest numeric tail tried before giving up.
pub const MAX_NUMERIC_TAIL: u32 = 999_999;

/// 8.3 form of a name plus the case bits needed to render it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortName {
    pub name: [u8; 11],
    pub case_info: u8,
}

/// Check a single path component for use as a long name.
pub fn is_valid_filename(name: &str) -> PhatResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(PhatError::BadFileName(name.to_string()));
    }
    if name.encode_utf16().count() > MAX_LFN_LENGTH {
        return Err(PhatError::NameTooLong(name.to_string()));
    }
    if name
        .chars()
        .any(|c| (c as u32) < 0x20 || FORBIDDEN_CHARS.contains(&c))
    {
        return Err(PhatError::BadFileName(name.to_string()));
    }
    Ok(())
}

/// Returns the short form when `name` can be stored without LFN records.
///
/// Base and extension must each be single-case; mixed case needs a long name.
pub fn fit_83(name: &str) -> Option<ShortName> {
    if name.is_empty() || name.len() > 12 || !name.is_ascii() {
        return None;
    }
    let (base, ext) = match name.find('.') {
        Some(0) => return None,
        // "NAME." would be listed back as "NAME"
        Some(dot) if dot == name.len() - 1 => return None,
        Some(dot) => (&name[..dot], &name[dot + 1..]),
        None => (name, ""),
    };
    if base.len() > 8 || ext.len() > 3 || ext.contains('.') {
        return None;
    }
    if name.bytes().any(|b| b == b' ' || SHORT_NAME_REPLACED.contains(&b)) {
        return None;
    }

    let mut case_info = 0;
    match segment_case(base)? {
        Case::Lower => case_info |= CI_BASENAME_IS_LOWER,
        Case::Upper | Case::None => {}
    }
    match segment_case(ext)? {
        Case::Lower => case_info |= CI_EXTENSION_IS_LOWER,
        Case::Upper | Case::None => {}
    }

    let mut short = [b' '; 11];
    for (i, b) in base.bytes().enumerate() {
        short[i] = b.to_ascii_uppercase();
    }
    for (i, b) in ext.bytes().enumerate() {
        short[8 + i] = b.to_ascii_uppercase();
    }
    if short[0] == DIR_ENTRY_DELETED {
        short[0] = DIR_ENTRY_KANJI_E5;
    }
    Some(ShortName { name: short, case_info })
}

enum Case {
    None,
    Upper,
    Lower,
}

/// `None` for mixed case.
fn segment_case(segment: &str) -> Option<Case> {
    let upper = segment.bytes().any(|b| b.is_ascii_uppercase());
    let lower = segment.bytes().any(|b| b.is_ascii_lowercase());
    match (upper, lower) {
        (true, true) => None,
        (true, false) => Some(Case::Upper),
        (false, true) => Some(Case::Lower),
        (false, false) => Some(Case::None),
    }
}

fn short_name_char(c: char) -> Option<u8> {
    match c {
        ' ' => None,
        '.' => Some(b'_'),
        c if !c.is_ascii() => Some(b'_'),
        c => {
            let b = c.to_ascii_uppercase() as u8;
            Some(if SHORT_NAME_REPLACED.contains(&b) { b'_' } else { b })
        }
    }
}

/// Alias stem for a long name: up to 8 base characters and 3 extension
/// characters taken around the last dot, upper-cased.
pub fn short_name_base(long_name: &str) -> [u8; 11] {
    let mut short = [b' '; 11];
    let (base, ext) = match long_name.rfind('.') {
        Some(dot) if dot > 0 => (&long_name[..dot], &long_name[dot + 1..]),
        _ => (long_name, ""),
    };

    let base_chars = base.trim_start_matches('.').chars().filter_map(short_name_char);
    for (slot, b) in short[..8].iter_mut().zip(base_chars) {
        *slot = b;
    }
    let ext_chars = ext.chars().filter_map(short_name_char);
    for (slot, b) in short[8..].iter_mut().zip(ext_chars) {
        *slot = b;
    }

    if short[0] == b' ' {
        short[..6].copy_from_slice(b"NONAME");
    }
    if short[0] == DIR_ENTRY_DELETED {
        short[0] = DIR_ENTRY_KANJI_E5;
    }
    short
}

/// Apply `~N` to an alias stem, keeping as much of the base as fits.
pub fn with_numeric_tail(stem: &[u8; 11], n: u32) -> [u8; 11] {
    let tail = format!("~{}", n);
    let base_len = stem[..8].iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    let at = base_len.min(8 - tail.len());

    let mut short = *stem;
    short[at..at + tail.len()].copy_from_slice(tail.as_bytes());
    for slot in &mut short[at + tail.len()..8] {
        *slot = b' ';
    }
    short
}

/// LFN records needed for `name`, excluding the short entry.
pub fn lfn_entry_count(name: &str) -> usize {
    (name.encode_utf16().count() + LFN_CHARS_PER_ENTRY - 1) / LFN_CHARS_PER_ENTRY
}

/// Build the LFN run for `long_name` in on-disk order: highest ordinal first,
/// carrying the last-entry bit, down to ordinal 1.
pub fn create_lfn_entries(long_name: &str, checksum: u8) -> Vec<LfnEntry> {
    let utf16: Vec<u16> = long_name.encode_utf16().collect();
    let num_entries = lfn_entry_count(long_name);
    let mut entries = Vec::with_capacity(num_entries);

    for i in (0..num_entries).rev() {
        let mut chars = [0xFFFFu16; 13];
        let start = i * LFN_CHARS_PER_ENTRY;
        for (j, slot) in chars.iter_mut().enumerate() {
            match utf16.get(start + j) {
                Some(&unit) => *slot = unit,
                None => {
                    *slot = 0x0000;  // terminator, then 0xFFFF padding
                    break;
                }
            }
        }

        let ordinal = (i + 1) as u8;
        entries.push(LfnEntry {
            order: if i == num_entries - 1 { ordinal | LFN_LAST_ENTRY } else { ordinal },
            chars,
            attributes: ATTR_LONG_NAME,
            entry_type: 0,
            checksum,
            cluster_low: 0,
        });
    }
    entries
}
