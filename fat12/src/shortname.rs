// 8.3 short name synthesis, parsing, and the LFN binding checksum

/// Characters legal in an 8.3 name besides ASCII alphanumerics.
const SHORT_NAME_PUNCTUATION: &str = "!#$%&'()-@^_`{}~";

/// True for characters that may appear in an 8.3 name.
pub fn is_valid_short_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || SHORT_NAME_PUNCTUATION.contains(c)
}

/// True when `name` cannot be stored losslessly as an 8.3 entry and needs
/// long-name fragments (length, case, or character set).
pub fn needs_lfn(name: &str) -> bool {
    let (stem, ext) = split_name(name);
    if stem.len() > 8 || ext.len() > 3 || stem.is_empty() {
        return true;
    }
    name.chars().any(|c| {
        c.is_ascii_lowercase() || (c != '.' && !is_valid_short_char(c))
    }) || name.matches('.').count() > 1
}

/// One-byte checksum binding LFN fragments to their short entry:
/// rotate-right-accumulate over the 11 raw name bytes.
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum = 0u8;
    for &byte in short_name {
        sum = ((sum >> 1) | ((sum & 1) << 7)).wrapping_add(byte);
    }
    sum
}

/// Display form of a raw 11-byte name ("README  TXT" -> "README.TXT").
pub fn parse_short_name(raw: &[u8; 11]) -> String {
    let mut name = String::new();
    for (i, &byte) in raw[..8].iter().enumerate() {
        if byte == 0x20 || byte == 0x00 {
            break;
        }
        // 0x05 escapes a real leading 0xE5 byte
        if i == 0 && byte == 0x05 {
            name.push(0xE5 as char);
        } else {
            name.push(byte as char);
        }
    }
    let stem_len = name.len();
    for &byte in &raw[8..11] {
        if byte != 0x20 && byte != 0x00 {
            if name.len() == stem_len {
                name.push('.');
            }
            name.push(byte as char);
        }
    }
    name
}

/// Pack an uppercase stem and extension into the raw 11-byte layout,
/// applying the 0xE5 -> 0x05 escape.
pub fn pack_short_name(stem: &str, ext: &str) -> [u8; 11] {
    let mut raw = [0x20u8; 11];
    for (i, byte) in stem.bytes().take(8).enumerate() {
        raw[i] = byte;
    }
    for (i, byte) in ext.bytes().take(3).enumerate() {
        raw[8 + i] = byte;
    }
    if raw[0] == 0xE5 {
        raw[0] = 0x05;
    }
    raw
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => (name, ""),
    }
}

/// Uppercase, trim leading/trailing spaces and dots, and drop every
/// character an 8.3 name cannot hold.
fn clean_component(component: &str) -> String {
    component
        .trim_matches(|c| c == ' ' || c == '.')
        .to_uppercase()
        .chars()
        .filter(|&c| is_valid_short_char(c))
        .collect()
}

fn fits_83_as_given(stem: &str, ext: &str) -> bool {
    if stem.is_empty() || stem.len() > 8 || ext.len() > 3 {
        return false;
    }
    stem.chars().chain(ext.chars()).all(|c| {
        let upper = c.to_ascii_uppercase();
        is_valid_short_char(upper)
    })
}

/// Synthesize a Windows-compatible 8.3 name for `long_name`.
///
/// With `use_numeric_tail` the candidate gets a `~N` suffix chosen to avoid
/// every name in `existing`; without it the truncated name is returned with
/// no uniqueness guarantee.
pub fn generate_short_name(
    long_name: &str,
    existing: &[[u8; 11]],
    use_numeric_tail: bool,
) -> [u8; 11] {
    let (stem, ext) = split_name(long_name);

    // A name that already satisfies 8.3 passes through unchanged apart from
    // case folding, as long as it does not collide.
    if fits_83_as_given(stem, ext) {
        let candidate = pack_short_name(&stem.to_uppercase(), &ext.to_uppercase());
        if !use_numeric_tail || !existing.contains(&candidate) {
            return candidate;
        }
    }

    let stem_clean = {
        let cleaned = clean_component(stem);
        if cleaned.is_empty() {
            "_".to_string()
        } else {
            cleaned
        }
    };
    let ext_clean: String = clean_component(ext).chars().take(3).collect();

    if !use_numeric_tail {
        let stem_cut: String = stem_clean.chars().take(8).collect();
        return pack_short_name(&stem_cut, &ext_clean);
    }

    let mut candidate = pack_short_name(&stem_clean.chars().take(8).collect::<String>(), &ext_clean);
    for tail in 1u32..=9999 {
        // The base shrinks as the tail widens: NAME~1 .. NAM~1000
        let base_len = match tail {
            0..=9 => 6,
            10..=99 => 5,
            100..=999 => 4,
            _ => 3,
        };
        let base: String = stem_clean.chars().take(base_len).collect();
        candidate = pack_short_name(&format!("{}~{}", base, tail), &ext_clean);
        if !existing.contains(&candidate) {
            return candidate;
        }
    }
    candidate
}
