//! Expansion of literal patterns into the concrete byte strings inserted in
//! the automaton.

use rustc_hash::FxHashSet;

use crate::rules::Modifiers;

/// One concrete byte string for a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiteralVariant {
    pub bytes: Vec<u8>,
    /// Encoded as UTF-16LE-style double bytes.
    pub wide: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    Literals(Vec<LiteralVariant>),
    /// Too many case variants: search with a case-insensitive regex instead.
    /// Each entry is (regex source, wide).
    CaseInsensitiveRegex(Vec<(String, bool)>),
}

/// Interleave a NUL after every byte.
pub fn encode_wide(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|&b| [b, 0]).collect()
}

/// Number of case variants of `bytes`, saturating.
pub fn case_variant_count(bytes: &[u8]) -> usize {
    let letters = bytes.iter().filter(|b| b.is_ascii_alphabetic()).count();
    1usize.checked_shl(letters as u32).unwrap_or(usize::MAX)
}

/// Every ASCII case combination of `bytes`.
pub fn case_variants(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut out = vec![Vec::with_capacity(bytes.len())];
    for &b in bytes {
        if b.is_ascii_alphabetic() {
            let mut upper = out.clone();
            for v in &mut out {
                v.push(b.to_ascii_lowercase());
            }
            for v in &mut upper {
                v.push(b.to_ascii_uppercase());
            }
            out.append(&mut upper);
        } else {
            for v in &mut out {
                v.push(b);
            }
        }
    }
    out
}

/// Expand a literal according to its modifiers. Variants are deduplicated
/// and returned in a stable order: ascii forms first, then wide forms.
pub fn expand_literal(bytes: &[u8], modifiers: &Modifiers, max_case_variants: usize) -> Expansion {
    if modifiers.nocase && case_variant_count(bytes) > max_case_variants {
        let mut regexes = Vec::new();
        if modifiers.wants_ascii() {
            regexes.push((escape_bytes(bytes, false), false));
        }
        if modifiers.wants_wide() {
            regexes.push((escape_bytes(bytes, true), true));
        }
        return Expansion::CaseInsensitiveRegex(regexes);
    }

    let bases = if modifiers.nocase {
        case_variants(bytes)
    } else {
        vec![bytes.to_vec()]
    };

    let mut seen = FxHashSet::default();
    let mut variants = Vec::new();
    let mut push = |variant: LiteralVariant| {
        if seen.insert(variant.clone()) {
            variants.push(variant);
        }
    };
    if modifiers.wants_ascii() {
        for base in &bases {
            push(LiteralVariant {
                bytes: base.clone(),
                wide: false,
            });
        }
    }
    if modifiers.wants_wide() {
        for base in &bases {
            push(LiteralVariant {
                bytes: encode_wide(base),
                wide: true,
            });
        }
    }
    Expansion::Literals(variants)
}

/// Regex source matching `bytes` literally. ASCII alphanumerics are left
/// as-is so a case-insensitive regex folds them; everything else is a
/// `\xHH` escape.
pub fn escape_bytes(bytes: &[u8], wide: bool) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for &b in bytes {
        if b.is_ascii_alphanumeric() {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02X}"));
        }
        if wide {
            out.push_str("\\x00");
        }
    }
    out
}
