//! The address extractor: locates and classifies IPv4, IPv6, and MAC
//! literals in a line of text, and assigns each a canonical key.
//!
//! This module keeps the teacher's builder/zero-copy-match shape (see
//! `PatternExtractorBuilder`/`ExtractIter` in the ancestor extractor) but is
//! narrowed to the three address families the indexer cares about, and adds
//! field-ordinal tracking and canonicalization, neither of which the
//! ancestor needed for its own domain/email matching.
//!
//! Candidate scanning follows the two-pass shape of the C address parser
//! this crate descends from: one pass over `.` positions for IPv4, one pass
//! over `:`/`-` positions for MAC and IPv6, each walking backward to the
//! start of the run and forward to validate. MAC is tried before IPv6 at a
//! given `:` position because it is the more specific (exactly 17 bytes)
//! token of the two.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Builder for [`Extractor`].
#[derive(Debug, Clone)]
pub struct ExtractorBuilder {
    greedy: bool,
}

impl ExtractorBuilder {
    pub fn new() -> Self {
        ExtractorBuilder { greedy: false }
    }

    /// When set, the field scanner ignores quote characters and splits
    /// purely on whitespace runs (spec §4.5 step 1, §6 `greedy`).
    pub fn greedy(mut self, greedy: bool) -> Self {
        self.greedy = greedy;
        self
    }

    pub fn build(self) -> Extractor {
        Extractor {
            greedy: self.greedy,
        }
    }
}

impl Default for ExtractorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Which address family a [`ExtractedAddress`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Ipv4,
    Ipv6,
    Mac,
}

/// One address found on a line, already canonicalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAddress {
    pub kind: AddressKind,
    /// Byte span `[start, end)` of the token within the line.
    pub span: (usize, usize),
    /// 1-based position of the token's field on the line.
    pub field: u16,
    /// Canonical key (§4.5 step 4): dotted-quad, shortest-form lowercase
    /// IPv6, or lowercase colon-separated MAC.
    pub key: Arc<str>,
}

/// Reentrant, stateless extractor: locates every IPv4/IPv6/MAC token on a
/// line, in field order, with canonical keys.
pub struct Extractor {
    greedy: bool,
}

impl Extractor {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ExtractorBuilder {
        ExtractorBuilder::new()
    }

    pub fn greedy(&self) -> bool {
        self.greedy
    }

    /// Extract every address on `line`, in left-to-right order, with field
    /// ordinals assigned per spec §4.5 step 1.
    pub fn extract_line(&self, line: &[u8]) -> Vec<ExtractedAddress> {
        let fields = split_fields(line, self.greedy);

        let mut spans: Vec<(usize, usize, AddressKind, Arc<str>)> = Vec::new();

        // Colon-anchored candidates (MAC, IPv6) run first so that an IPv4
        // suffix embedded in an IPv6 literal (`::ffff:1.2.3.4`) is already
        // claimed before the dot pass considers it (spec §9/§4.5: embedded
        // IPv4-in-IPv6 yields one IPv6 result, never an extra IPv4 one).
        extract_colon_candidates(line, &mut spans);
        extract_ipv4_candidates(line, &mut spans);

        spans.sort_by_key(|&(start, ..)| start);

        spans
            .into_iter()
            .map(|(start, end, kind, key)| ExtractedAddress {
                kind,
                span: (start, end),
                field: field_ordinal(&fields, start),
                key,
            })
            .collect()
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a line into field byte ranges `[start, end)`, in order.
///
/// In default (non-greedy) mode, a `"` opens a quoted span that absorbs
/// whitespace until the matching close quote (or EOL); in `greedy` mode
/// quotes are ordinary characters and fields are pure whitespace runs.
fn split_fields(line: &[u8], greedy: bool) -> Vec<(usize, usize)> {
    let mut fields = Vec::new();
    let mut i = 0;
    let len = line.len();

    while i < len {
        while i < len && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len {
            break;
        }
        let start = i;
        if !greedy && line[i] == b'"' {
            i += 1;
            while i < len && line[i] != b'"' {
                i += 1;
            }
            if i < len {
                i += 1; // consume closing quote
            }
        } else {
            while i < len && !line[i].is_ascii_whitespace() {
                i += 1;
            }
        }
        fields.push((start, i));
    }

    fields
}

/// 1-based ordinal of the field containing byte `offset`.
fn field_ordinal(fields: &[(usize, usize)], offset: usize) -> u16 {
    for (idx, &(start, end)) in fields.iter().enumerate() {
        if offset >= start && offset < end.max(start + 1) {
            return (idx + 1) as u16;
        }
    }
    // A match can straddle the boundary detection above only if `split_fields`
    // and the extractor disagree on what counts as a separator; fall back to
    // the nearest preceding field rather than panicking.
    fields
        .iter()
        .rposition(|&(start, _)| start <= offset)
        .map(|idx| (idx + 1) as u16)
        .unwrap_or(1)
}

/// Scan every `.` in `line` and attempt IPv4 extraction at each run start.
///
/// `existing` holds spans already claimed by the colon pass (MAC/IPv6); a
/// dot run that falls inside one of those (the embedded-IPv4 suffix of an
/// IPv6 literal) is skipped rather than re-extracted as a bare IPv4.
fn extract_ipv4_candidates(line: &[u8], existing: &mut Vec<(usize, usize, AddressKind, Arc<str>)>) {
    let claimed = existing.clone();
    let mut consumed_until = 0usize;
    for dot_pos in memchr::memchr_iter(b'.', line) {
        if dot_pos < consumed_until {
            continue;
        }
        if claimed
            .iter()
            .any(|&(s, e, ..)| dot_pos >= s && dot_pos < e)
        {
            continue;
        }
        let mut start = dot_pos;
        while start > 0 && (line[start - 1].is_ascii_digit() || line[start - 1] == b'.') {
            start -= 1;
        }
        if claimed.iter().any(|&(s, e, ..)| start >= s && start < e) {
            continue;
        }
        if let Some((len, octets)) = try_parse_ipv4(&line[start..]) {
            let end = start + len;
            let key: Arc<str> = Arc::from(Ipv4Addr::from(octets).to_string().into_boxed_str());
            existing.push((start, end, AddressKind::Ipv4, key));
            consumed_until = end;
        }
    }
}

/// Parse an IPv4 literal starting at `bytes[0]`. Mirrors the forward scan of
/// the original C `fast_extract_ipv4`: accumulate decimal octets separated
/// by `.`, stop at the first character that is neither digit nor dot.
///
/// Per spec §4.5 step 3 ("no leading zero padding beyond one digit"), a
/// multi-digit octet starting with `0` (e.g. `010`, `001`) is rejected
/// outright rather than normalized — `0` alone is the only valid octet that
/// starts with `0`.
fn try_parse_ipv4(bytes: &[u8]) -> Option<(usize, [u8; 4])> {
    let mut octets = [0u32; 4];
    let mut octet_count = 0usize;
    let mut digits = 0u32;
    let mut value: u32 = 0;
    let mut octet_start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() && i < 15 {
        let c = bytes[i];
        if c.is_ascii_digit() {
            value = value * 10 + (c - b'0') as u32;
            digits += 1;
            if digits > 3 || value > 255 {
                return None;
            }
        } else if c == b'.' {
            if digits == 0 || octet_count >= 3 || (digits > 1 && bytes[octet_start] == b'0') {
                return None;
            }
            octets[octet_count] = value;
            octet_count += 1;
            value = 0;
            digits = 0;
            octet_start = i + 1;
        } else {
            break;
        }
        i += 1;
    }

    if octet_count == 3 && digits > 0 && !(digits > 1 && bytes[octet_start] == b'0') {
        octets[3] = value;
        let as_u8 = [
            octets[0] as u8,
            octets[1] as u8,
            octets[2] as u8,
            octets[3] as u8,
        ];
        Some((i, as_u8))
    } else {
        None
    }
}

/// Scan every `:`/`-` in `line`; try MAC first (more specific), then IPv6.
fn extract_colon_candidates(line: &[u8], out: &mut Vec<(usize, usize, AddressKind, Arc<str>)>) {
    let mut consumed_until = 0usize;
    for pos in memchr::memchr2_iter(b':', b'-', line) {
        if pos < consumed_until {
            continue;
        }
        let mut start = pos;
        while start > 0 {
            let c = line[start - 1];
            if c.is_ascii_hexdigit() || c == b':' || c == b'-' {
                start -= 1;
            } else {
                break;
            }
        }

        if let Some(bytes) = try_parse_mac(&line[start..]) {
            let end = start + 17;
            let key: Arc<str> = Arc::from(canonicalize_mac(bytes).into_boxed_str());
            out.push((start, end, AddressKind::Mac, key));
            consumed_until = end;
            continue;
        }

        if let Some((len, groups)) = try_parse_ipv6(&line[start..]) {
            let end = start + len;
            let key: Arc<str> = Arc::from(Ipv6Addr::from(groups).to_string().into_boxed_str());
            out.push((start, end, AddressKind::Ipv6, key));
            consumed_until = end;
        }
    }
}

/// Parse a MAC address: exactly six hex pairs joined by one consistent
/// separator (`:` or `-`), 17 bytes total. Mirrors `fast_extract_mac`.
fn try_parse_mac(bytes: &[u8]) -> Option<[u8; 6]> {
    if bytes.len() < 17 {
        return None;
    }
    let window = &bytes[..17];
    let mut out = [0u8; 6];
    let sep = window[2];
    if sep != b':' && sep != b'-' {
        return None;
    }
    for i in 0..6 {
        let pair_start = i * 3;
        let hi = hex_val(window[pair_start])?;
        let lo = hex_val(window[pair_start + 1])?;
        out[i] = (hi << 4) | lo;
        if i < 5 {
            if window[pair_start + 2] != sep {
                return None;
            }
        }
    }
    Some(out)
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn canonicalize_mac(bytes: [u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

/// Parse an IPv6 literal starting at `bytes[0]`, folding an embedded IPv4
/// suffix (`::ffff:1.2.3.4`) into the final two groups. Mirrors
/// `fast_extract_ipv6`: accumulate up to 8 hex groups, track at most one
/// `::` compression point, validate group count at the end.
fn try_parse_ipv6(bytes: &[u8]) -> Option<(usize, [u16; 8])> {
    let mut groups = [0u16; 8];
    let mut group_count = 0usize;
    let mut digits = 0u32;
    let mut value: u32 = 0;
    let mut double_colon: Option<usize> = None;
    let mut i = 0usize;
    let limit = bytes.len().min(39);

    while i < limit {
        let c = bytes[i];
        if c.is_ascii_hexdigit() {
            value = (value << 4) | hex_val(c)? as u32;
            digits += 1;
            if digits > 4 {
                return None;
            }
            i += 1;
        } else if c == b':' {
            if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                if double_colon.is_some() {
                    return None;
                }
                if digits > 0 {
                    if group_count >= 8 {
                        return None;
                    }
                    groups[group_count] = value as u16;
                    group_count += 1;
                }
                double_colon = Some(group_count);
                value = 0;
                digits = 0;
                i += 2;
            } else {
                if digits == 0 && group_count == 0 {
                    return None;
                }
                if group_count >= 8 {
                    return None;
                }
                groups[group_count] = value as u16;
                group_count += 1;
                value = 0;
                digits = 0;
                i += 1;
            }
        } else if c == b'.' && (group_count >= 6 || double_colon.is_some()) {
            // `group_count >= 6` covers the fully-expanded form
            // (`0:0:0:0:0:ffff:1.2.3.4`); `double_colon.is_some()` covers the
            // compressed shorthand (`::ffff:1.2.3.4`), where far fewer
            // explicit groups precede the embedded IPv4 suffix.
            let ipv4_start = i - digits as usize;
            let (ipv4_len, octets) = try_parse_ipv4(&bytes[ipv4_start..])?;
            let ipv4_val = u32::from_be_bytes(octets);
            if group_count >= 8 {
                return None;
            }
            groups[group_count] = (ipv4_val >> 16) as u16;
            group_count += 1;
            if group_count >= 8 {
                return None;
            }
            groups[group_count] = (ipv4_val & 0xFFFF) as u16;
            group_count += 1;
            i = ipv4_start + ipv4_len;
            return finish_ipv6(groups, group_count, double_colon, i);
        } else {
            break;
        }
    }

    if digits > 0 {
        if group_count >= 8 {
            return None;
        }
        groups[group_count] = value as u16;
        group_count += 1;
    }

    finish_ipv6(groups, group_count, double_colon, i)
}

fn finish_ipv6(
    groups: [u16; 8],
    group_count: usize,
    double_colon: Option<usize>,
    consumed: usize,
) -> Option<(usize, [u16; 8])> {
    // Need at least one separator to be a plausible IPv6 token at all -
    // bare hex digits with no colon are not an address.
    if double_colon.is_none() && group_count != 8 {
        return None;
    }
    if group_count > 8 {
        return None;
    }

    let resolved = match double_colon {
        None => groups,
        Some(split) => {
            let mut full = [0u16; 8];
            let after = group_count - split;
            full[..split].copy_from_slice(&groups[..split]);
            full[8 - after..].copy_from_slice(&groups[split..group_count]);
            full
        }
    };

    Some((consumed, resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> Extractor {
        Extractor::new()
    }

    #[test]
    fn extracts_single_ipv4() {
        let matches = extractor().extract_line(b"GET 10.0.0.1 /index");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].kind, AddressKind::Ipv4);
        assert_eq!(&*matches[0].key, "10.0.0.1");
        assert_eq!(matches[0].field, 2);
    }

    #[test]
    fn extracts_ipv4_and_mac_same_line() {
        let matches =
            extractor().extract_line(b"client=192.168.1.5 mac=aa:bb:cc:dd:ee:ff ok");
        assert_eq!(matches.len(), 2);
        assert_eq!(&*matches[0].key, "192.168.1.5");
        assert_eq!(matches[0].field, 1);
        assert_eq!(&*matches[1].key, "aa:bb:cc:dd:ee:ff");
        assert_eq!(matches[1].field, 2);
    }

    #[test]
    fn canonicalizes_ipv6_shortest_form() {
        let matches =
            extractor().extract_line(b"src=2001:0db8:0000:0000:0000:0000:0000:0001");
        assert_eq!(matches.len(), 1);
        assert_eq!(&*matches[0].key, "2001:db8::1");
    }

    #[test]
    fn mac_mixed_separators_canonicalize_to_same_key() {
        let a = extractor().extract_line(b"aa:bb:cc:dd:ee:ff");
        let b = extractor().extract_line(b"aa-bb-cc-dd-ee-ff");
        assert_eq!(a[0].key, b[0].key);
        assert_eq!(&*a[0].key, "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mac_rejects_inconsistent_separators() {
        // 'aa:bb-cc:dd-ee:ff' has mixed separators; it must not parse as a
        // MAC, and its components are not valid IPv6 either.
        let matches = extractor().extract_line(b"aa:bb-cc:dd-ee:ff");
        assert!(matches.iter().all(|m| m.kind != AddressKind::Mac));
    }

    #[test]
    fn embedded_ipv4_in_ipv6_folds_to_one_key() {
        let matches = extractor().extract_line(b"addr=::ffff:192.168.1.1");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].kind, AddressKind::Ipv6);
    }

    #[test]
    fn quote_aware_fields_keep_spaces_in_one_field() {
        let ex = Extractor::builder().greedy(false).build();
        let matches = ex.extract_line(br#"tag "hello 10.0.0.1 world" next=10.0.0.2"#);
        assert_eq!(matches.len(), 2);
        // The quoted span is field 2 in its entirety; the trailing token is field 3.
        assert_eq!(matches[0].field, 2);
        assert_eq!(matches[1].field, 3);
    }

    #[test]
    fn greedy_mode_ignores_quotes() {
        let ex = Extractor::builder().greedy(true).build();
        let matches = ex.extract_line(br#"tag "hello 10.0.0.1 world" next=10.0.0.2"#);
        assert_eq!(matches.len(), 2);
        // In greedy mode the quote is an ordinary character, so the address
        // that was inside the quotes lands on its own whitespace field.
        assert_eq!(matches[0].field, 3);
        assert_eq!(matches[1].field, 5);
    }

    #[test]
    fn no_address_on_line_returns_empty() {
        let matches = extractor().extract_line(b"just some plain text here");
        assert!(matches.is_empty());
    }

    #[test]
    fn ipv4_rejects_octet_over_255() {
        let matches = extractor().extract_line(b"10.0.0.999 trailing");
        assert!(matches.is_empty());
    }

    #[test]
    fn ipv4_rejects_leading_zero_padded_octet() {
        let matches = extractor().extract_line(b"010.0.0.1 trailing");
        assert!(matches.is_empty());
    }

    #[test]
    fn ipv4_rejects_leading_zero_in_interior_octet() {
        let matches = extractor().extract_line(b"192.168.001.5 trailing");
        assert!(matches.is_empty());
    }

    #[test]
    fn ipv4_accepts_bare_zero_octet() {
        let matches = extractor().extract_line(b"10.0.0.1 trailing");
        assert_eq!(matches.len(), 1);
        assert_eq!(&*matches[0].key, "10.0.0.1");
    }

    #[test]
    fn ipv6_rejects_zero_padded_embedded_ipv4_suffix() {
        let matches = extractor().extract_line(b"addr=::ffff:010.0.0.1");
        assert!(matches.is_empty());
    }

    #[test]
    fn frequency_scenario_three_lines() {
        let ex = extractor();
        let l1 = ex.extract_line(b"10.0.0.1 x");
        let l2 = ex.extract_line(b"10.0.0.2 y");
        let l3 = ex.extract_line(b"10.0.0.1 z");
        assert_eq!(&*l1[0].key, "10.0.0.1");
        assert_eq!(&*l2[0].key, "10.0.0.2");
        assert_eq!(&*l3[0].key, "10.0.0.1");
    }
}
