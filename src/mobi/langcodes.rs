//! IANA language tags to MOBI locale codes and back.
//!
//! A MOBI locale is `(sublanguage << 10) | language`, stored at 0x5C of the
//! MOBI header.

/// `(language, mobi language id, [(region, sublanguage id)])`
const LANGUAGES: &[(&str, u32, &[(&str, u32)])] = &[
    ("ar", 0x01, &[("SA", 1), ("IQ", 2), ("EG", 3), ("LY", 4), ("DZ", 5), ("MA", 6)]),
    ("bg", 0x02, &[]),
    ("ca", 0x03, &[]),
    ("zh", 0x04, &[("TW", 1), ("CN", 2), ("HK", 3), ("SG", 4)]),
    ("cs", 0x05, &[]),
    ("da", 0x06, &[]),
    ("de", 0x07, &[("DE", 1), ("CH", 2), ("AT", 3), ("LU", 4), ("LI", 5)]),
    ("el", 0x08, &[]),
    (
        "en",
        0x09,
        &[("US", 1), ("GB", 2), ("AU", 3), ("CA", 4), ("NZ", 5), ("IE", 6), ("ZA", 7)],
    ),
    ("es", 0x0a, &[("ES", 1), ("MX", 2), ("GT", 4), ("CR", 5), ("PA", 6), ("DO", 7)]),
    ("fi", 0x0b, &[]),
    ("fr", 0x0c, &[("FR", 1), ("BE", 2), ("CA", 3), ("CH", 4), ("LU", 5), ("MC", 6)]),
    ("he", 0x0d, &[]),
    ("hu", 0x0e, &[]),
    ("is", 0x0f, &[]),
    ("it", 0x10, &[("IT", 1), ("CH", 2)]),
    ("ja", 0x11, &[]),
    ("ko", 0x12, &[]),
    ("nl", 0x13, &[("NL", 1), ("BE", 2)]),
    ("nb", 0x14, &[]),
    ("pl", 0x15, &[]),
    ("pt", 0x16, &[("BR", 1), ("PT", 2)]),
    ("ro", 0x18, &[]),
    ("ru", 0x19, &[]),
    ("hr", 0x1a, &[]),
    ("sk", 0x1b, &[]),
    ("sq", 0x1c, &[]),
    ("sv", 0x1d, &[("SE", 1), ("FI", 2)]),
    ("th", 0x1e, &[]),
    ("tr", 0x1f, &[]),
    ("ur", 0x20, &[]),
    ("id", 0x21, &[]),
    ("uk", 0x22, &[]),
    ("be", 0x23, &[]),
    ("sl", 0x24, &[]),
    ("et", 0x25, &[]),
    ("lv", 0x26, &[]),
    ("lt", 0x27, &[]),
    ("fa", 0x29, &[]),
    ("vi", 0x2a, &[]),
    ("hy", 0x2b, &[]),
    ("az", 0x2c, &[]),
    ("eu", 0x2d, &[]),
    ("mk", 0x2f, &[]),
    ("af", 0x36, &[]),
    ("ka", 0x37, &[]),
    ("fo", 0x38, &[]),
    ("hi", 0x39, &[]),
    ("ms", 0x3e, &[]),
    ("kk", 0x3f, &[]),
    ("sw", 0x41, &[]),
    ("bn", 0x45, &[]),
    ("pa", 0x46, &[]),
    ("gu", 0x47, &[]),
    ("ta", 0x49, &[]),
    ("te", 0x4a, &[]),
    ("kn", 0x4b, &[]),
    ("ml", 0x4c, &[]),
    ("mr", 0x4e, &[]),
    ("sa", 0x4f, &[]),
];

/// Map an IANA tag such as `en`, `en-GB` or `pt_BR` to a MOBI locale code.
///
/// Unknown languages map to 0, unknown regions to the bare language.
pub fn iana_to_mobi(tag: &str) -> u32 {
    let mut parts = tag.split(['-', '_']);
    let lang = parts.next().unwrap_or("").to_ascii_lowercase();
    let lang = match lang.as_str() {
        "no" | "nn" => "nb",
        "iw" => "he",
        "in" => "id",
        other => other,
    };

    let Some(&(_, langid, regions)) = LANGUAGES.iter().find(|(code, _, _)| *code == lang) else {
        return 0;
    };

    let sublang = parts
        .find(|part| part.len() == 2)
        .and_then(|region| {
            regions
                .iter()
                .find(|(r, _)| r.eq_ignore_ascii_case(region))
                .map(|&(_, sub)| sub)
        })
        .unwrap_or(0);

    (sublang << 10) | langid
}

/// Map a MOBI locale code back to an IANA tag. Returns `None` for 0 and
/// for codes outside the table.
pub fn mobi_to_iana(code: u32) -> Option<String> {
    let langid = code & 0x3ff;
    let sublang = code >> 10;
    let &(lang, _, regions) = LANGUAGES.iter().find(|(_, id, _)| *id == langid)?;

    match regions.iter().find(|(_, sub)| *sub == sublang) {
        Some((region, _)) if sublang != 0 => Some(format!("{lang}-{region}")),
        _ => Some(lang.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(iana_to_mobi("en"), 0x09);
        assert_eq!(iana_to_mobi("en-US"), 0x409);
        assert_eq!(iana_to_mobi("en_gb"), 0x809);
        assert_eq!(iana_to_mobi("fr"), 0x0c);
        assert_eq!(iana_to_mobi("pt-BR"), 0x416);
        assert_eq!(iana_to_mobi("zh-Hant-TW"), 0x404);
        assert_eq!(iana_to_mobi("no"), 0x14);
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(iana_to_mobi(""), 0);
        assert_eq!(iana_to_mobi("tlh"), 0);
        assert_eq!(iana_to_mobi("de-XX"), 0x07);
        assert_eq!(mobi_to_iana(0), None);
        assert_eq!(mobi_to_iana(0x3ff), None);
    }

    #[test]
    fn test_reverse_mapping() {
        assert_eq!(mobi_to_iana(0x09).as_deref(), Some("en"));
        assert_eq!(mobi_to_iana(0x409).as_deref(), Some("en-US"));
        assert_eq!(mobi_to_iana(0x816).as_deref(), Some("pt-PT"));
        // Unknown sublanguage keeps the base language.
        assert_eq!(mobi_to_iana((30 << 10) | 0x0c).as_deref(), Some("fr"));
    }
}
