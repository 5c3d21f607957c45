//! Character sets understood by the text transcoder.
//!
//! Single-byte sets are table driven; UTF-8 decoding is incremental so a
//! multi-byte sequence split across reads is held back, not mangled.

use std::sync::LazyLock;

use crate::error::CodecError;

/// IBM code page 037 (EBCDIC, US/Canada) to Unicode.
const IBM037_TO_UNICODE: [u16; 256] = [
    0x0000, 0x0001, 0x0002, 0x0003, 0x009C, 0x0009, 0x0086, 0x007F, // 00
    0x0097, 0x008D, 0x008E, 0x000B, 0x000C, 0x000D, 0x000E, 0x000F, // 08
    0x0010, 0x0011, 0x0012, 0x0013, 0x009D, 0x0085, 0x0008, 0x0087, // 10
    0x0018, 0x0019, 0x0092, 0x008F, 0x001C, 0x001D, 0x001E, 0x001F, // 18
    0x0080, 0x0081, 0x0082, 0x0083, 0x0084, 0x000A, 0x0017, 0x001B, // 20
    0x0088, 0x0089, 0x008A, 0x008B, 0x008C, 0x0005, 0x0006, 0x0007, // 28
    0x0090, 0x0091, 0x0016, 0x0093, 0x0094, 0x0095, 0x0096, 0x0004, // 30
    0x0098, 0x0099, 0x009A, 0x009B, 0x0014, 0x0015, 0x009E, 0x001A, // 38
    0x0020, 0x00A0, 0x00E2, 0x00E4, 0x00E0, 0x00E1, 0x00E3, 0x00E5, // 40
    0x00E7, 0x00F1, 0x00A2, 0x002E, 0x003C, 0x0028, 0x002B, 0x007C, // 48
    0x0026, 0x00E9, 0x00EA, 0x00EB, 0x00E8, 0x00ED, 0x00EE, 0x00EF, // 50
    0x00EC, 0x00DF, 0x0021, 0x0024, 0x002A, 0x0029, 0x003B, 0x00AC, // 58
    0x002D, 0x002F, 0x00C2, 0x00C4, 0x00C0, 0x00C1, 0x00C3, 0x00C5, // 60
    0x00C7, 0x00D1, 0x00A6, 0x002C, 0x0025, 0x005F, 0x003E, 0x003F, // 68
    0x00F8, 0x00C9, 0x00CA, 0x00CB, 0x00C8, 0x00CD, 0x00CE, 0x00CF, // 70
    0x00CC, 0x0060, 0x003A, 0x0023, 0x0040, 0x0027, 0x003D, 0x0022, // 78
    0x00D8, 0x0061, 0x0062, 0x0063, 0x0064, 0x0065, 0x0066, 0x0067, // 80
    0x0068, 0x0069, 0x00AB, 0x00BB, 0x00F0, 0x00FD, 0x00FE, 0x00B1, // 88
    0x00B0, 0x006A, 0x006B, 0x006C, 0x006D, 0x006E, 0x006F, 0x0070, // 90
    0x0071, 0x0072, 0x00AA, 0x00BA, 0x00E6, 0x00B8, 0x00C6, 0x00A4, // 98
    0x00B5, 0x007E, 0x0073, 0x0074, 0x0075, 0x0076, 0x0077, 0x0078, // A0
    0x0079, 0x007A, 0x00A1, 0x00BF, 0x00D0, 0x00DD, 0x00DE, 0x00AE, // A8
    0x005E, 0x00A3, 0x00A5, 0x00B7, 0x00A9, 0x00A7, 0x00B6, 0x00BC, // B0
    0x00BD, 0x00BE, 0x005B, 0x005D, 0x00AF, 0x00A8, 0x00B4, 0x00D7, // B8
    0x007B, 0x0041, 0x0042, 0x0043, 0x0044, 0x0045, 0x0046, 0x0047, // C0
    0x0048, 0x0049, 0x00AD, 0x00F4, 0x00F6, 0x00F2, 0x00F3, 0x00F5, // C8
    0x007D, 0x004A, 0x004B, 0x004C, 0x004D, 0x004E, 0x004F, 0x0050, // D0
    0x0051, 0x0052, 0x00B9, 0x00FB, 0x00FC, 0x00F9, 0x00FA, 0x00FF, // D8
    0x005C, 0x00F7, 0x0053, 0x0054, 0x0055, 0x0056, 0x0057, 0x0058, // E0
    0x0059, 0x005A, 0x00B2, 0x00D4, 0x00D6, 0x00D2, 0x00D3, 0x00D5, // E8
    0x0030, 0x0031, 0x0032, 0x0033, 0x0034, 0x0035, 0x0036, 0x0037, // F0
    0x0038, 0x0039, 0x00B3, 0x00DB, 0x00DC, 0x00D9, 0x00DA, 0x009F, // F8
];

/// Inverse of the IBM037 table; the code page covers U+0000..=U+00FF exactly.
static UNICODE_TO_IBM037: LazyLock<[u8; 256]> = LazyLock::new(|| {
    let mut table = [0u8; 256];
    for (byte, &code) in IBM037_TO_UNICODE.iter().enumerate() {
        table[code as usize] = byte as u8;
    }
    table
});

const REPLACEMENT_BYTE: u8 = b'?';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    UsAscii,
    Latin1,
    Utf8,
    Ibm037,
}

impl Charset {
    /// Looks up a charset by name or common alias, case-insensitively.
    pub fn for_name(name: &str) -> Result<Self, CodecError> {
        let normalized = name.trim().to_ascii_uppercase().replace('_', "-");
        match normalized.as_str() {
            "US-ASCII" | "ASCII" | "ANSI-X3.4-1968" | "646" => Ok(Charset::UsAscii),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "L1" => Ok(Charset::Latin1),
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            "IBM037" | "IBM-037" | "CP037" | "EBCDIC" | "EBCDIC-CP-US" => Ok(Charset::Ibm037),
            _ => Err(CodecError::UnsupportedEncoding(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Charset::UsAscii => "US-ASCII",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Utf8 => "UTF-8",
            Charset::Ibm037 => "IBM037",
        }
    }

    /// Decodes `input` into `out`, returning how many bytes were consumed.
    ///
    /// Unless `last` is set, an incomplete trailing UTF-8 sequence is left
    /// unconsumed for the next call. Invalid input decodes to U+FFFD.
    pub fn decode(&self, input: &[u8], last: bool, out: &mut String) -> usize {
        match self {
            Charset::UsAscii => {
                out.extend(input.iter().map(|&b| {
                    if b.is_ascii() {
                        b as char
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                }));
                input.len()
            }
            Charset::Latin1 => {
                out.extend(input.iter().map(|&b| b as char));
                input.len()
            }
            Charset::Ibm037 => {
                out.extend(
                    input
                        .iter()
                        .map(|&b| char::from_u32(u32::from(IBM037_TO_UNICODE[b as usize]))
                            .unwrap_or(char::REPLACEMENT_CHARACTER)),
                );
                input.len()
            }
            Charset::Utf8 => decode_utf8(input, last, out),
        }
    }

    /// Encodes `input` into `out`; unmappable characters become `?`.
    pub fn encode(&self, input: &str, out: &mut Vec<u8>) {
        match self {
            Charset::Utf8 => out.extend_from_slice(input.as_bytes()),
            Charset::UsAscii => out.extend(input.chars().map(|c| {
                if c.is_ascii() {
                    c as u8
                } else {
                    REPLACEMENT_BYTE
                }
            })),
            Charset::Latin1 => out.extend(input.chars().map(|c| {
                u8::try_from(u32::from(c)).unwrap_or(REPLACEMENT_BYTE)
            })),
            Charset::Ibm037 => out.extend(input.chars().map(|c| {
                match u8::try_from(u32::from(c)) {
                    Ok(code) => UNICODE_TO_IBM037[code as usize],
                    Err(_) => UNICODE_TO_IBM037[REPLACEMENT_BYTE as usize],
                }
            })),
        }
    }
}

fn decode_utf8(input: &[u8], last: bool, out: &mut String) -> usize {
    let mut rest = input;
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                return input.len();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &rest[valid + bad..];
                    }
                    None if last => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        return input.len();
                    }
                    None => return input.len() - (rest.len() - valid),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_and_rejects_unknown() {
        assert_eq!(Charset::for_name("utf8").unwrap(), Charset::Utf8);
        assert_eq!(Charset::for_name("cp037").unwrap(), Charset::Ibm037);
        assert_eq!(Charset::for_name("iso_8859_1").unwrap(), Charset::Latin1);
        assert_eq!(
            Charset::for_name("KOI8-R"),
            Err(CodecError::UnsupportedEncoding("KOI8-R".into()))
        );
    }

    #[test]
    fn ebcdic_letters_digits_and_newline() {
        let mut text = String::new();
        Charset::Ibm037.decode(&[0xC1, 0xC2, 0x81, 0xF0, 0xF9, 0x25], true, &mut text);
        assert_eq!(text, "ABa09\n");

        let mut bytes = Vec::new();
        Charset::Ibm037.encode("Hello, World!", &mut bytes);
        let mut back = String::new();
        Charset::Ibm037.decode(&bytes, true, &mut back);
        assert_eq!(back, "Hello, World!");
        assert_eq!(bytes[0], 0xC8);
    }

    #[test]
    fn ebcdic_table_is_a_bijection() {
        for byte in 0..=255u8 {
            let mut text = String::new();
            Charset::Ibm037.decode(&[byte], true, &mut text);
            let mut back = Vec::new();
            Charset::Ibm037.encode(&text, &mut back);
            assert_eq!(back, vec![byte], "byte 0x{:02X}", byte);
        }
    }

    #[test]
    fn utf8_holds_back_split_sequences() {
        let bytes = "é!".as_bytes();
        let mut text = String::new();
        let consumed = Charset::Utf8.decode(&bytes[..1], false, &mut text);
        assert_eq!(consumed, 0);
        assert!(text.is_empty());

        let consumed = Charset::Utf8.decode(bytes, false, &mut text);
        assert_eq!(consumed, bytes.len());
        assert_eq!(text, "é!");
    }

    #[test]
    fn unmappable_characters_become_question_marks() {
        let mut bytes = Vec::new();
        Charset::UsAscii.encode("naïve", &mut bytes);
        assert_eq!(bytes, b"na?ve");

        let mut text = String::new();
        Charset::UsAscii.decode(b"a\xE9", true, &mut text);
        assert_eq!(text, "a\u{FFFD}");
    }
}
