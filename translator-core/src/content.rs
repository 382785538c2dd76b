use base64::Engine;
use eml_codec::{header, mime::mechanism::Mechanism as TransferEncoding, part::AnyPart};
use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, one_of},
    sequence::tuple,
    IResult,
};

use crate::error::FormatError;

/// What a notification is made of, once the MIME layers are peeled off.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Content {
    pub subject: String,
    pub body: String,
    pub attachment: Option<Vec<u8>>,
}

#[derive(Default)]
struct Found {
    body: Option<String>,
    attachment: Option<Vec<u8>>,
}

/// Extract subject, body and attachment from a raw RFC 5322 message.
///
/// Only an unusable header block is an error: problems with individual
/// parts are logged and leave the body empty or the attachment unset.
pub fn extract(raw: &[u8]) -> Result<Content, FormatError> {
    // the MIME parser recurses once per nested part
    let depth = composite_parts(raw);
    if depth > MAX_NESTING {
        tracing::warn!(depth, "message nesting too deep");
        return Err(FormatError::Header);
    }

    let (_, msg) = eml_codec::parse_message(raw).map_err(|_| FormatError::Header)?;

    let headers = msg
        .child
        .mime()
        .kv
        .iter()
        .filter_map(|field| match field {
            header::Field::Good(header::Kv2(k, v)) => Some((*k, *v)),
            _ => None,
        })
        .collect::<Vec<_>>();
    // an empty header block is still a header block
    let blank_header = raw.starts_with(b"\r\n") || raw.starts_with(b"\n");
    if headers.is_empty() && !blank_header {
        return Err(FormatError::Header);
    }

    let subject = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(b"subject"))
        .map(|(_, v)| unfold(v))
        .map(|v| decode_header(&v))
        .unwrap_or_default();

    let mut found = Found::default();
    match msg.child.as_ref() {
        AnyPart::Mult(_) => walk(msg.child.as_ref(), &mut found),
        AnyPart::Txt(txt) => {
            found.body = Some(text_body(txt.body, &msg.child.mime().transfer_encoding))
        }
        _ => found.body = Some(clean_text(&String::from_utf8_lossy(msg.raw_body))),
    }

    Ok(Content {
        subject,
        body: found.body.unwrap_or_default(),
        attachment: found.attachment,
    })
}

const MAX_NESTING: usize = 32;

/// Counts `multipart/*` and `message/rfc822` Content-Type headers, an
/// upper bound of how deep the MIME tree goes.
fn composite_parts(raw: &[u8]) -> usize {
    let mut count = 0;
    let mut lines = raw.split(|b| *b == b'\n').peekable();
    while let Some(line) = lines.next() {
        let line = line.to_ascii_lowercase();
        let value = match line.strip_prefix(b"content-type:") {
            Some(v) => trim(v).to_vec(),
            None => continue,
        };
        // the value may be folded on the next line
        let value = match (value.is_empty(), lines.peek()) {
            (true, Some(next)) => trim(&next.to_ascii_lowercase()).to_vec(),
            _ => value,
        };
        if value.starts_with(b"multipart/") || value.starts_with(b"message/rfc822") {
            count += 1;
        }
    }
    count
}

fn trim(v: &[u8]) -> &[u8] {
    let start = v.iter().position(|c| !c.is_ascii_whitespace()).unwrap_or(v.len());
    let end = v.iter().rposition(|c| !c.is_ascii_whitespace()).map_or(start, |e| e + 1);
    &v[start..end.max(start)]
}

/// Depth first: the first text part is the body, the first binary part
/// that decodes is the attachment.
fn walk(part: &AnyPart<'_>, found: &mut Found) {
    match part {
        AnyPart::Mult(multi) => {
            for child in multi.children.iter() {
                walk(child, found);
            }
        }
        AnyPart::Txt(txt) => {
            if found.body.is_none() {
                found.body = Some(text_body(txt.body, &part.mime().transfer_encoding));
            }
        }
        AnyPart::Bin(bin) => attachment_candidate(bin.body, &part.mime().transfer_encoding, found),
        AnyPart::Msg(msg) => {
            attachment_candidate(msg.raw_part, &part.mime().transfer_encoding, found)
        }
    }
}

fn encoding_name(encoding: &TransferEncoding) -> &'static str {
    match encoding {
        TransferEncoding::_8Bit => "8bit",
        TransferEncoding::Binary => "binary",
        TransferEncoding::QuotedPrintable => "quoted-printable",
        TransferEncoding::Base64 => "base64",
        _ => "7bit",
    }
}

fn attachment_candidate(body: &[u8], encoding: &TransferEncoding, found: &mut Found) {
    if found.attachment.is_some() {
        return;
    }

    let res = match encoding {
        TransferEncoding::Base64 => decode_base64(body).map_err(FormatError::from),
        other => Err(FormatError::TransferEncoding(encoding_name(other).to_string())),
    };
    match res {
        Ok(data) => found.attachment = Some(data),
        Err(e) => tracing::warn!(err=%e, "attachment ignored"),
    }
}

fn text_body(body: &[u8], encoding: &TransferEncoding) -> String {
    let decoded = match encoding {
        TransferEncoding::QuotedPrintable => decode_quoted_printable(body, false),
        TransferEncoding::Base64 => match decode_base64(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(err=%e, "text part could not be read, body left empty");
                vec![]
            }
        },
        _ => body.to_vec(),
    };
    clean_text(&String::from_utf8_lossy(&decoded))
}

fn clean_text(text: &str) -> String {
    decode_header(text.trim_end_matches(|c| c == '\r' || c == '\n'))
}

fn unfold(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .replace("\r\n", "")
        .replace('\n', "")
        .trim()
        .to_string()
}

fn decode_base64(body: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    let compact = body
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<Vec<_>>();
    base64::engine::general_purpose::STANDARD.decode(compact)
}

fn hex_value(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Quoted-printable (RFC 2045) or, with `underscore_is_space`, the Q
/// encoding of encoded words (RFC 2047). Invalid escapes are kept as is.
fn decode_quoted_printable(input: &[u8], underscore_is_space: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'=' => match (input.get(i + 1), input.get(i + 2)) {
                (Some(b'\r'), Some(b'\n')) => i += 3,
                (Some(b'\n'), _) => i += 2,
                (Some(h), Some(l)) => match (hex_value(*h), hex_value(*l)) {
                    (Some(h), Some(l)) => {
                        out.push(h << 4 | l);
                        i += 3;
                    }
                    _ => {
                        out.push(b'=');
                        i += 1;
                    }
                },
                _ => {
                    out.push(b'=');
                    i += 1;
                }
            },
            b'_' if underscore_is_space => {
                out.push(b' ');
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

// ---- encoded words (RFC 2047)

struct EncodedWord<'a> {
    charset: &'a str,
    encoding: char,
    payload: &'a str,
}

fn is_word_char(c: char) -> bool {
    c != '?' && !c.is_whitespace()
}

fn encoded_word(input: &str) -> IResult<&str, EncodedWord<'_>> {
    let (input, (_, charset, _, encoding, _, payload, _)) = tuple((
        tag("=?"),
        take_while1(is_word_char),
        char('?'),
        one_of("bBqQ"),
        char('?'),
        take_while(is_word_char),
        tag("?="),
    ))(input)?;

    Ok((
        input,
        EncodedWord {
            charset,
            encoding,
            payload,
        },
    ))
}

impl<'a> EncodedWord<'a> {
    fn decode(&self) -> Option<String> {
        let bytes = match self.encoding {
            'b' | 'B' => base64::engine::general_purpose::STANDARD
                .decode(self.payload)
                .or_else(|_| {
                    base64::engine::general_purpose::STANDARD_NO_PAD
                        .decode(self.payload.trim_end_matches('='))
                })
                .ok()?,
            _ => decode_quoted_printable(self.payload.as_bytes(), true),
        };

        // RFC 2231 allows a language suffix: utf-8*en
        let charset = self
            .charset
            .split('*')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match charset.as_str() {
            "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8(bytes).ok(),
            "iso-8859-1" | "latin1" | "latin-1" => Some(bytes.into_iter().map(char::from).collect()),
            _ => None,
        }
    }
}

/// Decode every encoded word of a header value (or any text).
///
/// If any of the encoded words can not be decoded, the whole input is
/// returned untouched; text without encoded words is returned as is.
/// A single pass is made: an encoded word whose payload is itself an
/// encoded word decodes to that inner word, not to its text.
pub fn decode_header(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut after_word = false;

    while let Some(at) = rest.find("=?") {
        let (before, candidate) = rest.split_at(at);
        match encoded_word(candidate) {
            Ok((remaining, word)) => {
                let decoded = match word.decode() {
                    Some(d) => d,
                    None => return input.to_string(),
                };
                // whitespace between two encoded words is not displayed
                if !(after_word && before.chars().all(char::is_whitespace)) {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = remaining;
                after_word = true;
            }
            Err(_) => {
                out.push_str(before);
                out.push_str("=?");
                rest = &candidate[2..];
                after_word = false;
            }
        }
    }
    out.push_str(rest);
    out
}
