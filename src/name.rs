//! Domain names in DNS label format

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FormatError, Result};

/// RFC 1035 - max DNS label length of 63 chars
pub const MAX_LABEL_LEN: usize = 63;

/// RFC 1035 - max encoded name length, including length bytes and the root
pub const MAX_NAME_LEN: usize = 255;

/// Label length bytes with the top two bits set are compression pointers
const POINTER_MASK: u8 = 0xC0;

/// A domain name as its raw labels
///
/// Label bytes are kept exactly as they came off the wire. Dots, backslashes
/// and non-printable bytes only get escaped when the name is displayed.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Name {
    labels: Vec<Bytes>,
}

impl Name {
    pub fn root() -> Name {
        Name::default()
    }

    pub fn from_labels(labels: Vec<Bytes>) -> Name {
        Name { labels }
    }

    pub fn labels(&self) -> &[Bytes] {
        &self.labels
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length on the wire, uncompressed
    pub fn encoded_len(&self) -> usize {
        self.labels.iter().map(|label| label.len() + 1).sum::<usize>() + 1
    }
}

/// Parse presentation form: `.` separates labels, `\.` and `\\` escape a
/// single character and `\DDD` is a decimal byte. `""` and `"."` are the
/// root, one trailing dot is accepted.
impl From<&str> for Name {
    fn from(name: &str) -> Name {
        if name.is_empty() || name == "." {
            return Name::root();
        }

        let raw = name.as_bytes();
        let mut labels = Vec::new();
        let mut label = BytesMut::new();
        let mut after_dot = false;
        let mut i = 0;

        while i < raw.len() {
            after_dot = false;
            match raw[i] {
                b'.' => {
                    labels.push(label.split().freeze());
                    after_dot = true;
                    i += 1;
                }
                b'\\' => {
                    let digits = &raw[i + 1..(i + 4).min(raw.len())];
                    let decimal = (digits.len() == 3 && digits.iter().all(u8::is_ascii_digit))
                        .then(|| {
                            digits
                                .iter()
                                .fold(0u16, |acc, d| acc * 10 + (d - b'0') as u16)
                        })
                        .filter(|value| *value <= 0xFF);

                    if let Some(value) = decimal {
                        label.put_u8(value as u8);
                        i += 4;
                    } else if let Some(&escaped) = raw.get(i + 1) {
                        label.put_u8(escaped);
                        i += 2;
                    } else {
                        label.put_u8(b'\\');
                        i += 1;
                    }
                }
                b => {
                    label.put_u8(b);
                    i += 1;
                }
            }
        }

        if !after_dot {
            labels.push(label.freeze());
        }

        Name { labels }
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        *self == Name::from(*other)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(".");
        }

        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            for &b in label.iter() {
                match b {
                    b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                    0x21..=0x7E => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{:03}", b)?,
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({:?})", self.to_string())
    }
}

/// Read a name starting at `offset`
/// ex. [3]www[8]bluesky[3]com[0] reads as www.bluesky.com
///
/// Compression pointers are followed through the whole buffer. The returned
/// offset is the position right after the first pointer if one was taken,
/// otherwise right after the terminating zero byte. Every pointer target is
/// remembered, so a chain that comes back to an offset fails instead of
/// spinning.
pub fn read_name(buf: &[u8], offset: usize) -> Result<(Name, usize)> {
    let mut pos = offset;
    let mut resume = None;
    let mut visited: Vec<usize> = Vec::new();

    let mut labels = Vec::new();
    let mut encoded_len = 1;

    loop {
        let len = *buf.get(pos).ok_or(FormatError::Truncated { offset: pos })?;

        if len & POINTER_MASK == POINTER_MASK {
            let low = *buf
                .get(pos + 1)
                .ok_or(FormatError::Truncated { offset: pos + 1 })?;
            let target = (((len & !POINTER_MASK) as usize) << 8) | low as usize;

            if target >= buf.len() {
                return Err(FormatError::PointerOutOfRange {
                    target,
                    len: buf.len(),
                }
                .into());
            }
            if visited.contains(&target) {
                return Err(FormatError::CompressionLoop(target).into());
            }
            visited.push(target);

            if resume.is_none() {
                resume = Some(pos + 2);
            }
            pos = target;
            continue;
        }

        pos += 1;
        if len == 0 {
            break;
        }

        // 0x40 and 0x80 prefixes are extended label types, never valid here
        let len = len as usize;
        if len > MAX_LABEL_LEN {
            return Err(FormatError::LabelTooLong(len).into());
        }

        encoded_len += len + 1;
        if encoded_len > MAX_NAME_LEN {
            return Err(FormatError::NameTooLong(encoded_len).into());
        }

        let label = buf
            .get(pos..pos + len)
            .ok_or(FormatError::Truncated { offset: pos })?;
        labels.push(Bytes::copy_from_slice(label));

        pos += len;
    }

    Ok((Name { labels }, resume.unwrap_or(pos)))
}

/// Write a name in uncompressed label form. Nothing is written if the name
/// is invalid.
pub fn write_name(name: &Name, out: &mut BytesMut) -> Result<()> {
    for label in &name.labels {
        if label.is_empty() {
            return Err(FormatError::EmptyLabel(name.to_string()).into());
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(FormatError::LabelTooLong(label.len()).into());
        }
    }

    let encoded_len = name.encoded_len();
    if encoded_len > MAX_NAME_LEN {
        return Err(FormatError::NameTooLong(encoded_len).into());
    }

    out.reserve(encoded_len);
    for label in &name.labels {
        out.put_u8(label.len() as u8);
        out.put_slice(label);
    }
    out.put_u8(0);

    Ok(())
}

/// Encode a name into its own buffer
pub fn encode_name(name: &Name) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(name.encoded_len());
    write_name(name, &mut out)?;
    Ok(out.freeze())
}
