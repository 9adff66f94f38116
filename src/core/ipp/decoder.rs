// src/core/ipp/decoder.rs

use serde::Serialize;
use tracing::debug;

use super::{Attribute, AttributeGroup, AttributeValue, DecodeError, IppHeader};

const END_OF_ATTRIBUTES: u8 = 0x03;
const MAX_DELIMITER_TAG: u8 = 0x0F;

/// Header and attribute groups decoded from one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Message {
    pub header: Option<IppHeader>,
    pub groups: Vec<AttributeGroup>,
}

impl Message {
    /// Every attribute in stream order, regardless of group.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.groups.iter().flat_map(|g| g.attributes.iter())
    }

    /// The first attribute called `name`, searching every group.
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes().find(|a| a.name == name)
    }
}

/// Whatever was decoded, plus the error that stopped decoding early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub message: Message,
    pub error: Option<DecodeError>,
}

/// Stateless decoder; one value can decode any number of buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    capture_limit: Option<usize>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treats a buffer of `limit` bytes or more as cut off by capture: running
    /// out of bytes in such a buffer ends decoding without an error.
    pub fn with_capture_limit(limit: usize) -> Self {
        Self { capture_limit: Some(limit) }
    }

    pub fn decode(&self, buf: &[u8]) -> Decoded {
        let mut builder = Builder::default();
        let result = builder.run(&mut Cursor::new(buf));
        let error = match result {
            Ok(()) => None,
            Err(e) if self.capture_limit.is_some_and(|limit| buf.len() >= limit) => {
                debug!(error = %e, len = buf.len(), "Stopping at truncated capture.");
                None
            }
            Err(e) => Some(e),
        };
        Decoded { message: builder.finish(), error }
    }
}

/// Decodes a complete buffer strictly.
pub fn decode(buf: &[u8]) -> Decoded {
    Decoder::new().decode(buf)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos.checked_add(N).ok_or(DecodeError::BodyTooShort)?;
        let bytes = self.buf.get(self.pos..end).ok_or(DecodeError::BodyTooShort)?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.fixed::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.fixed()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.fixed()?))
    }

    /// A length-prefixed field; a prefix pointing past the end is `InvalidLength`.
    fn field(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = usize::from(self.u16()?);
        let end = self.pos + len;
        let bytes = self.buf.get(self.pos..end).ok_or(DecodeError::InvalidLength)?;
        self.pos = end;
        Ok(bytes)
    }
}

#[derive(Default)]
struct Builder {
    header: Option<IppHeader>,
    groups: Vec<AttributeGroup>,
    current: Option<AttributeGroup>,
}

impl Builder {
    fn run(&mut self, cur: &mut Cursor<'_>) -> Result<(), DecodeError> {
        self.header = Some(IppHeader {
            version_major: cur.u8()?,
            version_minor: cur.u8()?,
            status_code: cur.u16()?,
            request_id: cur.u32()?,
        });

        loop {
            let tag = cur.u8()?;
            match tag {
                END_OF_ATTRIBUTES => return Ok(()),
                0..=MAX_DELIMITER_TAG => self.open_group(tag),
                _ => self.value(tag, cur)?,
            }
        }
    }

    fn open_group(&mut self, tag: u8) {
        self.close_group();
        self.current = Some(AttributeGroup { tag, attributes: Vec::new() });
    }

    fn close_group(&mut self) {
        if let Some(group) = self.current.take().filter(|g| !g.attributes.is_empty()) {
            self.groups.push(group);
        }
    }

    fn value(&mut self, tag: u8, cur: &mut Cursor<'_>) -> Result<(), DecodeError> {
        let group = self
            .current
            .get_or_insert_with(|| AttributeGroup { tag: 0, attributes: Vec::new() });

        let name = cur.field()?;
        if !name.is_empty() || group.attributes.is_empty() {
            group.attributes.push(Attribute {
                name: String::from_utf8_lossy(name).into_owned(),
                values: Vec::new(),
            });
        }

        let bytes = cur.field()?.to_vec();
        if let Some(attribute) = group.attributes.last_mut() {
            attribute.values.push(AttributeValue { tag, bytes });
        }
        Ok(())
    }

    fn finish(mut self) -> Message {
        self.close_group();
        Message { header: self.header, groups: self.groups }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const STATUS_MESSAGE: &[u8] = b"The printer or class does not exist.";

    fn push_attr(buf: &mut Vec<u8>, tag: u8, name: &[u8], value: &[u8]) {
        buf.push(tag);
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        buf.extend_from_slice(value);
    }

    /// A typical error response with three operation attributes, without its end tag.
    fn base_without_end() -> Vec<u8> {
        let mut buf = vec![2, 1, 4, 6, 0, 0, 0, 1, 1];
        push_attr(&mut buf, 71, b"attributes-charset", b"utf-8");
        push_attr(&mut buf, 72, b"attributes-natural-language", b"en-us");
        push_attr(&mut buf, 65, b"status-message", STATUS_MESSAGE);
        buf
    }

    pub(crate) fn base_body() -> Vec<u8> {
        let mut buf = base_without_end();
        buf.push(END_OF_ATTRIBUTES);
        buf
    }

    fn capture() -> Decoder {
        Decoder::with_capture_limit(1024)
    }

    fn names(decoded: &Decoded) -> Vec<&str> {
        decoded.message.attributes().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn decodes_a_well_formed_response() {
        let body = base_body();
        assert_eq!(body.len(), 130);
        let decoded = capture().decode(&body);
        assert_eq!(decoded.error, None);
        assert_eq!(
            names(&decoded),
            vec!["attributes-charset", "attributes-natural-language", "status-message"]
        );
        let header = decoded.message.header.unwrap();
        assert_eq!((header.version_major, header.version_minor), (2, 1));
        assert_eq!(header.status_code, 0x0406);
        assert_eq!(header.request_id, 1);
        assert_eq!(decoded.message.groups.len(), 1);
        assert_eq!(decoded.message.groups[0].tag, 1);
        assert_eq!(
            decoded.message.find("status-message").unwrap().values[0].bytes,
            STATUS_MESSAGE
        );
    }

    #[test]
    fn name_length_past_the_end() {
        let mut body = base_body();
        body[11] = 180;
        let decoded = capture().decode(&body);
        assert_eq!(decoded.error, Some(DecodeError::InvalidLength));
        assert_eq!(decoded.message.attributes().count(), 0);
    }

    #[test]
    fn value_length_past_the_end_keeps_the_named_attribute() {
        let mut body = base_body();
        body[31] = 150;
        let decoded = capture().decode(&body);
        assert_eq!(decoded.error, Some(DecodeError::InvalidLength));
        let attrs: Vec<_> = decoded.message.attributes().collect();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "attributes-charset");
        assert!(attrs[0].values.is_empty());
    }

    #[test]
    fn buffer_exactly_at_the_limit_decodes_fully() {
        let mut body = base_without_end();
        for _ in 0..15 {
            push_attr(&mut body, 65, b"status-message", STATUS_MESSAGE);
        }
        let mut long_value = STATUS_MESSAGE.to_vec();
        long_value.extend_from_slice(&STATUS_MESSAGE[..14]);
        push_attr(&mut body, 65, b"status-message", &long_value);
        body.push(END_OF_ATTRIBUTES);
        assert_eq!(body.len(), 1024);

        let decoded = capture().decode(&body);
        assert_eq!(decoded.error, None);
        let attrs: Vec<_> = decoded.message.attributes().collect();
        assert_eq!(attrs.len(), 19);
        assert_eq!(attrs[18].values[0].bytes.len(), 50);
    }

    #[test]
    fn truncated_capture_ends_quietly() {
        let mut body = base_without_end();
        for _ in 0..16 {
            push_attr(&mut body, 65, b"status-message", STATUS_MESSAGE);
        }
        body.extend_from_slice(&[65, 0, 14]);
        body.extend_from_slice(b"status-messa");
        assert_eq!(body.len(), 1024);

        let decoded = capture().decode(&body);
        assert_eq!(decoded.error, None);
        let attrs: Vec<_> = decoded.message.attributes().collect();
        assert_eq!(attrs.len(), 19);
        assert_eq!(attrs[18].values[0].bytes.len(), 36);

        // Without the capture limit the same bytes are an error.
        assert_eq!(decode(&body).error, Some(DecodeError::InvalidLength));
    }

    #[test]
    fn empty_and_trailing_groups() {
        let decoded = capture().decode(&[2, 1, 4, 6, 0, 0, 0, 1, 3]);
        assert_eq!(decoded.error, None);
        assert_eq!(decoded.message.attributes().count(), 0);
        assert!(decoded.message.groups.is_empty());

        let mut body = base_without_end();
        body.extend_from_slice(&[0, 1, 2, 4, 5, 3]);
        let decoded = capture().decode(&body);
        assert_eq!(decoded.error, None);
        assert_eq!(decoded.message.attributes().count(), 3);
        assert_eq!(decoded.message.groups.len(), 1);
    }

    #[test]
    fn bytes_after_the_end_tag_are_ignored() {
        let mut body = vec![2, 1, 4, 6, 0, 0, 0, 1, 3];
        body.extend_from_slice(&base_body()[8..]);
        let decoded = capture().decode(&body);
        assert_eq!(decoded.error, None);
        assert_eq!(decoded.message.attributes().count(), 0);
    }

    #[test]
    fn short_buffers() {
        let bodies: [&[u8]; 3] = [&[2, 1, 4, 6, 0, 0, 0, 1], &[2, 1, 4, 6], &[]];
        for body in bodies {
            let decoded = capture().decode(body);
            assert_eq!(decoded.error, Some(DecodeError::BodyTooShort), "{:?}", body);
            assert_eq!(decoded.message.attributes().count(), 0);
        }
    }

    #[test]
    fn additional_values_join_the_previous_attribute() {
        let mut body = vec![2, 0, 0, 0, 0, 0, 0, 7, 4];
        push_attr(&mut body, 0x44, b"ipp-versions-supported", b"1.1");
        push_attr(&mut body, 0x44, b"", b"2.0");
        push_attr(&mut body, 0x44, b"", b"2.1");
        push_attr(&mut body, 0x45, b"printer-uri-supported", b"ipp://printer/ipp");
        body.push(END_OF_ATTRIBUTES);

        let decoded = decode(&body);
        assert_eq!(decoded.error, None);
        let versions = decoded.message.find("ipp-versions-supported").unwrap();
        assert_eq!(versions.text_values(), vec!["1.1", "2.0", "2.1"]);
        assert_eq!(decoded.message.attributes().count(), 2);
    }

    #[test]
    fn arbitrary_bytes_never_panic() {
        let mut seed = 0x2545_f491u32;
        for len in 0..400 {
            let buf: Vec<u8> = (0..len)
                .map(|_| {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    (seed & 0xff) as u8
                })
                .collect();
            let _ = decode(&buf);
            let _ = capture().decode(&buf);
        }
    }
}
