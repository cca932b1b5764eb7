//! Decoding and encoding of version 2 binary macaroons, the format tapd
//! writes its `*.macaroon` files in.
//!
//! A v2 macaroon is a version byte followed by sections of
//! `(field type, length, data)` triples, each section closed by an
//! end-of-section marker:
//!
//! ```text
//! 0x02 [location] identifier EOS ([location] identifier [vid] EOS)* EOS signature
//! ```
//!
//! Field types and lengths are unsigned LEB128 varints.

use crate::error::MacaroonError;

const VERSION_2: u8 = 2;

const FIELD_EOS: u64 = 0;
const FIELD_LOCATION: u64 = 1;
const FIELD_IDENTIFIER: u64 = 2;
const FIELD_VERIFICATION_ID: u64 = 4;
const FIELD_SIGNATURE: u64 = 6;

/// Length of a macaroon signature.
pub const SIGNATURE_LEN: usize = 32;

/// A first or third party caveat. Empty fields are absent on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Caveat {
    /// Location hint, only set for third party caveats.
    pub location: String,
    /// The caveat condition.
    pub identifier: Vec<u8>,
    /// Verification id, only set for third party caveats.
    pub verification_id: Vec<u8>,
}

/// A decoded macaroon. Signatures are carried, never checked: verification
/// is the daemon's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Macaroon {
    location: String,
    identifier: Vec<u8>,
    caveats: Vec<Caveat>,
    signature: [u8; SIGNATURE_LEN],
}

impl Macaroon {
    /// Assemble a macaroon from already computed parts.
    pub fn new(
        location: impl Into<String>,
        identifier: impl Into<Vec<u8>>,
        signature: [u8; SIGNATURE_LEN],
    ) -> Self {
        Self {
            location: location.into(),
            identifier: identifier.into(),
            caveats: Vec::new(),
            signature,
        }
    }

    /// Append a caveat. The signature is left untouched.
    pub fn with_caveat(mut self, caveat: Caveat) -> Self {
        self.caveats.push(caveat);
        self
    }

    /// Location hint of the target service.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The root identifier.
    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    /// Caveats in the order they were added.
    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    /// The chained HMAC signature.
    pub fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    /// Decode the v2 binary encoding. The whole input must be consumed.
    pub fn from_binary(data: &[u8]) -> Result<Self, MacaroonError> {
        let (&version, rest) = data.split_first().ok_or(MacaroonError::Empty)?;
        if version != VERSION_2 {
            return Err(MacaroonError::UnsupportedVersion(version));
        }
        let mut reader = FieldReader { data: rest };

        let header = reader.read_section("header")?;
        let (location, identifier) = location_and_identifier(&header, "header", &[])?;

        let mut caveats = Vec::new();
        loop {
            let section = reader.read_section("caveat")?;
            if section.is_empty() {
                break;
            }
            let (location, identifier) =
                location_and_identifier(&section, "caveat", &[FIELD_VERIFICATION_ID])?;
            let verification_id = section
                .iter()
                .find(|(kind, _)| *kind == FIELD_VERIFICATION_ID)
                .map(|(_, data)| data.to_vec())
                .unwrap_or_default();
            caveats.push(Caveat {
                location,
                identifier,
                verification_id,
            });
        }

        let (kind, sig) = reader.read_field("signature")?;
        if kind != FIELD_SIGNATURE {
            return Err(MacaroonError::MissingSignature);
        }
        let signature: [u8; SIGNATURE_LEN] = sig
            .try_into()
            .map_err(|_| MacaroonError::SignatureLength(sig.len()))?;

        if !reader.data.is_empty() {
            return Err(MacaroonError::TrailingData(reader.data.len()));
        }

        Ok(Self {
            location,
            identifier,
            caveats,
            signature,
        })
    }

    /// Encode in the v2 binary format, the form sent to tapd.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = vec![VERSION_2];
        if !self.location.is_empty() {
            put_field(&mut out, FIELD_LOCATION, self.location.as_bytes());
        }
        put_field(&mut out, FIELD_IDENTIFIER, &self.identifier);
        put_uvarint(&mut out, FIELD_EOS);
        for caveat in &self.caveats {
            if !caveat.location.is_empty() {
                put_field(&mut out, FIELD_LOCATION, caveat.location.as_bytes());
            }
            put_field(&mut out, FIELD_IDENTIFIER, &caveat.identifier);
            if !caveat.verification_id.is_empty() {
                put_field(&mut out, FIELD_VERIFICATION_ID, &caveat.verification_id);
            }
            put_uvarint(&mut out, FIELD_EOS);
        }
        put_uvarint(&mut out, FIELD_EOS);
        put_field(&mut out, FIELD_SIGNATURE, &self.signature);
        out
    }
}

fn location_and_identifier(
    section: &[(u64, &[u8])],
    name: &'static str,
    extra: &[u64],
) -> Result<(String, Vec<u8>), MacaroonError> {
    let mut location = String::new();
    let mut identifier = None;
    for (kind, data) in section {
        match *kind {
            FIELD_LOCATION => location = String::from_utf8(data.to_vec())?,
            FIELD_IDENTIFIER => identifier = Some(data.to_vec()),
            other if extra.contains(&other) => {}
            other => {
                return Err(MacaroonError::UnexpectedField {
                    section: name,
                    found: other,
                })
            }
        }
    }
    let identifier = identifier.ok_or(MacaroonError::MissingIdentifier(name))?;
    Ok((location, identifier))
}

struct FieldReader<'a> {
    data: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn read_uvarint(&mut self, what: &'static str) -> Result<u64, MacaroonError> {
        let data = self.data;
        let mut value: u64 = 0;
        for (i, &byte) in data.iter().enumerate() {
            if i == 9 && byte > 1 {
                return Err(MacaroonError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                self.data = &data[i + 1..];
                return Ok(value);
            }
            if i == 9 {
                return Err(MacaroonError::VarintOverflow);
            }
        }
        Err(MacaroonError::Truncated(what))
    }

    /// Reads one field. End-of-section markers carry no length or data.
    fn read_field(&mut self, what: &'static str) -> Result<(u64, &'a [u8]), MacaroonError> {
        let kind = self.read_uvarint(what)?;
        if kind == FIELD_EOS {
            return Ok((FIELD_EOS, &[]));
        }
        let len = usize::try_from(self.read_uvarint(what)?)
            .map_err(|_| MacaroonError::Truncated(what))?;
        let data = self.data;
        if data.len() < len {
            return Err(MacaroonError::Truncated(what));
        }
        let (field, rest) = data.split_at(len);
        self.data = rest;
        Ok((kind, field))
    }

    fn read_section(&mut self, name: &'static str) -> Result<Vec<(u64, &'a [u8])>, MacaroonError> {
        let mut fields: Vec<(u64, &'a [u8])> = Vec::new();
        loop {
            let (kind, data) = self.read_field(name)?;
            if kind == FIELD_EOS {
                return Ok(fields);
            }
            if let Some((previous, _)) = fields.last() {
                if kind <= *previous {
                    return Err(MacaroonError::OutOfOrder(name));
                }
            }
            fields.push((kind, data));
        }
    }
}

fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn put_field(out: &mut Vec<u8>, kind: u64, data: &[u8]) {
    put_uvarint(out, kind);
    put_uvarint(out, data.len() as u64);
    out.extend_from_slice(data);
}
