//! PKCS#7 `SignedData` certificate-set surgery.
//!
//! Signers emit DER with encoding choices a re-encoder would not make, and
//! downstream verifiers can be sensitive to the exact bytes. The parser
//! here locates the `certificates [0] IMPLICIT` slice and nothing more;
//! `version`, `digestAlgorithms`, the inner content, `crls` and
//! `signerInfos` are carried as opaque byte ranges and re-emitted verbatim.
//! Only the wrappers whose lengths change (`ContentInfo`, the `[0]`
//! EXPLICIT content, `SignedData`, the certificates set) get fresh,
//! canonical headers.

use crate::asn1::{
    self, Element, TAG_CONTEXT_0, TAG_CONTEXT_1, TAG_INTEGER, TAG_OID, TAG_SEQUENCE, TAG_SET,
};
use crate::error::{Error, Result};
use crate::tag::certificate;
use log::debug;

/// Body of the signedData content type OID, 1.2.840.113549.1.7.2.
pub const OID_SIGNED_DATA: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];

/// A parsed view of `ContentInfo { signedData }`. All slices borrow from
/// the input buffer.
pub struct Pkcs7<'a> {
    /// The full input DER.
    pub bytes: &'a [u8],
    /// The contentType OID TLV, copied verbatim on re-emit.
    content_type: &'a [u8],
    /// `version || digestAlgorithms || contentInfo` inside SignedData.
    head: &'a [u8],
    /// The `certificates [0] IMPLICIT` element, when present.
    certificates: Option<Element<'a>>,
    /// Everything after the certificates set: optional `crls [1]` and the
    /// `signerInfos` set.
    tail: &'a [u8],
}

impl<'a> Pkcs7<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let content_info = Element::expect(bytes, TAG_SEQUENCE)?;
        if content_info.total_len() != bytes.len() {
            return Err(Error::MalformedPkcs7(format!(
                "{} trailing bytes after ContentInfo",
                bytes.len() - content_info.total_len()
            )));
        }
        let content_type = Element::expect(content_info.body, TAG_OID)?;
        if content_type.body != OID_SIGNED_DATA {
            return Err(Error::MalformedPkcs7(
                "contentType is not signedData".into(),
            ));
        }
        let content = Element::expect(
            &content_info.body[content_type.total_len()..],
            TAG_CONTEXT_0,
        )?;
        let signed_data = Element::expect(content.body, TAG_SEQUENCE)?;
        debug!(
            "SignedData spans {} bytes inside a {} byte ContentInfo",
            signed_data.total_len(),
            bytes.len()
        );

        let body = signed_data.body;
        let version = Element::expect(body, TAG_INTEGER)?;
        let mut cursor = version.total_len();
        let digest_algorithms = Element::expect(&body[cursor..], TAG_SET)?;
        cursor += digest_algorithms.total_len();
        let inner_content = Element::expect(&body[cursor..], TAG_SEQUENCE)?;
        cursor += inner_content.total_len();
        let head = &body[..cursor];

        let mut certificates = None;
        if cursor < body.len() {
            let next = Element::parse(&body[cursor..])?;
            if next.tag == TAG_CONTEXT_0 {
                certificates = Some(next);
                cursor += next.total_len();
            }
        }
        let tail = &body[cursor..];

        // The remainder must be an optional crls [1] followed by the
        // signerInfos SET, or the structure is not SignedData at all.
        let mut rest = tail;
        let crls = Element::parse(rest)?;
        if crls.tag == TAG_CONTEXT_1 {
            rest = &rest[crls.total_len()..];
        }
        let signer_infos = Element::expect(rest, TAG_SET)?;
        if signer_infos.total_len() != rest.len() {
            return Err(Error::MalformedPkcs7(
                "trailing bytes after signerInfos".into(),
            ));
        }

        Ok(Pkcs7 {
            bytes,
            content_type: content_type.raw,
            head,
            certificates,
            tail,
        })
    }

    /// The full DER slices of the certificates in the `[0]` set, in file
    /// order. The individual certificates are never decoded.
    pub fn certificates(&self) -> Result<Vec<&'a [u8]>> {
        let Some(set) = self.certificates else {
            return Ok(Vec::new());
        };
        let mut certs = Vec::new();
        for child in set.children() {
            let child = child?;
            // CertificateChoices other than a plain Certificate (attribute
            // certs etc.) stay in the set but are not reported.
            if child.tag == TAG_SEQUENCE {
                certs.push(child.raw);
            }
        }
        Ok(certs)
    }

    /// Produces a new ContentInfo in which `cert_der` is the first element
    /// of the certificates set, any previously injected payload-bearing
    /// certificate is gone, and every other certificate keeps its original
    /// order and bytes. Creates the `[0] IMPLICIT` set when absent.
    pub fn set_superfluous_cert(&self, cert_der: &[u8]) -> Result<Vec<u8>> {
        let mut certs_body = cert_der.to_vec();
        if let Some(set) = self.certificates {
            for child in set.children() {
                let child = child?;
                if certificate::is_superfluous(child.raw) {
                    debug!(
                        "dropping previously injected certificate of {} bytes",
                        child.raw.len()
                    );
                    continue;
                }
                certs_body.extend_from_slice(child.raw);
            }
        }
        let mut signed_data_body = Vec::with_capacity(
            self.head.len() + certs_body.len() + self.tail.len() + 8,
        );
        signed_data_body.extend_from_slice(self.head);
        signed_data_body.extend_from_slice(&asn1::emit(TAG_CONTEXT_0, &certs_body));
        signed_data_body.extend_from_slice(self.tail);

        let content = asn1::emit(TAG_CONTEXT_0, &asn1::emit(TAG_SEQUENCE, &signed_data_body));
        let mut content_info_body = self.content_type.to_vec();
        content_info_body.extend_from_slice(&content);
        Ok(asn1::emit(TAG_SEQUENCE, &content_info_body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::{TAG_NULL, TAG_OCTET_STRING};

    /// Body of the plain data content type OID, 1.2.840.113549.1.7.1.
    const OID_DATA: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];

    fn dummy_cert(seed: u8) -> Vec<u8> {
        asn1::emit(TAG_SEQUENCE, &asn1::emit(TAG_OCTET_STRING, &[seed; 40]))
    }

    fn sample(certs: Option<&[Vec<u8>]>, with_crls: bool) -> Vec<u8> {
        let mut body = asn1::emit(TAG_INTEGER, &[0x01]);
        // one digest algorithm, sha256, to keep the SET non-empty
        let sha256 = [
            0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
            0x00,
        ];
        body.extend_from_slice(&asn1::emit(TAG_SET, &sha256));
        let mut inner = asn1::emit(TAG_OID, &OID_DATA);
        inner.extend_from_slice(&asn1::emit(TAG_CONTEXT_0, &asn1::emit(TAG_NULL, &[])));
        body.extend_from_slice(&asn1::emit(TAG_SEQUENCE, &inner));
        if let Some(certs) = certs {
            let concatenated: Vec<u8> = certs.iter().flatten().copied().collect();
            body.extend_from_slice(&asn1::emit(TAG_CONTEXT_0, &concatenated));
        }
        if with_crls {
            body.extend_from_slice(&asn1::emit(TAG_CONTEXT_1, &asn1::emit(TAG_SEQUENCE, &[])));
        }
        body.extend_from_slice(&asn1::emit(TAG_SET, &[]));

        let content = asn1::emit(TAG_CONTEXT_0, &asn1::emit(TAG_SEQUENCE, &body));
        let mut content_info = asn1::emit(TAG_OID, &OID_SIGNED_DATA);
        content_info.extend_from_slice(&content);
        asn1::emit(TAG_SEQUENCE, &content_info)
    }

    #[test]
    fn parse_extracts_certificates_in_order() {
        let certs = [dummy_cert(1), dummy_cert(2)];
        let bytes = sample(Some(&certs), false);
        let pkcs7 = Pkcs7::parse(&bytes).unwrap();
        let found = pkcs7.certificates().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], &certs[0][..]);
        assert_eq!(found[1], &certs[1][..]);
    }

    #[test]
    fn parse_without_certificates_set() {
        let bytes = sample(None, false);
        let pkcs7 = Pkcs7::parse(&bytes).unwrap();
        assert!(pkcs7.certificates().unwrap().is_empty());
    }

    #[test]
    fn rejects_wrong_content_type() {
        let mut body = asn1::emit(TAG_OID, &OID_DATA);
        body.extend_from_slice(&asn1::emit(TAG_CONTEXT_0, &asn1::emit(TAG_SEQUENCE, &[])));
        let bytes = asn1::emit(TAG_SEQUENCE, &body);
        assert!(matches!(
            Pkcs7::parse(&bytes),
            Err(Error::MalformedPkcs7(_))
        ));
    }

    #[test]
    fn insert_creates_absent_set() {
        let bytes = sample(None, false);
        let pkcs7 = Pkcs7::parse(&bytes).unwrap();
        let tag_cert = crate::tag::certificate::build(&[0x61u8; 256]).unwrap();
        let rewritten = pkcs7.set_superfluous_cert(&tag_cert).unwrap();
        let reparsed = Pkcs7::parse(&rewritten).unwrap();
        assert_eq!(reparsed.certificates().unwrap(), vec![&tag_cert[..]]);
    }

    #[test]
    fn insert_prepends_and_preserves_existing() {
        let certs = [dummy_cert(1), dummy_cert(2)];
        let bytes = sample(Some(&certs), true);
        let pkcs7 = Pkcs7::parse(&bytes).unwrap();
        let tag_cert = crate::tag::certificate::build(&[0x62u8; 300]).unwrap();
        let rewritten = pkcs7.set_superfluous_cert(&tag_cert).unwrap();
        let found = Pkcs7::parse(&rewritten).unwrap().certificates().unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0], &tag_cert[..]);
        assert_eq!(found[1], &certs[0][..]);
        assert_eq!(found[2], &certs[1][..]);
    }

    #[test]
    fn second_insert_replaces_not_accumulates() {
        let certs = [dummy_cert(9)];
        let bytes = sample(Some(&certs), false);
        let first = Pkcs7::parse(&bytes)
            .unwrap()
            .set_superfluous_cert(&crate::tag::certificate::build(&[0x41u8; 256]).unwrap())
            .unwrap();
        let second_cert = crate::tag::certificate::build(&[0x42u8; 512]).unwrap();
        let second = Pkcs7::parse(&first)
            .unwrap()
            .set_superfluous_cert(&second_cert)
            .unwrap();
        let found = Pkcs7::parse(&second).unwrap().certificates().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], &second_cert[..]);
        assert_eq!(found[1], &certs[0][..]);
        // Same input, same payload, same output.
        let again = Pkcs7::parse(&first)
            .unwrap()
            .set_superfluous_cert(&second_cert)
            .unwrap();
        assert_eq!(second, again);
    }

    #[test]
    fn untouched_fields_survive_byte_for_byte() {
        let certs = [dummy_cert(3)];
        let bytes = sample(Some(&certs), true);
        let pkcs7 = Pkcs7::parse(&bytes).unwrap();
        let head = pkcs7.head.to_vec();
        let tail = pkcs7.tail.to_vec();
        let rewritten = pkcs7
            .set_superfluous_cert(&crate::tag::certificate::build(&[0x11u8; 400]).unwrap())
            .unwrap();
        let reparsed = Pkcs7::parse(&rewritten).unwrap();
        assert_eq!(reparsed.head, &head[..]);
        assert_eq!(reparsed.tail, &tail[..]);
    }
}
