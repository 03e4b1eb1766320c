//! Builds the superfluous certificate that smuggles a payload into
//! `SignedData.certificates`.
//!
//! The certificate is syntactically valid X.509 v3 DER and semantically
//! junk: fixed issuer/subject/validity/key/signature constants that no
//! verifier will ever chain to. Its single extension carries the payload as
//! the raw OCTET STRING value directly after the marker OID, which is what
//! makes the payload findable again by [`super::find_tag`].

use crate::asn1::{
    self, TAG_BIT_STRING, TAG_CONTEXT_0, TAG_CONTEXT_3, TAG_INTEGER, TAG_OCTET_STRING,
    TAG_PRINTABLE_STRING, TAG_SEQUENCE, TAG_SET, TAG_UTC_TIME,
};
use crate::error::{Error, Result};
use crate::tag::{find_all, MARKER, MARKER_OID, MAX_PAYLOAD_LEN, MIN_PAYLOAD_LEN};

/// AlgorithmIdentifier for sha256WithRSAEncryption (1.2.840.113549.1.1.11)
/// with its NULL parameter, as one pre-encoded SEQUENCE.
const ALG_SHA256_RSA: [u8; 15] = [
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b, 0x05, 0x00,
];

/// AlgorithmIdentifier for rsaEncryption (1.2.840.113549.1.1.1).
const ALG_RSA: [u8; 15] = [
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
];

/// OID commonName (2.5.4.3).
const OID_COMMON_NAME: [u8; 5] = [0x06, 0x03, 0x55, 0x04, 0x03];

const COMMON_NAME: &[u8] = b"Dummy Tag Certificate";

/// The key is never used, so any well-formed RSAPublicKey does. 128-bit
/// pseudo modulus, public exponent 65537.
const RSA_MODULUS: [u8; 17] = [
    0x00, 0xa7, 0x3b, 0x94, 0xe1, 0x0c, 0x52, 0x6f, 0x88, 0xd3, 0x21, 0x7a, 0x45, 0x9e, 0xbc,
    0x06, 0xef,
];
const RSA_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// Sixteen fixed bytes standing in for a signature.
const SIGNATURE: [u8; 16] = [
    0x5a, 0x1e, 0x37, 0xc0, 0x9f, 0x64, 0x28, 0xb1, 0x7d, 0xe2, 0x4b, 0x90, 0x33, 0x86, 0xc5,
    0x0a,
];

fn name() -> Vec<u8> {
    let mut attribute = OID_COMMON_NAME.to_vec();
    attribute.extend_from_slice(&asn1::emit(TAG_PRINTABLE_STRING, COMMON_NAME));
    asn1::emit(
        TAG_SEQUENCE,
        &asn1::emit(TAG_SET, &asn1::emit(TAG_SEQUENCE, &attribute)),
    )
}

fn validity() -> Vec<u8> {
    let mut body = asn1::emit(TAG_UTC_TIME, b"130101000000Z");
    body.extend_from_slice(&asn1::emit(TAG_UTC_TIME, b"130401000000Z"));
    asn1::emit(TAG_SEQUENCE, &body)
}

fn subject_public_key_info() -> Vec<u8> {
    let mut key = asn1::emit(TAG_INTEGER, &RSA_MODULUS);
    key.extend_from_slice(&asn1::emit(TAG_INTEGER, &RSA_EXPONENT));
    let key = asn1::emit(TAG_SEQUENCE, &key);
    // BIT STRING with zero unused bits wrapping the RSAPublicKey.
    let mut bits = vec![0x00];
    bits.extend_from_slice(&key);
    let mut body = ALG_RSA.to_vec();
    body.extend_from_slice(&asn1::emit(TAG_BIT_STRING, &bits));
    asn1::emit(TAG_SEQUENCE, &body)
}

/// The payload-bearing extension. No `critical` flag is emitted, so the
/// OCTET STRING header lands directly after the marker OID and the search
/// pattern stays contiguous.
fn extensions(payload: &[u8]) -> Vec<u8> {
    let mut extension = MARKER_OID.to_vec();
    extension.extend_from_slice(&asn1::emit(TAG_OCTET_STRING, payload));
    asn1::emit(
        TAG_CONTEXT_3,
        &asn1::emit(TAG_SEQUENCE, &asn1::emit(TAG_SEQUENCE, &extension)),
    )
}

/// Assembles the certificate DER around `payload`.
///
/// Payload length must be within `[256, 65535]` so that the OCTET STRING
/// length encodes as exactly `0x82 hi lo`; anything else would change the
/// length of the marker pattern and fails with [`Error::Unsupported`].
pub fn build(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < MIN_PAYLOAD_LEN || payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::Unsupported(format!(
            "tag payload must be {MIN_PAYLOAD_LEN}..={MAX_PAYLOAD_LEN} bytes, got {}",
            payload.len()
        )));
    }

    // TBSCertificate: version v3 (extensions require it), serial 1, fixed
    // algorithm/issuer/validity/subject/key, then the payload extension.
    let mut tbs = asn1::emit(TAG_CONTEXT_0, &asn1::emit(TAG_INTEGER, &[0x02]));
    tbs.extend_from_slice(&asn1::emit(TAG_INTEGER, &[0x01]));
    tbs.extend_from_slice(&ALG_SHA256_RSA);
    tbs.extend_from_slice(&name());
    tbs.extend_from_slice(&validity());
    tbs.extend_from_slice(&name());
    tbs.extend_from_slice(&subject_public_key_info());
    tbs.extend_from_slice(&extensions(payload));

    let mut body = asn1::emit(TAG_SEQUENCE, &tbs);
    body.extend_from_slice(&ALG_SHA256_RSA);
    let mut bits = vec![0x00];
    bits.extend_from_slice(&SIGNATURE);
    body.extend_from_slice(&asn1::emit(TAG_BIT_STRING, &bits));
    let certificate = asn1::emit(TAG_SEQUENCE, &body);

    let matches = find_all(&certificate, &MARKER).len();
    if matches != 1 {
        // A payload that itself embeds the marker would defeat the locator.
        return Err(Error::MarkerNotFound(matches));
    }
    Ok(certificate)
}

/// True when `cert_der` carries a payload marker, i.e. it was produced by
/// an earlier [`build`] call.
pub fn is_superfluous(cert_der: &[u8]) -> bool {
    !find_all(cert_der, &MARKER).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::Element;
    use crate::tag::find_tag;

    #[test]
    fn rejects_out_of_range_payloads() {
        assert!(matches!(
            build(&[0u8; 255]),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            build(&vec![0u8; 65536]),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn payload_is_locatable() {
        let payload = [0x41u8; 256];
        let cert = build(&payload).unwrap();
        let (offset, len) = find_tag(&cert, 0).unwrap();
        assert_eq!(len, 256);
        assert_eq!(&cert[offset..offset + len], &payload[..]);
        assert!(is_superfluous(&cert));
    }

    #[test]
    fn certificate_is_well_formed_der() {
        let cert = build(&[0x7fu8; 1024]).unwrap();
        let outer = Element::expect(&cert, 0x30).unwrap();
        assert_eq!(outer.total_len(), cert.len());
        // Certificate ::= SEQUENCE { tbs, algorithm, signature }
        let fields: Vec<_> = outer.children().collect::<crate::error::Result<_>>().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].tag, 0x30);
        assert_eq!(fields[1].tag, 0x30);
        assert_eq!(fields[2].tag, 0x03);
    }

    #[test]
    fn payload_containing_marker_is_rejected() {
        let mut payload = vec![0u8; 300];
        payload[10..10 + MARKER.len()].copy_from_slice(&MARKER);
        assert!(matches!(build(&payload), Err(Error::MarkerNotFound(2))));
    }

    #[test]
    fn largest_payload_builds() {
        let cert = build(&vec![0x55u8; MAX_PAYLOAD_LEN]).unwrap();
        let (_, len) = find_tag(&cert, 0).unwrap();
        assert_eq!(len, MAX_PAYLOAD_LEN);
    }
}
