//! Shared fixture builders: a small but structurally faithful PKCS#7
//! SignedData, sized through a filler payload in its inner content.

use certtag::asn1::{self, TAG_CONTEXT_0, TAG_INTEGER, TAG_OCTET_STRING, TAG_OID, TAG_SEQUENCE, TAG_SET};

/// signedData, 1.2.840.113549.1.7.2.
pub const OID_SIGNED_DATA: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
/// data, 1.2.840.113549.1.7.1.
pub const OID_DATA: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];

/// An opaque stand-in for a signer certificate.
pub fn dummy_cert(seed: u8) -> Vec<u8> {
    asn1::emit(TAG_SEQUENCE, &asn1::emit(TAG_OCTET_STRING, &[seed; 40]))
}

/// A ContentInfo/SignedData with one digest algorithm, one certificate and
/// `filler` bytes of inner content, so callers can steer the total size.
pub fn sample_pkcs7(filler: usize) -> Vec<u8> {
    let mut body = asn1::emit(TAG_INTEGER, &[0x01]);
    let sha256_algorithm = [
        0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05, 0x00,
    ];
    body.extend_from_slice(&asn1::emit(TAG_SET, &sha256_algorithm));
    let mut inner = asn1::emit(TAG_OID, &OID_DATA);
    inner.extend_from_slice(&asn1::emit(
        TAG_CONTEXT_0,
        &asn1::emit(TAG_OCTET_STRING, &vec![0x5a; filler]),
    ));
    body.extend_from_slice(&asn1::emit(TAG_SEQUENCE, &inner));
    body.extend_from_slice(&asn1::emit(TAG_CONTEXT_0, &dummy_cert(1)));
    body.extend_from_slice(&asn1::emit(TAG_SET, &[]));

    let content = asn1::emit(TAG_CONTEXT_0, &asn1::emit(TAG_SEQUENCE, &body));
    let mut content_info = asn1::emit(TAG_OID, &OID_SIGNED_DATA);
    content_info.extend_from_slice(&content);
    asn1::emit(TAG_SEQUENCE, &content_info)
}
