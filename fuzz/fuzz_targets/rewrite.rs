#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(binary) = certtag::Binary::parse(data) {
        if let Ok(tagged) = binary.set_superfluous_cert_tag(&[0x41; 256]) {
            // Whatever came out must still parse and locate its payload.
            let reparsed = certtag::Binary::parse(&tagged).unwrap();
            let _ = reparsed.asn1_data().unwrap();
        }
    }
});
