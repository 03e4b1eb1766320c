#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(binary) = certtag::Binary::parse(data) {
        let _ = binary.asn1_data();
        let _ = binary.certificate_offset();
        let _ = binary.appended_tag();
    }
});
