#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(pkcs7) = certtag::pkcs7::Pkcs7::parse(data) {
        let _ = pkcs7.certificates();
    }
});
