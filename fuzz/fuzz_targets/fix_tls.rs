#![no_main]
use libfuzzer_sys::fuzz_target;
use tlsfix::elf::{BinaryImage, fixup};

fuzz_target!(|data: &[u8]| {
    if let Ok(mut image) = BinaryImage::new(data.to_vec()) {
        for _header in image.program_headers() {}

        if let Ok(tls) = image.tls() {
            let len = image.len();
            if fixup::normalize_alignment(&mut image, &tls, 64).is_err() {
                assert_eq!(image.as_bytes(), data);
            }
            if let Ok(tls) = image.tls() {
                let before = image.as_bytes().to_vec();
                match fixup::normalize_skew(&mut image, &tls) {
                    Ok(fix) if fix.is_change() => assert!(image.len() > len),
                    Ok(_) => assert_eq!(image.as_bytes(), &before[..]),
                    Err(_) => assert_eq!(image.as_bytes(), &before[..]),
                }
            }
        }
    }
});
