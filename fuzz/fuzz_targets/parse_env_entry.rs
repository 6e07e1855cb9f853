#![no_main]

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt as _;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let (name, value) = kart_handoff::split_env_entry(OsStr::from_bytes(data));
    let (name, value) = (name.as_bytes(), value.as_bytes());

    assert!(!name.iter().skip(1).any(|&b| b == b'='));
    if name.len() == data.len() {
        assert!(value.is_empty());
    } else {
        assert_eq!(name.len() + 1 + value.len(), data.len());
        assert_eq!(&data[..name.len()], name);
        assert_eq!(&data[name.len() + 1..], value);
    }
});
