#![no_main]

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt as _;
use std::path::PathBuf;

use kart_contracts::CONTROL_ENV_VAR;
use kart_handoff::{CounterId, InvocationContext};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > 64 * 1024 {
        &data[..64 * 1024]
    } else {
        data
    };

    // NUL separates environ entries from argv, newlines separate items.
    let (env_part, argv_part) = match data.iter().position(|&b| b == 0) {
        Some(pos) => (&data[..pos], &data[pos + 1..]),
        None => (data, &data[data.len()..]),
    };
    let entries = env_part.split(|&b| b == b'\n').map(OsStr::from_bytes);
    let argv = argv_part
        .split(|&b| b == b'\n')
        .map(|a| OsStr::from_bytes(a).to_os_string());

    let ctx = InvocationContext::from_raw_environ(
        1,
        entries,
        argv,
        PathBuf::from("/"),
        CONTROL_ENV_VAR,
    );
    let Ok(bytes) = ctx.payload(CounterId::from_raw(1)).to_json() else {
        return;
    };
    let v: serde_json::Value = serde_json::from_slice(&bytes).expect("payload is JSON");
    assert!(v["environ"].get(CONTROL_ENV_VAR).is_none());
    assert_eq!(v["argv"].as_array().map(Vec::len), Some(ctx.argv.len()));
});
