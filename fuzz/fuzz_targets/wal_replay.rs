#![no_main]

use libfuzzer_sys::fuzz_target;
use quiver_db::wal::{RecordError, Wal};

fuzz_target!(|data: &[u8]| {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fuzz.wal");
    std::fs::write(&path, data).unwrap();

    // Replay must never panic, whatever the log contains.
    let _ = Wal::open(&path, |op, payload| {
        if op == "ADD_VECTOR" {
            let _ = quiver_db::engine::parse_vector(payload);
            Ok(())
        } else {
            Err(RecordError::UnknownOp(op.to_string()))
        }
    });
});
