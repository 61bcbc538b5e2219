//! Encode and decode command implementations.

use super::{read, read_json, write, CliResult};
use std::path::Path;
use tidedb_sync_protocol::{from_cbor, to_cbor, to_json, ChangeSet};
use tracing::info;

/// Converts a JSON change set to CBOR.
pub fn encode(input: &Path, output: &Path) -> CliResult<()> {
    let changes: ChangeSet = read_json(input)?;
    let bytes = to_cbor(&changes)?;
    write(output, &bytes)?;
    info!(changes = changes.count(), bytes = bytes.len(), "encoded change set");
    Ok(())
}

/// Converts a CBOR change set to JSON, printing it if no output is given.
pub fn decode(input: &Path, output: Option<&Path>) -> CliResult<()> {
    let changes: ChangeSet = from_cbor(&read(input)?)?;
    let json = to_json(&changes)?;
    match output {
        Some(path) => write(path, json.as_bytes())?,
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CliError;

    #[test]
    fn json_survives_cbor() {
        let dir = tempfile::tempdir().unwrap();
        let json_in = dir.path().join("in.json");
        let cbor = dir.path().join("changes.cbor");
        let json_out = dir.path().join("out.json");
        std::fs::write(
            &json_in,
            r#"{"tasks": {"updated": [{"id": "t1", "done": true, "position": 2.5}], "deleted": ["t2"]}}"#,
        )
        .unwrap();

        encode(&json_in, &cbor).unwrap();
        decode(&cbor, Some(&json_out)).unwrap();

        let before: ChangeSet = read_json(&json_in).unwrap();
        let after: ChangeSet = read_json(&json_out).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn garbage_cbor_is_a_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let cbor = dir.path().join("bad.cbor");
        std::fs::write(&cbor, [0xff, 0x00, 0x13]).unwrap();
        assert!(matches!(decode(&cbor, None), Err(CliError::Protocol(_))));
    }
}
