//! Decoding registry records into keyed [`EnvironmentRecord`]s.

use prenv_core::{EnvironmentRecord, RawEnvironment, ReleaseValues};

use crate::error::DecodeError;

/// Read `prNumber` and `prSHA` out of a record's embedded values.
///
/// Records that fail here are excluded from the observed set for the tick;
/// they are never deleted because of a decode failure.
pub fn decode(raw: &RawEnvironment) -> Result<EnvironmentRecord, DecodeError> {
    let Some(values) = raw.values.as_ref() else {
        return Err(DecodeError::MissingValues {
            handle: raw.handle.clone(),
        });
    };

    let values: ReleaseValues =
        serde_json::from_value(values.clone()).map_err(|e| DecodeError::Malformed {
            handle: raw.handle.clone(),
            message: e.to_string(),
        })?;

    if values.pr_sha.0.trim().is_empty() {
        return Err(DecodeError::EmptyFingerprint {
            handle: raw.handle.clone(),
        });
    }

    Ok(EnvironmentRecord {
        change_request: values.pr_number,
        deployed_sha: values.pr_sha,
        handle: raw.handle.clone(),
    })
}

/// Decode every record, splitting the successes from the failures.
pub fn decode_all(raw: &[RawEnvironment]) -> (Vec<EnvironmentRecord>, Vec<DecodeError>) {
    let mut records = Vec::with_capacity(raw.len());
    let mut failures = Vec::new();
    for entry in raw {
        match decode(entry) {
            Ok(record) => records.push(record),
            Err(err) => failures.push(err),
        }
    }
    (records, failures)
}
