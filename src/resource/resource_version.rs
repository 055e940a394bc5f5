use crate::Result;
use crate::WatchError;

/// Parses the resource version stamped on an object.
///
/// Objects always carry a version once stored, so an empty string is an error.
pub fn parse_resource_version(value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|source| {
        WatchError::InvalidResourceVersion {
            value: value.to_string(),
            source,
        }
        .into()
    })
}

/// Parses the resource version a client asked to watch from.
///
/// `""` and `"0"` both mean "start from now".
pub fn parse_requested_resource_version(value: &str) -> Result<u64> {
    if value.is_empty() {
        return Ok(0);
    }
    parse_resource_version(value)
}
