use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Parses a JSON file into a given type `T`.
///
/// Errors are converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let data = fs::read_to_string(file_path.as_ref()).map_err(Error::IoError)?;

    let parsed_data: T = serde_json::from_str(&data).map_err(Error::DeserializationError)?;

    Ok(parsed_data)
}

/// Writes `value` as pretty JSON. The file is written next to its target and
/// renamed into place, so readers see either the old or the new content.
pub fn write_json_file_atomic<T: Serialize>(file_path: impl AsRef<Path>, value: &T) -> Result<()> {
    let file_path = file_path.as_ref();
    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = file_path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let data = serde_json::to_vec_pretty(value)?;
    fs::write(tmp_path, data)?;
    fs::rename(tmp_path, file_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn atomic_write_round_trips_and_leaves_no_temp_file() {
        let dir = std::env::temp_dir().join(format!("parser-{}", uuid::Uuid::new_v4()));
        let path = dir.join("state.json");
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1);

        write_json_file_atomic(&path, &value).unwrap();
        value.insert("b".to_string(), 2);
        write_json_file_atomic(&path, &value).unwrap();

        let back: BTreeMap<String, i32> = parse_json_file(&path).unwrap();
        assert_eq!(back, value);
        assert!(!dir.join("state.json.tmp").exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let result: Result<BTreeMap<String, i32>> = parse_json_file("/definitely/not/here.json");
        assert!(matches!(result, Err(Error::IoError(_))));
    }
}
