//! Small helpers for files outside of the key-value store.

use std::{fs, io::Write, path::Path};

use crate::commons::error::IrrdIoError;

/// Saves a file, creating parent dirs as needed.
pub fn save(content: &[u8], full_path: &Path) -> Result<(), IrrdIoError> {
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            IrrdIoError::new(format!("Could not create dir path for: {}", parent.to_string_lossy()), e)
        })?;
    }
    let mut f = fs::File::create(full_path)
        .map_err(|e| IrrdIoError::new(format!("Could not create file: {}", full_path.to_string_lossy()), e))?;
    f.write_all(content)
        .map_err(|e| IrrdIoError::new(format!("Could not write to: {}", full_path.to_string_lossy()), e))?;

    trace!("Saved file: {}", full_path.to_string_lossy());
    Ok(())
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("irrd.pid");

        save(b"1234", &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"1234");

        save(b"42", &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "42");
    }
}
