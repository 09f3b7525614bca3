use std::io::Read;

use tar::{Builder, Header};

use crate::error::ContainerError;

/// Builds an uncompressed tar archive from `(path, contents)` pairs, suitable for
/// `ContainerDriver::put_archive`. Grounds the stage-in/stage-out/agent archive construction in
/// the reference implementation's `create_batch_archive`/`create_connector_archive`
/// (`cc_core/commons/docker_utils.py`), which also build a flat tar rooted at `/`.
pub fn build_tar(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ContainerError> {
    let mut builder = Builder::new(Vec::new());
    for (path, contents) in entries {
        let mut header = Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_slice())
            .map_err(|err| ContainerError::Archive(err.to_string()))?;
    }
    builder.into_inner().map_err(|err| ContainerError::Archive(err.to_string()))
}

/// Reads the first regular file out of a tar archive returned by `get_archive`, matching
/// `get_first_tarfile_member` in the reference implementation's stdout/stderr retrieval path.
pub fn first_file_contents(tar_bytes: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut archive = tar::Archive::new(tar_bytes);
    let mut entries = archive.entries().map_err(|err| ContainerError::Archive(err.to_string()))?;
    let mut entry = entries
        .next()
        .ok_or_else(|| ContainerError::Archive("archive contained no entries".to_string()))?
        .map_err(|err| ContainerError::Archive(err.to_string()))?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).map_err(|err| ContainerError::Archive(err.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_file() {
        let tar_bytes = build_tar(&[("restricted_red.json".to_string(), b"{}".to_vec())]).unwrap();
        let contents = first_file_contents(&tar_bytes).unwrap();
        assert_eq!(contents, b"{}");
    }
}
