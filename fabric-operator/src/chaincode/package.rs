//! Chaincode package archives.
//!
//! A package is a gzipped tar holding `code.tar.gz` (itself a gzipped tar
//! with `image.json`) and `metadata.json`. Headers carry no timestamps or
//! ownership so identical inputs give identical bytes, and therefore the same
//! package id on every peer.

use fabric_api::chaincode::ChaincodeImage;
use flate2::{Compression, GzBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Runner type understood by the peers' external builder.
pub const PACKAGE_TYPE: &str = "k8s";

#[derive(Serialize)]
struct ImageJson<'a> {
    name: &'a str,
    digest: &'a str,
}

#[derive(Serialize)]
struct MetadataJson<'a> {
    #[serde(rename = "type")]
    package_type: &'a str,
    label: &'a str,
}

fn tar_gz(entries: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let encoder = GzBuilder::new().mtime(0).write(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, path, *data)?;
    }
    let mut encoder = builder.into_inner()?;
    encoder.flush()?;
    encoder.finish()
}

/// Build the package bytes for `label` running `image`.
pub fn build(label: &str, image: &ChaincodeImage) -> io::Result<Vec<u8>> {
    let image_json = serde_json::to_vec(&ImageJson {
        name: &image.name,
        digest: &image.digest,
    })?;
    let code = tar_gz(&[("image.json", &image_json)])?;
    let metadata = serde_json::to_vec(&MetadataJson {
        package_type: PACKAGE_TYPE,
        label,
    })?;
    tar_gz(&[("code.tar.gz", &code), ("metadata.json", &metadata)])
}

/// `<label>:<hex(sha256(package))>`
pub fn package_id(label: &str, package: &[u8]) -> String {
    format!("{}:{}", label, hex::encode(Sha256::digest(package)))
}

/// `<store>/<channel>/<name>/<name>-<id>-<version>.tgz`
pub fn package_path(store: &Path, channel: &str, name: &str, id: &str, version: &str) -> PathBuf {
    store
        .join(channel)
        .join(name)
        .join(format!("{}-{}-{}.tgz", name, id, version))
}

/// Write `package` to `path`, creating parent directories with mode 0755.
pub async fn write(path: &Path, package: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o755);
        builder.create(dir).await?;
    }
    tokio::fs::write(path, package).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn image() -> ChaincodeImage {
        ChaincodeImage {
            name: "hyperledgerk8s/go-contract".into(),
            digest: "sha256:abc".into(),
            pull_secret: String::new(),
        }
    }

    fn entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut tar = tar::Archive::new(GzDecoder::new(archive));
        tar.entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (path, data)
            })
            .collect()
    }

    #[test]
    fn test_package_is_byte_identical_for_same_input() {
        let a = build("cc", &image()).unwrap();
        let b = build("cc", &image()).unwrap();
        assert_eq!(a, b);
        assert_eq!(package_id("cc", &a), package_id("cc", &b));
        assert!(package_id("cc", &a).starts_with("cc:"));
        assert_ne!(a, build("cc2", &image()).unwrap());
    }

    #[test]
    fn test_package_layout() {
        let outer = entries(&build("cc", &image()).unwrap());
        assert_eq!(outer[0].0, "code.tar.gz");
        assert_eq!(outer[1].0, "metadata.json");
        let metadata: serde_json::Value = serde_json::from_slice(&outer[1].1).unwrap();
        assert_eq!(metadata, serde_json::json!({"type": "k8s", "label": "cc"}));

        let inner = entries(&outer[0].1);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].0, "image.json");
        let img: serde_json::Value = serde_json::from_slice(&inner[0].1).unwrap();
        assert_eq!(img["digest"], "sha256:abc");
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = package_path(dir.path(), "ch", "mycc", "cc", "1.0");
        assert!(path.ends_with("ch/mycc/mycc-cc-1.0.tgz"));
        write(&path, b"pkg").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"pkg");
    }
}
