use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

use crate::manifest::{parse_vars_doc, VariableBag};
use crate::{ErrorKind, Result, ResultExt};

/// Archive member holding the manifest bytes
pub const MANIFEST_MEMBER: &str = "compose.yml";
/// Directory inside the archive holding artifact files
pub const ARTIFACT_DIR: &str = "artifacts";

/// A loaded release archive
///
/// Artifacts that parse as a yaml mapping of scalars contribute to the
/// variable bag, later members overriding earlier ones; opaque artifacts
/// are listed but contribute nothing.
pub struct ReleaseArchive {
    pub manifest: String,
    pub vars: VariableBag,
    pub artifacts: Vec<String>,
}

/// Package a manifest plus artifact files into a single tar
///
/// The archive is plain POSIX tar; a `.gz`/`.tgz` output path gets gzip
/// compression on top.
pub fn pack(manifest_path: &Path, artifacts: &[PathBuf], output: &Path) -> Result<()> {
    let mut manifest = Vec::new();
    File::open(manifest_path)
        .chain_err(|| format!("could not open manifest {}", manifest_path.display()))?
        .read_to_end(&mut manifest)?;

    let mut builder = Builder::new(Vec::new());
    append_member(&mut builder, MANIFEST_MEMBER, &manifest)?;
    for art in artifacts {
        let basename = art
            .file_name()
            .ok_or_else(|| ErrorKind::InvalidArchive(format!("artifact {} has no basename", art.display())))?
            .to_string_lossy()
            .to_string();
        let mut data = Vec::new();
        File::open(art)
            .chain_err(|| format!("could not open artifact {}", art.display()))?
            .read_to_end(&mut data)?;
        append_member(&mut builder, &format!("{}/{}", ARTIFACT_DIR, basename), &data)?;
        debug!("Packed artifact {} ({} bytes)", basename, data.len());
    }
    let tarball = builder.into_inner()?;

    let mut out = File::create(output)
        .chain_err(|| format!("could not create archive {}", output.display()))?;
    if is_gzip_path(output) {
        let mut enc = GzEncoder::new(out, Compression::default());
        enc.write_all(&tarball)?;
        enc.finish()?;
    } else {
        out.write_all(&tarball)?;
    }
    info!(
        "Wrote {} with {} artifacts to {}",
        MANIFEST_MEMBER,
        artifacts.len(),
        output.display()
    );
    Ok(())
}

/// Load a release archive, transparently decompressing gzip
pub fn load(path: &Path) -> Result<ReleaseArchive> {
    let mut raw = Vec::new();
    File::open(path)
        .chain_err(|| format!("could not open archive {}", path.display()))?
        .read_to_end(&mut raw)?;
    // gzip magic bytes
    let tarball = if raw.len() > 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        let mut dec = GzDecoder::new(Cursor::new(raw));
        let mut out = Vec::new();
        dec.read_to_end(&mut out)
            .chain_err(|| ErrorKind::InvalidArchive("bad gzip stream".into()))?;
        out
    } else {
        raw
    };

    let mut manifest = None;
    let mut vars = VariableBag::new();
    let mut artifacts = vec![];
    let mut archive = Archive::new(Cursor::new(tarball));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        let name = path
            .strip_prefix(".")
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        if name == MANIFEST_MEMBER {
            let mut data = String::new();
            entry.read_to_string(&mut data)?;
            manifest = Some(data);
        } else if let Some(basename) = artifact_name(&name) {
            let mut data = String::new();
            entry.read_to_string(&mut data)?;
            match parse_vars_doc(&data) {
                Ok(contributed) => {
                    debug!("Artifact {} contributed {} variables", basename, contributed.len());
                    vars.extend(contributed);
                }
                Err(_) => debug!("Artifact {} is opaque", basename),
            }
            artifacts.push(basename);
        }
    }

    match manifest {
        Some(manifest) => Ok(ReleaseArchive {
            manifest,
            vars,
            artifacts,
        }),
        None => Err(ErrorKind::InvalidArchive(format!("no {} member", MANIFEST_MEMBER)).into()),
    }
}

fn append_member(builder: &mut Builder<Vec<u8>>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_ustar();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

fn artifact_name(member: &str) -> Option<String> {
    let rest = member.strip_prefix(ARTIFACT_DIR)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest.to_string())
}

fn is_gzip_path(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some("gz") | Some("tgz") => true,
        _ => false,
    }
}
