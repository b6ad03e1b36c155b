//! Workspace bundles: a zip holding `manifest.json` plus the SQLite file.

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DB_FILE: &str = "attendance.sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/attendance.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "attendance-workspace-v1";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    version: u32,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    exported_at: Option<String>,
    db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_entry<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start {name}"))?;
    zip.write_all(bytes)
        .with_context(|| format!("failed to write {name}"))
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> anyhow::Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("bundle missing {name}"))?;
    let mut out = Vec::new();
    entry
        .read_to_end(&mut out)
        .with_context(|| format!("failed to read {name}"))?;
    Ok(out)
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.display());
    }
    let db_bytes =
        std::fs::read(&db_path).with_context(|| format!("failed to read {}", db_path.display()))?;

    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(chrono::Utc::now().to_rfc3339()),
        db_sha256: sha256_hex(&db_bytes),
    };
    let manifest_json =
        serde_json::to_vec_pretty(&manifest).context("failed to serialize manifest")?;

    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(out_path)
        .with_context(|| format!("failed to create bundle {}", out_path.display()))?;
    let mut zip = ZipWriter::new(file);
    write_entry(&mut zip, MANIFEST_ENTRY, &manifest_json)?;
    write_entry(&mut zip, DB_ENTRY, &db_bytes)?;
    zip.finish().context("failed to finalize bundle")?;

    tracing::info!(bundle = %out_path.display(), sha256 = %manifest.db_sha256, "bundle exported");
    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: 2,
        db_sha256: manifest.db_sha256,
    })
}

/// Restores a bundle into `workspace_path`, replacing its database.
///
/// The database entry is checked against the manifest checksum before the
/// existing database is touched.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
    let mut archive = ZipArchive::new(file).context("invalid zip archive")?;

    let manifest: Manifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT_V1 || manifest.version != 1 {
        bail!(
            "unsupported bundle format: {} v{}",
            manifest.format,
            manifest.version
        );
    }

    let db_bytes = read_entry(&mut archive, DB_ENTRY)?;
    let actual = sha256_hex(&db_bytes);
    if actual != manifest.db_sha256 {
        return Err(anyhow!(
            "database checksum mismatch: manifest {} but entry is {}",
            manifest.db_sha256,
            actual
        ));
    }

    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.display()))?;
    let staged = workspace_path.join(format!("{DB_FILE}.importing"));
    std::fs::write(&staged, &db_bytes)
        .with_context(|| format!("failed to stage {}", staged.display()))?;
    // Atomic on the same filesystem.
    let dst = workspace_path.join(DB_FILE);
    std::fs::rename(&staged, &dst)
        .with_context(|| format!("failed to move database into {}", dst.display()))?;

    tracing::info!(
        bundle = %in_path.display(),
        workspace = %workspace_path.display(),
        exported_at = ?manifest.exported_at,
        app_version = ?manifest.app_version,
        "bundle imported"
    );
    Ok(ImportSummary {
        bundle_format_detected: manifest.format,
        db_sha256: actual,
    })
}
