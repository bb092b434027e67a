//! Digest sinks: JSON report and Parquet spreadsheet export.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use async_trait::async_trait;
use jobdigest_core::JobRecord;
use jobdigest_storage::sha256_hex;
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use tokio::fs;

use crate::digest::Digest;

pub const PREP_QUESTION_SEPARATOR: &str = " | ";

/// A delivery target for a finished digest. A digest counts as delivered only when every
/// configured sink returns `Ok`.
#[async_trait]
pub trait DigestSink: Send + Sync {
    fn name(&self) -> &str;

    /// Delivers the digest, returning the paths written.
    async fn deliver(&self, digest: &Digest) -> Result<Vec<PathBuf>>;
}

/// `digest_<date>.json`: the full digest payload.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DigestSink for JsonReportSink {
    fn name(&self) -> &str {
        "json_report"
    }

    async fn deliver(&self, digest: &Digest) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(format!("digest_{}.json", digest.local_date));
        let bytes = serde_json::to_vec_pretty(digest).context("serializing digest report")?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(vec![path])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// `digest_<date>.parquet`, one row per ranked record, plus a sha256 manifest. Written even
/// when the digest is empty so every run leaves a trace.
#[derive(Debug, Clone)]
pub struct ParquetSink {
    dir: PathBuf,
}

impl ParquetSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DigestSink for ParquetSink {
    fn name(&self) -> &str {
        "parquet"
    }

    async fn deliver(&self, digest: &Digest) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let parquet_path = self.dir.join(format!("digest_{}.parquet", digest.local_date));
        write_digest_parquet(&parquet_path, digest)?;

        let manifest = ParquetManifest {
            schema_version: 1,
            files: vec![manifest_entry("digest", &self.dir, &parquet_path)?],
        };
        let manifest_path = self
            .dir
            .join(format!("digest_{}.manifest.json", digest.local_date));
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;
        Ok(vec![parquet_path, manifest_path])
    }
}

pub fn digest_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        ArrowField::new("role", DataType::Utf8, false),
        ArrowField::new("company", DataType::Utf8, false),
        ArrowField::new("location", DataType::Utf8, false),
        ArrowField::new("link", DataType::Utf8, true),
        ArrowField::new("posted", DataType::Utf8, true),
        ArrowField::new("source", DataType::Utf8, false),
        ArrowField::new("fit_score", DataType::UInt32, false),
        ArrowField::new("preference_match", DataType::Utf8, false),
        ArrowField::new("why_fit", DataType::Utf8, false),
        ArrowField::new("cv_gap", DataType::Utf8, false),
        ArrowField::new("prep_questions", DataType::Utf8, true),
        ArrowField::new("apply_tips", DataType::Utf8, true),
        ArrowField::new("notes", DataType::Utf8, true),
        ArrowField::new("top_pick", DataType::Boolean, false),
    ]))
}

fn string_column(records: &[JobRecord], f: impl Fn(&JobRecord) -> &str) -> StringArray {
    StringArray::from(records.iter().map(|r| Some(f(r))).collect::<Vec<_>>())
}

/// Empty strings become nulls.
fn optional_column(records: &[JobRecord], f: impl Fn(&JobRecord) -> &str) -> StringArray {
    StringArray::from(
        records
            .iter()
            .map(|r| Some(f(r)).filter(|v| !v.is_empty()))
            .collect::<Vec<_>>(),
    )
}

pub fn write_digest_parquet(path: &Path, digest: &Digest) -> Result<()> {
    let records = digest.records.as_slice();
    let prep_questions = StringArray::from(
        records
            .iter()
            .map(|r| {
                (!r.prep_questions.is_empty())
                    .then(|| r.prep_questions.join(PREP_QUESTION_SEPARATOR))
            })
            .collect::<Vec<_>>(),
    );
    let fit_scores = UInt32Array::from(records.iter().map(|r| r.fit_score).collect::<Vec<_>>());
    let top_picks = BooleanArray::from(
        records
            .iter()
            .map(|r| digest.is_top_pick(r))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        digest_schema(),
        vec![
            Arc::new(string_column(records, |r| r.role.as_str())),
            Arc::new(string_column(records, |r| r.company.as_str())),
            Arc::new(string_column(records, |r| r.location.as_str())),
            Arc::new(optional_column(records, |r| r.link.as_str())),
            Arc::new(optional_column(records, |r| r.posted.as_str())),
            Arc::new(string_column(records, |r| r.source.as_str())),
            Arc::new(fit_scores),
            Arc::new(string_column(records, |r| r.preference_match.as_str())),
            Arc::new(string_column(records, |r| r.why_fit.as_str())),
            Arc::new(string_column(records, |r| r.cv_gap.as_str())),
            Arc::new(prep_questions),
            Arc::new(optional_column(records, |r| r.apply_tips.as_str())),
            Arc::new(optional_column(records, |r| r.notes.as_str())),
            Arc::new(top_picks),
        ],
    )
    .context("building digest record batch")?;
    write_parquet(path, batch)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, base_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(base_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use parquet::file::reader::{FileReader, SerializedFileReader};

    use super::*;
    use crate::dedup::tests::record;
    use crate::digest::DigestMeta;

    fn digest(records: Vec<JobRecord>) -> Digest {
        Digest::assemble(
            records,
            12,
            DigestMeta {
                generated_at: Utc.with_ymd_and_hms(2026, 2, 24, 8, 0, 0).single().unwrap(),
                local_date: "2026-02-24".into(),
                window_hours: 24,
                preferences: "London".into(),
                sources_summary: "test".into(),
            },
        )
    }

    #[tokio::test]
    async fn json_report_contains_ranked_records() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonReportSink::new(dir.path());
        let paths = sink
            .deliver(&digest(vec![
                record("https://x/1", 72, "a"),
                record("https://x/2", 88, "b"),
            ]))
            .await
            .unwrap();
        assert_eq!(paths, vec![dir.path().join("digest_2026-02-24.json")]);

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&paths[0]).unwrap()).unwrap();
        assert_eq!(value["records"][0]["source"], "b");
        assert_eq!(value["top_pick"]["fit_score"], 88);
        assert_eq!(value["window_hours"], 24);
    }

    #[tokio::test]
    async fn parquet_export_writes_rows_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ParquetSink::new(dir.path());
        let mut first = record("https://x/1", 80, "a");
        first.prep_questions = vec!["Q1".into(), "Q2".into()];
        let paths = sink
            .deliver(&digest(vec![first, record("", 75, "b")]))
            .await
            .unwrap();
        assert_eq!(paths.len(), 2);

        let reader = SerializedFileReader::new(File::open(&paths[0]).unwrap()).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 2);

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&paths[1]).unwrap()).unwrap();
        let bytes = std::fs::read(&paths[0]).unwrap();
        assert_eq!(manifest["files"][0]["path"], "digest_2026-02-24.parquet");
        assert_eq!(manifest["files"][0]["sha256"], sha256_hex(&bytes));
        assert_eq!(manifest["files"][0]["bytes"], bytes.len() as u64);
    }

    #[tokio::test]
    async fn empty_digest_still_exports() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ParquetSink::new(dir.path())
            .deliver(&digest(Vec::new()))
            .await
            .unwrap();
        let reader = SerializedFileReader::new(File::open(&paths[0]).unwrap()).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 0);
    }
}
