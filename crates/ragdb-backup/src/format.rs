use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Deserializer, Serialize};

use ragdb_core::types::{Document, Metadata};
use ragdb_core::{Error, Result};

pub const BACKUP_VERSION: &str = "1.0";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackupFormat {
    #[default]
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "json.gz")]
    JsonGzip,
}

impl BackupFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupFormat::Json => "json",
            BackupFormat::JsonGzip => "json.gz",
        }
    }

    /// `JsonGzip` for paths ending in `.gz`, otherwise `Json`.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => BackupFormat::JsonGzip,
            _ => BackupFormat::Json,
        }
    }
}

impl fmt::Display for BackupFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(BackupFormat::Json),
            "json.gz" => Ok(BackupFormat::JsonGzip),
            other => Err(Error::validation(format!("unknown backup format {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub version: String,
    pub tenant_id: String,
    pub created: DateTime<Utc>,
    pub document_count: usize,
    pub embedding_dim: usize,
    pub format: BackupFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub id: String,
    pub text: String,
    pub source_name: String,
    pub embedding: Vec<f32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Metadata,
}

impl From<Document> for BackupDocument {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            text: doc.text,
            source_name: doc.source_name,
            embedding: doc.embedding,
            metadata: doc.metadata,
        }
    }
}

impl From<BackupDocument> for Document {
    fn from(doc: BackupDocument) -> Self {
        Document {
            id: doc.id,
            text: doc.text,
            source_name: doc.source_name,
            embedding: doc.embedding,
            metadata: doc.metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupData {
    pub metadata: BackupMetadata,
    #[serde(default, deserialize_with = "null_as_default")]
    pub documents: Vec<BackupDocument>,
}

/// Only the metadata block; the documents array is skipped while parsing.
#[derive(Deserialize)]
struct MetadataOnly {
    metadata: BackupMetadata,
}

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn encode_err(e: impl fmt::Display) -> Error {
    Error::Backup(format!("failed to encode backup: {e}"))
}

fn decode_err(e: impl fmt::Display) -> Error {
    Error::Backup(format!("failed to decode backup: {e}"))
}

fn check_version(metadata: &BackupMetadata) -> Result<()> {
    if metadata.version == BACKUP_VERSION {
        Ok(())
    } else {
        Err(Error::Backup(format!("unsupported backup version: {}", metadata.version)))
    }
}

/// Pretty-printed JSON, gzip-compressed for [`BackupFormat::JsonGzip`].
pub fn write_backup<W: Write>(writer: W, data: &BackupData, format: BackupFormat) -> Result<()> {
    match format {
        BackupFormat::Json => {
            let mut writer = writer;
            serde_json::to_writer_pretty(&mut writer, data).map_err(encode_err)?;
            writer.flush()?;
        }
        BackupFormat::JsonGzip => {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            serde_json::to_writer_pretty(&mut encoder, data).map_err(encode_err)?;
            encoder.finish()?.flush()?;
        }
    }
    Ok(())
}

/// Wrap `reader` in a gzip decoder when the stream starts with the gzip magic.
fn decompressing<'a, R: Read + 'a>(reader: R) -> Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(reader);
    let gzipped = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
    if gzipped {
        Ok(Box::new(GzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}

/// Decode and check only the metadata block of a backup stream.
pub fn read_backup_metadata<R: Read>(reader: R) -> Result<BackupMetadata> {
    let envelope: MetadataOnly = serde_json::from_reader(decompressing(reader)?).map_err(decode_err)?;
    check_version(&envelope.metadata)?;
    Ok(envelope.metadata)
}

pub fn read_backup<R: Read>(reader: R) -> Result<BackupData> {
    let data: BackupData = serde_json::from_reader(decompressing(reader)?).map_err(decode_err)?;
    check_version(&data.metadata)?;
    Ok(data)
}
