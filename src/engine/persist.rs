//! Binary storage for incident records.
//!
//! File format: incidents.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id: u64 (little-endian)
//! - created_at: i64 unix seconds (little-endian)
//! - description: u32 length + UTF-8 bytes
//! - resolution: u32 length + UTF-8 bytes
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;

use crate::engine::store::IncidentStore;
use crate::incidents::IncidentRecord;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Upper bound for a length-prefixed string field (16 MiB). Entry bytes are
/// not covered by the header checksum, so a corrupt length prefix must not
/// drive the allocation.
const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// Errors that can occur during persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file was written with a different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Storage manager for the incident record file.
pub struct RecordFile {
    path: PathBuf,
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

impl RecordFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load all records, requiring the file to match the active model and
    /// dimension. Use `load_any_model` when re-embedding after a model change.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<Vec<IncidentRecord>, PersistError> {
        let (header, records) = self.read_all()?;

        if header.model_id != *expected_model_id {
            return Err(PersistError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(PersistError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(records)
    }

    /// Load all records regardless of which model wrote the file. Embeddings
    /// come back with the file's dimension and must be regenerated before the
    /// records can join a store bound to a different model.
    pub fn load_any_model(&self) -> Result<Vec<IncidentRecord>, PersistError> {
        let (_, records) = self.read_all()?;
        Ok(records)
    }

    /// Save the store's records.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, store: &IncidentStore, model_id: &[u8; 32]) -> Result<(), PersistError> {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, store, model_id);

        if result.is_err() {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn read_all(&self) -> Result<(Header, Vec<IncidentRecord>), PersistError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;

        let mut records = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            records.push(Self::read_entry(&mut reader, header.dimensions as usize)?);
        }

        Ok((header, records))
    }

    fn write_to_file(
        &self,
        path: &Path,
        store: &IncidentStore,
        model_id: &[u8; 32],
    ) -> Result<(), PersistError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: store.dimensions() as u16,
            entry_count: store.len() as u64,
        };
        Self::write_header(&mut writer, &header)?;

        for record in store.iter() {
            Self::write_entry(&mut writer, record)?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(reader: &mut BufReader<File>) -> Result<Header, PersistError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];

        // Version check first
        if version > FORMAT_VERSION {
            return Err(PersistError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let entry_count = u64::from_le_bytes(
            header_bytes[35..43]
                .try_into()
                .expect("slice is exactly 8 bytes"),
        );
        let stored_checksum = u32::from_le_bytes(
            header_bytes[43..47]
                .try_into()
                .expect("slice is exactly 4 bytes"),
        );

        // Verify checksum (computed over header without checksum field)
        let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
        if stored_checksum != computed_checksum {
            return Err(PersistError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }

    fn write_header(writer: &mut BufWriter<File>, header: &Header) -> Result<(), PersistError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_entry(
        reader: &mut BufReader<File>,
        dimensions: usize,
    ) -> Result<IncidentRecord, PersistError> {
        let mut id_bytes = [0u8; 8];
        reader.read_exact(&mut id_bytes)?;
        let id = u64::from_le_bytes(id_bytes);

        let mut ts_bytes = [0u8; 8];
        reader.read_exact(&mut ts_bytes)?;
        let created_at = DateTime::from_timestamp(i64::from_le_bytes(ts_bytes), 0)
            .ok_or_else(|| PersistError::InvalidFormat(format!("bad timestamp for record {id}")))?;

        let description = Self::read_string(reader)?;
        let resolution = Self::read_string(reader)?;

        let mut embedding = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            reader.read_exact(&mut float_bytes)?;
            embedding.push(f32::from_le_bytes(float_bytes));
        }

        Ok(IncidentRecord {
            id,
            description,
            resolution,
            embedding,
            created_at,
        })
    }

    fn write_entry(writer: &mut BufWriter<File>, record: &IncidentRecord) -> Result<(), PersistError> {
        writer.write_all(&record.id.to_le_bytes())?;
        writer.write_all(&record.created_at.timestamp().to_le_bytes())?;

        Self::write_string(writer, &record.description)?;
        Self::write_string(writer, &record.resolution)?;

        for &value in &record.embedding {
            writer.write_all(&value.to_le_bytes())?;
        }

        Ok(())
    }

    fn read_string(reader: &mut BufReader<File>) -> Result<String, PersistError> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_STRING_LEN {
            return Err(PersistError::InvalidFormat(format!(
                "string field length {len} exceeds maximum {MAX_STRING_LEN}"
            )));
        }

        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;

        String::from_utf8(bytes)
            .map_err(|_| PersistError::InvalidFormat("string field is not valid UTF-8".to_string()))
    }

    fn write_string(writer: &mut BufWriter<File>, value: &str) -> Result<(), PersistError> {
        writer.write_all(&(value.len() as u32).to_le_bytes())?;
        writer.write_all(value.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::embeddings::Embedder;
    use crate::incidents::IncidentDraft;
    use crate::tests::support::StubEmbedder;

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn populated_store(embedder: &StubEmbedder) -> IncidentStore {
        let mut store = IncidentStore::new(embedder.dimensions());
        for (description, resolution) in [
            ("mail server rejects attachments", "raise the size limit"),
            ("wifi drops in meeting rooms", "replace access point"),
            ("unresolved mystery crash", ""),
        ] {
            store
                .insert(
                    IncidentDraft {
                        description: description.into(),
                        resolution: resolution.into(),
                    },
                    embedder,
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_save_and_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = RecordFile::new(dir.path().join("incidents.bin"));
        let model_id = test_model_id();

        let store = IncidentStore::new(16);
        file.save(&store, &model_id).unwrap();

        assert!(file.exists());

        let loaded = file.load(&model_id, 16).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file = RecordFile::new(dir.path().join("incidents.bin"));
        let model_id = test_model_id();

        let embedder = StubEmbedder::new();
        let store = populated_store(&embedder);
        file.save(&store, &model_id).unwrap();

        let loaded = file.load(&model_id, embedder.dimensions()).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].description, "mail server rejects attachments");
        assert_eq!(loaded[0].resolution, "raise the size limit");
        assert_eq!(loaded[0].embedding, store.get(loaded[0].id).unwrap().embedding);
        assert_eq!(loaded[2].resolution, "");
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let file = RecordFile::new(dir.path().join("incidents.bin"));

        let store = IncidentStore::new(16);
        file.save(&store, &test_model_id()).unwrap();

        let mut wrong_model_id = [0u8; 32];
        wrong_model_id[0] = 0xFF;

        let result = file.load(&wrong_model_id, 16);
        assert!(matches!(result, Err(PersistError::ModelMismatch)));

        // load_any_model ignores the binding
        assert!(file.load_any_model().is_ok());
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let file = RecordFile::new(dir.path().join("incidents.bin"));
        let model_id = test_model_id();

        let store = IncidentStore::new(16);
        file.save(&store, &model_id).unwrap();

        let result = file.load(&model_id, 384);
        assert!(matches!(result, Err(PersistError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.bin");
        let file = RecordFile::new(path.clone());
        let model_id = test_model_id();

        let embedder = StubEmbedder::new();
        let store = populated_store(&embedder);
        file.save(&store, &model_id).unwrap();

        // Corrupt a header byte
        let mut handle = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        use std::io::Seek;
        handle.seek(std::io::SeekFrom::Start(10)).unwrap();
        handle.write_all(&[0xFF]).unwrap();

        let result = file.load(&model_id, embedder.dimensions());
        assert!(matches!(result, Err(PersistError::ChecksumMismatch)));
    }

    #[test]
    fn test_corrupt_string_length_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.bin");
        let file = RecordFile::new(path.clone());
        let model_id = test_model_id();

        let embedder = StubEmbedder::new();
        let store = populated_store(&embedder);
        file.save(&store, &model_id).unwrap();

        // Overwrite the first record's description length prefix (right after
        // header, id and timestamp) with u32::MAX. The header checksum does
        // not cover entry bytes, so the load must fail on the length itself
        // instead of attempting a 4 GiB allocation.
        let mut handle = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        use std::io::Seek;
        handle
            .seek(std::io::SeekFrom::Start((HEADER_SIZE + 16) as u64))
            .unwrap();
        handle.write_all(&u32::MAX.to_le_bytes()).unwrap();

        let result = file.load(&model_id, embedder.dimensions());
        assert!(matches!(result, Err(PersistError::InvalidFormat(_))));
    }

    #[test]
    fn test_save_cleans_up_temp_on_error() {
        let path = PathBuf::from("/nonexistent/directory/incidents.bin");
        let file = RecordFile::new(path.clone());

        let store = IncidentStore::new(16);
        let result = file.save(&store, &test_model_id());

        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
    }
}
