//! Local filesystem storage implementation.
//!
//! Each table is a CSV file `{root}/{name}.csv`. Full rewrites go through a
//! temp file and a rename so readers never see a half-written table;
//! appends extend the file in place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{Table, TableStore};

/// Serialize a table to CSV bytes.
pub fn to_csv_bytes(header: &[String], rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    if !header.is_empty() {
        writer.write_record(header)?;
    }
    for row in rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))
}

/// Parse CSV bytes; the first record is the header.
pub fn from_csv_bytes(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.records();
    let header = match records.next() {
        Some(first) => first?.iter().map(str::to_string).collect(),
        None => return Ok(Table::default()),
    };
    let rows = records
        .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
        .collect::<std::result::Result<Vec<Vec<String>>, csv::Error>>()?;

    Ok(Table { header, rows })
}

/// Write bytes atomically (write to temp, then rename).
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Write a table as a standalone CSV file.
pub async fn write_csv_file(path: &Path, table: &Table) -> Result<()> {
    let bytes = to_csv_bytes(&table.header, &table.rows)?;
    write_atomic(path, &bytes).await
}

/// Directory-of-CSV-files table store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the file path of a table.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root_dir.join(format!("{name}.csv"))
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl TableStore for LocalStore {
    fn describe(&self) -> String {
        format!("local:{}", self.root_dir.display())
    }

    async fn read_table(&self, name: &str) -> Result<Option<Table>> {
        match self.read_bytes(name).await? {
            Some(bytes) => from_csv_bytes(&bytes)
                .map(Some)
                .map_err(|e| AppError::store(name, e)),
            None => Ok(None),
        }
    }

    async fn replace_table(&self, name: &str, table: &Table) -> Result<()> {
        write_csv_file(&self.path(name), table).await?;
        log::debug!("Wrote {} rows to {}", table.rows.len(), self.path(name).display());
        Ok(())
    }

    async fn append_rows(&self, name: &str, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
        let path = self.path(name);
        let existing = self.read_bytes(name).await?;
        let is_new = existing.as_ref().is_none_or(|b| b.iter().all(u8::is_ascii_whitespace));

        if is_new {
            let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
            let bytes = to_csv_bytes(&header, rows)?;
            return write_atomic(&path, &bytes).await;
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut bytes = Vec::new();
        if existing.as_ref().is_some_and(|b| !b.ends_with(b"\n")) {
            bytes.push(b'\n');
        }
        bytes.extend(to_csv_bytes(&[], rows)?);

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }
}
