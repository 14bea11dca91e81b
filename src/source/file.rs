use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::source::DataSource;

/// A single-entry source backed by one raw file: exactly one entry is ever
/// yielded, named after the file's basename.
pub struct FileSource {
    reader: BufReader<File>,
    name: String,
    length: u64,
    started: bool,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(FileSource { reader: BufReader::new(file), name, length, started: false })
    }
}

impl DataSource for FileSource {
    fn next_entry(&mut self) -> Result<bool> {
        if self.started {
            return Ok(false);
        }
        self.started = true;
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf)?)
    }

    fn total_size(&self) -> u64 {
        self.length
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A raw-file sink for the Odin PIT dump.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        Ok(FileSink { file })
    }
}

impl super::DataSink for FileSink {
    fn set_length(&mut self, n: u64) -> Result<()> {
        self.file.set_len(n)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }
}

/// Resolves a file's basename the way the orchestrator needs it for
/// `FILE_INFO.str_data[0]`, independent of opening the file as a source.
pub fn basename(path: &Path) -> String {
    path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "file".to_string())
}
