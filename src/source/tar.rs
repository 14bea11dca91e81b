use std::fs::File;
use std::io::{Read, Stdin};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::source::DataSource;

enum Input {
    Path(PathBuf),
    Stdin,
}

struct Entry {
    name: String,
    data: Vec<u8>,
}

/// A tar-archive source: one entry per archive member.
///
/// A streaming tar reader can't be rewound, and computing `total_size()` up
/// front needs every member's length before the first byte is sent. This
/// makes a single pass at open time and materializes each member's bytes,
/// which yields `total_size()` immediately and sidesteps re-opening `stdin`
/// a second time (which a true pipe would not survive). See the "Tar
/// re-open" design note in DESIGN.md.
pub struct TarSource {
    entries: Vec<Entry>,
    cursor: usize,
    read_pos: usize,
    total_size: u64,
    started: bool,
}

impl TarSource {
    pub fn open(path: &Path) -> Result<Self> {
        let input = if path.as_os_str() == "-" { Input::Stdin } else { Input::Path(path.to_path_buf()) };
        Self::from_input(input)
    }

    fn from_input(input: Input) -> Result<Self> {
        let mut entries = Vec::new();
        let mut total_size: u64 = 0;

        match input {
            Input::Path(p) => {
                let file = File::open(&p)?;
                let mut archive = ::tar::Archive::new(file);
                Self::collect(&mut archive, &mut entries, &mut total_size)?;
            }
            Input::Stdin => {
                let stdin: Stdin = std::io::stdin();
                let mut archive = ::tar::Archive::new(stdin.lock());
                Self::collect(&mut archive, &mut entries, &mut total_size)?;
            }
        }

        Ok(TarSource { entries, cursor: 0, read_pos: 0, total_size, started: false })
    }

    fn collect<R: Read>(archive: &mut ::tar::Archive<R>, entries: &mut Vec<Entry>, total_size: &mut u64) -> Result<()> {
        for entry in archive
            .entries()
            .map_err(|e| Error::IoError(format!("reading tar archive: {}", e)))?
        {
            let mut entry = entry.map_err(|e| Error::IoError(format!("reading tar entry: {}", e)))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .map_err(|e| Error::InvalidArgument(format!("bad tar entry name: {}", e)))?
                .to_string_lossy()
                .into_owned();
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            *total_size += data.len() as u64;
            entries.push(Entry { name, data });
        }
        Ok(())
    }
}

impl DataSource for TarSource {
    fn next_entry(&mut self) -> Result<bool> {
        if self.started {
            if self.cursor + 1 >= self.entries.len() {
                self.cursor = self.entries.len();
                return Ok(false);
            }
            self.cursor += 1;
        } else {
            self.started = true;
            if self.entries.is_empty() {
                return Ok(false);
            }
        }
        self.read_pos = 0;
        Ok(true)
    }

    fn name(&self) -> &str {
        self.entries.get(self.cursor).map(|e| e.name.as_str()).unwrap_or("")
    }

    fn length(&self) -> u64 {
        self.entries.get(self.cursor).map(|e| e.data.len() as u64).unwrap_or(0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let entry = match self.entries.get(self.cursor) {
            Some(e) => e,
            None => return Ok(0),
        };
        let remaining = &entry.data[self.read_pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.read_pos += n;
        Ok(n)
    }

    fn total_size(&self) -> u64 {
        self.total_size
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
