//! Append-only JSON-lines journal backing [`crate::LcmDatabase::open`].

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LcmError, Result};
use crate::tables::{LcmOp, Tables};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JournalEntry {
    pub at: i64,
    pub op: LcmOp,
}

pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
}

impl Journal {
    /// Open (or create) the journal at `path` and replay it into fresh tables.
    ///
    /// A torn final line from an interrupted append is dropped and the file
    /// truncated back to the last complete entry. Garbage anywhere else is an error.
    pub(crate) fn open(path: &Path) -> Result<(Self, Tables)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut tables = Tables::default();
        let mut good_len: u64 = 0;
        let mut entries = 0usize;
        let mut reader = BufReader::new(&file);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            let complete = buf.last() == Some(&b'\n');
            let body = if complete { &buf[..buf.len() - 1] } else { &buf[..] };
            if complete && body.iter().all(u8::is_ascii_whitespace) {
                good_len += read as u64;
                continue;
            }
            match serde_json::from_slice::<JournalEntry>(body) {
                Ok(entry) if complete => {
                    tables.apply(entry.op, entry.at);
                    good_len += read as u64;
                    entries += 1;
                }
                _ => {
                    if !reader.fill_buf()?.is_empty() {
                        return Err(LcmError::Journal(format!(
                            "corrupt entry at byte {} of {}",
                            good_len,
                            path.display()
                        )));
                    }
                    tracing::warn!(
                        path = %path.display(),
                        offset = good_len,
                        "Dropping torn journal tail"
                    );
                    break;
                }
            }
        }
        drop(reader);

        let actual = file.metadata()?.len();
        if actual != good_len {
            file.set_len(good_len)?;
        }
        tracing::debug!(path = %path.display(), entries, "Replayed LCM journal");

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                len: good_len,
            },
            tables,
        ))
    }

    /// Durably append one entry. On failure the file is cut back so that a
    /// later replay never sees a partial write.
    pub(crate) fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let written = self
            .file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data());
        if let Err(e) = written {
            let _ = self.file.set_len(self.len);
            return Err(e.into());
        }
        self.len += line.len() as u64;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replace the journal with a single snapshot entry, atomically.
    pub(crate) fn compact(&mut self, tables: &Tables, at: i64) -> Result<()> {
        let entry = JournalEntry {
            at,
            op: LcmOp::Snapshot(Box::new(tables.clone())),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let tmp_path = self.path.with_extension("tmp");
        let result = (|| -> std::io::Result<()> {
            let mut f = File::create(&tmp_path)?;
            f.write_all(&line)?;
            f.flush()?;
            f.sync_all()?;
            fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        let mut file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.len = line.len() as u64;
        Ok(())
    }
}
