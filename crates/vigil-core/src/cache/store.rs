use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use vigil_types::error::{Result, VigilError};
use vigil_types::file_state::FileState;

/// Sink for appending records to one batch file.
pub trait BatchWriter: Send {
    /// Append one record and flush it, so a crash after this call cannot
    /// lose the line.
    fn append(&mut self, state: &FileState) -> Result<()>;

    /// Force the file's contents to stable storage. Called before a batch
    /// file is handed to the atomic switch.
    fn finish(&mut self) -> Result<()>;
}

/// Local persistence for batch files, keyed by batch number.
pub trait BatchStore: Send + Sync {
    /// All batch numbers currently present, in no particular order.
    fn enumerate_batches(&self) -> Result<Vec<i64>>;

    /// Line reader over a batch file.
    fn open_batch_reader(&self, number: i64) -> Result<Box<dyn BufRead + Send>>;

    /// Raw byte stream over a batch file.
    fn open_batch_stream(&self, number: i64) -> Result<Box<dyn Read + Send>>;

    /// Appending writer for the (possibly new) batch file `number`.
    fn open_batch_writer(&self, number: i64) -> Result<Box<dyn BatchWriter>>;

    /// Writer for the `.new` sibling of batch `number`, used to stage a
    /// consolidated replacement.
    fn open_new_batch_writer(&self, number: i64) -> Result<Box<dyn BatchWriter>>;

    /// Commit a consolidation: atomically replace batch `target` with its
    /// staged `.new` sibling, then delete batch `to_delete`. The rename is
    /// the commit point; a crash leaves either the old or the new state.
    fn switch_to_consolidated(&self, to_delete: i64, target: i64) -> Result<()>;

    fn batch_size(&self, number: i64) -> Result<u64>;
}

/// Batch files in a flat directory, named by their decimal batch number.
pub struct DirectoryBatchStore {
    root: PathBuf,
}

impl DirectoryBatchStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn batch_path(&self, number: i64) -> PathBuf {
        self.root.join(number.to_string())
    }

    fn staged_path(&self, number: i64) -> PathBuf {
        self.root.join(format!("{number}.new"))
    }
}

impl BatchStore for DirectoryBatchStore {
    fn enumerate_batches(&self) -> Result<Vec<i64>> {
        let mut numbers = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(number) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i64>().ok())
            {
                numbers.push(number);
            }
        }
        Ok(numbers)
    }

    fn open_batch_reader(&self, number: i64) -> Result<Box<dyn BufRead + Send>> {
        let file = File::open(self.batch_path(number))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_batch_stream(&self, number: i64) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.batch_path(number))?))
    }

    fn open_batch_writer(&self, number: i64) -> Result<Box<dyn BatchWriter>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.batch_path(number))?;
        Ok(Box::new(FileBatchWriter { file }))
    }

    fn open_new_batch_writer(&self, number: i64) -> Result<Box<dyn BatchWriter>> {
        let file = File::create(self.staged_path(number))?;
        Ok(Box::new(FileBatchWriter { file }))
    }

    fn switch_to_consolidated(&self, to_delete: i64, target: i64) -> Result<()> {
        let staged = self.staged_path(target);
        if !staged.exists() {
            return Err(VigilError::InvalidFormat(format!(
                "no staged consolidation file for batch {target}"
            )));
        }
        fs::rename(&staged, self.batch_path(target))?;
        match fs::remove_file(self.batch_path(to_delete)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn batch_size(&self, number: i64) -> Result<u64> {
        Ok(fs::metadata(self.batch_path(number))?.len())
    }
}

struct FileBatchWriter {
    file: File,
}

impl BatchWriter for FileBatchWriter {
    fn append(&mut self, state: &FileState) -> Result<()> {
        let mut line = state.to_line()?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
