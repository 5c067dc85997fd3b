//! Sorted runs stored on the file system.

use std::error::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

/// Run storage error.
#[derive(Debug)]
pub enum RunError {
    /// Common I/O error.
    IO(io::Error),
    /// Record serialization error.
    Encode(rmp_serde::encode::Error),
    /// Record deserialization error.
    Decode(rmp_serde::decode::Error),
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            RunError::IO(err) => err,
            RunError::Encode(err) => err,
            RunError::Decode(err) => err,
        })
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RunError::IO(err) => write!(f, "I/O operation failed: {}", err),
            RunError::Encode(err) => write!(f, "record serialization error: {}", err),
            RunError::Decode(err) => write!(f, "record deserialization error: {}", err),
        }
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        RunError::IO(err)
    }
}

/// Handle of a run artifact. The artifact is removed when the handle is dropped.
#[derive(Debug)]
pub struct Run {
    index: usize,
    path: PathBuf,
    records: usize,
}

impl Run {
    fn new(index: usize, path: PathBuf) -> Self {
        Run { index, path, records: 0 }
    }

    /// Run index the artifact name was derived from.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records stored in the run.
    pub fn records(&self) -> usize {
        self.records
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::trace!("run {} removed", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("run {} not removed: {}", self.path.display(), err),
        }
    }
}

/// External run interface. Provides methods for persisting a sorted run and reading it back.
///
/// A reader owns its [`Run`], so the artifact lives exactly as long as the reader does.
pub trait ExternalRun: Sized + Iterator<Item = Result<String, RunError>> {
    /// Run file extension.
    const EXTENSION: &'static str;

    /// Writes records to a new artifact named after `index` inside `dir`.
    /// A partially written artifact is removed if writing fails.
    fn write(
        dir: &Path,
        index: usize,
        records: impl IntoIterator<Item = String>,
        buf_size: Option<usize>,
    ) -> Result<Run, RunError> {
        let path = dir.join(format!("temp_chunk_{}.{}", index, Self::EXTENSION));
        let file = fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut run = Run::new(index, path);

        let mut run_writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        run.records = Self::dump(&mut run_writer, records)?;
        run_writer.flush()?;
        run_writer.get_ref().sync_data()?;

        return Ok(run);
    }

    /// Opens a run for sequential reading.
    fn open(run: Run, buf_size: Option<usize>) -> io::Result<Self> {
        let file = fs::File::open(run.path())?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(Self::new(reader, run));
    }

    /// Creates an instance of an external run reader.
    fn new(reader: io::BufReader<fs::File>, run: Run) -> Self;

    /// Dumps records to an external file. Returns the number of records written.
    fn dump(
        run_writer: &mut io::BufWriter<fs::File>,
        records: impl IntoIterator<Item = String>,
    ) -> Result<usize, RunError>;
}

/// Newline terminated text run.
/// Records never contain `\n` since the line source splits on it.
pub struct TextRun {
    reader: io::BufReader<fs::File>,
    line: String,
    _run: Run,
}

impl ExternalRun for TextRun {
    const EXTENSION: &'static str = "txt";

    fn new(reader: io::BufReader<fs::File>, run: Run) -> Self {
        TextRun {
            reader,
            line: String::new(),
            _run: run,
        }
    }

    fn dump(
        run_writer: &mut io::BufWriter<fs::File>,
        records: impl IntoIterator<Item = String>,
    ) -> Result<usize, RunError> {
        let mut count = 0;
        for record in records.into_iter() {
            run_writer.write_all(record.as_bytes())?;
            run_writer.write_all(b"\n")?;
            count += 1;
        }

        return Ok(count);
    }
}

impl Iterator for TextRun {
    type Item = Result<String, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => None,
            Ok(_) => {
                if self.line.ends_with('\n') {
                    self.line.pop();
                }
                Some(Ok(self.line.clone()))
            }
            Err(err) => Some(Err(RunError::IO(err))),
        }
    }
}

/// RMP (Rust MessagePack) external run implementation.
/// It uses MessagePack as a data serialization format.
/// For more information see https://msgpack.org/.
pub struct RmpRun {
    reader: io::BufReader<fs::File>,
    _run: Run,
}

impl ExternalRun for RmpRun {
    const EXTENSION: &'static str = "rmp";

    fn new(reader: io::BufReader<fs::File>, run: Run) -> Self {
        RmpRun { reader, _run: run }
    }

    fn dump(
        mut run_writer: &mut io::BufWriter<fs::File>,
        records: impl IntoIterator<Item = String>,
    ) -> Result<usize, RunError> {
        let mut count = 0;
        for record in records.into_iter() {
            rmp_serde::encode::write(&mut run_writer, &record).map_err(RunError::Encode)?;
            count += 1;
        }

        return Ok(count);
    }
}

impl Iterator for RmpRun {
    type Item = Result<String, RunError>;

    fn next(&mut self) -> Option<Self::Item> {
        let exhausted = match self.reader.fill_buf() {
            Ok(buf) => buf.is_empty(),
            Err(err) => return Some(Err(RunError::IO(err))),
        };
        if exhausted {
            return None;
        }

        match rmp_serde::decode::from_read(&mut self.reader) {
            Ok(record) => Some(Ok(record)),
            Err(err) => Some(Err(RunError::Decode(err))),
        }
    }
}
