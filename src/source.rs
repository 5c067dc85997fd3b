//! Line source.
//!
//! Reads the input line by line and groups the stripped records into bounded batches.
//! A line ends at `\n`, `\r\n` or a lone `\r`. Bytes are decoded permissively according to [`Decoding`]:
//! a malformed byte sequence never aborts the read, it is substituted instead. This is a tolerance
//! policy for dirty input, not a validity guarantee; binary or mixed-encoding input is accepted
//! and may produce records that differ from the raw bytes.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use crate::buffer::{ChunkBuffer, ChunkBufferBuilder};

/// Input bytes decoding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoding {
    /// Decodes UTF-8, replacing malformed sequences with `U+FFFD`.
    Utf8Lossy,
    /// Maps every byte to the code point of the same value. Never fails.
    Latin1,
}

impl Default for Decoding {
    fn default() -> Self {
        Decoding::Utf8Lossy
    }
}

impl Decoding {
    /// Decodes a raw line and strips leading and trailing whitespace.
    /// Information separators `U+001C`..`U+001F` count as whitespace too.
    pub fn decode(&self, raw: &[u8]) -> String {
        match self {
            Decoding::Utf8Lossy => strip(&String::from_utf8_lossy(raw)).to_string(),
            Decoding::Latin1 => {
                let decoded = String::from_iter(raw.iter().map(|&b| b as char));
                strip(&decoded).to_string()
            }
        }
    }
}

fn strip(line: &str) -> &str {
    line.trim_matches(|c: char| c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c))
}

/// Restartable line source bound to an input file.
pub struct LineSource<B> {
    path: PathBuf,
    buffer_builder: B,
    decoding: Decoding,
    rw_buf_size: Option<usize>,
}

impl<B> LineSource<B>
where
    B: ChunkBufferBuilder<String>,
{
    /// Creates a line source. The file is not opened until [`LineSource::batches`] is called.
    pub fn new(path: &Path, buffer_builder: B, decoding: Decoding) -> Self {
        LineSource {
            path: path.to_path_buf(),
            buffer_builder,
            decoding,
            rw_buf_size: None,
        }
    }

    /// Sets input read buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: Option<usize>) -> Self {
        self.rw_buf_size = buf_size;
        return self;
    }

    fn open(&self) -> io::Result<io::BufReader<fs::File>> {
        let file = fs::File::open(&self.path)?;
        return Ok(match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        });
    }

    /// Opens the input from the start and returns a lazy batch sequence over it.
    /// Every call starts a new pass; the file is closed when the iterator is dropped.
    pub fn batches(&self) -> io::Result<Batches<io::BufReader<fs::File>, &B>> {
        Ok(Batches::new(self.open()?, &self.buffer_builder, self.decoding))
    }

    /// Counts input lines. A final line without a terminator counts as a line.
    pub fn count_lines(&self) -> io::Result<u64> {
        count_lines(self.open()?)
    }
}

/// Counts lines of a reader, plus an unterminated trailing one if present.
/// `\r\n` counts as a single terminator.
pub fn count_lines<R: BufRead>(mut reader: R) -> io::Result<u64> {
    let mut count = 0;
    let mut last = None;

    loop {
        let consumed = {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                break;
            }
            for &b in buf {
                match b {
                    b'\n' if last == Some(b'\r') => {}
                    b'\n' | b'\r' => count += 1,
                    _ => {}
                }
                last = Some(b);
            }
            buf.len()
        };
        reader.consume(consumed);
    }

    if matches!(last, Some(b) if b != b'\n' && b != b'\r') {
        count += 1;
    }

    return Ok(count);
}

/// Lazy batch iterator.
/// Every batch except the last one is full; an empty input yields no batches.
pub struct Batches<R, B> {
    reader: R,
    buffer_builder: B,
    decoding: Decoding,
    line: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl<R, B> Batches<R, B>
where
    R: BufRead,
    B: std::ops::Deref,
    B::Target: ChunkBufferBuilder<String>,
{
    pub fn new(reader: R, buffer_builder: B, decoding: Decoding) -> Self {
        Batches {
            reader,
            buffer_builder,
            decoding,
            line: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn read_record(&mut self) -> io::Result<Option<String>> {
        if let Some(record) = self.pending.pop_front() {
            return Ok(Some(record));
        }

        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line)? == 0 {
            return Ok(None);
        }
        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }

        // a lone `\r` ends a line as well, the one closing the chunk belongs to the terminator
        let mut content = &self.line[..];
        if content.last() == Some(&b'\r') {
            content = &content[..content.len() - 1];
        }
        for raw in content.split(|&b| b == b'\r') {
            self.pending.push_back(self.decoding.decode(raw));
        }

        return Ok(self.pending.pop_front());
    }
}

impl<R, B> Iterator for Batches<R, B>
where
    R: BufRead,
    B: std::ops::Deref,
    B::Target: ChunkBufferBuilder<String>,
{
    type Item = io::Result<<B::Target as ChunkBufferBuilder<String>>::Buffer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = self.buffer_builder.build();
        while !batch.is_full() {
            match self.read_record() {
                Ok(Some(record)) => batch.push(record),
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }

        if batch.len() == 0 {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, Write};

    use rstest::*;

    use super::{count_lines, Batches, Decoding, LineSource};
    use crate::buffer::LimitedBufferBuilder;

    fn collect_batches(input: &[u8], batch_size: usize, decoding: Decoding) -> Vec<Vec<String>> {
        let builder = LimitedBufferBuilder::new(batch_size, false);
        let batches = Batches::new(io::Cursor::new(input), &builder, decoding);
        batches.map(|batch| Vec::from_iter(batch.unwrap())).collect()
    }

    #[rstest]
    #[case(b"", 2, vec![])]
    #[case(b"x", 100, vec![vec!["x"]])]
    #[case(b"b\na\nb\nc\na\n", 2, vec![vec!["b", "a"], vec!["b", "c"], vec!["a"]])]
    #[case(b"b\na\nb\nc\n", 2, vec![vec!["b", "a"], vec!["b", "c"]])]
    #[case(b"  z \r\nz\n\tz", 1, vec![vec!["z"], vec!["z"], vec!["z"]])]
    #[case(b"a\n\n   \nb\n", 10, vec![vec!["a", "", "", "b"]])]
    #[case(b"b\ra\rb\r", 10, vec![vec!["b", "a", "b"]])]
    #[case(b"b\ra\rb\r", 2, vec![vec!["b", "a"], vec!["b"]])]
    #[case(b"a\r\rb\r\nc", 10, vec![vec!["a", "", "b", "c"]])]
    #[case(b"\r\n\r", 10, vec![vec!["", ""]])]
    fn test_batches(#[case] input: &[u8], #[case] batch_size: usize, #[case] expected: Vec<Vec<&str>>) {
        let actual = collect_batches(input, batch_size, Decoding::Utf8Lossy);
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case(Decoding::Utf8Lossy, "caf\u{FFFD}")]
    #[case(Decoding::Latin1, "caf\u{e9}")]
    fn test_malformed_input_is_tolerated(#[case] decoding: Decoding, #[case] expected: &str) {
        let actual = collect_batches(b"caf\xe9\n", 10, decoding);
        assert_eq!(actual, vec![vec![expected.to_string()]]);
    }

    #[rstest]
    #[case(Decoding::Utf8Lossy)]
    #[case(Decoding::Latin1)]
    fn test_information_separators_are_stripped(#[case] decoding: Decoding) {
        let actual = collect_batches(b"\x1c\x1d a \x1e\x1f\n", 10, decoding);
        assert_eq!(actual, vec![vec!["a"]]);
    }

    #[rstest]
    #[case(b"", 0)]
    #[case(b"a", 1)]
    #[case(b"a\n", 1)]
    #[case(b"a\nb", 2)]
    #[case(b"\n\n\n", 3)]
    #[case(b"b\ra\rb\r", 3)]
    #[case(b"a\r\nb\r\n", 2)]
    #[case(b"a\r\rb", 3)]
    fn test_count_lines(#[case] input: &[u8], #[case] expected: u64) {
        assert_eq!(count_lines(io::Cursor::new(input)).unwrap(), expected);
    }

    #[test]
    fn test_line_source_is_restartable() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        input.write_all(b"c\nb\na\n").unwrap();
        input.flush().unwrap();

        let source = LineSource::new(input.path(), LimitedBufferBuilder::new(2, true), Decoding::default());
        assert_eq!(source.count_lines().unwrap(), 3);

        for _ in 0..2 {
            let batches: Vec<Vec<String>> = source.batches().unwrap().map(|b| Vec::from_iter(b.unwrap())).collect();
            assert_eq!(batches, vec![vec!["c", "b"], vec!["a"]]);
        }
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let source = LineSource::new(
            &dir.path().join("missing.txt"),
            LimitedBufferBuilder::default(),
            Decoding::default(),
        );
        assert_eq!(source.batches().err().unwrap().kind(), io::ErrorKind::NotFound);
    }
}
