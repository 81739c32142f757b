use crate::LoadError;
use encoding_rs::{DecoderResult, Encoding, SHIFT_JIS, UTF_8};
use equip_core::RawRow;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DELIMITER_CANDIDATES: [u8; 3] = [b',', b'\t', b';'];

/// How the bytes of an import file are turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceEncoding {
    /// Honour a byte order mark, else try UTF-8, then Shift_JIS (CP932), the
    /// two encodings spreadsheet exports on the office machines use.
    #[default]
    Auto,
    Declared(&'static Encoding),
}

impl FromStr for SourceEncoding {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "" | "auto" => Ok(SourceEncoding::Auto),
            "utf-8-sig" | "utf8" => Ok(SourceEncoding::Declared(UTF_8)),
            // WHATWG folds CP932 into its Shift_JIS decoder but has no "cp932" label
            "cp932" | "ms932" | "windows-932" => Ok(SourceEncoding::Declared(SHIFT_JIS)),
            label => Encoding::for_label(label.as_bytes())
                .map(SourceEncoding::Declared)
                .ok_or_else(|| format!("unknown encoding: {label}")),
        }
    }
}

impl fmt::Display for SourceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceEncoding::Auto => f.write_str("auto"),
            SourceEncoding::Declared(encoding) => f.write_str(encoding.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SourceOptions {
    pub encoding: SourceEncoding,
    /// Field separator; sniffed from the header line when unset.
    pub delimiter: Option<u8>,
}

/// A decoded CSV file. The header is parsed once on open; every call to
/// [`CsvSource::rows`] starts again from the first data row.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    text: String,
    encoding: &'static Encoding,
    delimiter: u8,
    headers: Vec<String>,
}

impl CsvSource {
    pub fn open(path: impl AsRef<Path>, options: &SourceOptions) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path).map_err(|source| LoadError::SourceUnavailable {
            path: path.clone(),
            source,
        })?;

        let (text, encoding) =
            decode(&bytes, options.encoding).map_err(|failure| LoadError::DecodeError {
                path: path.clone(),
                offset: failure.offset,
                detail: format!("malformed {} sequence", failure.encoding.name()),
            })?;
        let delimiter = options
            .delimiter
            .unwrap_or_else(|| sniff_delimiter(&text));

        let headers = {
            let mut reader = reader_builder(delimiter).from_reader(text.as_bytes());
            let record = reader.headers().map_err(|err| csv_error(&path, err))?;
            let headers: Vec<String> = record.iter().map(str::to_string).collect();
            headers
        };

        Ok(Self {
            path,
            text,
            encoding,
            delimiter,
            headers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Encoding the file was actually decoded with.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn rows(&self) -> RawRows<'_> {
        let records = reader_builder(self.delimiter)
            .from_reader(self.text.as_bytes())
            .into_records();
        RawRows {
            path: &self.path,
            text: self.text.as_bytes(),
            records,
            row: 0,
            scanned: 0,
            newlines: 0,
        }
    }
}

/// Lazy, file-ordered data rows of a [`CsvSource`].
pub struct RawRows<'a> {
    path: &'a Path,
    text: &'a [u8],
    records: csv::StringRecordsIntoIter<&'a [u8]>,
    row: usize,
    /// Bytes of `text` already scanned for newlines, and how many were seen.
    scanned: usize,
    newlines: u64,
}

impl RawRows<'_> {
    /// 1-based file line of the record starting at `byte`. The csv reader's
    /// own line counter ignores the blank lines it skips, and its record
    /// position can point at them, so lines are counted from the text.
    /// Records arrive in file order, so the scan only moves forward.
    fn line_at(&mut self, byte: u64) -> u64 {
        let end = self.text.len();
        let mut byte = usize::try_from(byte).map_or(end, |byte| byte.min(end));
        while matches!(self.text.get(byte), Some(b'\n' | b'\r')) {
            byte += 1;
        }
        if byte > self.scanned {
            let seen = self.text[self.scanned..byte]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            self.newlines += seen as u64;
            self.scanned = byte;
        }
        self.newlines + 1
    }
}

impl Iterator for RawRows<'_> {
    type Item = Result<RawRow, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(err) => return Some(Err(csv_error(self.path, err))),
        };
        self.row += 1;
        let line = match record.position() {
            Some(position) => self.line_at(position.byte()),
            None => 0,
        };
        Some(Ok(RawRow {
            row: self.row,
            line,
            fields: record.iter().map(str::to_string).collect(),
        }))
    }
}

fn reader_builder(delimiter: u8) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter);
    builder
}

fn csv_error(path: &Path, err: csv::Error) -> LoadError {
    let offset = err.position().map_or(0, |position| position.byte());
    LoadError::DecodeError {
        path: path.to_path_buf(),
        offset,
        detail: err.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecodeFailure {
    encoding: &'static Encoding,
    offset: u64,
}

impl DecodeFailure {
    /// Rebase an offset measured past a stripped BOM onto the whole file.
    fn shifted(self, bom_len: usize) -> Self {
        Self {
            offset: self.offset + bom_len as u64,
            ..self
        }
    }
}

fn decode(
    bytes: &[u8],
    requested: SourceEncoding,
) -> Result<(String, &'static Encoding), DecodeFailure> {
    let bom = Encoding::for_bom(bytes);
    match requested {
        SourceEncoding::Declared(encoding) => {
            let body = match bom {
                Some((bom_encoding, bom_len)) if bom_encoding == encoding => bom_len,
                _ => 0,
            };
            decode_strict(encoding, &bytes[body..])
                .map(|text| (text, encoding))
                .map_err(|failure| failure.shifted(body))
        }
        SourceEncoding::Auto => {
            if let Some((encoding, bom_len)) = bom {
                return decode_strict(encoding, &bytes[bom_len..])
                    .map(|text| (text, encoding))
                    .map_err(|failure| failure.shifted(bom_len));
            }
            match decode_strict(UTF_8, bytes) {
                Ok(text) => Ok((text, UTF_8)),
                Err(utf8_failure) => decode_strict(SHIFT_JIS, bytes)
                    .map(|text| (text, SHIFT_JIS))
                    .map_err(|_| utf8_failure),
            }
        }
    }
}

fn decode_strict(encoding: &'static Encoding, bytes: &[u8]) -> Result<String, DecodeFailure> {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut text = String::with_capacity(
        decoder
            .max_utf8_buffer_length_without_replacement(bytes.len())
            .unwrap_or(bytes.len()),
    );
    let mut consumed = 0usize;

    loop {
        let (result, read) =
            decoder.decode_to_string_without_replacement(&bytes[consumed..], &mut text, true);
        consumed += read;
        match result {
            DecoderResult::InputEmpty => return Ok(text),
            DecoderResult::OutputFull => {
                let remaining = bytes.len() - consumed;
                text.reserve(
                    decoder
                        .max_utf8_buffer_length_without_replacement(remaining)
                        .unwrap_or(remaining)
                        .max(16),
                );
            }
            DecoderResult::Malformed(bad, after) => {
                let offset = consumed - usize::from(bad) - usize::from(after);
                return Err(DecodeFailure {
                    encoding,
                    offset: offset as u64,
                });
            }
        }
    }
}

/// Picks the candidate separator that occurs most often, outside quotes, in
/// the header line. Comma wins ties and header lines without any candidate.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    let mut counts = [0usize; DELIMITER_CANDIDATES.len()];
    let mut quoted = false;
    for byte in header.bytes() {
        if byte == b'"' {
            quoted = !quoted;
            continue;
        }
        if quoted {
            continue;
        }
        if let Some(index) = DELIMITER_CANDIDATES.iter().position(|c| *c == byte) {
            counts[index] += 1;
        }
    }

    let mut best = 0;
    for index in 1..DELIMITER_CANDIDATES.len() {
        if counts[index] > counts[best] {
            best = index;
        }
    }
    DELIMITER_CANDIDATES[best]
}
