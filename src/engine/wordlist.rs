//! Wordlist traversal: sanitizing entries, substituting them into the
//! command template, and counting records for progress display.
//!
//! The counter and the generator share [`WordlistReader`], so both apply the
//! same decoding and skipping rules and always agree on the record count.

use crate::error::FuzzError;
use crate::model::{SubstitutedCommand, PLACEHOLDER};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Escape `\`, `"`, `'` and `` ` `` with a preceding backslash.
///
/// Backslashes are escaped first so the escapes inserted for the other
/// characters are not doubled. There is no inverse; applying it twice
/// escapes the backslashes added by the first pass.
pub fn sanitize(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\'")
        .replace('`', "\\`")
}

/// Decode UTF-8, dropping invalid byte sequences instead of failing.
pub fn decode_ignoring_invalid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => rest = &after[len..],
                    None => return out,
                }
            }
        }
    }
}

/// Streams trimmed, non-empty entries from a wordlist.
pub struct WordlistReader<R> {
    inner: R,
    path: PathBuf,
    buf: Vec<u8>,
}

impl WordlistReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, FuzzError> {
        let file = File::open(path).map_err(|e| FuzzError::wordlist(path, e))?;
        Ok(Self::new(BufReader::new(file), path))
    }
}

impl<R: BufRead> WordlistReader<R> {
    pub fn new(inner: R, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for WordlistReader<R> {
    type Item = Result<String, FuzzError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.inner.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let word = decode_ignoring_invalid(&self.buf);
                    let word = word.trim();
                    if word.is_empty() {
                        continue;
                    }
                    return Some(Ok(word.to_string()));
                }
                Err(e) => return Some(Err(FuzzError::wordlist(&self.path, e))),
            }
        }
    }
}

/// Count the records the generator will yield for `path`.
pub fn count_records(path: &Path) -> Result<u64, FuzzError> {
    WordlistReader::open(path)?.try_fold(0u64, |n, word| word.map(|_| n + 1))
}

/// Replace every placeholder in `template` with the quoted `word`.
pub fn substitute(template: &str, word: &str) -> String {
    template.replace(PLACEHOLDER, &format!("\"{word}\""))
}

/// Lazily produces one [`SubstitutedCommand`] per wordlist record.
///
/// Single pass; to start over, open a new generator.
pub struct CommandGenerator<R> {
    reader: WordlistReader<R>,
    template: String,
    sanitize: bool,
    ordinal: u64,
}

impl CommandGenerator<BufReader<File>> {
    pub fn open(path: &Path, template: &str, sanitize: bool) -> Result<Self, FuzzError> {
        Ok(Self::from_reader(
            WordlistReader::open(path)?,
            template,
            sanitize,
        ))
    }
}

impl<R: BufRead> CommandGenerator<R> {
    pub fn from_reader(reader: WordlistReader<R>, template: &str, sanitize: bool) -> Self {
        Self {
            reader,
            template: template.to_string(),
            sanitize,
            ordinal: 0,
        }
    }
}

impl<R: BufRead> Iterator for CommandGenerator<R> {
    type Item = Result<SubstitutedCommand, FuzzError>;

    fn next(&mut self) -> Option<Self::Item> {
        let word = match self.reader.next()? {
            Ok(w) => w,
            Err(e) => return Some(Err(e)),
        };
        let word = if self.sanitize { sanitize(&word) } else { word };
        self.ordinal += 1;
        Some(Ok(SubstitutedCommand {
            ordinal: self.ordinal,
            command: substitute(&self.template, &word),
        }))
    }
}
