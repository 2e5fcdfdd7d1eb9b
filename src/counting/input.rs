use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::address::{CanonicalKey, ParsePolicy, canonicalize_lenient, canonicalize_strict};
use crate::error::{AddressFault, CountError, Result};

const READ_BUF: usize = 1 << 20;
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

pub fn open_input(path: &Path) -> Result<BufReader<File>> {
    let f = File::open(path).map_err(|source| CountError::UnreadableInput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::with_capacity(READ_BUF, f))
}

pub fn input_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|source| CountError::UnreadableInput {
            path: path.to_path_buf(),
            source,
        })
}

/// Stream every non-blank line of `path` as a canonical key.
///
/// `sink` gets the key and the raw byte length of its line (terminator
/// included) for byte-based progress. Returns the number of keys produced.
pub fn for_each_key<F>(path: &Path, policy: ParsePolicy, mut sink: F) -> Result<u64>
where
    F: FnMut(CanonicalKey, usize) -> Result<()>,
{
    let mut reader = open_input(path)?;
    let mut buf: Vec<u8> = Vec::with_capacity(64);
    let mut line_no = 0u64;
    let mut keys = 0u64;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| CountError::UnreadableInput {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        line_no += 1;
        if line_no == 1 && buf.starts_with(UTF8_BOM) {
            buf.drain(..UTF8_BOM.len());
        }

        let key = match std::str::from_utf8(&buf) {
            Ok(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                match policy {
                    ParsePolicy::Lenient => canonicalize_lenient(text),
                    ParsePolicy::Strict => canonicalize_strict(text)
                        .map_err(|reason| malformed(line_no, text, reason))?,
                }
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&buf);
                match policy {
                    ParsePolicy::Lenient => canonicalize_lenient(&text),
                    ParsePolicy::Strict => {
                        return Err(malformed(
                            line_no,
                            &text,
                            AddressFault::NotUtf8,
                        ));
                    }
                }
            }
        };

        keys += 1;
        sink(key, n)?;
    }

    Ok(keys)
}

fn malformed(line: u64, text: &str, reason: AddressFault) -> CountError {
    CountError::MalformedAddress {
        line,
        text: text.trim_end().to_string(),
        reason,
    }
}
