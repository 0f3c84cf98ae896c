//! Reading the election data file.
//!
//! The first non-blank line carries the decommitment key, every following one a ballot:
//!
//! ```text
//! {"decommitment_key": "k"}
//! {"serial_number": "1", "part_a": {"id": "A", "vote_codes": [{"vote_code": "V1", "decommitment": "d1"}]}, "part_b": {...}}
//! ```
//!
//! Records are parsed lazily, one per call, so a caller can commit them in chunks.

use std::io;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use trustee_core::{DataSource, Fault, ParseFaultKind};

use crate::net::ByteStream;
use crate::store::{BallotRecord, ElectionStore, StoreError};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{kind:?}: {detail}")]
    Invalid {
        kind: ParseFaultKind,
        detail: String,
    },
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ParseError {
    pub(crate) fn invalid(kind: ParseFaultKind, detail: impl Into<String>) -> Self {
        ParseError::Invalid {
            kind,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> Option<ParseFaultKind> {
        match self {
            ParseError::Invalid { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<ParseError> for Fault {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Invalid { kind, detail } => Fault::Parse { kind, detail },
            ParseError::Io(err) => match err.kind() {
                io::ErrorKind::TimedOut => Fault::SocketTimeout(err.to_string()),
                io::ErrorKind::InvalidData => {
                    Fault::parse(ParseFaultKind::Malformed, err.to_string())
                }
                _ => Fault::Io(err.to_string()),
            },
            ParseError::Store(err) => err.into(),
        }
    }
}

/// Opens the data of an initialize command. A missing file surfaces as `NotFound`.
pub async fn open_source(source: DataSource) -> io::Result<ByteStream> {
    match source {
        DataSource::File(path) => {
            let file = tokio::fs::File::open(&path).await?;
            Ok(Box::pin(BufReader::new(file)))
        }
        DataSource::Bytes(bytes) => Ok(Box::pin(io::Cursor::new(bytes))),
    }
}

#[async_trait::async_trait]
pub trait ImportReader: Send {
    /// Reads and stores the decommitment key. Must be called once, before any ballot.
    async fn parse_key(
        &mut self,
        store: &mut dyn ElectionStore,
        election_id: &str,
    ) -> Result<(), ParseError>;

    /// Reads and stores the next ballot. Returns `false` at the end of the data.
    async fn parse_next_ballot(
        &mut self,
        store: &mut dyn ElectionStore,
        election_id: &str,
    ) -> Result<bool, ParseError>;

    /// Ballots stored so far.
    fn parsed_count(&self) -> u64;
}

#[derive(Debug, Deserialize)]
struct KeyLine {
    decommitment_key: String,
}

#[derive(Debug, Deserialize)]
struct BallotLine {
    serial_number: String,
    part_a: BallotSide,
    part_b: BallotSide,
}

#[derive(Debug, Deserialize)]
struct BallotSide {
    id: String,
    vote_codes: Vec<VoteCodeEntry>,
}

#[derive(Debug, Deserialize)]
struct VoteCodeEntry {
    vote_code: String,
    decommitment: String,
}

pub struct JsonLinesImportReader<R> {
    reader: R,
    line: String,
    line_no: u64,
    parsed: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesImportReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
            parsed: 0,
        }
    }

    /// Next non-blank line, or `None` at the end of the data.
    async fn next_line(&mut self) -> Result<Option<&str>, ParseError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if !self.line.trim().is_empty() {
                return Ok(Some(self.line.trim()));
            }
        }
    }

    fn malformed(&self, err: serde_json::Error) -> ParseError {
        ParseError::invalid(
            ParseFaultKind::Malformed,
            format!("line {}: {err}", self.line_no),
        )
    }
}

#[async_trait::async_trait]
impl<R: AsyncBufRead + Unpin + Send> ImportReader for JsonLinesImportReader<R> {
    async fn parse_key(
        &mut self,
        store: &mut dyn ElectionStore,
        election_id: &str,
    ) -> Result<(), ParseError> {
        let Some(line) = self.next_line().await? else {
            return Err(ParseError::invalid(ParseFaultKind::EmptyFile, "no key record"));
        };
        let key: KeyLine = match serde_json::from_str(line) {
            Ok(key) => key,
            Err(err) => return Err(self.malformed(err)),
        };
        if key.decommitment_key.is_empty() {
            return Err(ParseError::invalid(
                ParseFaultKind::ZeroLengthKey,
                "decommitment key is empty",
            ));
        }
        store.save_key(election_id, &key.decommitment_key)?;
        Ok(())
    }

    async fn parse_next_ballot(
        &mut self,
        store: &mut dyn ElectionStore,
        election_id: &str,
    ) -> Result<bool, ParseError> {
        let Some(line) = self.next_line().await? else {
            return Ok(false);
        };
        let ballot: BallotLine = match serde_json::from_str(line) {
            Ok(ballot) => ballot,
            Err(err) => return Err(self.malformed(err)),
        };
        if ballot.serial_number.is_empty() {
            return Err(ParseError::invalid(
                ParseFaultKind::EmptyToken,
                format!("line {}: empty serial number", self.line_no),
            ));
        }
        for side in [&ballot.part_a, &ballot.part_b] {
            for entry in &side.vote_codes {
                store.save_ballot(
                    election_id,
                    BallotRecord {
                        serial_no: &ballot.serial_number,
                        part_id: &side.id,
                        vote_code: &entry.vote_code,
                        decommitment: &entry.decommitment,
                    },
                )?;
            }
        }
        self.parsed += 1;
        Ok(true)
    }

    fn parsed_count(&self) -> u64 {
        self.parsed
    }
}
