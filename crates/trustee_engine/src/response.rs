//! Parser for the ABB ballot listing: one `<serialNo> <voteCode>\n` line per ballot.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use trustee_core::ParseFaultKind;
use trustee_logging::trustee_trace;

use crate::crypto::Cryptosystem;
use crate::import::ParseError;
use crate::store::ElectionStore;

/// Longest accepted serial number or vote code.
pub const MAX_TOKEN_LEN: usize = 2048;

const MAX_LINE_LEN: usize = 2 * MAX_TOKEN_LEN + 2;

pub struct ResponseReader<R> {
    reader: R,
    line: Vec<u8>,
    line_no: u64,
    parsed: u64,
}

impl<R: AsyncBufRead + Unpin> ResponseReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(64),
            line_no: 0,
            parsed: 0,
        }
    }

    /// Advances to the next line whose ballot is known locally and feeds its decommitment to
    /// `accumulator`. Lines with no matching ballot are skipped. Returns `false` at the end.
    pub async fn parse_next(
        &mut self,
        store: &mut dyn ElectionStore,
        election_id: &str,
        accumulator: &mut dyn Cryptosystem,
    ) -> Result<bool, ParseError> {
        loop {
            let Some((serial_no, vote_code)) = self.next_record().await? else {
                return Ok(false);
            };
            match store.lookup_decommitment(election_id, &serial_no, &vote_code)? {
                Some(decommitment) => {
                    accumulator.add(&decommitment);
                    self.parsed += 1;
                    return Ok(true);
                }
                None => {
                    trustee_trace!(
                        "Skipping unknown ballot {} / {} on line {}",
                        serial_no,
                        vote_code,
                        self.line_no
                    );
                }
            }
        }
    }

    /// Matched records so far.
    pub fn parsed_count(&self) -> u64 {
        self.parsed
    }

    async fn next_record(&mut self) -> Result<Option<(String, String)>, ParseError> {
        self.line.clear();
        let read = (&mut self.reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut self.line)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        if self.line.last() != Some(&b'\n') {
            if self.line.len() >= MAX_LINE_LEN {
                return Err(self.fault(ParseFaultKind::TooLongToken, "line exceeds token limits"));
            }
            return Err(self.fault(ParseFaultKind::UnexpectedEof, "stream ended mid-line"));
        }
        let body = &self.line[..self.line.len() - 1];
        let Some(space) = body.iter().position(|&b| b == b' ') else {
            return Err(self.fault(ParseFaultKind::InvalidToken, "missing separator"));
        };
        let (serial_no, vote_code) = (&body[..space], &body[space + 1..]);
        self.check_token(serial_no, |b| b.is_ascii_digit())?;
        self.check_token(vote_code, |b| b.is_ascii_uppercase() || b.is_ascii_digit())?;
        // Both tokens are ASCII at this point.
        Ok(Some((
            String::from_utf8_lossy(serial_no).into_owned(),
            String::from_utf8_lossy(vote_code).into_owned(),
        )))
    }

    fn check_token(&self, token: &[u8], allowed: impl Fn(u8) -> bool) -> Result<(), ParseError> {
        if token.is_empty() {
            return Err(self.fault(ParseFaultKind::EmptyToken, "empty token"));
        }
        if token.len() > MAX_TOKEN_LEN {
            return Err(self.fault(ParseFaultKind::TooLongToken, "token too long"));
        }
        if let Some(&bad) = token.iter().find(|&&b| !allowed(b)) {
            return Err(self.fault(
                ParseFaultKind::InvalidToken,
                format!("unexpected character {:?}", char::from(bad)),
            ));
        }
        Ok(())
    }

    fn fault(&self, kind: ParseFaultKind, detail: impl std::fmt::Display) -> ParseError {
        ParseError::invalid(kind, format!("line {}: {detail}", self.line_no))
    }
}
