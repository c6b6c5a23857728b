//! JSON-lines deposit source.
//!
//! One [`DepositFact`] per line. Blank lines and lines starting with `#` are
//! skipped.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use faith_core::error::FaithError;
use faith_core::traits::DepositSource;
use faith_core::types::DepositFact;

pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: u64,
}

impl JsonLinesSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FaithError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| FaithError::Source(format!("{}: {e}", path.display())))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> DepositSource for JsonLinesSource<R> {
    async fn next_deposit(&mut self) -> Result<Option<DepositFact>, FaithError> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .map_err(|e| FaithError::Source(e.to_string()))?
            else {
                return Ok(None);
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fact = serde_json::from_str(trimmed)
                .map_err(|e| FaithError::Source(format!("line {}: {e}", self.line_no)))?;
            return Ok(Some(fact));
        }
    }
}
