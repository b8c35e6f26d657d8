/*!
JSON-lines event input.
Reads one security event per line from a file or stdin and feeds the correlator.
*/

use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::core::tracker::{Correlator, IngestResponse};

/// Counters for one pass over an input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: usize,
    pub detected: usize,
    pub rejected: usize,
}

/// Ingest every non-blank line of `reader`.
///
/// Rejected lines are logged and counted; they never stop the feed.
pub async fn ingest_lines<R>(
    correlator: &Correlator,
    reader: R,
) -> Result<IngestSummary, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match correlator.ingest_json(&line).await {
            Ok(IngestResponse::Detected { .. }) => {
                summary.accepted += 1;
                summary.detected += 1;
            }
            Ok(IngestResponse::Ok) => summary.accepted += 1,
            Err(e) => {
                warn!("Line {}: {}", line_no, e);
                summary.rejected += 1;
            }
        }
    }

    Ok(summary)
}

pub async fn ingest_file<P: AsRef<Path>>(
    correlator: &Correlator,
    path: P,
) -> Result<IngestSummary, std::io::Error> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    info!("Reading events from {:?}", path.as_ref());
    ingest_lines(correlator, BufReader::new(file)).await
}

pub async fn ingest_stdin(correlator: &Correlator) -> Result<IngestSummary, std::io::Error> {
    info!("Reading events from stdin");
    ingest_lines(correlator, BufReader::new(tokio::io::stdin())).await
}
