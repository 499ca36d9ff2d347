// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Decoding of the upstream `getwaitingtimes` XML document.
//!
//! ```xml
//! <waitingtimes>
//!   <waitingtime>
//!     <line>92</line>
//!     <mode>T</mode>
//!     <minutes>4</minutes>
//!     <destination>SCHAERBEEK GARE</destination>
//!     <message></message>
//!   </waitingtime>
//! </waitingtimes>
//! ```

use roxmltree::{Document, Node};
use tracing::warn;

/// One `<waitingtime>` record, before it is tied to a stop and a clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitingTime {
    pub line: String,
    pub mode: String,
    pub destination: String,
    pub message: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    Missing(&'static str),
    Empty(&'static str),
    Minutes(String),
}

/// Parses a whole document. Malformed XML fails the document; a malformed
/// record is skipped with a warning.
pub fn parse_waiting_times(xml: &str, source: &str) -> Result<Vec<WaitingTime>, roxmltree::Error> {
    let doc = Document::parse(xml)?;

    let mut waiting_times = Vec::new();

    for (index, node) in doc
        .descendants()
        .filter(|n| n.has_tag_name("waitingtime"))
        .enumerate()
    {
        match parse_record(node) {
            Ok(waiting_time) => waiting_times.push(waiting_time),
            Err(e) => {
                warn!(source, record = index, error = ?e, "dropping malformed waiting time record");
            }
        }
    }

    Ok(waiting_times)
}

fn parse_record(node: Node) -> Result<WaitingTime, RecordError> {
    let line = child_text(node, "line")?;
    if line.is_empty() {
        return Err(RecordError::Empty("line"));
    }

    let minutes_raw = child_text(node, "minutes")?;
    let minutes = minutes_raw
        .parse::<u32>()
        .map_err(|_| RecordError::Minutes(minutes_raw.clone()))?;

    Ok(WaitingTime {
        line,
        mode: child_text(node, "mode")?,
        destination: child_text(node, "destination")?,
        message: child_text(node, "message")?,
        minutes,
    })
}

// An element that is present but empty reads as "".
fn child_text(node: Node, tag: &'static str) -> Result<String, RecordError> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .map(|n| n.text().unwrap_or("").trim().to_string())
        .ok_or(RecordError::Missing(tag))
}
