//! Artifact result storage.
//!
//! Each named artifact query produces one JSONL member (and optionally a CSV
//! member) inside the container.  Rows arrive as a lazy, ordered sequence
//! from the query evaluator; production is cooperatively cancellable per
//! row.  A row that fails to serialize is skipped; a member-stream write
//! failure aborts the artifact and propagates.

use serde_json::Value;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::container::{Container, ContainerError, MemberWriter};
use crate::sanitize::sanitize_name;

/// One result row as produced by the query evaluator.
pub type Row = serde_json::Value;

/// Cooperative cancellation signal, checked once per produced row.
/// Cancellation stops row production cleanly; it is not an error.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultFormat {
    Jsonl,
    JsonlAndCsv,
}

/// Stable member path for an artifact's JSONL results.
pub fn result_path(artifact_name: &str) -> String {
    format!("{}.json", sanitize_name(artifact_name))
}

/// Stable member path for an artifact's tabular results.
pub fn csv_path(artifact_name: &str) -> String {
    format!("{}.csv", sanitize_name(artifact_name))
}

impl Container {
    /// Stream one artifact's rows into the container.
    ///
    /// An un-named query is fully drained for its side effects and creates
    /// no member.  Every opened member is closed on every exit path; the
    /// first error encountered wins.
    pub fn store_artifact<I>(
        &self,
        artifact_name: Option<&str>,
        rows: I,
        format: ResultFormat,
        cancel: &CancelToken,
    ) -> Result<(), ContainerError>
    where
        I: IntoIterator<Item = Row>,
    {
        let name = match artifact_name {
            Some(n) if !n.is_empty() => n,
            _ => {
                for _ in rows {}
                return Ok(());
            }
        };

        let mut primary = self.create(&result_path(name), None)?;
        let mut csv_member = match format {
            ResultFormat::JsonlAndCsv => match self.create(&csv_path(name), None) {
                Ok(m) => Some(m),
                Err(err) => {
                    // Primary is already registered; sign it off before
                    // propagating.
                    let _ = primary.close();
                    return Err(err);
                }
            },
            ResultFormat::Jsonl => None,
        };

        let mut result = write_rows(&mut primary, csv_member.as_mut(), rows, cancel);

        if let Err(err) = primary.close() {
            if result.is_ok() {
                result = Err(err);
            }
        }
        if let Some(member) = csv_member.as_mut() {
            if let Err(err) = member.close() {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

fn write_rows<I>(
    primary: &mut MemberWriter,
    csv_member: Option<&mut MemberWriter>,
    rows: I,
    cancel: &CancelToken,
) -> Result<(), ContainerError>
where
    I: IntoIterator<Item = Row>,
{
    let mut csv_writer = csv_member.map(csv::Writer::from_writer);
    let mut header: Option<Vec<String>> = None;

    let mut rows = rows.into_iter();
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let row = match rows.next() {
            Some(row) => row,
            None => break,
        };

        // Re-serialize as one compact JSONL record.
        let line = match serde_json::to_vec(&row) {
            Ok(mut line) => {
                line.push(b'\n');
                line
            }
            Err(err) => {
                warn!(error = %err, "skipping unserializable row");
                continue;
            }
        };
        primary.write_all(&line)?;

        if let Some(writer) = csv_writer.as_mut() {
            append_csv_row(writer, &mut header, &row)?;
        }
    }

    if let Some(writer) = csv_writer.as_mut() {
        writer.flush()?;
    }
    Ok(())
}

fn append_csv_row(
    writer: &mut csv::Writer<&mut MemberWriter>,
    header: &mut Option<Vec<String>>,
    row: &Row,
) -> Result<(), ContainerError> {
    let obj = match row.as_object() {
        Some(obj) => obj,
        None => {
            warn!("skipping non-object row in tabular output");
            return Ok(());
        }
    };

    // The header is written once, from the first tabulated row's columns.
    if header.is_none() {
        let columns: Vec<String> = obj.keys().cloned().collect();
        if let Err(err) = writer.write_record(&columns) {
            return csv_row_error(err);
        }
        *header = Some(columns);
    }

    let columns = header.as_ref().unwrap();
    let record: Vec<String> = columns
        .iter()
        .map(|column| match obj.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
        .collect();
    if let Err(err) = writer.write_record(&record) {
        return csv_row_error(err);
    }
    Ok(())
}

/// Stream failures are fatal; anything else only loses this row.
fn csv_row_error(err: csv::Error) -> Result<(), ContainerError> {
    if err.is_io_error() {
        Err(ContainerError::Csv(err))
    } else {
        warn!(error = %err, "skipping row in tabular output");
        Ok(())
    }
}
