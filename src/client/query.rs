use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use crate::error::{PgWireError, Result};
use crate::protocol::FieldDescription;
use crate::protocol::framing::{read_backend_message, write_query};
use crate::protocol::messages::{parse_command_complete, parse_data_row, parse_row_description};
use crate::types::{Codecs, FromValue};

/// One result row. Column values stay undecoded until [`get`](Row::get).
#[derive(Debug, Clone)]
pub struct Row {
    fields: Arc<Vec<FieldDescription>>,
    values: Vec<Option<Bytes>>,
    codecs: Arc<Codecs>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    /// Raw column bytes, `None` for NULL.
    pub fn raw(&self, idx: usize) -> Option<&Bytes> {
        self.values.get(idx).and_then(Option::as_ref)
    }

    /// Decode column `idx` through the registry. NULL decodes to `None`.
    pub fn get<T: FromValue>(&self, idx: usize) -> Result<Option<T>> {
        let field = self.fields.get(idx).ok_or_else(|| {
            PgWireError::Protocol(format!(
                "column index {idx} out of range for {} columns",
                self.fields.len()
            ))
        })?;
        let value = self.values.get(idx).and_then(Option::as_ref);
        self.codecs
            .decode_as(value, field.type_oid, field.format)
    }
}

/// Rows and command tags of one simple-query round trip.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// One `CommandComplete` tag per statement, e.g. `SET`, `SELECT 1`.
    pub tags: Vec<String>,
}

/// Run `sql` with the simple query protocol and read up to `ReadyForQuery`.
///
/// An `ErrorResponse` does not end the read early: the stream is drained to
/// `ReadyForQuery` so the connection stays usable, then the error is returned.
pub(crate) async fn simple_query<S>(
    stream: &mut S,
    codecs: &Arc<Codecs>,
    sql: &str,
) -> Result<QueryResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    trace!(sql, "simple query");
    write_query(stream, sql).await?;

    let mut result = QueryResult::default();
    let mut fields = Arc::new(Vec::new());
    let mut error = None;

    loop {
        let msg = read_backend_message(stream).await?;
        match msg.tag {
            b'T' => fields = Arc::new(parse_row_description(msg.payload)?),
            b'D' => {
                let values = parse_data_row(msg.payload)?;
                if values.len() != fields.len() {
                    return Err(PgWireError::Protocol(format!(
                        "DataRow has {} columns, RowDescription {}",
                        values.len(),
                        fields.len()
                    )));
                }
                result.rows.push(Row {
                    fields: Arc::clone(&fields),
                    values,
                    codecs: Arc::clone(codecs),
                });
            }
            b'C' => result.tags.push(parse_command_complete(msg.payload)?),
            b'I' => {}
            b'E' => {
                let err = PgWireError::from_error_response(&msg.payload);
                debug!(error = %err, "query failed");
                error.get_or_insert(err);
            }
            b'Z' => {
                return match error {
                    Some(err) => Err(err),
                    None => Ok(result),
                };
            }
            // NoticeResponse, ParameterStatus, NotificationResponse
            _ => {}
        }
    }
}
