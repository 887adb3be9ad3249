use bytes::{Buf, Bytes};

use crate::error::{PgWireError, Result};
use crate::types::{Format, Oid};

/// Fields of an `ErrorResponse` / `NoticeResponse` payload.
///
/// Wire layout: repeated `(code_byte, cstring)` pairs, terminated by a zero byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    pub severity: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ErrorFields {
    pub fn parse(payload: &[u8]) -> ErrorFields {
        let mut fields = ErrorFields::default();
        let mut b = payload;

        while let Some((&code, rest)) = b.split_first() {
            if code == 0 {
                break;
            }
            let Some(pos) = rest.iter().position(|&x| x == 0) else {
                break;
            };
            let s = String::from_utf8_lossy(&rest[..pos]).into_owned();
            match code {
                // 'V' is the non-localized severity; prefer it over 'S'.
                b'V' => fields.severity = Some(s),
                b'S' if fields.severity.is_none() => fields.severity = Some(s),
                b'C' => fields.code = Some(s),
                b'M' => fields.message = Some(s),
                b'D' => fields.detail = Some(s),
                b'H' => fields.hint = Some(s),
                _ => {}
            }
            b = &rest[pos + 1..];
        }

        fields
    }
}

/// Human-readable one-line rendering of an error payload.
pub fn parse_error_response(payload: &[u8]) -> String {
    let f = ErrorFields::parse(payload);
    match (f.message, f.code) {
        (Some(m), Some(c)) => format!("{m} (SQLSTATE {c})"),
        (Some(m), None) => m,
        _ => "unknown server error".to_string(),
    }
}

pub fn parse_auth_request(payload: &[u8]) -> Result<(i32, &[u8])> {
    if payload.len() < 4 {
        return Err(PgWireError::Protocol("auth request too short".into()));
    }
    let mut b = payload;
    let code = b.get_i32();
    Ok((code, b))
}

/// A decoded `Authentication*` (`R`) backend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMessage {
    /// Code 0.
    Ok,
    /// Code 3.
    CleartextPassword,
    /// Code 5.
    Md5Password { salt: [u8; 4] },
    /// Code 10: list of offered SASL mechanisms.
    Sasl { mechanisms: Vec<String> },
    /// Code 11: server-first-message (or later challenge).
    SaslContinue { data: Bytes },
    /// Code 12: server-final-message.
    SaslFinal { data: Bytes },
    /// Any other code (Kerberos, GSS, SSPI, ...).
    Unsupported { code: i32 },
}

impl AuthenticationMessage {
    pub fn parse(payload: &[u8]) -> Result<AuthenticationMessage> {
        let (code, rest) = parse_auth_request(payload)?;
        let msg = match code {
            0 => AuthenticationMessage::Ok,
            3 => AuthenticationMessage::CleartextPassword,
            5 => {
                let salt: [u8; 4] = rest
                    .get(..4)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| PgWireError::Protocol("md5 auth salt missing".into()))?;
                AuthenticationMessage::Md5Password { salt }
            }
            10 => AuthenticationMessage::Sasl {
                mechanisms: parse_cstring_list(rest),
            },
            11 => AuthenticationMessage::SaslContinue {
                data: Bytes::copy_from_slice(rest),
            },
            12 => AuthenticationMessage::SaslFinal {
                data: Bytes::copy_from_slice(rest),
            },
            code => AuthenticationMessage::Unsupported { code },
        };
        Ok(msg)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AuthenticationMessage::Ok)
    }
}

/// Parse a zero-terminated list of cstrings (SASL mechanism names).
fn parse_cstring_list(mut b: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(pos) = b.iter().position(|&x| x == 0) {
        if pos == 0 {
            break;
        }
        out.push(String::from_utf8_lossy(&b[..pos]).into_owned());
        b = &b[pos + 1..];
    }
    out
}

fn read_cstring(b: &mut Bytes) -> Result<String> {
    let pos = b
        .iter()
        .position(|&x| x == 0)
        .ok_or_else(|| PgWireError::Protocol("unterminated string in message".into()))?;
    let s = b.split_to(pos);
    b.advance(1);
    String::from_utf8(s.to_vec())
        .map_err(|e| PgWireError::Protocol(format!("invalid utf-8 in message: {e}")))
}

fn need(b: &Bytes, n: usize, what: &str) -> Result<()> {
    if b.remaining() < n {
        return Err(PgWireError::Protocol(format!("{what} truncated")));
    }
    Ok(())
}

/// `ParameterStatus` (`S`): a run-time parameter reported by the server.
pub fn parse_parameter_status(payload: Bytes) -> Result<(String, String)> {
    let mut b = payload;
    let name = read_cstring(&mut b)?;
    let value = read_cstring(&mut b)?;
    Ok((name, value))
}

/// `BackendKeyData` (`K`): process id and secret key for cancel requests.
pub fn parse_backend_key_data(payload: &[u8]) -> Result<(i32, i32)> {
    if payload.len() < 8 {
        return Err(PgWireError::Protocol("BackendKeyData too short".into()));
    }
    let mut b = payload;
    Ok((b.get_i32(), b.get_i32()))
}

/// One field of a `RowDescription` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_id: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// `RowDescription` (`T`).
pub fn parse_row_description(payload: Bytes) -> Result<Vec<FieldDescription>> {
    let mut b = payload;
    need(&b, 2, "RowDescription")?;
    let count = b.get_i16();
    if count < 0 {
        return Err(PgWireError::Protocol(format!(
            "negative RowDescription field count: {count}"
        )));
    }

    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = read_cstring(&mut b)?;
        need(&b, 18, "RowDescription field")?;
        let table_oid = b.get_u32();
        let column_id = b.get_i16();
        let type_oid = Oid::from(b.get_u32());
        let type_size = b.get_i16();
        let type_modifier = b.get_i32();
        let format = Format::try_from(b.get_i16())?;
        fields.push(FieldDescription {
            name,
            table_oid,
            column_id,
            type_oid,
            type_size,
            type_modifier,
            format,
        });
    }
    Ok(fields)
}

/// `DataRow` (`D`). Column values are zero-copy slices of the message payload;
/// `None` is SQL NULL.
pub fn parse_data_row(payload: Bytes) -> Result<Vec<Option<Bytes>>> {
    let mut b = payload;
    need(&b, 2, "DataRow")?;
    let count = b.get_i16();
    if count < 0 {
        return Err(PgWireError::Protocol(format!(
            "negative DataRow column count: {count}"
        )));
    }

    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        need(&b, 4, "DataRow column length")?;
        let len = b.get_i32();
        if len < 0 {
            values.push(None);
            continue;
        }
        let len = len as usize;
        need(&b, len, "DataRow column")?;
        values.push(Some(b.split_to(len)));
    }
    Ok(values)
}

/// `CommandComplete` (`C`): the command tag, e.g. `SET` or `SELECT 1`.
pub fn parse_command_complete(payload: Bytes) -> Result<String> {
    let mut b = payload;
    read_cstring(&mut b)
}
