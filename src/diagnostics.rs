use crate::buffer;
use crate::error::DriverError;
use crate::types::*;
use std::ptr;

const VENDOR_PREFIX: &str = "[whisker]";

/// Diagnostic record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRecord {
    pub state: String, // 5-char SQLSTATE e.g. "HY000"
    pub native_error: i32,
    pub message: String,
}

/// Records accumulated by the most recent call on one handle.
#[derive(Debug, Default)]
pub struct Diagnostics {
    records: Vec<DiagRecord>,
}

impl Diagnostics {
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn push(&mut self, err: &DriverError) {
        let origin = match err {
            DriverError::Server { .. }
            | DriverError::Syntax { .. }
            | DriverError::ConstraintViolation { .. } => "[server]",
            _ => "[driver]",
        };
        self.records.push(DiagRecord {
            state: err.sqlstate().to_string(),
            native_error: err.native_code(),
            message: format!("{VENDOR_PREFIX}{origin}{err}"),
        });
    }

    /// 1-based, as `SQLGetDiagRec` numbers records.
    pub fn get(&self, rec_number: usize) -> Option<&DiagRecord> {
        rec_number.checked_sub(1).and_then(|i| self.records.get(i))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.records.iter().any(|r| r.state == state)
    }
}

pub unsafe fn get_diag_rec(
    diagnostics: &Diagnostics,
    rec_number: SQLSMALLINT,
    sql_state: *mut SQLCHAR,
    native_error: *mut SQLINTEGER,
    message_text: *mut SQLCHAR,
    buffer_length: SQLSMALLINT,
    text_length: *mut SQLSMALLINT,
) -> SQLRETURN {
    if rec_number < 1 || buffer_length < 0 {
        return SQL_ERROR;
    }
    let rec = match diagnostics.get(rec_number as usize) {
        Some(rec) => rec,
        None => return SQL_NO_DATA,
    };

    // Copy SQLSTATE (5 chars + null)
    if !sql_state.is_null() {
        let state_bytes = rec.state.as_bytes();
        let copy_len = std::cmp::min(state_bytes.len(), 5);
        ptr::copy_nonoverlapping(state_bytes.as_ptr(), sql_state, copy_len);
        for i in copy_len..6 {
            *sql_state.add(i) = 0;
        }
    }

    if !native_error.is_null() {
        *native_error = rec.native_error;
    }

    let msg_bytes = rec.message.as_bytes();
    buffer::write_len_i16(text_length, msg_bytes.len());
    if buffer::write_bytes(msg_bytes, message_text, buffer_length as usize) {
        return SQL_SUCCESS_WITH_INFO;
    }
    SQL_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_numbered_from_one() {
        let mut diags = Diagnostics::default();
        diags.push(&DriverError::InvalidAttributeValue("isolation 999".into()));
        diags.push(&DriverError::DataTruncated);

        assert_eq!(diags.get(0), None);
        assert_eq!(diags.get(1).map(|r| r.state.as_str()), Some("HY024"));
        assert_eq!(diags.get(2).map(|r| r.state.as_str()), Some("01004"));
        assert_eq!(diags.get(3), None);
        assert!(diags.has_state("01004"));

        diags.clear();
        assert!(diags.is_empty());
    }

    #[test]
    fn retrieval_truncates_message_with_info() {
        let mut diags = Diagnostics::default();
        diags.push(&DriverError::Cancelled);

        let mut state = [0u8; 6];
        let mut native = -1;
        let mut msg = [0u8; 8];
        let mut len = 0;
        let rc = unsafe {
            get_diag_rec(
                &diags,
                1,
                state.as_mut_ptr(),
                &mut native,
                msg.as_mut_ptr(),
                msg.len() as SQLSMALLINT,
                &mut len,
            )
        };
        assert_eq!(rc, SQL_SUCCESS_WITH_INFO);
        assert_eq!(&state[..5], b"HY008");
        assert_eq!(native, 0);
        assert_eq!(len as usize, diags.get(1).map(|r| r.message.len()).unwrap_or(0));
        assert_eq!(msg[7], 0);

        let rc = unsafe {
            get_diag_rec(
                &diags,
                2,
                state.as_mut_ptr(),
                &mut native,
                msg.as_mut_ptr(),
                msg.len() as SQLSMALLINT,
                &mut len,
            )
        };
        assert_eq!(rc, SQL_NO_DATA);
    }
}
