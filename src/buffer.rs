//! Reading caller strings and writing into caller-owned output buffers.

use std::ffi::CStr;
use std::ptr;

use crate::types::*;

/// Reads an ANSI argument; `SQL_NTS` means NUL-terminated.
pub unsafe fn read_bytes(ptr: *const SQLCHAR, len: SQLLEN) -> Vec<u8> {
    if ptr.is_null() {
        return Vec::new();
    }
    if len == SQL_NTS {
        CStr::from_ptr(ptr as *const std::os::raw::c_char)
            .to_bytes()
            .to_vec()
    } else if len > 0 {
        std::slice::from_raw_parts(ptr, len as usize).to_vec()
    } else {
        Vec::new()
    }
}

/// Reads a UTF-16 argument; `SQL_NTS` means NUL-terminated.
pub unsafe fn read_wide(ptr: *const SQLWCHAR, len: SQLLEN) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let count = if len == SQL_NTS {
        let mut n = 0;
        while *ptr.add(n) != 0 {
            n += 1;
        }
        n
    } else if len > 0 {
        len as usize
    } else {
        0
    };
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, count))
}

/// Copies `src` into a NUL-terminated output buffer of `capacity` bytes.
///
/// Returns `true` when the value did not fit. A null `dst` or zero capacity
/// copies nothing and is not reported as truncation, so callers can use it to
/// ask for the required length only.
pub unsafe fn write_bytes(src: &[u8], dst: *mut SQLCHAR, capacity: usize) -> bool {
    if dst.is_null() || capacity == 0 {
        return false;
    }
    let copy_len = src.len().min(capacity - 1);
    ptr::copy_nonoverlapping(src.as_ptr(), dst, copy_len);
    *dst.add(copy_len) = 0;
    src.len() >= capacity
}

pub unsafe fn write_len_i16(out: *mut SQLSMALLINT, len: usize) {
    if !out.is_null() {
        *out = len.min(SQLSMALLINT::MAX as usize) as SQLSMALLINT;
    }
}

pub unsafe fn write_len_i32(out: *mut SQLINTEGER, len: usize) {
    if !out.is_null() {
        *out = len.min(SQLINTEGER::MAX as usize) as SQLINTEGER;
    }
}

pub unsafe fn write_len(out: *mut SQLLEN, len: SQLLEN) {
    if !out.is_null() {
        *out = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_reports_truncation_and_terminates() {
        let mut buf = [0xAAu8; 4];
        let truncated = unsafe { write_bytes(b"abcdef", buf.as_mut_ptr(), buf.len()) };
        assert!(truncated);
        assert_eq!(&buf, b"abc\0");

        let mut exact = [0xAAu8; 7];
        let truncated = unsafe { write_bytes(b"abcdef", exact.as_mut_ptr(), exact.len()) };
        assert!(!truncated);
        assert_eq!(&exact, b"abcdef\0");
    }

    #[test]
    fn read_honours_nts_and_explicit_length() {
        let text = b"SELECT 1\0garbage";
        assert_eq!(unsafe { read_bytes(text.as_ptr(), SQL_NTS) }, b"SELECT 1");
        assert_eq!(unsafe { read_bytes(text.as_ptr(), 6) }, b"SELECT");
        assert!(unsafe { read_bytes(std::ptr::null(), SQL_NTS) }.is_empty());
    }
}
