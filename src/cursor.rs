//! Cursor type emulation.
//!
//! Results are materialized client-side, so every scrollable cursor is really
//! static. What an application gets for a requested type depends on the
//! FORWARD_CURSOR and DYNAMIC_CURSOR option bits.

use crate::connstr::OptionFlags;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorType {
    ForwardOnly,
    KeysetDriven,
    Dynamic,
    Static,
}

impl CursorType {
    pub fn from_attr(value: SQLULEN) -> Option<Self> {
        match value {
            SQL_CURSOR_FORWARD_ONLY => Some(CursorType::ForwardOnly),
            SQL_CURSOR_KEYSET_DRIVEN => Some(CursorType::KeysetDriven),
            SQL_CURSOR_DYNAMIC => Some(CursorType::Dynamic),
            SQL_CURSOR_STATIC => Some(CursorType::Static),
            _ => None,
        }
    }

    pub fn as_attr(self) -> SQLULEN {
        match self {
            CursorType::ForwardOnly => SQL_CURSOR_FORWARD_ONLY,
            CursorType::KeysetDriven => SQL_CURSOR_KEYSET_DRIVEN,
            CursorType::Dynamic => SQL_CURSOR_DYNAMIC,
            CursorType::Static => SQL_CURSOR_STATIC,
        }
    }

    pub fn is_scrollable(self) -> bool {
        self != CursorType::ForwardOnly
    }
}

use CursorType::{Dynamic as DYN, ForwardOnly as FO, Static as ST};

// Rows: default, forward forced, dynamic enabled, both bits.
// Columns: forward-only, keyset-driven, dynamic, static.
const TABLE: [[CursorType; 4]; 4] = [
    [FO, ST, ST, ST],
    [FO, FO, FO, FO],
    [FO, ST, DYN, ST],
    [FO, FO, FO, FO],
];

fn row(flags: OptionFlags) -> usize {
    let forced = flags.contains(OptionFlags::FORWARD_CURSOR);
    let dynamic = flags.contains(OptionFlags::DYNAMIC_CURSOR);
    match (forced, dynamic) {
        (false, false) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (true, true) => 3,
    }
}

fn column(requested: CursorType) -> usize {
    match requested {
        CursorType::ForwardOnly => 0,
        CursorType::KeysetDriven => 1,
        CursorType::Dynamic => 2,
        CursorType::Static => 3,
    }
}

/// The cursor type actually provided for `requested`.
pub fn effective(flags: OptionFlags, requested: CursorType) -> CursorType {
    TABLE[row(flags)][column(requested)]
}

/// `SQL_SCROLL_OPTIONS` bitmask for the given option bits.
pub fn scroll_options(flags: OptionFlags) -> SQLUINTEGER {
    TABLE[row(flags)]
        .iter()
        .fold(0, |mask, ty| {
            mask | match ty {
                CursorType::ForwardOnly => SQL_SO_FORWARD_ONLY,
                CursorType::KeysetDriven => SQL_SO_KEYSET_DRIVEN,
                CursorType::Dynamic => SQL_SO_DYNAMIC,
                CursorType::Static => SQL_SO_STATIC,
            }
        })
}
