//! Numeric identifiers used on the wire.
//!
//! Header and body maps are keyed by small unsigned integers rather than
//! strings; the constants below name them.

// Header keys
pub const REQUEST_TYPE: u8 = 0x00;
pub const SYNC: u8 = 0x01;
pub const SCHEMA_VERSION: u8 = 0x05;

// Body keys
pub const SPACE_ID: u8 = 0x10;
pub const INDEX_ID: u8 = 0x11;
pub const LIMIT: u8 = 0x12;
pub const OFFSET: u8 = 0x13;
pub const ITERATOR: u8 = 0x14;
pub const INDEX_BASE: u8 = 0x15;
pub const KEY: u8 = 0x20;
pub const TUPLE: u8 = 0x21;
pub const FUNCTION_NAME: u8 = 0x22;
pub const USER_NAME: u8 = 0x23;
pub const EXPR: u8 = 0x27;
pub const OPS: u8 = 0x28;
pub const DATA: u8 = 0x30;
pub const ERROR: u8 = 0x31;
pub const METADATA: u8 = 0x32;
pub const SQL_TEXT: u8 = 0x40;
pub const SQL_BIND: u8 = 0x41;
pub const SQL_INFO: u8 = 0x42;

// Keys inside SQL_INFO
pub const SQL_INFO_ROW_COUNT: u8 = 0x00;
pub const SQL_INFO_AUTOINCREMENT_IDS: u8 = 0x01;

// Keys inside each METADATA entry
pub const FIELD_NAME: u8 = 0x00;
pub const FIELD_TYPE: u8 = 0x01;

/// Status code of a successful response.
pub const OK: u32 = 0x00;

/// Bit set in the status code of every error response; the low bits carry
/// the server error code.
pub const TYPE_ERROR: u32 = 0x8000;

// System catalog
pub const VSPACE_ID: u32 = 281;
pub const VINDEX_ID: u32 = 289;
pub const VSPACE_NAME_INDEX: u32 = 2;
pub const VINDEX_NAME_INDEX: u32 = 2;

/// Request type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequestType {
    Select = 1,
    Insert = 2,
    Replace = 3,
    Update = 4,
    Delete = 5,
    Auth = 7,
    Eval = 8,
    Upsert = 9,
    Call = 10,
    Execute = 11,
    Ping = 64,
}

impl RequestType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::Select,
            2 => Self::Insert,
            3 => Self::Replace,
            4 => Self::Update,
            5 => Self::Delete,
            7 => Self::Auth,
            8 => Self::Eval,
            9 => Self::Upsert,
            10 => Self::Call,
            11 => Self::Execute,
            64 => Self::Ping,
            _ => return None,
        })
    }
}

/// Index iteration strategy for select requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Iterator {
    #[default]
    Eq = 0,
    Req = 1,
    All = 2,
    Lt = 3,
    Le = 4,
    Ge = 5,
    Gt = 6,
    BitsAllSet = 7,
    BitsAnySet = 8,
    BitsAllNotSet = 9,
    Overlaps = 10,
    Neighbor = 11,
}

impl Iterator {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Eq,
            1 => Self::Req,
            2 => Self::All,
            3 => Self::Lt,
            4 => Self::Le,
            5 => Self::Ge,
            6 => Self::Gt,
            7 => Self::BitsAllSet,
            8 => Self::BitsAnySet,
            9 => Self::BitsAllNotSet,
            10 => Self::Overlaps,
            11 => Self::Neighbor,
            _ => return None,
        })
    }
}
