/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fmt;

use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use serde::Serialize;

pub const PROTOCOL_VERSION: u8 = 10;

// Header
pub const HEADER_LEN: usize = 4;
pub const NUMBER_OFFSET: usize = 3;

// Compressed Header
pub const COMPRESS_HEADER_LEN: usize = 7;
pub const COMPRESS_HEADER_UNCOMPRESS_OFFSET: usize = 4;

// Greeting
pub const SALT_LEN: usize = 8;
pub const GREETING_RESERVED_LEN: usize = 10;

// Login
pub const LOGIN_FILLER_LEN: usize = 23;

// Response
pub const MYSQL_RESPONSE_CODE_OK: u8 = 0;
pub const MYSQL_RESPONSE_CODE_ERR: u8 = 0xff;
pub const MYSQL_RESPONSE_CODE_EOF: u8 = 0xfe;
// an EOF packet is always shorter than this, a 0xfe led row or header is not
pub const EOF_PACKET_MAX_LEN: usize = 9;

pub const SQL_STATE_MARKER: u8 = b'#';
pub const SQL_STATE_LEN: usize = 5;

pub const CLIENT_STATUS_CODE_MIN: i32 = 2000;
pub const CLIENT_STATUS_CODE_MAX: i32 = 2999;

// Field descriptor
pub const FIELD_FILLER_LEN: usize = 2;

// Prepared statement
pub const PREPARE_OK_FILLER_LEN: usize = 1;
pub const CURSOR_TYPE_NO_CURSOR: u8 = 0;
pub const NEW_PARAMS_BOUND: u8 = 1;
pub const PARAM_UNSIGNED_MASK: u8 = 0x80;

// int
pub const INT_FLAGS_NULL: u8 = 0xfb;
pub const INT_FLAGS_2: u8 = 0xfc;
pub const INT_FLAGS_3: u8 = 0xfd;
pub const INT_FLAGS_8: u8 = 0xfe;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    Sleep = 0x00,
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    CreateDb = 0x05,
    DropDb = 0x06,
    Refresh = 0x07,
    Shutdown = 0x08,
    Statistics = 0x09,
    ProcessInfo = 0x0a,
    Connect = 0x0b,
    ProcessKill = 0x0c,
    Debug = 0x0d,
    Ping = 0x0e,
    Time = 0x0f,
    DelayedInsert = 0x10,
    ChangeUser = 0x11,
    BinlogDump = 0x12,
    TableDump = 0x13,
    ConnectOut = 0x14,
    RegisterSlave = 0x15,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    Daemon = 0x1d,
    BinlogDumpGtid = 0x1e,
    ResetConnection = 0x1f,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sleep => "COM_SLEEP",
            Self::Quit => "COM_QUIT",
            Self::InitDb => "COM_INIT_DB",
            Self::Query => "COM_QUERY",
            Self::FieldList => "COM_FIELD_LIST",
            Self::CreateDb => "COM_CREATE_DB",
            Self::DropDb => "COM_DROP_DB",
            Self::Refresh => "COM_REFRESH",
            Self::Shutdown => "COM_SHUTDOWN",
            Self::Statistics => "COM_STATISTICS",
            Self::ProcessInfo => "COM_PROCESS_INFO",
            Self::Connect => "COM_CONNECT",
            Self::ProcessKill => "COM_PROCESS_KILL",
            Self::Debug => "COM_DEBUG",
            Self::Ping => "COM_PING",
            Self::Time => "COM_TIME",
            Self::DelayedInsert => "COM_DELAYED_INSERT",
            Self::ChangeUser => "COM_CHANGE_USER",
            Self::BinlogDump => "COM_BINLOG_DUMP",
            Self::TableDump => "COM_TABLE_DUMP",
            Self::ConnectOut => "COM_CONNECT_OUT",
            Self::RegisterSlave => "COM_REGISTER_SLAVE",
            Self::StmtPrepare => "COM_STMT_PREPARE",
            Self::StmtExecute => "COM_STMT_EXECUTE",
            Self::StmtSendLongData => "COM_STMT_SEND_LONG_DATA",
            Self::StmtClose => "COM_STMT_CLOSE",
            Self::StmtReset => "COM_STMT_RESET",
            Self::SetOption => "COM_SET_OPTION",
            Self::StmtFetch => "COM_STMT_FETCH",
            Self::Daemon => "COM_DAEMON",
            Self::BinlogDumpGtid => "COM_BINLOG_DUMP_GTID",
            Self::ResetConnection => "COM_RESET_CONNECTION",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

bitflags! {
    #[derive(Default)]
    pub struct ClientCapabilities: u16 {
        const LONG_PASSWORD = 1;
        const FOUND_ROWS = 1 << 1;
        const LONG_FLAG = 1 << 2;
        const CONNECT_WITH_DB = 1 << 3;
        const NO_SCHEMA = 1 << 4;
        const COMPRESS = 1 << 5;
        const ODBC = 1 << 6;
        const LOCAL_FILES = 1 << 7;
        const IGNORE_SPACE = 1 << 8;
        const PROTOCOL_41 = 1 << 9;
        const INTERACTIVE = 1 << 10;
        const SSL = 1 << 11;
        const IGNORE_SIGPIPE = 1 << 12;
        const TRANSACTIONS = 1 << 13;
        const RESERVED = 1 << 14;
        const SECURE_CONNECTION = 1 << 15;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct ExtClientCapabilities: u16 {
        const MULTI_STATEMENTS = 1;
        const MULTI_RESULTS = 1 << 1;
        const PS_MULTI_RESULTS = 1 << 2;
        const PLUGIN_AUTH = 1 << 3;
        const CONNECT_ATTRS = 1 << 4;
        const PLUGIN_AUTH_LENENC_CLIENT_DATA = 1 << 5;
        const CAN_HANDLE_EXPIRED_PASSWORDS = 1 << 6;
        const SESSION_TRACK = 1 << 7;
        const DEPRECATE_EOF = 1 << 8;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct ServerStatus: u16 {
        const IN_TRANS = 0x0001;
        const AUTOCOMMIT = 0x0002;
        const MORE_RESULTS_EXISTS = 0x0008;
        const NO_GOOD_INDEX_USED = 0x0010;
        const NO_INDEX_USED = 0x0020;
        const CURSOR_EXISTS = 0x0040;
        const LAST_ROW_SENT = 0x0080;
        const DB_DROPPED = 0x0100;
        const NO_BACKSLASH_ESCAPES = 0x0200;
        const METADATA_CHANGED = 0x0400;
        const QUERY_WAS_SLOW = 0x0800;
        const PS_OUT_PARAMS = 0x1000;
        const IN_TRANS_READONLY = 0x2000;
        const SESSION_STATE_CHANGED = 0x4000;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct ParamFlags: u8 {
        // value arrived earlier through COM_STMT_SEND_LONG_DATA
        const STREAMED = 0x01;
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0a,
    Time = 0x0b,
    Datetime = 0x0c,
    Year = 0x0d,
    NewDate = 0x0e,
    Varchar = 0x0f,
    Bit = 0x10,
    Json = 0xf5,
    NewDecimal = 0xf6,
    Enum = 0xf7,
    Set = 0xf8,
    TinyBlob = 0xf9,
    MediumBlob = 0xfa,
    LongBlob = 0xfb,
    Blob = 0xfc,
    VarString = 0xfd,
    String = 0xfe,
    Geometry = 0xff,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decimal => "FIELD_TYPE_DECIMAL",
            Self::Tiny => "FIELD_TYPE_TINY",
            Self::Short => "FIELD_TYPE_SHORT",
            Self::Long => "FIELD_TYPE_LONG",
            Self::Float => "FIELD_TYPE_FLOAT",
            Self::Double => "FIELD_TYPE_DOUBLE",
            Self::Null => "FIELD_TYPE_NULL",
            Self::Timestamp => "FIELD_TYPE_TIMESTAMP",
            Self::LongLong => "FIELD_TYPE_LONGLONG",
            Self::Int24 => "FIELD_TYPE_INT24",
            Self::Date => "FIELD_TYPE_DATE",
            Self::Time => "FIELD_TYPE_TIME",
            Self::Datetime => "FIELD_TYPE_DATETIME",
            Self::Year => "FIELD_TYPE_YEAR",
            Self::NewDate => "FIELD_TYPE_NEWDATE",
            Self::Varchar => "FIELD_TYPE_VARCHAR",
            Self::Bit => "FIELD_TYPE_BIT",
            Self::Json => "FIELD_TYPE_JSON",
            Self::NewDecimal => "FIELD_TYPE_NEWDECIMAL",
            Self::Enum => "FIELD_TYPE_ENUM",
            Self::Set => "FIELD_TYPE_SET",
            Self::TinyBlob => "FIELD_TYPE_TINY_BLOB",
            Self::MediumBlob => "FIELD_TYPE_MEDIUM_BLOB",
            Self::LongBlob => "FIELD_TYPE_LONG_BLOB",
            Self::Blob => "FIELD_TYPE_BLOB",
            Self::VarString => "FIELD_TYPE_VAR_STRING",
            Self::String => "FIELD_TYPE_STRING",
            Self::Geometry => "FIELD_TYPE_GEOMETRY",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_from_opcode() {
        assert_eq!(Command::try_from(0x03u8).ok(), Some(Command::Query));
        assert_eq!(
            Command::try_from(0x1fu8).ok(),
            Some(Command::ResetConnection)
        );
        assert!(Command::try_from(0x20u8).is_err());
        assert_eq!(Command::StmtSendLongData.to_string(), "COM_STMT_SEND_LONG_DATA");
    }

    #[test]
    fn field_type_gaps() {
        assert_eq!(FieldType::try_from(0xf6u8).ok(), Some(FieldType::NewDecimal));
        assert!(FieldType::try_from(0x11u8).is_err());
        assert!(FieldType::try_from(0xf4u8).is_err());
        assert_eq!(FieldType::LongBlob.to_string(), "FIELD_TYPE_LONG_BLOB");
    }

    #[test]
    fn capability_bits() {
        let caps = ClientCapabilities::from_bits_truncate(0xa20d);
        assert!(caps.contains(ClientCapabilities::PROTOCOL_41));
        assert!(caps.contains(ClientCapabilities::SECURE_CONNECTION));
        assert!(caps.contains(ClientCapabilities::CONNECT_WITH_DB));
        assert!(!caps.contains(ClientCapabilities::COMPRESS));
        let ext = ExtClientCapabilities::from_bits_truncate(0x00ff);
        assert!(ext.contains(
            ExtClientCapabilities::PLUGIN_AUTH | ExtClientCapabilities::CONNECT_ATTRS
        ));
        assert!(!ext.contains(ExtClientCapabilities::DEPRECATE_EOF));
    }
}
