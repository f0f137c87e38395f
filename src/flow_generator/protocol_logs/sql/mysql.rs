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

mod buffer;
mod consts;
mod state;
mod value;

pub use buffer::Buffer;
pub use consts::{
    ClientCapabilities, Command, ExtClientCapabilities, FieldType, ParamFlags, ServerStatus,
};
pub use state::{
    CompressionState, ConnectionData, ConnectionState, ParamType, PreparedStatement,
};
pub use value::{decode_datetime, decode_param, decode_time, MysqlDateTime, MysqlTime, ParamValue};

use log::{debug, info, trace, warn};
use serde::Serialize;

use super::super::{value_is_default, L7ResponseStatus, LogMessageType};
use crate::{
    common::flow::{L7PerfStats, PacketDirection},
    config::MysqlParserConfig,
    flow_generator::error::{Error, Result},
};
use consts::*;
use public::bytes::read_u24_le;

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub length: u32,
    pub field_type: u8,
    pub flags: u16,
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ExecuteParam {
    pub index: usize,
    pub field_type: u8,
    pub unsigned: bool,
    // value was sent earlier by COM_STMT_SEND_LONG_DATA
    #[serde(skip_serializing_if = "value_is_default")]
    pub streamed: bool,
    pub value: Option<ParamValue>,
}

/// What one packet carried.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub enum MysqlEvent {
    Greeting {
        protocol_version: u8,
        server_version: String,
        thread_id: u32,
        capabilities: u16,
        ext_capabilities: u16,
        charset: u8,
        status: u16,
        auth_plugin: String,
    },
    Login {
        capabilities: u16,
        ext_capabilities: u16,
        max_packet: u32,
        charset: u8,
        user: String,
        schema: Option<String>,
        auth_plugin: Option<String>,
        attributes: Vec<(String, String)>,
    },
    AuthSwitchResponse {
        data_len: usize,
    },
    Quit,
    InitDb {
        schema: String,
    },
    CreateDb {
        schema: String,
    },
    DropDb {
        schema: String,
    },
    Query {
        sql: String,
    },
    FieldList {
        table: String,
        wildcard: String,
    },
    Refresh {
        flags: u8,
    },
    Shutdown {
        level: Option<u8>,
    },
    Statistics,
    ProcessInfo,
    ProcessKill {
        thread_id: u32,
    },
    Debug,
    Ping,
    ChangeUser {
        user: String,
        schema: String,
        charset: Option<u16>,
        auth_plugin: Option<String>,
        attributes: Vec<(String, String)>,
    },
    BinlogDump {
        position: u32,
        flags: u16,
        server_id: u32,
        file: String,
    },
    StmtPrepare {
        sql: String,
    },
    StmtExecute {
        statement_id: u32,
        flags: u8,
        iterations: u32,
        params: Vec<ExecuteParam>,
        // bytes left undecoded, no statement metadata or an undecodable type
        unparsed: usize,
    },
    StmtSendLongData {
        statement_id: u32,
        param: u16,
        data_len: usize,
    },
    StmtClose {
        statement_id: u32,
    },
    StmtReset {
        statement_id: u32,
    },
    SetOption {
        option: u16,
    },
    StmtFetch {
        statement_id: u32,
        rows: u32,
    },
    ResetConnection,
    // commands carried through without decoding their body
    Command {
        command: Command,
        payload_len: usize,
    },
    Ok {
        affected_rows: u64,
        last_insert_id: u64,
        status: u16,
        warnings: u16,
        info: String,
    },
    Error {
        code: i16,
        sql_state: Option<String>,
        message: String,
    },
    Eof {
        warnings: u16,
        status: u16,
    },
    PrepareOk {
        statement_id: u32,
        field_count: u16,
        param_count: u16,
        warnings: u16,
    },
    Message {
        text: String,
    },
    ResultHeader {
        columns: u64,
        extra: Option<u64>,
    },
    Field(FieldDescriptor),
    Row {
        values: Vec<Option<String>>,
    },
    AuthSwitch {
        name: String,
        data: Vec<u8>,
    },
    Compressed {
        compressed_len: u32,
        uncompressed_len: u32,
    },
    Opaque {
        len: usize,
    },
}

impl MysqlEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Greeting { .. } => "greeting",
            Self::Login { .. } => "login request",
            Self::AuthSwitchResponse { .. } => "auth switch response",
            Self::Quit => "COM_QUIT",
            Self::InitDb { .. } => "COM_INIT_DB",
            Self::CreateDb { .. } => "COM_CREATE_DB",
            Self::DropDb { .. } => "COM_DROP_DB",
            Self::Query { .. } => "COM_QUERY",
            Self::FieldList { .. } => "COM_FIELD_LIST",
            Self::Refresh { .. } => "COM_REFRESH",
            Self::Shutdown { .. } => "COM_SHUTDOWN",
            Self::Statistics => "COM_STATISTICS",
            Self::ProcessInfo => "COM_PROCESS_INFO",
            Self::ProcessKill { .. } => "COM_PROCESS_KILL",
            Self::Debug => "COM_DEBUG",
            Self::Ping => "COM_PING",
            Self::ChangeUser { .. } => "COM_CHANGE_USER",
            Self::BinlogDump { .. } => "COM_BINLOG_DUMP",
            Self::StmtPrepare { .. } => "COM_STMT_PREPARE",
            Self::StmtExecute { .. } => "COM_STMT_EXECUTE",
            Self::StmtSendLongData { .. } => "COM_STMT_SEND_LONG_DATA",
            Self::StmtClose { .. } => "COM_STMT_CLOSE",
            Self::StmtReset { .. } => "COM_STMT_RESET",
            Self::SetOption { .. } => "COM_SET_OPTION",
            Self::StmtFetch { .. } => "COM_STMT_FETCH",
            Self::ResetConnection => "COM_RESET_CONNECTION",
            Self::Command { command, .. } => command.as_str(),
            Self::Ok { .. } => "OK",
            Self::Error { .. } => "ERR",
            Self::Eof { .. } => "EOF",
            Self::PrepareOk { .. } => "prepare OK",
            Self::Message { .. } => "message",
            Self::ResultHeader { .. } => "result header",
            Self::Field(_) => "field",
            Self::Row { .. } => "row",
            Self::AuthSwitch { .. } => "auth switch request",
            Self::Compressed { .. } => "compressed",
            Self::Opaque { .. } => "opaque",
        }
    }

    fn status(&self) -> L7ResponseStatus {
        match self {
            Self::Error { code, .. } => {
                let code = *code as i32;
                if code >= CLIENT_STATUS_CODE_MIN && code <= CLIENT_STATUS_CODE_MAX {
                    L7ResponseStatus::ClientError
                } else {
                    L7ResponseStatus::ServerError
                }
            }
            _ => L7ResponseStatus::Ok,
        }
    }

    fn msg_type(&self, direction: PacketDirection) -> LogMessageType {
        match self {
            Self::Greeting { .. } => LogMessageType::Other,
            Self::Quit | Self::StmtClose { .. } => LogMessageType::Session,
            _ => LogMessageType::from(direction),
        }
    }

    // first packet of a reply to a command
    fn is_response_head(&self) -> bool {
        matches!(
            self,
            Self::Ok { .. }
                | Self::Error { .. }
                | Self::PrepareOk { .. }
                | Self::Message { .. }
                | Self::ResultHeader { .. }
        )
    }

    fn is_command(&self) -> bool {
        !matches!(
            self,
            Self::Greeting { .. }
                | Self::Login { .. }
                | Self::AuthSwitchResponse { .. }
                | Self::Compressed { .. }
                | Self::Opaque { .. }
        )
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MysqlInfo {
    pub msg_type: LogMessageType,
    pub event: MysqlEvent,
    // state after this packet
    pub state: ConnectionState,
    #[serde(rename = "response_status")]
    pub status: L7ResponseStatus,
    #[serde(skip_serializing_if = "value_is_default")]
    pub trailing_bytes: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MysqlHeader {
    pub length: u32,
    pub number: u8,
}

impl MysqlHeader {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < HEADER_LEN {
            return Err(Error::InvalidHeader);
        }
        Ok(Self {
            length: read_u24_le(payload),
            number: payload[NUMBER_OFFSET],
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MysqlCompressedHeader {
    pub compressed_length: u32,
    pub number: u8,
    pub uncompressed_length: u32,
}

impl MysqlCompressedHeader {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < COMPRESS_HEADER_LEN {
            return Err(Error::InvalidHeader);
        }
        Ok(Self {
            compressed_length: read_u24_le(payload),
            number: payload[NUMBER_OFFSET],
            uncompressed_length: read_u24_le(&payload[COMPRESS_HEADER_UNCOMPRESS_OFFSET..]),
        })
    }
}

fn lossy(bs: &[u8]) -> String {
    let end = bs.iter().rposition(|&b| b != 0).map(|p| p + 1).unwrap_or(0);
    String::from_utf8_lossy(&bs[..end]).into_owned()
}

fn lossy_opt(bs: Option<&[u8]>) -> String {
    bs.map(lossy).unwrap_or_default()
}

fn read_attributes(buf: &mut Buffer) -> Result<Vec<(String, String)>> {
    let total = buf.read_lenenc_int()?.unwrap_or(0) as usize;
    let mut attrs = Buffer::new(buf.read_str(total)?);
    let mut result = vec![];
    while attrs.remaining() > 0 {
        let key = lossy_opt(attrs.read_lenenc_str()?);
        let value = lossy_opt(attrs.read_lenenc_str()?);
        result.push((key, value));
    }
    Ok(result)
}

#[derive(Debug, Default)]
pub struct MysqlLog {
    config: MysqlParserConfig,
    perf_stats: Option<L7PerfStats>,
}

impl MysqlLog {
    pub fn new(config: MysqlParserConfig) -> Self {
        Self {
            config,
            perf_stats: None,
        }
    }

    pub fn config(&self) -> &MysqlParserConfig {
        &self.config
    }

    pub fn perf_stats(&mut self) -> Option<L7PerfStats> {
        self.perf_stats.take()
    }

    /// Dissects the payload of one packet, header already removed.
    ///
    /// On `Err` the connection is left exactly as it was.
    pub fn parse(
        &mut self,
        conn: &mut ConnectionData,
        direction: PacketDirection,
        payload: &[u8],
    ) -> Result<MysqlInfo> {
        self.dissect(conn, direction, None, payload)
    }

    /// Dissects one framed packet, header included.
    ///
    /// Once compression is active the frame is a compressed packet. Its body is
    /// dissected when it was sent uncompressed, otherwise only the header is reported.
    pub fn parse_packet(
        &mut self,
        conn: &mut ConnectionData,
        direction: PacketDirection,
        packet: &[u8],
    ) -> Result<Vec<MysqlInfo>> {
        let (mut infos, consumed) = self.parse_frame(conn, direction, packet)?;
        let trailing = packet.len() - consumed;
        if trailing > 0 {
            warn!("{} after framed packet", Error::TrailingBytes(trailing));
            if let Some(last) = infos.last_mut() {
                last.trailing_bytes += trailing;
            }
        }
        Ok(infos)
    }

    /// Dissects back to back framed packets.
    ///
    /// Returns the records and the number of bytes used. Once a packet has been
    /// dissected, a packet that can not be dissected stops the walk and is left
    /// unconsumed for the caller, the records before it are still returned.
    pub fn parse_stream(
        &mut self,
        conn: &mut ConnectionData,
        direction: PacketDirection,
        bytes: &[u8],
    ) -> Result<(Vec<MysqlInfo>, usize)> {
        let mut infos = vec![];
        let mut offset = 0;
        while offset < bytes.len() {
            match self.parse_frame(conn, direction, &bytes[offset..]) {
                Ok((mut i, n)) => {
                    infos.append(&mut i);
                    offset += n;
                }
                Err(Error::NeedMoreData | Error::InvalidHeader) if !infos.is_empty() => {
                    trace!("{} bytes wait for the rest of a packet", bytes.len() - offset);
                    break;
                }
                Err(e) if !infos.is_empty() => {
                    warn!("{} at offset {}, {} bytes left", e, offset, bytes.len() - offset);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((infos, offset))
    }

    fn check_frame_len(&self, need: usize, have: usize) -> Result<()> {
        if need <= have {
            Ok(())
        } else if self.config.desegment {
            Err(Error::NeedMoreData)
        } else {
            Err(Error::Truncated {
                need,
                remaining: have,
            })
        }
    }

    fn parse_frame(
        &mut self,
        conn: &mut ConnectionData,
        direction: PacketDirection,
        bytes: &[u8],
    ) -> Result<(Vec<MysqlInfo>, usize)> {
        if conn.compression != CompressionState::Active {
            let (info, n) = self.parse_plain_frame(conn, direction, bytes)?;
            return Ok((vec![info], n));
        }

        let header = MysqlCompressedHeader::decode(bytes)?;
        let end = COMPRESS_HEADER_LEN + header.compressed_length as usize;
        self.check_frame_len(end, bytes.len())?;
        if header.uncompressed_length != 0 {
            let info = MysqlInfo {
                msg_type: LogMessageType::from(direction),
                event: MysqlEvent::Compressed {
                    compressed_len: header.compressed_length,
                    uncompressed_len: header.uncompressed_length,
                },
                state: conn.state,
                status: L7ResponseStatus::Ok,
                trailing_bytes: 0,
            };
            return Ok((vec![info], end));
        }

        // sent without compression, the body holds ordinary packets
        let body = &bytes[COMPRESS_HEADER_LEN..end];
        let mut infos: Vec<MysqlInfo> = vec![];
        let mut offset = 0;
        while offset < body.len() {
            let rest = &body[offset..];
            // a packet split across compressed frames can not complete inside this one
            match MysqlHeader::decode(rest) {
                Ok(h) if rest.len() >= HEADER_LEN + h.length as usize => (),
                _ => break,
            }
            match self.parse_plain_frame(conn, direction, rest) {
                Ok((info, n)) => {
                    infos.push(info);
                    offset += n;
                }
                Err(e) if !infos.is_empty() => {
                    warn!("{} in compressed frame {}", e, header.number);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let tail = body.len() - offset;
        if tail > 0 {
            debug!(
                "{} bytes of compressed frame {} not dissected",
                tail, header.number
            );
            match infos.last_mut() {
                Some(last) => last.trailing_bytes += tail,
                None => infos.push(MysqlInfo {
                    msg_type: LogMessageType::from(direction),
                    event: MysqlEvent::Compressed {
                        compressed_len: header.compressed_length,
                        uncompressed_len: header.uncompressed_length,
                    },
                    state: conn.state,
                    status: L7ResponseStatus::Ok,
                    trailing_bytes: tail,
                }),
            }
        }
        Ok((infos, end))
    }

    fn parse_plain_frame(
        &mut self,
        conn: &mut ConnectionData,
        direction: PacketDirection,
        bytes: &[u8],
    ) -> Result<(MysqlInfo, usize)> {
        let header = MysqlHeader::decode(bytes)?;
        let end = HEADER_LEN + header.length as usize;
        self.check_frame_len(end, bytes.len())?;
        let info = self.dissect(conn, direction, Some(header.number), &bytes[HEADER_LEN..end])?;
        Ok((info, end))
    }

    fn dissect(
        &mut self,
        conn: &mut ConnectionData,
        direction: PacketDirection,
        seq: Option<u8>,
        payload: &[u8],
    ) -> Result<MysqlInfo> {
        let mut buf = Buffer::new(payload);
        let (event, next) = match direction {
            PacketDirection::ClientToServer => self.request(conn, &mut buf)?,
            PacketDirection::ServerToClient if Self::is_greeting(conn, seq, payload) => {
                self.greeting(conn, &mut buf)?
            }
            PacketDirection::ServerToClient => self.response(conn, &mut buf)?,
        };

        let trailing_bytes = buf.remaining();
        if trailing_bytes > 0 {
            warn!(
                "{} after {} in state {}",
                Error::TrailingBytes(trailing_bytes),
                event.name(),
                conn.state
            );
        }
        if conn.state != next {
            trace!("{} {}: {} -> {}", direction, event.name(), conn.state, next);
        }
        conn.set_state(next);

        let info = MysqlInfo {
            msg_type: event.msg_type(direction),
            status: event.status(),
            event,
            state: next,
            trailing_bytes,
        };
        self.update_perf(direction, &info);
        Ok(info)
    }

    fn update_perf(&mut self, direction: PacketDirection, info: &MysqlInfo) {
        let perf = self.perf_stats.get_or_insert_with(L7PerfStats::default);
        match direction {
            PacketDirection::ClientToServer if info.event.is_command() => perf.inc_req(),
            PacketDirection::ServerToClient if info.event.is_response_head() => {
                perf.inc_resp();
                match info.status {
                    L7ResponseStatus::ClientError => perf.inc_req_err(),
                    L7ResponseStatus::ServerError => perf.inc_resp_err(),
                    _ => (),
                }
            }
            _ => (),
        }
    }

    fn is_greeting(conn: &ConnectionData, seq: Option<u8>, payload: &[u8]) -> bool {
        conn.state == ConnectionState::Undefined
            && conn.protocol_version == 0
            && seq.map(|s| s == 0).unwrap_or(true)
            && payload.first() == Some(&PROTOCOL_VERSION)
    }

    fn greeting(
        &mut self,
        conn: &mut ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        let protocol_version = buf.read_u8()?;
        let server_version = lossy(buf.read_cstr()?);
        let thread_id = buf.read_u32_le()?;
        buf.skip(SALT_LEN + 1)?;
        let capabilities = buf.read_u16_le()?;
        let (mut charset, mut status, mut ext_capabilities) = (0, 0, 0);
        let mut auth_plugin = String::new();
        // pre 4.1 servers stop after the capabilities
        if buf.remaining() > 0 {
            charset = buf.read_u8()?;
            status = buf.read_u16_le()?;
            ext_capabilities = buf.read_u16_le()?;
            let _auth_data_len = buf.read_u8()?;
            buf.skip(GREETING_RESERVED_LEN)?;
            let _salt = buf.read_cstr_or_rest();
            auth_plugin = lossy(buf.read_cstr_or_rest());
        }

        debug!(
            "server greeting version {} thread {} plugin {}",
            server_version, thread_id, auth_plugin
        );
        conn.protocol_version = protocol_version;
        conn.server_caps = ClientCapabilities::from_bits_truncate(capabilities);
        conn.server_ext_caps = ExtClientCapabilities::from_bits_truncate(ext_capabilities);
        Ok((
            MysqlEvent::Greeting {
                protocol_version,
                server_version,
                thread_id,
                capabilities,
                ext_capabilities,
                charset,
                status,
                auth_plugin,
            },
            ConnectionState::Login,
        ))
    }

    fn login(
        &mut self,
        conn: &mut ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        let caps = ClientCapabilities::from_bits_truncate(buf.read_u16_le()?);
        let (ext_caps, max_packet, charset) = if caps.contains(ClientCapabilities::PROTOCOL_41) {
            let ext_caps = ExtClientCapabilities::from_bits_truncate(buf.read_u16_le()?);
            let max_packet = buf.read_u32_le()?;
            let charset = buf.read_u8()?;
            buf.skip(LOGIN_FILLER_LEN)?;
            (ext_caps, max_packet, charset)
        } else {
            (ExtClientCapabilities::empty(), buf.read_u24_le()?, 0)
        };

        if caps.contains(ClientCapabilities::SSL) && buf.remaining() == 0 {
            // the rest of the connection is TLS
            debug!("ssl requested, leaving connection undecoded");
            conn.client_caps = caps;
            conn.client_ext_caps = ext_caps;
            conn.handshake_seen = true;
            return Ok((
                MysqlEvent::Login {
                    capabilities: caps.bits(),
                    ext_capabilities: ext_caps.bits(),
                    max_packet,
                    charset,
                    user: String::new(),
                    schema: None,
                    auth_plugin: None,
                    attributes: vec![],
                },
                ConnectionState::Undefined,
            ));
        }

        let user = lossy(buf.read_cstr()?);
        if buf.remaining() > 0 {
            if ext_caps.contains(ExtClientCapabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA) {
                buf.read_lenenc_str()?;
            } else if caps.contains(ClientCapabilities::SECURE_CONNECTION) {
                let len = buf.read_u8()?;
                buf.skip(len as usize)?;
            } else {
                buf.read_cstr()?;
            }
        }
        let mut schema = None;
        if caps.contains(ClientCapabilities::CONNECT_WITH_DB) && buf.remaining() > 0 {
            schema = Some(lossy(buf.read_cstr_or_rest()));
        }
        let mut auth_plugin = None;
        if ext_caps.contains(ExtClientCapabilities::PLUGIN_AUTH) && buf.remaining() > 0 {
            auth_plugin = Some(lossy(buf.read_cstr_or_rest()));
        }
        let mut attributes = vec![];
        if ext_caps.contains(ExtClientCapabilities::CONNECT_ATTRS) && buf.remaining() > 0 {
            attributes = read_attributes(buf)?;
        }

        conn.client_caps = caps;
        conn.client_ext_caps = ext_caps;
        conn.handshake_seen = true;
        if caps.contains(ClientCapabilities::COMPRESS)
            && conn.server_caps.contains(ClientCapabilities::COMPRESS)
        {
            conn.compression = CompressionState::Init;
        }
        let next = if ext_caps.contains(ExtClientCapabilities::PLUGIN_AUTH) {
            ConnectionState::AuthSwitchRequest
        } else {
            ConnectionState::ResponseOk
        };
        debug!("login user {} schema {:?}", user, schema);
        Ok((
            MysqlEvent::Login {
                capabilities: caps.bits(),
                ext_capabilities: ext_caps.bits(),
                max_packet,
                charset,
                user,
                schema,
                auth_plugin,
                attributes,
            },
            next,
        ))
    }

    fn request(
        &mut self,
        conn: &mut ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        match conn.state {
            ConnectionState::Login => return self.login(conn, buf),
            ConnectionState::AuthSwitchResponse => {
                let data_len = buf.rest().len();
                return Ok((
                    MysqlEvent::AuthSwitchResponse { data_len },
                    ConnectionState::ResponseOk,
                ));
            }
            ConnectionState::Request | ConnectionState::Undefined => (),
            state => debug!("client command while in state {}, resync", state),
        }

        let opcode = buf.read_u8()?;
        let Ok(command) = Command::try_from(opcode) else {
            warn!("{}", Error::UnknownOpcode(opcode));
            let len = buf.rest().len();
            return Ok((MysqlEvent::Opaque { len }, ConnectionState::Undefined));
        };

        let result = match command {
            Command::Quit => (MysqlEvent::Quit, conn.state),
            Command::ProcessInfo => (MysqlEvent::ProcessInfo, ConnectionState::ResponseTabular),
            Command::Debug => (MysqlEvent::Debug, ConnectionState::ResponseOk),
            Command::Ping => (MysqlEvent::Ping, ConnectionState::ResponseOk),
            Command::Statistics => (MysqlEvent::Statistics, ConnectionState::ResponseMessage),
            Command::InitDb | Command::CreateDb | Command::DropDb => {
                let schema = lossy(buf.rest());
                let event = match command {
                    Command::InitDb => MysqlEvent::InitDb { schema },
                    Command::CreateDb => MysqlEvent::CreateDb { schema },
                    _ => MysqlEvent::DropDb { schema },
                };
                (event, ConnectionState::ResponseOk)
            }
            Command::Query => {
                let sql = lossy(buf.rest());
                if self.config.show_query {
                    info!("{} {{ {} }}", command, sql);
                }
                (MysqlEvent::Query { sql }, ConnectionState::ResponseTabular)
            }
            Command::StmtPrepare => {
                let sql = lossy(buf.rest());
                if self.config.show_query {
                    info!("{} {{ {} }}", command, sql);
                }
                (MysqlEvent::StmtPrepare { sql }, ConnectionState::ResponsePrepare)
            }
            Command::FieldList => {
                let table = lossy(buf.read_cstr_or_rest());
                let wildcard = lossy(buf.rest());
                (
                    MysqlEvent::FieldList { table, wildcard },
                    ConnectionState::ResponseShowFields,
                )
            }
            Command::Refresh => {
                let flags = buf.read_u8()?;
                (MysqlEvent::Refresh { flags }, ConnectionState::ResponseOk)
            }
            Command::Shutdown => {
                // old clients send no level
                let level = if buf.remaining() > 0 {
                    Some(buf.read_u8()?)
                } else {
                    None
                };
                (MysqlEvent::Shutdown { level }, ConnectionState::ResponseOk)
            }
            Command::ProcessKill => {
                let thread_id = buf.read_u32_le()?;
                (
                    MysqlEvent::ProcessKill { thread_id },
                    ConnectionState::ResponseOk,
                )
            }
            Command::SetOption => {
                let option = buf.read_u16_le()?;
                (MysqlEvent::SetOption { option }, ConnectionState::ResponseOk)
            }
            Command::ChangeUser => self.change_user(conn, buf)?,
            Command::BinlogDump => {
                let position = buf.read_u32_le()?;
                let flags = buf.read_u16_be()?;
                let server_id = buf.read_u32_le()?;
                let file = lossy(buf.rest());
                (
                    MysqlEvent::BinlogDump {
                        position,
                        flags,
                        server_id,
                        file,
                    },
                    ConnectionState::Request,
                )
            }
            Command::StmtExecute => self.stmt_execute(conn, buf)?,
            Command::StmtSendLongData => {
                let statement_id = buf.read_u32_le()?;
                let param = buf.read_u16_le()?;
                let data_len = buf.rest().len();
                match conn.statement_mut(statement_id) {
                    Some(stmt) => {
                        if !stmt.set_streamed(param as usize) {
                            debug!(
                                "statement {} has {} params, long data for param {} ignored",
                                statement_id, stmt.param_count, param
                            );
                        }
                    }
                    None => debug!("long data for unknown statement {}", statement_id),
                }
                (
                    MysqlEvent::StmtSendLongData {
                        statement_id,
                        param,
                        data_len,
                    },
                    ConnectionState::Request,
                )
            }
            Command::StmtClose => {
                let statement_id = buf.read_u32_le()?;
                if conn.remove_statement(statement_id).is_none() {
                    debug!("close of unknown statement {}", statement_id);
                }
                (
                    MysqlEvent::StmtClose { statement_id },
                    ConnectionState::Request,
                )
            }
            Command::StmtReset => {
                let statement_id = buf.read_u32_le()?;
                if let Some(stmt) = conn.statement_mut(statement_id) {
                    stmt.clear_streamed();
                }
                (
                    MysqlEvent::StmtReset { statement_id },
                    ConnectionState::ResponseOk,
                )
            }
            Command::StmtFetch => {
                let statement_id = buf.read_u32_le()?;
                let rows = buf.read_u32_le()?;
                (
                    MysqlEvent::StmtFetch { statement_id, rows },
                    ConnectionState::ResponseTabular,
                )
            }
            Command::ResetConnection => (MysqlEvent::ResetConnection, ConnectionState::ResponseOk),
            // replication traffic is not decoded
            Command::TableDump
            | Command::ConnectOut
            | Command::RegisterSlave
            | Command::BinlogDumpGtid => {
                let payload_len = buf.rest().len();
                (
                    MysqlEvent::Command {
                        command,
                        payload_len,
                    },
                    ConnectionState::Request,
                )
            }
            // server internal commands never sent by clients
            Command::Sleep
            | Command::Connect
            | Command::Time
            | Command::DelayedInsert
            | Command::Daemon => {
                let payload_len = buf.rest().len();
                (
                    MysqlEvent::Command {
                        command,
                        payload_len,
                    },
                    ConnectionState::Undefined,
                )
            }
        };
        Ok(result)
    }

    fn change_user(
        &mut self,
        conn: &ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        let user = lossy(buf.read_cstr()?);
        if conn.client_caps.contains(ClientCapabilities::SECURE_CONNECTION) {
            let len = buf.read_u8()?;
            buf.skip(len as usize)?;
        } else {
            buf.read_cstr()?;
        }
        let schema = lossy(buf.read_cstr_or_rest());
        let charset = if buf.remaining() > 0 {
            Some(buf.read_u16_le()?)
        } else {
            None
        };

        let mut next = ConnectionState::ResponseOk;
        let mut auth_plugin = None;
        if conn
            .client_ext_caps
            .contains(ExtClientCapabilities::PLUGIN_AUTH)
        {
            next = ConnectionState::AuthSwitchRequest;
            if buf.remaining() > 0 {
                auth_plugin = Some(lossy(buf.read_cstr_or_rest()));
            }
        }
        let mut attributes = vec![];
        if conn
            .client_ext_caps
            .contains(ExtClientCapabilities::CONNECT_ATTRS)
            && buf.remaining() > 0
        {
            attributes = read_attributes(buf)?;
        }
        Ok((
            MysqlEvent::ChangeUser {
                user,
                schema,
                charset,
                auth_plugin,
                attributes,
            },
            next,
        ))
    }

    fn stmt_execute(
        &mut self,
        conn: &mut ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        let statement_id = buf.read_u32_le()?;
        let flags = buf.read_u8()?;
        let iterations = buf.read_u32_le()?;
        if flags != CURSOR_TYPE_NO_CURSOR {
            trace!("statement {} executed with cursor flags {:#04x}", statement_id, flags);
        }

        let mut params = vec![];
        let mut bound_types = None;
        match conn.statement(statement_id) {
            None => debug!("execute of unknown statement {}", statement_id),
            Some(_) if !self.config.decode_execute_params => (),
            Some(stmt) if stmt.param_count == 0 => (),
            Some(stmt) => {
                let count = stmt.param_count as usize;
                let null_bitmap = buf.read_str((count + 7) / 8)?;
                let new_params_bound = buf.read_u8()?;
                let types = if new_params_bound == NEW_PARAMS_BOUND {
                    let mut types = Vec::with_capacity(count);
                    for _ in 0..count {
                        let field_type = buf.read_u8()?;
                        let unsigned = buf.read_u8()? & PARAM_UNSIGNED_MASK != 0;
                        types.push(ParamType {
                            field_type,
                            unsigned,
                        });
                    }
                    bound_types = Some(types.clone());
                    Some(types)
                } else {
                    stmt.param_types.clone()
                };

                match types {
                    Some(types) => {
                        for (index, t) in types.iter().enumerate() {
                            let mut param = ExecuteParam {
                                index,
                                field_type: t.field_type,
                                unsigned: t.unsigned,
                                streamed: false,
                                value: None,
                            };
                            let is_null = null_bitmap
                                .get(index / 8)
                                .map(|b| b & (1 << (index % 8)) != 0)
                                .unwrap_or(false);
                            if is_null {
                                param.value = Some(ParamValue::Null);
                            } else if stmt.is_streamed(index) {
                                param.streamed = true;
                            } else {
                                match decode_param(buf, t.field_type, t.unsigned)? {
                                    Some(v) => param.value = Some(v),
                                    None => {
                                        debug!(
                                            "statement {} param {} has undecodable type {:#04x}",
                                            statement_id, index, t.field_type
                                        );
                                        break;
                                    }
                                }
                            }
                            params.push(param);
                        }
                    }
                    None => debug!(
                        "statement {} executed without bound parameter types",
                        statement_id
                    ),
                }
            }
        }
        let unparsed = buf.rest().len();

        if let Some(types) = bound_types {
            if let Some(stmt) = conn.statement_mut(statement_id) {
                stmt.param_types = Some(types);
            }
        }
        Ok((
            MysqlEvent::StmtExecute {
                statement_id,
                flags,
                iterations,
                params,
                unparsed,
            },
            ConnectionState::ResponseTabular,
        ))
    }

    fn response(
        &mut self,
        conn: &mut ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        let payload_len = buf.remaining();
        let Some(code) = buf.peek_u8() else {
            return Err(Error::Truncated {
                need: 1,
                remaining: 0,
            });
        };
        match code {
            MYSQL_RESPONSE_CODE_ERR => self.error_packet(buf),
            MYSQL_RESPONSE_CODE_EOF if conn.state == ConnectionState::AuthSwitchRequest => {
                Self::auth_switch_request(buf)
            }
            MYSQL_RESPONSE_CODE_EOF if payload_len < EOF_PACKET_MAX_LEN => {
                Self::eof_packet(conn, buf)
            }
            MYSQL_RESPONSE_CODE_OK if conn.state == ConnectionState::ResponsePrepare => {
                self.prepare_ok(conn, buf)
            }
            MYSQL_RESPONSE_CODE_OK => {
                let mut after_code = buf.clone();
                after_code.skip(1)?;
                let is_ok = match after_code.peek_lenenc_len() {
                    Ok(len) => after_code.remaining() > len,
                    Err(_) => false,
                };
                if is_ok {
                    *buf = after_code;
                    Self::ok_packet(conn, buf)
                } else {
                    Self::result_header(buf)
                }
            }
            _ => match conn.state {
                ConnectionState::ResponseMessage => {
                    let text = lossy(buf.rest());
                    Ok((MysqlEvent::Message { text }, ConnectionState::Request))
                }
                ConnectionState::ResponseTabular => Self::result_header(buf),
                ConnectionState::FieldPacket
                | ConnectionState::ResponseShowFields
                | ConnectionState::ResponsePrepare
                | ConnectionState::PreparedParameters
                | ConnectionState::PreparedFields => {
                    let field = Self::field_packet(buf)?;
                    Ok((MysqlEvent::Field(field), conn.state))
                }
                ConnectionState::RowPacket => {
                    let mut values = vec![];
                    while buf.remaining() > 0 {
                        values.push(buf.read_lenenc_str()?.map(lossy));
                    }
                    Ok((MysqlEvent::Row { values }, conn.state))
                }
                ConnectionState::AuthSwitchRequest => Self::auth_switch_request(buf),
                state => {
                    warn!("{} in state {}", Error::UnknownResponseCode(code), state);
                    let len = buf.rest().len();
                    Ok((MysqlEvent::Opaque { len }, ConnectionState::Undefined))
                }
            },
        }
    }

    fn error_packet(&mut self, buf: &mut Buffer) -> Result<(MysqlEvent, ConnectionState)> {
        buf.skip(1)?;
        let code = buf.read_u16_le()? as i16;
        let sql_state = if buf.peek_u8() == Some(SQL_STATE_MARKER) {
            buf.skip(1)?;
            Some(lossy(buf.read_str(SQL_STATE_LEN)?))
        } else {
            None
        };
        let message = lossy(buf.rest());
        debug!("error {} {:?}: {}", code, sql_state, message);
        Ok((
            MysqlEvent::Error {
                code,
                sql_state,
                message,
            },
            ConnectionState::Request,
        ))
    }

    fn eof_packet(
        conn: &mut ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        buf.skip(1)?;
        let (mut warnings, mut status) = (0, 0);
        // pre 4.1 EOF is the marker byte alone
        if buf.remaining() >= 4 {
            warnings = buf.read_u16_le()?;
            status = buf.read_u16_le()?;
        }
        let status_flags = ServerStatus::from_bits_truncate(status);
        let next = match conn.state {
            ConnectionState::FieldPacket => ConnectionState::RowPacket,
            ConnectionState::RowPacket if status_flags.contains(ServerStatus::MORE_RESULTS_EXISTS) => {
                ConnectionState::ResponseTabular
            }
            ConnectionState::RowPacket => ConnectionState::Request,
            ConnectionState::PreparedParameters if conn.prepare_field_count > 0 => {
                ConnectionState::PreparedFields
            }
            ConnectionState::PreparedParameters
            | ConnectionState::PreparedFields
            | ConnectionState::ResponseShowFields => ConnectionState::Request,
            state => {
                warn!("EOF: {}", Error::StateInconsistency(state));
                ConnectionState::Request
            }
        };
        Ok((MysqlEvent::Eof { warnings, status }, next))
    }

    fn ok_packet(
        conn: &mut ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        let affected_rows = buf.read_lenenc_int()?.unwrap_or(0);
        let last_insert_id = buf.read_lenenc_int()?.unwrap_or(0);
        let (mut status, mut warnings) = (0, 0);
        if buf.remaining() >= 2 {
            status = buf.read_u16_le()?;
        }
        if conn.is_protocol_41() && buf.remaining() >= 2 {
            warnings = buf.read_u16_le()?;
        }
        let status_flags = ServerStatus::from_bits_truncate(status);

        let mut info = String::new();
        if conn
            .client_ext_caps
            .contains(ExtClientCapabilities::SESSION_TRACK)
        {
            if buf.remaining() > 0 {
                info = lossy_opt(buf.read_lenenc_str()?);
                if status_flags.contains(ServerStatus::SESSION_STATE_CHANGED) {
                    let changes = buf.read_lenenc_str()?.map(|s| s.len()).unwrap_or(0);
                    trace!("session state changes {} bytes", changes);
                }
            }
        } else {
            info = lossy(buf.rest());
        }

        if conn.compression == CompressionState::Init {
            debug!("compressed protocol active");
            conn.compression = CompressionState::Active;
        }
        let next = if status_flags.contains(ServerStatus::MORE_RESULTS_EXISTS) {
            ConnectionState::ResponseTabular
        } else {
            ConnectionState::Request
        };
        Ok((
            MysqlEvent::Ok {
                affected_rows,
                last_insert_id,
                status,
                warnings,
                info,
            },
            next,
        ))
    }

    fn prepare_ok(
        &mut self,
        conn: &mut ConnectionData,
        buf: &mut Buffer,
    ) -> Result<(MysqlEvent, ConnectionState)> {
        buf.skip(1)?;
        let statement_id = buf.read_u32_le()?;
        let field_count = buf.read_u16_le()?;
        let param_count = buf.read_u16_le()?;
        buf.skip(PREPARE_OK_FILLER_LEN)?;
        let warnings = if buf.remaining() >= 2 {
            buf.read_u16_le()?
        } else {
            0
        };

        conn.insert_statement(
            PreparedStatement::new(statement_id, param_count, field_count),
            self.config.max_prepared_statements,
        );
        conn.prepare_field_count = field_count;
        let next = if param_count > 0 {
            ConnectionState::PreparedParameters
        } else if field_count > 0 {
            ConnectionState::PreparedFields
        } else {
            ConnectionState::Request
        };
        Ok((
            MysqlEvent::PrepareOk {
                statement_id,
                field_count,
                param_count,
                warnings,
            },
            next,
        ))
    }

    fn result_header(buf: &mut Buffer) -> Result<(MysqlEvent, ConnectionState)> {
        let columns = buf.read_lenenc_int()?.unwrap_or(0);
        let extra = if buf.remaining() > 0 {
            buf.read_lenenc_int()?
        } else {
            None
        };
        let next = if columns > 0 {
            ConnectionState::FieldPacket
        } else {
            ConnectionState::RowPacket
        };
        Ok((MysqlEvent::ResultHeader { columns, extra }, next))
    }

    fn field_packet(buf: &mut Buffer) -> Result<FieldDescriptor> {
        let mut field = FieldDescriptor {
            catalog: lossy_opt(buf.read_lenenc_str()?),
            schema: lossy_opt(buf.read_lenenc_str()?),
            table: lossy_opt(buf.read_lenenc_str()?),
            org_table: lossy_opt(buf.read_lenenc_str()?),
            name: lossy_opt(buf.read_lenenc_str()?),
            org_name: lossy_opt(buf.read_lenenc_str()?),
            ..Default::default()
        };
        // length of the fixed fields, always 0x0c
        buf.read_lenenc_int()?;
        field.charset = buf.read_u16_le()?;
        field.length = buf.read_u32_le()?;
        field.field_type = buf.read_u8()?;
        field.flags = buf.read_u16_le()?;
        field.decimals = buf.read_u8()?;
        buf.skip(FIELD_FILLER_LEN)?;
        // COM_FIELD_LIST replies append the default value
        if buf.remaining() > 0 {
            field.default = buf.read_lenenc_str()?.map(lossy);
        }
        Ok(field)
    }

    fn auth_switch_request(buf: &mut Buffer) -> Result<(MysqlEvent, ConnectionState)> {
        buf.skip(1)?;
        let name = lossy(buf.read_cstr_or_rest());
        let data = buf.rest();
        let end = data.iter().rposition(|&b| b != 0).map(|p| p + 1).unwrap_or(0);
        Ok((
            MysqlEvent::AuthSwitch {
                name,
                data: data[..end].to_vec(),
            },
            ConnectionState::AuthSwitchResponse,
        ))
    }
}
