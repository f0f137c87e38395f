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

use std::collections::HashMap;
use std::fmt;

use log::warn;
use serde::Serialize;

use super::consts::{ClientCapabilities, ExtClientCapabilities, ParamFlags};

/// What the next packet on a connection is expected to be.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Undefined,
    Login,
    Request,
    ResponseOk,
    ResponseMessage,
    ResponseTabular,
    ResponseShowFields,
    FieldPacket,
    RowPacket,
    ResponsePrepare,
    PreparedParameters,
    PreparedFields,
    AuthSwitchRequest,
    AuthSwitchResponse,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Undefined
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undefined => "undefined",
            Self::Login => "login",
            Self::Request => "request",
            Self::ResponseOk => "response OK",
            Self::ResponseMessage => "response message",
            Self::ResponseTabular => "tabular response",
            Self::ResponseShowFields => "response to SHOW FIELDS",
            Self::FieldPacket => "field packet",
            Self::RowPacket => "row packet",
            Self::ResponsePrepare => "response to PREPARE",
            Self::PreparedParameters => "parameters in response to PREPARE",
            Self::PreparedFields => "fields in response to PREPARE",
            Self::AuthSwitchRequest => "authentication switch request",
            Self::AuthSwitchResponse => "authentication switch response",
        };
        write!(f, "{}", s)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionState {
    Off,
    // both peers asked for compression, waiting for the OK that ends the handshake
    Init,
    Active,
}

impl Default for CompressionState {
    fn default() -> Self {
        CompressionState::Off
    }
}

/// Parameter type announced by a COM_STMT_EXECUTE with the new-params-bound flag.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamType {
    pub field_type: u8,
    pub unsigned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub id: u32,
    pub param_count: u16,
    pub field_count: u16,
    pub param_flags: Vec<ParamFlags>,
    // types bound by the last execute that sent them, later executes may omit them
    pub param_types: Option<Vec<ParamType>>,
}

impl PreparedStatement {
    pub fn new(id: u32, param_count: u16, field_count: u16) -> Self {
        Self {
            id,
            param_count,
            field_count,
            param_flags: vec![ParamFlags::default(); param_count as usize],
            param_types: None,
        }
    }

    pub fn is_streamed(&self, param: usize) -> bool {
        self.param_flags
            .get(param)
            .map(|f| f.contains(ParamFlags::STREAMED))
            .unwrap_or(false)
    }

    // returns false when the position is out of range
    pub fn set_streamed(&mut self, param: usize) -> bool {
        match self.param_flags.get_mut(param) {
            Some(f) => {
                f.insert(ParamFlags::STREAMED);
                true
            }
            None => false,
        }
    }

    pub fn clear_streamed(&mut self) {
        self.param_flags
            .iter_mut()
            .for_each(|f| f.remove(ParamFlags::STREAMED));
    }
}

/// Everything remembered about one MySQL connection between packets.
///
/// Created on the first packet seen for a connection and dropped when it closes.
/// Packets of one connection must be fed in order from a single thread.
#[derive(Debug, Clone, Default)]
pub struct ConnectionData {
    pub(crate) state: ConnectionState,
    pub(crate) client_caps: ClientCapabilities,
    pub(crate) client_ext_caps: ExtClientCapabilities,
    pub(crate) server_caps: ClientCapabilities,
    pub(crate) server_ext_caps: ExtClientCapabilities,
    pub(crate) compression: CompressionState,
    pub(crate) handshake_seen: bool,
    pub(crate) protocol_version: u8,
    // field count of the most recent prepare acknowledgement
    pub(crate) prepare_field_count: u16,
    statements: HashMap<u32, PreparedStatement>,
}

impl ConnectionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn client_caps(&self) -> (ClientCapabilities, ExtClientCapabilities) {
        (self.client_caps, self.client_ext_caps)
    }

    pub fn server_caps(&self) -> (ClientCapabilities, ExtClientCapabilities) {
        (self.server_caps, self.server_ext_caps)
    }

    pub fn compression(&self) -> CompressionState {
        self.compression
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    // 4.1 framing is assumed until a handshake says otherwise
    pub(crate) fn is_protocol_41(&self) -> bool {
        !self.handshake_seen || self.client_caps.contains(ClientCapabilities::PROTOCOL_41)
    }

    /// Inserts a statement unless the table already holds `cap` others.
    pub fn insert_statement(&mut self, stmt: PreparedStatement, cap: usize) -> bool {
        if !self.statements.contains_key(&stmt.id) && self.statements.len() >= cap {
            warn!(
                "prepared statement table full ({} entries), statement {} not tracked",
                self.statements.len(),
                stmt.id
            );
            return false;
        }
        self.statements.insert(stmt.id, stmt);
        true
    }

    pub fn statement(&self, id: u32) -> Option<&PreparedStatement> {
        self.statements.get(&id)
    }

    pub fn statement_mut(&mut self, id: u32) -> Option<&mut PreparedStatement> {
        self.statements.get_mut(&id)
    }

    pub fn remove_statement(&mut self, id: u32) -> Option<PreparedStatement> {
        self.statements.remove(&id)
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }
}
