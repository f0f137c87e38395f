/*
 * Copyright (c) 2023 Yunshan Networks
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

use thiserror::Error;

use super::protocol_logs::sql::ConnectionState;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("truncated: need {need} bytes, {remaining} remaining")]
    Truncated { need: usize, remaining: usize },
    #[error("unknown command opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unknown response code {0:#04x}")]
    UnknownResponseCode(u8),
    #[error("unexpected packet in state {0}")]
    StateInconsistency(ConnectionState),
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
    #[error("invalid mysql header")]
    InvalidHeader,
    // packet continues in a later segment
    #[error("need more data")]
    NeedMoreData,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
