/*
 * Copyright (c) 2022 Yunshan Networks
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

use std::fmt::{self, Display};

use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketDirection {
    ClientToServer = 0,
    ServerToClient = 1,
}

impl PacketDirection {
    pub fn reversed(&self) -> Self {
        match self {
            PacketDirection::ClientToServer => PacketDirection::ServerToClient,
            PacketDirection::ServerToClient => PacketDirection::ClientToServer,
        }
    }
}

impl Default for PacketDirection {
    fn default() -> PacketDirection {
        PacketDirection::ClientToServer
    }
}

impl Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToServer => write!(f, "c2s"),
            Self::ServerToClient => write!(f, "s2c"),
        }
    }
}

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct L7PerfStats {
    #[serde(rename = "l7_request")]
    pub request_count: u32,
    #[serde(rename = "l7_response")]
    pub response_count: u32,
    #[serde(rename = "l7_client_error")]
    pub err_client_count: u32, // error responses caused by the client
    #[serde(rename = "l7_server_error")]
    pub err_server_count: u32, // error responses caused by the server
}

impl L7PerfStats {
    pub fn merge_perf(&mut self, req_count: u32, resp_count: u32, req_err: u32, resp_err: u32) {
        self.request_count += req_count;
        self.response_count += resp_count;
        self.err_client_count += req_err;
        self.err_server_count += resp_err;
    }

    pub fn inc_req(&mut self) {
        self.merge_perf(1, 0, 0, 0);
    }

    pub fn inc_resp(&mut self) {
        self.merge_perf(0, 1, 0, 0);
    }

    pub fn inc_req_err(&mut self) {
        self.merge_perf(0, 0, 1, 0);
    }

    pub fn inc_resp_err(&mut self) {
        self.merge_perf(0, 0, 0, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction() {
        assert_eq!(
            PacketDirection::ClientToServer.reversed(),
            PacketDirection::ServerToClient
        );
        assert_eq!(PacketDirection::default(), PacketDirection::ClientToServer);
        assert_eq!(PacketDirection::ServerToClient.to_string(), "s2c");
    }

    #[test]
    fn perf_stats() {
        let mut a = L7PerfStats::default();
        a.inc_req();
        a.inc_req();
        a.inc_resp();
        a.inc_resp_err();
        a.merge_perf(0, 1, 1, 0);
        assert_eq!(
            a,
            L7PerfStats {
                request_count: 2,
                response_count: 2,
                err_client_count: 1,
                err_server_count: 1,
            }
        );
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["l7_request"], 2);
        assert_eq!(json["l7_server_error"], 1);
    }
}
