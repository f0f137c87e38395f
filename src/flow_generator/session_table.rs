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

use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;

use log::{debug, trace};
use lru::LruCache;

use super::protocol_logs::{ConnectionData, MysqlInfo, MysqlLog};
use super::Result;
use crate::common::flow::{L7PerfStats, PacketDirection};
use crate::config::{ConfigError, MysqlParserConfig};

/// Per connection dissector state keyed by whatever identifies a connection to the caller.
///
/// The least recently used connection is dropped when the table is full.
pub struct SessionTable<K: Hash + Eq> {
    sessions: LruCache<K, ConnectionData>,
    parser: MysqlLog,
}

impl<K: Hash + Eq + Debug> SessionTable<K> {
    pub fn new(config: MysqlParserConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity =
            NonZeroUsize::new(config.session_capacity).ok_or(ConfigError::SessionCapacityInvalid)?;
        Ok(Self {
            sessions: LruCache::new(capacity),
            parser: MysqlLog::new(config),
        })
    }

    // the connection is taken out while a packet is dissected and put back as most recent
    fn with_session<T, F>(&mut self, key: K, f: F) -> T
    where
        F: FnOnce(&mut MysqlLog, &mut ConnectionData) -> T,
    {
        let mut conn = match self.sessions.pop(&key) {
            Some(conn) => conn,
            None => {
                trace!("new mysql session {:?}", key);
                ConnectionData::new()
            }
        };
        let result = f(&mut self.parser, &mut conn);
        if let Some((evicted, _)) = self.sessions.push(key, conn) {
            debug!("session table full, dropped {:?}", evicted);
        }
        result
    }

    pub fn parse(&mut self, key: K, direction: PacketDirection, payload: &[u8]) -> Result<MysqlInfo> {
        self.with_session(key, |parser, conn| parser.parse(conn, direction, payload))
    }

    pub fn parse_packet(
        &mut self,
        key: K,
        direction: PacketDirection,
        packet: &[u8],
    ) -> Result<Vec<MysqlInfo>> {
        self.with_session(key, |parser, conn| {
            parser.parse_packet(conn, direction, packet)
        })
    }

    pub fn parse_stream(
        &mut self,
        key: K,
        direction: PacketDirection,
        bytes: &[u8],
    ) -> Result<(Vec<MysqlInfo>, usize)> {
        self.with_session(key, |parser, conn| {
            parser.parse_stream(conn, direction, bytes)
        })
    }

    pub fn get(&self, key: &K) -> Option<&ConnectionData> {
        self.sessions.peek(key)
    }

    pub fn close(&mut self, key: &K) -> Option<ConnectionData> {
        self.sessions.pop(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn perf_stats(&mut self) -> Option<L7PerfStats> {
        self.parser.perf_stats()
    }
}
