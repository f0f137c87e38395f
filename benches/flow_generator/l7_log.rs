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

use std::time::Instant;

use criterion::*;

use mysql_sniffer::{
    ConnectionData, ConnectionState, MysqlLog, MysqlParserConfig, PacketDirection, SessionTable,
};

fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = vec![len as u8, (len >> 8) as u8, (len >> 16) as u8, seq];
    out.extend_from_slice(payload);
    out
}

fn result_set(rows: usize) -> Vec<u8> {
    let mut bytes = frame(1, &[0x02]);
    for (seq, name) in [(2, "id"), (3, "name")] {
        let mut p = vec![];
        for s in ["def", "shop", "users", "users", name, name] {
            p.push(s.len() as u8);
            p.extend_from_slice(s.as_bytes());
        }
        p.extend_from_slice(&[0x0c, 0x21, 0x00, 0x0b, 0x00, 0x00, 0x00, 0x03]);
        p.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00]);
        bytes.extend(frame(seq, &p));
    }
    bytes.extend(frame(4, &[0xfe, 0x00, 0x00, 0x02, 0x00]));
    for i in 0..rows {
        let id = i.to_string();
        let mut p = vec![id.len() as u8];
        p.extend_from_slice(id.as_bytes());
        p.extend_from_slice(b"\x05alice");
        bytes.extend(frame((5 + i) as u8, &p));
    }
    bytes.extend(frame((5 + rows) as u8, &[0xfe, 0x00, 0x00, 0x02, 0x00]));
    bytes
}

pub(super) fn bench(c: &mut Criterion) {
    c.bench_function("parse_mysql_query", |b| {
        b.iter_custom(|iters| {
            let mut parser = MysqlLog::new(MysqlParserConfig::default());
            let mut conn = ConnectionData::new();
            let payload = b"\x03SELECT id, name FROM users WHERE id = 1";
            let start = Instant::now();
            for _ in 0..iters {
                conn.set_state(ConnectionState::Request);
                let _ = parser.parse(&mut conn, PacketDirection::ClientToServer, payload);
            }
            start.elapsed()
        })
    });
    c.bench_function("parse_mysql_result_set", |b| {
        b.iter_custom(|iters| {
            let mut parser = MysqlLog::new(MysqlParserConfig::default());
            let mut conn = ConnectionData::new();
            let bytes = result_set(100);
            let start = Instant::now();
            for _ in 0..iters {
                conn.set_state(ConnectionState::ResponseTabular);
                let _ = parser.parse_stream(&mut conn, PacketDirection::ServerToClient, &bytes);
            }
            start.elapsed()
        })
    });
    c.bench_function("parse_mysql_stmt_execute", |b| {
        b.iter_custom(|iters| {
            let mut parser = MysqlLog::new(MysqlParserConfig::default());
            let mut conn = ConnectionData::new();
            conn.set_state(ConnectionState::ResponsePrepare);
            let _ = parser.parse(
                &mut conn,
                PacketDirection::ServerToClient,
                &[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00],
            );
            let payload = [
                0x17, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x08,
                0x00, 0xfd, 0x00, 0x2a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, b'a',
                b'l', b'i', b'c', b'e',
            ];
            let start = Instant::now();
            for _ in 0..iters {
                conn.set_state(ConnectionState::Request);
                let _ = parser.parse(&mut conn, PacketDirection::ClientToServer, &payload);
            }
            start.elapsed()
        })
    });
    c.bench_function("mysql_session_table", |b| {
        b.iter_custom(|iters| {
            let mut table = SessionTable::new(MysqlParserConfig {
                session_capacity: 1024,
                ..Default::default()
            })
            .unwrap();
            let start = Instant::now();
            for i in 0..iters {
                let _ = table.parse(i % 4096, PacketDirection::ClientToServer, &[0x0e]);
            }
            start.elapsed()
        })
    });
}
