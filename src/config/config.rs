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

use std::fs;
use std::path::Path;

use log::info;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_MAX_PREPARED_STATEMENTS: usize = 1024;
const DEFAULT_SESSION_CAPACITY: usize = 65536;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("yaml config invalid: {0}")]
    YamlConfigInvalid(String),
    #[error("session-capacity must be greater than 0")]
    SessionCapacityInvalid,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct MysqlParserConfig {
    // wait for the rest of a packet split across segments
    pub desegment: bool,
    pub show_query: bool,
    pub decode_execute_params: bool,
    // per connection
    pub max_prepared_statements: usize,
    pub session_capacity: usize,
}

impl Default for MysqlParserConfig {
    fn default() -> Self {
        Self {
            desegment: true,
            show_query: false,
            decode_execute_params: true,
            max_prepared_statements: DEFAULT_MAX_PREPARED_STATEMENTS,
            session_capacity: DEFAULT_SESSION_CAPACITY,
        }
    }
}

impl MysqlParserConfig {
    pub fn load_from_file<T: AsRef<Path>>(path: T) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?;
        Self::load(&contents)
    }

    pub fn load<C: AsRef<str>>(contents: C) -> Result<Self, ConfigError> {
        let contents = contents.as_ref();
        let cfg = if contents.trim().is_empty() {
            // parsing empty string leads to EOF error
            Self::default()
        } else {
            serde_yaml::from_str(contents)
                .map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?
        };
        cfg.validate()?;
        info!("mysql parser config: {:?}", cfg);
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_capacity == 0 {
            return Err(ConfigError::SessionCapacityInvalid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_config() {
        assert_eq!(
            MysqlParserConfig::load("").unwrap(),
            MysqlParserConfig::default()
        );
        let c = MysqlParserConfig::default();
        assert!(c.desegment);
        assert!(!c.show_query);
        assert!(c.decode_execute_params);
        assert_eq!(c.max_prepared_statements, 1024);
        assert_eq!(c.session_capacity, 65536);
    }

    #[test]
    fn partial_config() {
        let c = MysqlParserConfig::load("show-query: true\nmax-prepared-statements: 16\n").unwrap();
        assert!(c.show_query);
        assert_eq!(c.max_prepared_statements, 16);
        assert!(c.desegment);
        assert_eq!(c.session_capacity, 65536);
    }

    #[test]
    fn invalid_config() {
        assert!(matches!(
            MysqlParserConfig::load("desegment: maybe"),
            Err(ConfigError::YamlConfigInvalid(_))
        ));
        assert_eq!(
            MysqlParserConfig::load("session-capacity: 0"),
            Err(ConfigError::SessionCapacityInvalid)
        );
        assert!(MysqlParserConfig::load_from_file("/nonexistent/mysql-sniffer.yaml").is_err());
    }

    #[test]
    fn read_yaml_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "desegment: false").unwrap();
        writeln!(f, "decode-execute-params: false").unwrap();
        let c = MysqlParserConfig::load_from_file(f.path()).expect("failed loading config file");
        assert!(!c.desegment);
        assert!(!c.decode_execute_params);
    }
}
