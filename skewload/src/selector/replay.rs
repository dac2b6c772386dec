// Copyright 2025 skewload Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use skewload_common::error::{Error, ErrorKind, Result};

use super::zipf::ZipfSelector;
use crate::{object::CacheObject, sink::HEADER_MARKER};

impl ZipfSelector {
    /// Rebuild the exact selector state recorded in a replay file.
    ///
    /// Line 1 holds the thresholds and line 2 the key order, both prefixed with [`HEADER_MARKER`]. Any report of a
    /// Zipf experiment starts with these two lines. Keys must all exist in `objects`; objects not listed are dropped.
    pub fn load_replay(objects: Vec<CacheObject>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::new(ErrorKind::Config, "cannot open keys distribution file")
                .with_context("path", path.display())
                .with_source(e)
        })?;
        Self::replay(objects, BufReader::new(file))
    }

    /// Same as [`ZipfSelector::load_replay`], reading from `reader`.
    pub fn replay(objects: Vec<CacheObject>, reader: impl BufRead) -> Result<Self> {
        let mut lines = reader.lines();
        let mut next_line = |name: &'static str| -> Result<String> {
            let line = lines
                .next()
                .transpose()?
                .ok_or_else(|| Error::config("replay header is truncated").with_context("missing", name))?;
            match line.strip_prefix(HEADER_MARKER) {
                Some(body) => Ok(body.trim_end().to_string()),
                None => Err(Error::config(format!("{name} line should begin with {HEADER_MARKER}"))),
            }
        };

        let thresholds = next_line("thresholds")?
            .split(',')
            .map(|v| {
                v.trim().parse::<u32>().map_err(|e| {
                    Error::new(ErrorKind::Parse, "invalid threshold")
                        .with_context("value", v)
                        .with_source(e)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut by_key = objects
            .into_iter()
            .map(|o| (o.key().to_string(), o))
            .collect::<HashMap<_, _>>();
        let objects = next_line("keys")?
            .split(',')
            .map(|key| {
                by_key
                    .remove(key)
                    .ok_or_else(|| Error::config("replayed key is unknown or repeated").with_context("key", key))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_parts(objects, thresholds)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use itertools::Itertools;

    use super::*;
    use crate::object::generate_objects;

    fn replay_text(selector: &ZipfSelector) -> String {
        selector
            .state_lines()
            .iter()
            .map(|line| format!("{HEADER_MARKER}{line}\n"))
            .join("")
    }

    #[test]
    fn test_replay_round_trip() {
        let original = ZipfSelector::new(generate_objects(500, 32), Some(77)).unwrap();
        let text = replay_text(&original) + ";some other metadata\n;127.0.0.1:11211\n";

        let replayed = ZipfSelector::replay(generate_objects(500, 32), text.as_bytes()).unwrap();
        assert_eq!(replayed.thresholds(), original.thresholds());
        assert_eq!(replayed.objects(), original.objects());
        assert_eq!(replayed.state_lines(), original.state_lines());
    }

    #[test]
    fn test_load_replay_file() {
        let original = ZipfSelector::new(generate_objects(20, 8), None).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(replay_text(&original).as_bytes()).unwrap();

        let replayed = ZipfSelector::load_replay(generate_objects(20, 8), file.path()).unwrap();
        assert_eq!(replayed.objects(), original.objects());

        let err = ZipfSelector::load_replay(generate_objects(20, 8), file.path().with_extension("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_replay_malformed() {
        let objects = || generate_objects(3, 8);

        let cases: [(&str, ErrorKind); 6] = [
            ("990000,450000,180000\n;mem-key-0,mem-key-1,mem-key-2\n", ErrorKind::Config),
            (";990000,450000,180000\nmem-key-0,mem-key-1,mem-key-2\n", ErrorKind::Config),
            (";990000,450000,180000\n", ErrorKind::Config),
            (";990000,x,180000\n;mem-key-0,mem-key-1,mem-key-2\n", ErrorKind::Parse),
            (";990000,450000,180000\n;mem-key-0,mem-key-1,mem-key-9\n", ErrorKind::Config),
            (";990000,450000\n;mem-key-0,mem-key-1,mem-key-2\n", ErrorKind::Config),
        ];
        for (text, kind) in cases {
            let err = ZipfSelector::replay(objects(), text.as_bytes()).unwrap_err();
            assert_eq!(err.kind(), kind, "{text:?}");
        }
    }
}
