// Copyright 2025 Chris Custine
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

//! On-disk record of previously planned FFT sizes.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::PlanKey;

const WISDOM_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WisdomFile {
    version: u32,
    pub(super) plans: Vec<PlanKey>,
}

impl WisdomFile {
    pub(super) fn new(plans: Vec<PlanKey>) -> Self {
        Self {
            version: WISDOM_VERSION,
            plans,
        }
    }

    pub(super) fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let wisdom: Self = serde_json::from_str(&text)?;

        if wisdom.version != WISDOM_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported wisdom version {}", wisdom.version),
            ));
        }
        Ok(wisdom)
    }

    pub(super) fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
    }
}
