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

//! FFT window functions.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Window applied to each frame before the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowKind {
    Rectangular,
    Hann,
    Hamming,
    #[default]
    BlackmanHarris,
}

impl WindowKind {
    /// Window coefficients for a frame of `size` samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "window index to f32 is acceptable")]
    pub fn coefficients(self, size: usize) -> Vec<f32> {
        if size <= 1 {
            return vec![1.0; size];
        }

        let denom = (size - 1) as f32;
        (0..size)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / denom;
                match self {
                    Self::Rectangular => 1.0,
                    Self::Hann => 0.5 - 0.5 * x.cos(),
                    Self::Hamming => 0.54 - 0.46 * x.cos(),
                    Self::BlackmanHarris => {
                        0.358_75 - 0.488_29 * x.cos() + 0.141_28 * (2.0 * x).cos()
                            - 0.011_68 * (3.0 * x).cos()
                    }
                }
            })
            .collect()
    }
}
