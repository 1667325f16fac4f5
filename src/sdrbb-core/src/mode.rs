// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Modulation selected for the transmit path.
///
/// Numeric codes match the control-surface protocol:
/// 0 = none, 1 = AM, 2 = FM, 3 = WBFM, 4 = LSB, 5 = USB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationMode {
    #[default]
    None,
    Am,
    Fm,
    Wbfm,
    Lsb,
    Usb,
}

impl ModulationMode {
    pub const ALL: [ModulationMode; 6] = [
        ModulationMode::None,
        ModulationMode::Am,
        ModulationMode::Fm,
        ModulationMode::Wbfm,
        ModulationMode::Lsb,
        ModulationMode::Usb,
    ];

    pub fn code(self) -> u8 {
        match self {
            ModulationMode::None => 0,
            ModulationMode::Am => 1,
            ModulationMode::Fm => 2,
            ModulationMode::Wbfm => 3,
            ModulationMode::Lsb => 4,
            ModulationMode::Usb => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModulationMode::None => "none",
            ModulationMode::Am => "am",
            ModulationMode::Fm => "fm",
            ModulationMode::Wbfm => "wbfm",
            ModulationMode::Lsb => "lsb",
            ModulationMode::Usb => "usb",
        }
    }

    pub fn is_single_sideband(self) -> bool {
        matches!(self, ModulationMode::Lsb | ModulationMode::Usb)
    }
}

impl fmt::Display for ModulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_ascii_uppercase())
    }
}

impl TryFrom<u8> for ModulationMode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|m| m.code() == code)
            .ok_or_else(|| format!("unknown modulation code {code} (expected 0..=5)"))
    }
}

impl FromStr for ModulationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if let Ok(code) = wanted.parse::<u8>() {
            return Self::try_from(code);
        }
        Self::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| format!("unknown modulation mode '{s}'"))
    }
}
