// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

/// Rejection of a runtime parameter update.
///
/// A rejected update never modifies the previously accepted value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("{name} = {value} is out of range ({range})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },
}

pub type ParamResult = Result<(), ParamError>;

impl ParamError {
    pub fn out_of_range(name: &'static str, value: f64, range: &'static str) -> Self {
        Self::OutOfRange { name, value, range }
    }
}
