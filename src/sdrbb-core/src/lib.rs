// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod hardware;
pub mod mode;
pub mod param;
pub mod radio;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use hardware::{HardwareError, HardwareResult, RxCallback, StreamControl, Transceiver, TxCallback};
pub use mode::ModulationMode;
pub use param::{ParamError, ParamResult};
pub use radio::freq::Freq;
