// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod error;
pub mod settings;
pub mod types;

pub use error::{AccelError, AccelResult};
pub use settings::{Generation, Settings};
pub use types::*;
