// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod error;
pub mod fields;
pub mod methods;
pub mod root;
pub mod settings;
pub mod types;
