//! KMS Bridge Types
//!
//! Shared type definitions for KMS requests, operation payloads and
//! processing results used across all KMS bridge crates.
// Copyright 2025 Francisco F. Pinochet
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


pub mod requests;
pub mod schemas;
pub mod error;

pub use requests::*;
pub use schemas::*;
pub use error::*;
