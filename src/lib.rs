// Copyright 2025 ModerRAS
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

//! # Droid Autobot
//!
//! Scripted, vision-gated automation for Android devices.
//!
//! The crate talks to the ADB server over its socket protocol, so no `adb`
//! binary is spawned. Automation scripts are JSON files made of input,
//! vision and shell steps; a [`TaskExecutor`] runs them one at a time on a
//! background worker with looping, retries and success/failure branching.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use droid_autobot::{AdbController, ExecutorConfig, Settings, TaskExecutor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load().with_env_overrides();
//!     let controller = Arc::new(AdbController::from_settings(&settings)?);
//!     controller.connect().await;
//!
//!     let executor = TaskExecutor::new(controller, ExecutorConfig::from(&settings));
//!     executor.load("scripts/daily.json")?;
//!     executor.start().await;
//!     executor.submit("daily");
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     executor.stop().await;
//!     Ok(())
//! }
//! ```

pub mod adb;
pub mod device;
pub mod settings;
pub mod task;
pub mod vision;

pub use adb::{AdbClient, AdbError, DeviceAddress, DeviceStatus};
pub use device::{AdbController, DeviceControl};
pub use settings::{Settings, SettingsError};
pub use task::{
    AutomationScript, AutomationStep, ExecutorConfig, Roi, ScriptError, ScriptOutcome,
    ScriptReport, TaskExecutor,
};
pub use vision::{
    NccTemplateLocator, TemplateLocator, TemplateMatch, TextRecognizer, TextRegion, VisionError,
};
