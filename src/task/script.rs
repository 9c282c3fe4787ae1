//! Automation script model and JSON loader.
//!
//! A script is an ordered list of typed steps plus loop and branch metadata.
//! Actions are resolved to their step kind while loading, so an unknown
//! action rejects the whole script before anything runs.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::vision::Rect;

/// Default base resolution for ROI coordinates.
pub const DEFAULT_BASE_WIDTH: i32 = 1280;
pub const DEFAULT_BASE_HEIGHT: i32 = 720;

/// Default total time budget for a vision step's attempts.
pub const DEFAULT_VISION_TIMEOUT_MS: u64 = 5000;

/// Script loading errors.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed script JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Step {index}: unknown action {action:?}")]
    UnknownAction { index: usize, action: String },
    #[error("Step {index} ({action}): {reason}")]
    InvalidStep {
        index: usize,
        action: &'static str,
        reason: String,
    },
    #[error("Invalid script: {0}")]
    Invalid(String),
}

/// The three step families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Basic,
    Vision,
    System,
}

/// Every action name accepted in a script, with the step kind it builds.
pub const ACTIONS: &[(&str, StepKind)] = &[
    ("click", StepKind::Basic),
    ("swipe", StepKind::Basic),
    ("wait", StepKind::Basic),
    ("screenshot", StepKind::Vision),
    ("ocr", StepKind::Vision),
    ("ocr_click", StepKind::Vision),
    ("ocr_region", StepKind::Vision),
    ("template", StepKind::Vision),
    ("shell", StepKind::System),
    ("start_app", StepKind::System),
];

/// Look up the step kind for an action name.
pub fn step_kind_of(action: &str) -> Option<StepKind> {
    ACTIONS
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, kind)| *kind)
}

macro_rules! action_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(other.to_string()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

action_enum! {
    /// Input actions.
    BasicAction {
        Click => "click",
        Swipe => "swipe",
        Wait => "wait",
    }
}

action_enum! {
    /// Screenshot and recognition actions.
    VisionAction {
        Screenshot => "screenshot",
        Ocr => "ocr",
        OcrClick => "ocr_click",
        OcrRegion => "ocr_region",
        Template => "template",
    }
}

action_enum! {
    /// Device shell actions.
    SystemAction {
        Shell => "shell",
        StartApp => "start_app",
    }
}

/// Region of interest defined against a base resolution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub base_width: i32,
    pub base_height: i32,
    /// Regex; when set only its first match in the recognized text is kept.
    pub filter_pattern: Option<String>,
    /// Save the cropped region under the work directory.
    pub debug_save: bool,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 100,
            height: 50,
            base_width: DEFAULT_BASE_WIDTH,
            base_height: DEFAULT_BASE_HEIGHT,
            filter_pattern: None,
            debug_save: false,
        }
    }
}

impl Roi {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_base(mut self, base_width: i32, base_height: i32) -> Self {
        self.base_width = base_width;
        self.base_height = base_height;
        self
    }

    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter_pattern = Some(pattern.into());
        self
    }

    /// Scale the region to an actual screenshot resolution.
    ///
    /// Each axis scales by `actual / base` independently and every coordinate
    /// is truncated toward zero.
    pub fn scaled(&self, actual_width: u32, actual_height: u32) -> Rect {
        let scale_x = actual_width as f64 / self.base_width as f64;
        let scale_y = actual_height as f64 / self.base_height as f64;

        Rect::new(
            (self.x as f64 * scale_x) as i32,
            (self.y as f64 * scale_y) as i32,
            (self.width as f64 * scale_x) as i32,
            (self.height as f64 * scale_y) as i32,
        )
    }
}

/// Tap, swipe or pause.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicStep {
    pub action: BasicAction,
    pub x: i32,
    pub y: i32,
    pub x2: i32,
    pub y2: i32,
    /// Swipe duration or wait time in milliseconds.
    pub duration: u64,
}

/// Screenshot or recognition check.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionStep {
    pub action: VisionAction,
    /// Screenshot file to save to or read from; empty means the latest one.
    pub image_name: String,
    pub target_text: String,
    pub template_path: String,
    pub roi: Option<Roi>,
    /// Number of attempts, at least 1.
    pub retry_count: u32,
    /// Total time budget spread over the attempts.
    pub timeout_ms: u64,
}

impl VisionStep {
    /// Delay between two consecutive attempts.
    pub fn retry_delay_ms(&self) -> u64 {
        self.timeout_ms / u64::from(self.retry_count.max(1))
    }
}

/// Raw shell command or app launch.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemStep {
    pub action: SystemAction,
    pub shell_cmd: String,
    pub package_name: String,
}

/// One step of a script.
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationStep {
    Basic(BasicStep),
    Vision(VisionStep),
    System(SystemStep),
}

impl AutomationStep {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Basic(_) => StepKind::Basic,
            Self::Vision(_) => StepKind::Vision,
            Self::System(_) => StepKind::System,
        }
    }

    pub fn action_name(&self) -> &'static str {
        match self {
            Self::Basic(s) => s.action.as_str(),
            Self::Vision(s) => s.action.as_str(),
            Self::System(s) => s.action.as_str(),
        }
    }
}

impl fmt::Display for AutomationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic(s) => match s.action {
                BasicAction::Click => write!(f, "click ({}, {})", s.x, s.y),
                BasicAction::Swipe => write!(
                    f,
                    "swipe ({}, {}) -> ({}, {}) {}ms",
                    s.x, s.y, s.x2, s.y2, s.duration
                ),
                BasicAction::Wait => write!(f, "wait {}ms", s.duration),
            },
            Self::Vision(s) => match s.action {
                VisionAction::Screenshot => write!(f, "screenshot -> {}", s.image_name),
                VisionAction::Ocr => write!(f, "ocr {:?}", s.target_text),
                VisionAction::OcrClick => write!(f, "ocr_click {:?}", s.target_text),
                VisionAction::OcrRegion => write!(f, "ocr_region {:?}", s.target_text),
                VisionAction::Template => write!(f, "template {}", s.template_path),
            },
            Self::System(s) => match s.action {
                SystemAction::Shell => write!(f, "shell {:?}", s.shell_cmd),
                SystemAction::StartApp => write!(f, "start_app {}", s.package_name),
            },
        }
    }
}

/// A named, immutable automation script.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationScript {
    pub name: String,
    pub description: String,
    pub steps: Vec<AutomationStep>,
    pub loop_enabled: bool,
    pub loop_count: u32,
    /// Script to run after each fully successful iteration.
    pub on_success: Option<String>,
    /// Script to run once when an iteration fails.
    pub on_failure: Option<String>,
}

impl AutomationScript {
    pub fn new(name: impl Into<String>, steps: Vec<AutomationStep>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
            loop_enabled: false,
            loop_count: 1,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn with_loop(mut self, count: u32) -> Self {
        self.loop_enabled = true;
        self.loop_count = count;
        self
    }

    pub fn with_on_success(mut self, name: impl Into<String>) -> Self {
        self.on_success = Some(name.into());
        self
    }

    pub fn with_on_failure(mut self, name: impl Into<String>) -> Self {
        self.on_failure = Some(name.into());
        self
    }

    /// Number of times the step list runs.
    pub fn iterations(&self) -> u32 {
        if self.loop_enabled {
            self.loop_count
        } else {
            1
        }
    }

    /// Parse and validate a script from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, ScriptError> {
        let raw: RawScript = serde_json::from_str(json)?;
        raw.into_script()
    }

    /// Read, parse and validate a script file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

#[derive(Debug, Deserialize)]
struct RawScript {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "loop")]
    loop_enabled: bool,
    #[serde(default = "default_one")]
    loop_count: u32,
    #[serde(default)]
    on_success: Option<String>,
    #[serde(default)]
    on_failure: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    action: String,
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
    #[serde(default)]
    x2: i32,
    #[serde(default)]
    y2: i32,
    #[serde(default)]
    duration: u64,
    #[serde(default, alias = "save_name")]
    image_name: String,
    #[serde(default, alias = "text")]
    target_text: String,
    #[serde(default)]
    template_path: String,
    #[serde(default)]
    roi: Option<Roi>,
    #[serde(default = "default_one", alias = "retry")]
    retry_count: u32,
    #[serde(default = "default_timeout", alias = "timeout")]
    timeout_ms: u64,
    #[serde(default, alias = "cmd")]
    shell_cmd: String,
    #[serde(default)]
    package_name: String,
}

fn default_one() -> u32 {
    1
}

fn default_timeout() -> u64 {
    DEFAULT_VISION_TIMEOUT_MS
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl RawScript {
    fn into_script(self) -> Result<AutomationScript, ScriptError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ScriptError::Invalid("script name is empty".into()));
        }
        if self.loop_count == 0 {
            return Err(ScriptError::Invalid("loop_count must be at least 1".into()));
        }

        let steps = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, raw)| raw.into_step(i + 1))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AutomationScript {
            name,
            description: self.description,
            steps,
            loop_enabled: self.loop_enabled,
            loop_count: self.loop_count,
            on_success: non_empty(self.on_success),
            on_failure: non_empty(self.on_failure),
        })
    }
}

impl RawStep {
    fn into_step(self, index: usize) -> Result<AutomationStep, ScriptError> {
        let kind = step_kind_of(&self.action).ok_or_else(|| ScriptError::UnknownAction {
            index,
            action: self.action.clone(),
        })?;
        let unknown = |action: String| ScriptError::UnknownAction { index, action };

        let step = match kind {
            StepKind::Basic => AutomationStep::Basic(BasicStep {
                action: self.action.parse().map_err(unknown)?,
                x: self.x,
                y: self.y,
                x2: self.x2,
                y2: self.y2,
                duration: self.duration,
            }),
            StepKind::Vision => AutomationStep::Vision(VisionStep {
                action: self.action.parse().map_err(unknown)?,
                image_name: self.image_name,
                target_text: self.target_text,
                template_path: self.template_path,
                roi: self.roi,
                retry_count: self.retry_count,
                timeout_ms: self.timeout_ms,
            }),
            StepKind::System => AutomationStep::System(SystemStep {
                action: self.action.parse().map_err(unknown)?,
                shell_cmd: self.shell_cmd,
                package_name: self.package_name,
            }),
        };

        validate_step(index, &step)?;
        Ok(step)
    }
}

fn validate_step(index: usize, step: &AutomationStep) -> Result<(), ScriptError> {
    let invalid = |reason: &str| ScriptError::InvalidStep {
        index,
        action: step.action_name(),
        reason: reason.to_string(),
    };

    match step {
        AutomationStep::Basic(_) => {}
        AutomationStep::Vision(s) => {
            if s.retry_count == 0 {
                return Err(invalid("retry_count must be at least 1"));
            }
            match s.action {
                VisionAction::Template if s.template_path.is_empty() => {
                    return Err(invalid("template_path is required"));
                }
                VisionAction::OcrRegion => {
                    let roi = s.roi.as_ref().ok_or_else(|| invalid("roi is required"))?;
                    if roi.base_width <= 0 || roi.base_height <= 0 {
                        return Err(invalid("roi base resolution must be positive"));
                    }
                    if let Some(pattern) = &roi.filter_pattern {
                        Regex::new(pattern)
                            .map_err(|e| invalid(&format!("bad filter_pattern: {}", e)))?;
                    }
                }
                _ => {}
            }
        }
        AutomationStep::System(s) => match s.action {
            SystemAction::Shell if s.shell_cmd.trim().is_empty() => {
                return Err(invalid("shell_cmd is required"));
            }
            SystemAction::StartApp if s.package_name.trim().is_empty() => {
                return Err(invalid("package_name is required"));
            }
            _ => {}
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const START_GAME: &str = r#"{
        "name": "start_arknights",
        "description": "Launch the game and enter the main screen",
        "loop": false,
        "loop_count": 5,
        "on_failure": "recover",
        "steps": [
            {"action": "start_app", "package_name": "com.hypergryph.arknights/com.u8.sdk.U8UnityContext"},
            {"action": "wait", "duration": 8000},
            {"action": "screenshot", "save_name": "login.png"},
            {"action": "ocr_click", "save_name": "login.png", "text": "开始唤醒", "retry": 3, "timeout": 3000},
            {"action": "swipe", "x": 100, "y": 500, "x2": 900, "y2": 500, "duration": 300},
            {"action": "ocr_region", "text": "", "roi": {"x": 800, "y": 145, "width": 100, "height": 50, "filter_pattern": "[0-9]+"}},
            {"action": "template", "template_path": "templates/start.png"},
            {"action": "shell", "shell_cmd": "input keyevent 4"}
        ]
    }"#;

    #[test]
    fn test_parse_original_keys() {
        let script = AutomationScript::from_json_str(START_GAME).unwrap();

        assert_eq!(script.name, "start_arknights");
        assert_eq!(script.steps.len(), 8);
        assert_eq!(script.on_failure.as_deref(), Some("recover"));
        assert_eq!(script.on_success, None);

        match &script.steps[3] {
            AutomationStep::Vision(step) => {
                assert_eq!(step.action, VisionAction::OcrClick);
                assert_eq!(step.image_name, "login.png");
                assert_eq!(step.target_text, "开始唤醒");
                assert_eq!(step.retry_count, 3);
                assert_eq!(step.timeout_ms, 3000);
                assert_eq!(step.retry_delay_ms(), 1000);
            }
            other => panic!("unexpected step {:?}", other),
        }

        match &script.steps[5] {
            AutomationStep::Vision(step) => {
                let roi = step.roi.as_ref().unwrap();
                assert_eq!((roi.base_width, roi.base_height), (1280, 720));
                assert_eq!(roi.filter_pattern.as_deref(), Some("[0-9]+"));
                assert_eq!(step.retry_count, 1);
                assert_eq!(step.timeout_ms, DEFAULT_VISION_TIMEOUT_MS);
            }
            other => panic!("unexpected step {:?}", other),
        }

        assert_eq!(script.steps[0].kind(), StepKind::System);
        assert_eq!(script.steps[1].kind(), StepKind::Basic);
        assert_eq!(script.steps[7].to_string(), "shell \"input keyevent 4\"");
    }

    #[test]
    fn test_parse_spec_keys() {
        let json = r#"{
            "name": "farm",
            "loop": true,
            "loop_count": 3,
            "on_success": "collect",
            "steps": [
                {"action": "ocr", "image_name": "s.png", "target_text": "OK", "retry_count": 2, "timeout_ms": 400}
            ]
        }"#;
        let script = AutomationScript::from_json_str(json).unwrap();

        assert_eq!(script.iterations(), 3);
        assert_eq!(script.on_success.as_deref(), Some("collect"));
        match &script.steps[0] {
            AutomationStep::Vision(step) => {
                assert_eq!(step.action, VisionAction::Ocr);
                assert_eq!(step.retry_count, 2);
                assert_eq!(step.retry_delay_ms(), 200);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_loop_disabled_runs_once() {
        let script = AutomationScript::from_json_str(START_GAME).unwrap();
        assert!(!script.loop_enabled);
        assert_eq!(script.loop_count, 5);
        assert_eq!(script.iterations(), 1);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let json = r#"{"name": "bad", "steps": [
            {"action": "click", "x": 1, "y": 2},
            {"action": "double_click", "x": 1, "y": 2}
        ]}"#;
        match AutomationScript::from_json_str(json) {
            Err(ScriptError::UnknownAction { index, action }) => {
                assert_eq!(index, 2);
                assert_eq!(action, "double_click");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_scripts() {
        let cases = [
            r#"{"steps": []}"#,
            r#"{"name": "x", "loop": true, "loop_count": 0}"#,
            r#"{"name": "x", "steps": [{"action": "ocr_region", "text": "1"}]}"#,
            r#"{"name": "x", "steps": [{"action": "ocr", "text": "a", "retry": 0}]}"#,
            r#"{"name": "x", "steps": [{"action": "template"}]}"#,
            r#"{"name": "x", "steps": [{"action": "start_app"}]}"#,
            r#"{"name": "x", "steps": [{"action": "ocr_region", "roi": {"filter_pattern": "("}}]}"#,
        ];
        for json in cases {
            assert!(
                AutomationScript::from_json_str(json).is_err(),
                "accepted invalid script {}",
                json
            );
        }
    }

    #[test]
    fn test_ocr_without_target_text_accepted() {
        let json = r#"{"name": "any_text", "steps": [
            {"action": "ocr"},
            {"action": "ocr_click", "save_name": "s.png"}
        ]}"#;
        let script = AutomationScript::from_json_str(json).unwrap();
        assert_eq!(script.steps.len(), 2);
        assert_eq!(script.steps[1].to_string(), "ocr_click \"\"");
    }

    #[test]
    fn test_roi_debug_save() {
        let json = r#"{"name": "sanity", "steps": [
            {"action": "ocr_region", "roi": {"x": 1, "y": 2, "width": 3, "height": 4, "debug_save": true}}
        ]}"#;
        let script = AutomationScript::from_json_str(json).unwrap();
        match &script.steps[0] {
            AutomationStep::Vision(step) => {
                let roi = step.roi.as_ref().unwrap();
                assert!(roi.debug_save);
                assert_eq!(roi.base_width, DEFAULT_BASE_WIDTH);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(!Roi::default().debug_save);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            AutomationScript::from_json_str("{\"name\": "),
            Err(ScriptError::Json(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("start.json");
        std::fs::write(&path, START_GAME).unwrap();

        let script = AutomationScript::from_file(&path).unwrap();
        assert_eq!(script.name, "start_arknights");

        assert!(matches!(
            AutomationScript::from_file(dir.path().join("missing.json")),
            Err(ScriptError::Io { .. })
        ));
    }

    #[test]
    fn test_roi_identity_scale() {
        let roi = Roi::new(800, 145, 100, 50);
        assert_eq!(roi.scaled(1280, 720), Rect::new(800, 145, 100, 50));
    }

    #[test]
    fn test_roi_double_scale() {
        let roi = Roi::new(801, 145, 99, 51);
        assert_eq!(roi.scaled(2560, 1440), Rect::new(1602, 290, 198, 102));
    }

    #[test]
    fn test_roi_scale_truncates_per_axis() {
        let roi = Roi::new(800, 145, 100, 50);
        // 2800x1260: x scale 2.1875, y scale 1.75
        assert_eq!(roi.scaled(2800, 1260), Rect::new(1750, 253, 218, 87));
    }

    #[test]
    fn test_step_kind_table() {
        assert_eq!(step_kind_of("click"), Some(StepKind::Basic));
        assert_eq!(step_kind_of("ocr_region"), Some(StepKind::Vision));
        assert_eq!(step_kind_of("start_app"), Some(StepKind::System));
        assert_eq!(step_kind_of("Click"), None);
        for (name, _) in ACTIONS {
            let parsed = BasicAction::from_str(name).map(|a| a.as_str())
                .or_else(|_| VisionAction::from_str(name).map(|a| a.as_str()))
                .or_else(|_| SystemAction::from_str(name).map(|a| a.as_str()));
            assert_eq!(parsed, Ok(*name));
        }
    }
}
