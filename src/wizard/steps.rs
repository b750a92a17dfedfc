//! Static step definitions interpreted by the engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a step's asset folder is derived from prior choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRule {
    /// Folder under the asset root.
    pub dir: String,
    /// How many leading choices are appended as sub-folder names (0, 1 or 2).
    #[serde(default)]
    pub keyed_by: usize,
}

/// How the chosen asset is merged into the accumulated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerMode {
    /// Paste the asset onto the accumulated image using its alpha.
    #[default]
    Overlay,
    /// The asset already contains the earlier layers and becomes the base.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Instructional step: any input advances, nothing is recorded.
    PassThrough,
    /// The user picks one asset from a folder.
    Select {
        folder: FolderRule,
        #[serde(default)]
        layer: LayerMode,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub number: u32,
    /// Key into the adapter's text table.
    pub prompt_key: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl StepDefinition {
    pub fn select(number: u32, dir: &str, keyed_by: usize, layer: LayerMode) -> Self {
        Self {
            number,
            prompt_key: format!("step_{number}"),
            kind: StepKind::Select {
                folder: FolderRule {
                    dir: dir.to_string(),
                    keyed_by,
                },
                layer,
            },
        }
    }

    pub fn pass_through(number: u32) -> Self {
        Self {
            number,
            prompt_key: format!("step_{number}"),
            kind: StepKind::PassThrough,
        }
    }

    pub fn is_selecting(&self) -> bool {
        matches!(self.kind, StepKind::Select { .. })
    }

    /// Back is offered everywhere except the first step.
    pub fn offers_back(&self) -> bool {
        self.number > 1
    }
}

/// Ordered step table for one wizard instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTable {
    steps: Vec<StepDefinition>,
}

impl StepTable {
    /// Build and validate a table.
    pub fn new(steps: Vec<StepDefinition>) -> Result<Self, ConfigError> {
        let table = Self { steps };
        table.validate()?;
        Ok(table)
    }

    /// Load a table from a JSON file (`{"steps": [...]}`).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let table: Self = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        table.validate()?;
        Ok(table)
    }

    /// The six-step postcard flow: three keyed picks that each replace the
    /// picture, an instructional interstitial, then two overlay layers.
    pub fn postcard() -> Self {
        Self {
            steps: vec![
                StepDefinition::select(1, "step-1", 0, LayerMode::Replace),
                StepDefinition::select(2, "step-2", 1, LayerMode::Replace),
                StepDefinition::pass_through(3),
                StepDefinition::select(4, "step-3", 2, LayerMode::Replace),
                StepDefinition::select(5, "step-4", 0, LayerMode::Overlay),
                StepDefinition::select(6, "step-5", 0, LayerMode::Overlay),
            ],
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.steps.iter().any(StepDefinition::is_selecting) {
            return Err(ConfigError::InvalidStepTable(
                "at least one asset-selecting step is required".into(),
            ));
        }

        let mut selecting_before = 0usize;
        for (i, step) in self.steps.iter().enumerate() {
            let expected = i as u32 + 1;
            if step.number != expected {
                return Err(ConfigError::InvalidStepTable(format!(
                    "step at position {i} is numbered {}, expected {expected}",
                    step.number
                )));
            }
            if let StepKind::Select { folder, .. } = &step.kind {
                if folder.keyed_by > 2 {
                    return Err(ConfigError::InvalidStepTable(format!(
                        "step {} is keyed by {} choices, at most 2 are supported",
                        step.number, folder.keyed_by
                    )));
                }
                if folder.keyed_by > selecting_before {
                    return Err(ConfigError::InvalidStepTable(format!(
                        "step {} is keyed by {} choices but only {selecting_before} precede it",
                        step.number, folder.keyed_by
                    )));
                }
                selecting_before += 1;
            }
        }
        Ok(())
    }

    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn get(&self, number: u32) -> Option<&StepDefinition> {
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Latest asset-selecting step strictly before `number`.
    pub fn previous_selecting(&self, number: u32) -> Option<u32> {
        self.steps
            .iter()
            .rev()
            .filter(|s| s.number < number)
            .find(|s| s.is_selecting())
            .map(|s| s.number)
    }

    /// Number of asset-selecting steps strictly before `number`.
    pub fn selecting_before(&self, number: u32) -> usize {
        self.steps
            .iter()
            .filter(|s| s.number < number && s.is_selecting())
            .count()
    }
}

impl Default for StepTable {
    fn default() -> Self {
        Self::postcard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postcard_table_is_valid() {
        let table = StepTable::postcard();
        assert!(table.validate().is_ok());
        assert_eq!(table.total_steps(), 6);
        assert!(!table.get(3).unwrap().is_selecting());
        assert!(table.get(7).is_none());
        assert!(table.get(0).is_none());
    }

    #[test]
    fn back_not_offered_on_first_step() {
        let table = StepTable::postcard();
        assert!(!table.get(1).unwrap().offers_back());
        assert!(table.get(2).unwrap().offers_back());
        assert!(table.get(3).unwrap().offers_back());
    }

    #[test]
    fn previous_selecting_skips_pass_through() {
        let table = StepTable::postcard();
        assert_eq!(table.previous_selecting(4), Some(2));
        assert_eq!(table.previous_selecting(3), Some(2));
        assert_eq!(table.previous_selecting(2), Some(1));
        assert_eq!(table.previous_selecting(1), None);
        assert_eq!(table.selecting_before(4), 2);
        assert_eq!(table.selecting_before(6), 4);
    }

    #[test]
    fn rejects_gaps_in_numbering() {
        let err = StepTable::new(vec![
            StepDefinition::select(1, "a", 0, LayerMode::Overlay),
            StepDefinition::select(3, "b", 0, LayerMode::Overlay),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("numbered 3"));
    }

    #[test]
    fn rejects_keying_on_unmade_choices() {
        let err = StepTable::new(vec![
            StepDefinition::pass_through(1),
            StepDefinition::select(2, "a", 1, LayerMode::Overlay),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("only 0 precede"));
    }

    #[test]
    fn rejects_table_without_selecting_steps() {
        assert!(StepTable::new(vec![StepDefinition::pass_through(1)]).is_err());
    }

    #[test]
    fn table_json_shape() {
        let json = r#"{
            "steps": [
                {"number": 1, "prompt_key": "pick_frame", "kind": "select",
                 "folder": {"dir": "frames"}, "layer": "replace"},
                {"number": 2, "prompt_key": "read_this", "kind": "pass_through"},
                {"number": 3, "prompt_key": "pick_sticker", "kind": "select",
                 "folder": {"dir": "stickers", "keyed_by": 1}}
            ]
        }"#;
        let table: StepTable = serde_json::from_str(json).unwrap();
        assert!(table.validate().is_ok());
        assert_eq!(table.get(1).unwrap().prompt_key, "pick_frame");
        match &table.get(3).unwrap().kind {
            StepKind::Select { folder, layer } => {
                assert_eq!(folder.keyed_by, 1);
                assert_eq!(*layer, LayerMode::Overlay);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
