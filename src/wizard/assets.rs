//! Asset resolver: maps (step, prior choices) to a folder and lists the
//! selectable images in it.
//!
//! The sorted listing is the canonical index space: option `i` is the `i`-th
//! file name in case-insensitive order, both when rendering and when a
//! selection comes back.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;

use crate::error::{ConfigError, ResolutionError};

use super::steps::{StepDefinition, StepKind, StepTable};

/// Image extensions accepted as options (compared case-insensitively).
pub const ACCEPTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// One selectable image in a step folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetOption {
    /// Position in the canonical listing.
    pub index: usize,
    /// Choice identifier recorded in the session (file stem).
    pub id: String,
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Read-only view of the asset tree.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    root: PathBuf,
}

impl AssetResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder holding `step`'s candidates, keyed by the leading prior choices.
    pub fn resolve_folder(
        &self,
        step: &StepDefinition,
        choices: &[String],
    ) -> Result<PathBuf, ResolutionError> {
        let StepKind::Select { folder, .. } = &step.kind else {
            return Err(ResolutionError::NoFolder(step.number));
        };
        if choices.len() < folder.keyed_by {
            return Err(ResolutionError::MissingChoices {
                step: step.number,
                needed: folder.keyed_by,
                have: choices.len(),
            });
        }

        let mut path = self.root.join(&folder.dir);
        for choice in &choices[..folder.keyed_by] {
            path.push(choice);
        }
        Ok(path)
    }

    /// List accepted images in `folder` in canonical order.
    pub async fn list_options(&self, folder: &Path) -> Result<Vec<AssetOption>, ResolutionError> {
        let unavailable = |e: std::io::Error| ResolutionError::FolderUnavailable {
            path: folder.to_path_buf(),
            reason: e.to_string(),
        };

        let mut entries = fs::read_dir(folder).await.map_err(unavailable)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 asset name");
                continue;
            };
            if !is_accepted_image(&name) {
                continue;
            }
            match fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_file() => names.push(name),
                Ok(_) => {}
                Err(e) => tracing::warn!(file = %name, "Skipping unreadable asset: {e}"),
            }
        }

        if names.is_empty() {
            return Err(ResolutionError::EmptyFolder {
                path: folder.to_path_buf(),
            });
        }
        sort_canonical(&mut names);

        Ok(names
            .into_iter()
            .enumerate()
            .map(|(index, file_name)| AssetOption {
                index,
                id: file_stem(&file_name),
                path: folder.join(&file_name),
                file_name,
            })
            .collect())
    }

    /// Check that every asset under every step folder shares one canvas size.
    ///
    /// Only image headers are read. Returns the common size, or `None` when no
    /// asset was found.
    pub fn validate_canvas(&self, table: &StepTable) -> Result<Option<(u32, u32)>, ConfigError> {
        let mut expected: Option<(u32, u32)> = None;

        for step in table.steps() {
            let StepKind::Select { folder, .. } = &step.kind else {
                continue;
            };
            let dir = self.root.join(&folder.dir);
            if !dir.is_dir() {
                tracing::warn!(step = step.number, dir = %dir.display(), "Step folder is missing");
                continue;
            }

            let mut images = Vec::new();
            collect_images(&dir, folder.keyed_by, &mut images)?;
            for path in images {
                let found = image::image_dimensions(&path).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: path.display().to_string(),
                        message: e.to_string(),
                    }
                })?;
                match expected {
                    None => expected = Some(found),
                    Some(canvas) if canvas != found => {
                        return Err(ConfigError::CanvasMismatch {
                            path,
                            expected: canvas,
                            found,
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(expected)
    }
}

/// Collect images `depth` directory levels below `dir`.
fn collect_images(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) -> Result<(), ConfigError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if depth == 0 {
            let accepted = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_accepted_image);
            if accepted && path.is_file() {
                out.push(path);
            }
        } else if path.is_dir() {
            collect_images(&path, depth - 1, out)?;
        }
    }
    Ok(())
}

/// Whether `file_name` has one of the accepted image extensions.
pub fn is_accepted_image(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
}

/// Case-insensitive order with the raw name as tie-breaker, so the order is total.
pub fn sort_canonical(names: &mut [String]) {
    names.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::steps::LayerMode;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) {
        std::fs::create_dir_all(dir).unwrap();
        RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn accepted_extensions_are_case_insensitive() {
        assert!(is_accepted_image("a.png"));
        assert!(is_accepted_image("a.JPG"));
        assert!(is_accepted_image("a.Jpeg"));
        assert!(!is_accepted_image("a.gif"));
        assert!(!is_accepted_image("png"));
        assert!(!is_accepted_image("notes.txt"));
    }

    #[test]
    fn canonical_sort_ignores_case_and_is_total() {
        let mut names = vec![
            "b.png".to_string(),
            "A.png".to_string(),
            "a.png".to_string(),
            "C.jpg".to_string(),
        ];
        sort_canonical(&mut names);
        assert_eq!(names, vec!["A.png", "a.png", "b.png", "C.jpg"]);
    }

    #[test]
    fn resolve_folder_uses_keyed_choices() {
        let resolver = AssetResolver::new("/assets");
        let choices = vec!["red".to_string(), "round".to_string(), "x".to_string()];

        let step1 = StepDefinition::select(1, "step-1", 0, LayerMode::Replace);
        let step2 = StepDefinition::select(2, "step-2", 1, LayerMode::Replace);
        let step4 = StepDefinition::select(4, "step-3", 2, LayerMode::Replace);

        assert_eq!(
            resolver.resolve_folder(&step1, &choices).unwrap(),
            PathBuf::from("/assets/step-1")
        );
        assert_eq!(
            resolver.resolve_folder(&step2, &choices).unwrap(),
            PathBuf::from("/assets/step-2/red")
        );
        assert_eq!(
            resolver.resolve_folder(&step4, &choices).unwrap(),
            PathBuf::from("/assets/step-3/red/round")
        );
    }

    #[test]
    fn resolve_folder_errors() {
        let resolver = AssetResolver::new("/assets");
        let keyed = StepDefinition::select(4, "step-3", 2, LayerMode::Replace);
        let err = resolver
            .resolve_folder(&keyed, &["only".to_string()])
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::MissingChoices { needed: 2, have: 1, .. }
        ));

        let pass = StepDefinition::pass_through(3);
        assert!(matches!(
            resolver.resolve_folder(&pass, &[]),
            Err(ResolutionError::NoFolder(3))
        ));
    }

    #[tokio::test]
    async fn list_options_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("step-1");
        for name in ["b.PNG", "a.jpg", "C.jpeg", "readme.txt", ".DS_Store"] {
            touch(&dir, name);
        }
        std::fs::create_dir_all(dir.join("nested.png")).unwrap();

        let resolver = AssetResolver::new(tmp.path());
        let options = resolver.list_options(&dir).await.unwrap();
        let names: Vec<&str> = options.iter().map(|o| o.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "C.jpeg"]);
        assert_eq!(options[1].id, "b");
        assert_eq!(options[2].index, 2);
        assert_eq!(options[0].path, dir.join("a.jpg"));
    }

    #[tokio::test]
    async fn list_options_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("s");
        for name in ["z.png", "M.png", "m.png", "a.png", "K.jpg"] {
            touch(&dir, name);
        }
        let resolver = AssetResolver::new(tmp.path());
        let first = resolver.list_options(&dir).await.unwrap();
        for _ in 0..5 {
            assert_eq!(resolver.list_options(&dir).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn missing_or_empty_folder_is_resolution_error() {
        let tmp = TempDir::new().unwrap();
        let resolver = AssetResolver::new(tmp.path());

        let missing = tmp.path().join("nope");
        assert!(matches!(
            resolver.list_options(&missing).await,
            Err(ResolutionError::FolderUnavailable { .. })
        ));

        let empty = tmp.path().join("empty");
        touch(&empty, "notes.txt");
        assert!(matches!(
            resolver.list_options(&empty).await,
            Err(ResolutionError::EmptyFolder { .. })
        ));
    }

    #[test]
    fn validate_canvas_accepts_uniform_tree() {
        let tmp = TempDir::new().unwrap();
        write_png(&tmp.path().join("one"), "a.png", 4, 3);
        write_png(&tmp.path().join("two/a"), "x.png", 4, 3);

        let table = StepTable::new(vec![
            StepDefinition::select(1, "one", 0, LayerMode::Overlay),
            StepDefinition::select(2, "two", 1, LayerMode::Overlay),
        ])
        .unwrap();
        let resolver = AssetResolver::new(tmp.path());
        assert_eq!(resolver.validate_canvas(&table).unwrap(), Some((4, 3)));
    }

    #[test]
    fn validate_canvas_rejects_mismatch() {
        let tmp = TempDir::new().unwrap();
        write_png(&tmp.path().join("one"), "a.png", 4, 4);
        write_png(&tmp.path().join("two"), "b.png", 8, 4);

        let table = StepTable::new(vec![
            StepDefinition::select(1, "one", 0, LayerMode::Overlay),
            StepDefinition::select(2, "two", 0, LayerMode::Overlay),
        ])
        .unwrap();
        let resolver = AssetResolver::new(tmp.path());
        let err = resolver.validate_canvas(&table).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CanvasMismatch {
                expected: (4, 4),
                found: (8, 4),
                ..
            }
        ));
    }
}
