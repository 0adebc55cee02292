//! Raw test descriptors and their normalization into display labels.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::FrameworkConfig;

/// One discovered test, as reported by the formatter's dry run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestDescriptor {
    /// Framework identity, e.g. `./spec/models/game_spec.rb[1:2:3]`.
    pub id: String,
    pub full_description: String,
    pub description: String,
    pub file_path: String,
    /// 1-indexed.
    pub line_number: u32,
}

impl TestDescriptor {
    /// Segments of the bracketed location token, e.g. `["1", "2", "3"]`.
    pub fn location_segments(&self) -> Vec<&str> {
        location_token(&self.id)
            .map(|token| token.split(':').collect())
            .unwrap_or_default()
    }

    /// Ordinal of the test within its innermost group (last token segment).
    pub fn ordinal(&self) -> Option<u64> {
        self.location_segments().last()?.parse().ok()
    }

    /// Numeric ordering key: the token's digits concatenated (`[1:2:3]` → 123).
    pub fn location_key(&self) -> u128 {
        location_key(&self.id)
    }
}

fn location_token(id: &str) -> Option<&str> {
    let start = id.find('[')? + 1;
    let end = id.rfind(']')?;
    (start <= end).then(|| &id[start..end])
}

/// Concatenates the digits of the location token of `id`.
///
/// Identities without a parsable token get key 0.
pub fn location_key(id: &str) -> u128 {
    location_token(id)
        .map(|token| token.split(':').collect::<String>())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Ordering of tests inside a file suite.
///
/// Compares concatenated location digits numerically. This is only correct
/// while all tests share the same nesting depth: `[1:2:3]` (123) sorts after
/// `[1:10]` (110) even though it comes first in the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationOrder;

impl LocationOrder {
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        location_key(a).cmp(&location_key(b))
    }
}

/// snake_case → PascalCase, unless the text still contains a path separator.
pub fn snake_to_pascal_case(text: &str) -> String {
    if text.contains('/') {
        return text.to_string();
    }
    text.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

/// Turns descriptors of one file into labels.
#[derive(Debug, Clone)]
pub struct Normalizer<'a> {
    test_directory: &'a str,
    workspace_root: &'a Path,
    framework: &'a FrameworkConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        test_directory: &'a str,
        workspace_root: &'a Path,
        framework: &'a FrameworkConfig,
    ) -> Self {
        Self {
            test_directory,
            workspace_root,
            framework,
        }
    }

    /// File label relative to the test directory, or to `subdirectory` in it.
    pub fn file_label(&self, file_path: &str, subdirectory: Option<&str>) -> String {
        let prefix = match subdirectory {
            Some(dir) => format!("{}{}/", self.test_directory, dir),
            None => self.test_directory.to_string(),
        };
        file_path.replacen(&prefix, "", 1)
    }

    /// The file label with the framework suffix removed, PascalCased.
    pub fn class_label(&self, file_label: &str) -> String {
        snake_to_pascal_case(&file_label.replacen(&self.framework.file_suffix, "", 1))
    }

    /// Display label of one test living in a file whose class label is given.
    pub fn test_label(&self, descriptor: &TestDescriptor, class_label: &str) -> String {
        let mut label = if descriptor
            .description
            .starts_with(&self.framework.placeholder_prefix)
        {
            let ordinal = descriptor
                .ordinal()
                .map(|n| n.to_string())
                .unwrap_or_default();
            format!("{}test #{}", descriptor.full_description, ordinal)
        } else {
            descriptor.full_description.clone()
        };

        // The framework prefixes descriptions with the described class, which
        // is already shown by the enclosing file suite.
        if !class_label.contains('/') {
            if let Some(rest) = label.strip_prefix(class_label) {
                label = rest.strip_prefix(' ').unwrap_or(rest).to_string();
            }
        }

        label
    }

    /// Absolute path of a workspace-relative (`./`-prefixed) file path.
    pub fn absolute_path(&self, file_path: &str) -> PathBuf {
        let relative = file_path.strip_prefix("./").unwrap_or(file_path);
        self.workspace_root.join(relative)
    }
}
