use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::KioskError;

/// Marker the kiosk form shows for a field nobody has picked yet.
pub const UNSET_MARKER: &str = "?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Age,
    Gender,
    Ethnicity,
    Education,
    Employment,
    Income,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Age,
        Category::Gender,
        Category::Ethnicity,
        Category::Education,
        Category::Employment,
        Category::Income,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Age => "age",
            Category::Gender => "gender",
            Category::Ethnicity => "ethnicity",
            Category::Education => "education",
            Category::Employment => "employment",
            Category::Income => "income",
        }
    }

    /// Label shown next to the field on screen.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Age => "Age",
            Category::Gender => "Gender",
            Category::Ethnicity => "Ethnicity",
            Category::Education => "Education",
            Category::Employment => "Employment",
            Category::Income => "Income",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|category| category.as_str() == key)
            .ok_or_else(|| KioskError::ConfigError(format!("Unknown form category: {}", s)))
    }
}

/// Snapshot of the demographics form. Only categories with a chosen value are
/// stored, so two snapshots compare equal exactly when every field agrees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSelection {
    values: BTreeMap<Category, String>,
}

impl FormSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: Category, value: impl Into<String>) -> Self {
        self.set(category, value);
        self
    }

    /// Sets a field. `"?"` and blank values unset it.
    pub fn set(&mut self, category: Category, value: impl Into<String>) {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == UNSET_MARKER {
            self.values.remove(&category);
        } else {
            self.values.insert(category, trimmed.to_string());
        }
    }

    pub fn clear(&mut self, category: Category) {
        self.values.remove(&category);
    }

    pub fn get(&self, category: Category) -> Option<&str> {
        self.values.get(&category).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn set_count(&self) -> usize {
        self.values.len()
    }
}

impl fmt::Display for FormSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = Category::ALL
            .iter()
            .map(|category| {
                format!(
                    "{}={}",
                    category,
                    self.get(*category).unwrap_or(UNSET_MARKER)
                )
            })
            .collect();
        f.write_str(&parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_marker_clears_field() {
        let mut selection = FormSelection::new().with(Category::Age, "Senior");
        assert_eq!(selection.get(Category::Age), Some("Senior"));

        selection.set(Category::Age, "?");
        assert!(selection.is_empty());

        selection.set(Category::Gender, "   ");
        assert!(selection.get(Category::Gender).is_none());
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let a = FormSelection::new()
            .with(Category::Income, "$200,000+")
            .with(Category::Age, "Senior");
        let b = FormSelection::new()
            .with(Category::Age, "Senior")
            .with(Category::Income, "$200,000+");
        assert_eq!(a, b);
        assert_eq!(a.set_count(), 2);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("Gender".parse::<Category>().unwrap(), Category::Gender);
        assert_eq!(" income ".parse::<Category>().unwrap(), Category::Income);
        assert!("height".parse::<Category>().is_err());
    }

    #[test]
    fn test_display_shows_unset_fields() {
        let selection = FormSelection::new().with(Category::Gender, "Female");
        assert_eq!(
            selection.to_string(),
            "age=? gender=Female ethnicity=? education=? employment=? income=?"
        );
    }
}
