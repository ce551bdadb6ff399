use crate::config::{Emphasis, EmphasisMarkers, PromptConfig};
use crate::models::{FormSelection, PromptSpec, UNSET_MARKER};

/// Turns form selections into prompt text. Stateless; every method is pure.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, selection: &FormSelection) -> PromptSpec {
        build(selection, &self.config)
    }

    pub fn placeholder_text(&self) -> String {
        placeholder_text(&self.config)
    }
}

/// Builds the positive/negative prompt pair for `selection`.
///
/// Descriptors follow `config.category_order`. Unset categories are skipped, so
/// an empty selection still yields a usable prompt made of the fixed text alone.
pub fn build(selection: &FormSelection, config: &PromptConfig) -> PromptSpec {
    let descriptors: Vec<String> = config
        .category_order
        .iter()
        .filter_map(|category| {
            let value = selection.get(*category)?;
            let mapping = config.fields.get(category);
            let descriptor = match mapping.and_then(|m| m.descriptors.get(value)) {
                Some(descriptor) => descriptor.as_str(),
                None => {
                    log::debug!("No descriptor for {} '{}', using label", category, value);
                    value
                }
            };
            let descriptor = descriptor.trim();
            if descriptor.is_empty() || descriptor == UNSET_MARKER {
                return None;
            }
            let emphasis = mapping.map(|m| m.emphasis).unwrap_or_default();
            Some(emphasize(descriptor, emphasis, &config.markers))
        })
        .collect();

    let joined = descriptors.join(&config.descriptor_separator);
    let positive = [config.prepend.trim(), joined.as_str(), config.append.trim()]
        .iter()
        .filter(|section| !section.is_empty())
        .copied()
        .collect::<Vec<&str>>()
        .join(&config.section_separator);

    PromptSpec {
        positive,
        negative: config.negative.clone(),
    }
}

/// Text shown under the placeholder portrait before anything is selected.
pub fn placeholder_text(config: &PromptConfig) -> String {
    config
        .category_order
        .iter()
        .map(|category| {
            let label = config
                .fields
                .get(category)
                .map(|m| m.label.as_str())
                .filter(|label| !label.is_empty())
                .unwrap_or(category.label());
            format!("{}: {}", label, UNSET_MARKER)
        })
        .collect::<Vec<String>>()
        .join(", ")
}

fn emphasize(descriptor: &str, emphasis: Emphasis, markers: &EmphasisMarkers) -> String {
    let (open, close, level) = match emphasis {
        Emphasis::None => return descriptor.to_string(),
        Emphasis::Intensify(level) => (&markers.intensify_open, &markers.intensify_close, level),
        Emphasis::Reduce(level) => (&markers.reduce_open, &markers.reduce_close, level),
    };
    let level = level as usize;
    format!("{}{}{}", open.repeat(level), descriptor, close.repeat(level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldMapping;
    use crate::models::Category;

    fn kiosk_config() -> PromptConfig {
        PromptConfig::new()
            .with_text("photographic portrait of a", "studio lighting", "cartoon, blurry")
            .with_field(
                Category::Gender,
                FieldMapping::new("Gender")
                    .map("Male", "man")
                    .map("Female", "woman"),
            )
    }

    #[test]
    fn test_senior_female_example() {
        let config = kiosk_config().with_descriptor_separator(" ");
        let selection = FormSelection::new()
            .with(Category::Age, "Senior")
            .with(Category::Gender, "Female");

        let spec = build(&selection, &config);
        assert_eq!(
            spec.positive,
            "photographic portrait of a, elderly woman, studio lighting"
        );
        assert_eq!(spec.negative, "cartoon, blurry");
    }

    #[test]
    fn test_comma_joined_in_configured_order() {
        let selection = FormSelection::new()
            .with(Category::Income, "$200,000+")
            .with(Category::Gender, "Female")
            .with(Category::Age, "Senior");

        let spec = build(&selection, &kiosk_config());
        assert_eq!(
            spec.positive,
            "photographic portrait of a, elderly, woman, wealthy, studio lighting"
        );

        let reordered = kiosk_config().with_order(vec![
            Category::Income,
            Category::Gender,
            Category::Age,
            Category::Ethnicity,
            Category::Education,
            Category::Employment,
        ]);
        assert_eq!(
            build(&selection, &reordered).positive,
            "photographic portrait of a, wealthy, woman, elderly, studio lighting"
        );
    }

    #[test]
    fn test_empty_selection_is_prepend_and_append() {
        let spec = build(&FormSelection::new(), &kiosk_config());
        assert_eq!(spec.positive, "photographic portrait of a, studio lighting");
        assert!(!spec.positive.contains('?'));
    }

    #[test]
    fn test_unmapped_label_falls_back_to_raw_value() {
        let selection = FormSelection::new().with(Category::Employment, "Astronaut");
        let spec = build(&selection, &kiosk_config());
        assert_eq!(
            spec.positive,
            "photographic portrait of a, Astronaut, studio lighting"
        );
    }

    #[test]
    fn test_emphasis_markers() {
        let config = kiosk_config()
            .with_field(
                Category::Age,
                FieldMapping::new("Age")
                    .map("Senior", "elderly")
                    .with_emphasis(Emphasis::Intensify(2)),
            )
            .with_field(
                Category::Income,
                FieldMapping::new("Income")
                    .map("$200,000+", "wealthy")
                    .with_emphasis(Emphasis::Reduce(1)),
            );
        let selection = FormSelection::new()
            .with(Category::Age, "Senior")
            .with(Category::Income, "$200,000+");

        assert_eq!(
            build(&selection, &config).positive,
            "photographic portrait of a, ((elderly)), [wealthy], studio lighting"
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let config = PromptConfig::default();
        let selection = FormSelection::new()
            .with(Category::Ethnicity, "Asian")
            .with(Category::Education, "College");
        assert_eq!(build(&selection, &config), build(&selection, &config));
    }

    #[test]
    fn test_empty_descriptor_contributes_nothing() {
        let config = kiosk_config().with_field(
            Category::Gender,
            FieldMapping::new("Gender").map("Other", ""),
        );
        let selection = FormSelection::new().with(Category::Gender, "Other");
        assert_eq!(
            build(&selection, &config).positive,
            "photographic portrait of a, studio lighting"
        );
    }

    #[test]
    fn test_placeholder_text() {
        let builder = PromptBuilder::new(PromptConfig::default());
        assert_eq!(
            builder.placeholder_text(),
            "Age: ?, Gender: ?, Ethnicity: ?, Education: ?, Employment: ?, Income: ?"
        );
    }
}
