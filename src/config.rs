use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::{KioskError, Result};
use crate::models::{Category, UNSET_MARKER};

const MAX_EMPHASIS_LEVEL: u8 = 3;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://localhost:7860".to_string(),
            username: None,
            password: None,
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials only ever come from the environment (or a local `.env`),
    /// never from the versioned prompt configuration.
    pub fn from_env() -> Self {
        let defaults = ApiConfig::default();
        ApiConfig {
            base_url: env::var("NOTYOU_API_URL").unwrap_or(defaults.base_url),
            username: env::var("NOTYOU_API_USERNAME").ok(),
            password: env::var("NOTYOU_API_PASSWORD").ok(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn txt2img_url(&self) -> String {
        format!("{}/sdapi/v1/txt2img", self.base_url.trim_end_matches('/'))
    }

    pub fn options_url(&self) -> String {
        format!("{}/sdapi/v1/options", self.base_url.trim_end_matches('/'))
    }

    fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.base_url).map_err(|e| {
            KioskError::ConfigError(format!("Invalid API base URL '{}': {}", self.base_url, e))
        })?;
        match self.username.as_deref() {
            Some(username) if !username.trim().is_empty() => Ok(()),
            _ => Err(KioskError::ConfigError(
                "API username is required (set NOTYOU_API_USERNAME)".into(),
            )),
        }
    }
}

/// Fixed txt2img parameters sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub cfg_scale: f32,
    pub sampler: String,
    pub n_iter: u32,
    pub batch_size: u32,
    pub restore_faces: bool,
    pub tiling: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            steps: 5,
            width: 512,
            height: 512,
            cfg_scale: 2.0,
            sampler: "Euler a".to_string(),
            n_iter: 1,
            batch_size: 1,
            restore_faces: false,
            tiling: false,
        }
    }
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_sampler(mut self, sampler: impl Into<String>, cfg_scale: f32) -> Self {
        self.sampler = sampler.into();
        self.cfg_scale = cfg_scale;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(1..=150).contains(&self.steps) {
            return Err(KioskError::ConfigError(format!(
                "steps must be within 1-150, got {}",
                self.steps
            )));
        }
        if !(1.0..=30.0).contains(&self.cfg_scale) {
            return Err(KioskError::ConfigError(format!(
                "cfg_scale must be within 1-30, got {}",
                self.cfg_scale
            )));
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if !(64..=2048).contains(&value) {
                return Err(KioskError::ConfigError(format!(
                    "{} must be within 64-2048, got {}",
                    name, value
                )));
            }
        }
        if self.n_iter == 0 || self.batch_size == 0 {
            return Err(KioskError::ConfigError(
                "n_iter and batch_size must be at least 1".into(),
            ));
        }
        if self.sampler.trim().is_empty() {
            return Err(KioskError::ConfigError("sampler must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "level")]
pub enum Emphasis {
    #[default]
    None,
    Intensify(u8),
    Reduce(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmphasisMarkers {
    pub intensify_open: String,
    pub intensify_close: String,
    pub reduce_open: String,
    pub reduce_close: String,
}

impl Default for EmphasisMarkers {
    fn default() -> Self {
        EmphasisMarkers {
            intensify_open: "(".to_string(),
            intensify_close: ")".to_string(),
            reduce_open: "[".to_string(),
            reduce_close: "]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub label: String,
    pub options: Vec<String>,
    /// Form label -> prompt vocabulary.
    pub descriptors: BTreeMap<String, String>,
    pub emphasis: Emphasis,
}

impl FieldMapping {
    pub fn new(label: impl Into<String>) -> Self {
        FieldMapping {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn map(mut self, option: impl Into<String>, descriptor: impl Into<String>) -> Self {
        let option = option.into();
        if !self.options.contains(&option) {
            self.options.push(option.clone());
        }
        self.descriptors.insert(option, descriptor.into());
        self
    }

    pub fn with_emphasis(mut self, emphasis: Emphasis) -> Self {
        self.emphasis = emphasis;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub prepend: String,
    pub append: String,
    pub negative: String,
    pub descriptor_separator: String,
    pub section_separator: String,
    /// Order descriptors appear in; earlier tokens weigh more with the model.
    pub category_order: Vec<Category>,
    pub fields: BTreeMap<Category, FieldMapping>,
    pub markers: EmphasisMarkers,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let fields = [
            FieldMapping::new("Age")
                .map("Child", "child")
                .map("Teen", "teenager")
                .map("Young Adult", "young adult")
                .map("Middle-Aged", "middle-aged")
                .map("Senior", "elderly"),
            FieldMapping::new("Gender")
                .map("Male", "male")
                .map("Female", "female"),
            FieldMapping::new("Ethnicity")
                .map("White", "caucasian")
                .map("Asian", "asian")
                .map("American Indian", "native american")
                .map("Black or African American", "african american")
                .map("Hispanic Latino or Spanish origin", "hispanic")
                .map("Middle Eastern or North African", "middle eastern")
                .map("Native Hawaiian or Other Pacific Islander", "pacific islander")
                .map("Other", "mixed ethnicity"),
            FieldMapping::new("Education")
                .map("Some schooling", "with basic education")
                .map("High school", "with high school education")
                .map("College", "college educated")
                .map("Graduate / professional degree", "highly educated professional"),
            FieldMapping::new("Employment")
                .map("Unemployed", "unemployed")
                .map("Student", "student")
                .map("Part-time", "part-time worker")
                .map("Full-time", "professional worker")
                .map("Retired", "retired"),
            FieldMapping::new("Income")
                .map("$0–$24,999", "low income")
                .map("$25,000–$49,999", "modest income")
                .map("$50,000–$99,999", "middle class")
                .map("$100,000–$199,999", "upper middle class")
                .map("$200,000+", "wealthy"),
        ];

        PromptConfig {
            prepend: "professional portrait photograph of a".to_string(),
            append: "person, high quality, detailed, realistic, photographic style".to_string(),
            negative: "cartoon, anime, drawing, painting, sketch, low quality, blurry, distorted"
                .to_string(),
            descriptor_separator: ", ".to_string(),
            section_separator: ", ".to_string(),
            category_order: Category::ALL.to_vec(),
            fields: Category::ALL.into_iter().zip(fields).collect(),
            markers: EmphasisMarkers::default(),
        }
    }
}

impl PromptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a prompt file. Categories absent from `fields` keep their
    /// built-in mapping; a category that is present replaces it whole.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: PromptConfig = serde_json::from_str(json).map_err(|e| {
            KioskError::ConfigError(format!("Invalid prompt configuration: {}", e))
        })?;
        for (category, mapping) in PromptConfig::default().fields {
            config.fields.entry(category).or_insert(mapping);
        }
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KioskError::ConfigError(format!(
                "Cannot read prompt configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn with_text(
        mut self,
        prepend: impl Into<String>,
        append: impl Into<String>,
        negative: impl Into<String>,
    ) -> Self {
        self.prepend = prepend.into();
        self.append = append.into();
        self.negative = negative.into();
        self
    }

    pub fn with_field(mut self, category: Category, mapping: FieldMapping) -> Self {
        self.fields.insert(category, mapping);
        self
    }

    pub fn with_order(mut self, order: Vec<Category>) -> Self {
        self.category_order = order;
        self
    }

    pub fn with_descriptor_separator(mut self, separator: impl Into<String>) -> Self {
        self.descriptor_separator = separator.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.category_order.is_empty() {
            return Err(KioskError::ConfigError("category_order is empty".into()));
        }
        let mut seen = HashSet::new();
        for category in &self.category_order {
            if !seen.insert(category) {
                return Err(KioskError::ConfigError(format!(
                    "category '{}' appears twice in category_order",
                    category
                )));
            }
        }
        let missing: Vec<&str> = Category::ALL
            .iter()
            .filter(|category| !seen.contains(category))
            .map(|category| category.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(KioskError::ConfigError(format!(
                "category_order is missing: {}",
                missing.join(", ")
            )));
        }
        for (category, mapping) in &self.fields {
            for (option, descriptor) in &mapping.descriptors {
                if descriptor.contains(UNSET_MARKER) {
                    return Err(KioskError::ConfigError(format!(
                        "descriptor for {} '{}' contains '{}'",
                        category, option, UNSET_MARKER
                    )));
                }
            }
            match mapping.emphasis {
                Emphasis::Intensify(level) | Emphasis::Reduce(level)
                    if level == 0 || level > MAX_EMPHASIS_LEVEL =>
                {
                    return Err(KioskError::ConfigError(format!(
                        "emphasis level for {} must be within 1-{}, got {}",
                        category, MAX_EMPHASIS_LEVEL, level
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    fn validate(&self) -> Result<()> {
        if !(self.multiplier >= 1.0) {
            return Err(KioskError::ConfigError(format!(
                "retry multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct KioskConfig {
    pub api: ApiConfig,
    pub generation: GenerationConfig,
    pub prompt: PromptConfig,
    pub retry: RetryConfig,
    pub request_timeout: Duration,
    /// Abort superseded HTTP calls instead of letting them finish unobserved.
    pub cancel_superseded: bool,
}

impl Default for KioskConfig {
    fn default() -> Self {
        KioskConfig {
            api: ApiConfig::default(),
            generation: GenerationConfig::default(),
            prompt: PromptConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            cancel_superseded: true,
        }
    }
}

impl KioskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let mut config = KioskConfig {
            api: ApiConfig::from_env(),
            ..Default::default()
        };

        if let Some(secs) = parse_env::<u64>("NOTYOU_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(max_retries) = parse_env::<u32>("NOTYOU_MAX_RETRIES")? {
            config.retry.max_retries = max_retries;
        }
        if let Some(ms) = parse_env::<u64>("NOTYOU_RETRY_DELAY_MS")? {
            config.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Ok(path) = env::var("NOTYOU_PROMPT_CONFIG") {
            config.prompt = PromptConfig::from_json_file(path)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = api;
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptConfig) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cancel_superseded(mut self, enabled: bool) -> Self {
        self.cancel_superseded = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.generation.validate()?;
        self.prompt.validate()?;
        self.retry.validate()?;
        if self.request_timeout.is_zero() {
            return Err(KioskError::ConfigError(
                "request timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| KioskError::ConfigError(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> KioskConfig {
        KioskConfig::new().with_api(ApiConfig::new().with_credentials("kiosk", "secret"))
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(valid().validate().is_ok());
        let config = KioskConfig::default();
        assert_eq!(config.prompt.category_order, Category::ALL.to_vec());
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = KioskConfig::default().validate().unwrap_err();
        assert!(matches!(err, KioskError::ConfigError(_)));
    }

    #[test]
    fn test_generation_ranges() {
        let config = valid().with_generation(GenerationConfig::new().with_steps(0));
        assert!(config.validate().is_err());

        let config = valid().with_generation(GenerationConfig::new().with_size(32, 512));
        assert!(config.validate().is_err());

        let config = valid().with_generation(GenerationConfig::new().with_sampler("DPM++ 2M", 31.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prompt_validation() {
        let duplicated = PromptConfig::new().with_order(vec![Category::Age, Category::Age]);
        assert!(duplicated.validate().is_err());

        let question = PromptConfig::new().with_field(
            Category::Age,
            FieldMapping::new("Age").map("Senior", "elderly?"),
        );
        assert!(question.validate().is_err());

        let partial = PromptConfig::new().with_order(vec![Category::Gender, Category::Age]);
        let err = partial.validate().unwrap_err().to_string();
        assert!(err.contains("ethnicity, education, employment, income"));

        let emphasis = PromptConfig::new().with_field(
            Category::Gender,
            FieldMapping::new("Gender").with_emphasis(Emphasis::Intensify(4)),
        );
        assert!(emphasis.validate().is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let config = KioskConfig::new().with_api(
            ApiConfig::new()
                .with_base_url("not a url")
                .with_credentials("kiosk", "secret"),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let api = ApiConfig::new().with_base_url("http://192.168.4.73:7860/");
        assert_eq!(api.txt2img_url(), "http://192.168.4.73:7860/sdapi/v1/txt2img");
        assert_eq!(api.options_url(), "http://192.168.4.73:7860/sdapi/v1/options");
    }

    #[test]
    fn test_backoff_schedule() {
        let retry = RetryConfig::new()
            .with_delays(Duration::from_millis(500), Duration::from_millis(1500));
        assert_eq!(retry.delay_for(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for(2), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(1500));
        assert_eq!(retry.delay_for(10), Duration::from_millis(1500));
    }

    #[test]
    fn test_prompt_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "prepend": "photographic portrait of a",
                "append": "studio lighting",
                "category_order": ["gender", "age", "income", "ethnicity", "education", "employment"],
                "fields": {{
                    "age": {{
                        "label": "Age",
                        "descriptors": {{ "Senior": "elderly" }},
                        "emphasis": {{ "mode": "intensify", "level": 2 }}
                    }}
                }}
            }}"#
        )
        .unwrap();

        let prompt = PromptConfig::from_json_file(file.path()).unwrap();
        assert_eq!(prompt.prepend, "photographic portrait of a");
        assert_eq!(prompt.category_order[..2], [Category::Gender, Category::Age]);
        assert_eq!(prompt.fields[&Category::Age].emphasis, Emphasis::Intensify(2));
        assert_eq!(prompt.fields[&Category::Age].descriptors.len(), 1);
        // Unspecified keys and categories keep their defaults.
        assert_eq!(prompt.descriptor_separator, ", ");
        assert_eq!(
            prompt.fields[&Category::Income].descriptors["$200,000+"],
            "wealthy"
        );
        assert!(prompt.validate().is_ok());
    }

    #[test]
    fn test_malformed_prompt_config() {
        let err = PromptConfig::from_json_str("{ \"category_order\": [\"height\"] }").unwrap_err();
        assert!(matches!(err, KioskError::ConfigError(_)));
    }
}
