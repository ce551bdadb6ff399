use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::models::{
    DisplayError, DisplayImage, DisplayState, DisplayStatus, FormSelection, GenerationRequest,
    GenerationResult,
};
use crate::prompt::PromptBuilder;

/// Work the async side has to carry out after a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Dispatch {
        request: GenerationRequest,
        attempt: u32,
        delay: Duration,
    },
    Abandon {
        id: u64,
    },
}

#[derive(Debug, Clone)]
struct Pending {
    request: GenerationRequest,
    attempt: u32,
}

/// The generation state machine, free of I/O.
///
/// Every decision about ids, preemption, retries and what the screen shows is
/// made here; the caller only executes the returned [`Effect`]s.
#[derive(Debug)]
pub struct ControllerCore {
    builder: PromptBuilder,
    retry: RetryConfig,
    placeholder_text: String,
    last_issued: u64,
    last_accepted: FormSelection,
    pending: Option<Pending>,
    fault: Option<String>,
    /// Newest selection received while dispatch was suspended.
    deferred: Option<FormSelection>,
    display: DisplayState,
}

impl ControllerCore {
    pub fn new(builder: PromptBuilder, retry: RetryConfig) -> Self {
        let placeholder_text = builder.placeholder_text();
        Self {
            display: DisplayState::placeholder(placeholder_text.clone()),
            builder,
            retry,
            placeholder_text,
            last_issued: 0,
            last_accepted: FormSelection::new(),
            pending: None,
            fault: None,
            deferred: None,
        }
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn last_issued(&self) -> u64 {
        self.last_issued
    }

    /// Id of the request whose result is still awaited, if any.
    pub fn pending_id(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.request.id)
    }

    pub fn is_suspended(&self) -> bool {
        self.fault.is_some()
    }

    pub fn on_form_changed(&mut self, selection: FormSelection) -> Vec<Effect> {
        if let Some(fault) = &self.fault {
            log::warn!(
                "Generation suspended ({}); holding selection [{}]",
                fault,
                selection
            );
            self.deferred = Some(selection);
            return Vec::new();
        }

        if selection == self.last_accepted {
            log::debug!("Selection unchanged, nothing to generate");
            return Vec::new();
        }

        log::info!("Form changed ({} set): {}", selection.set_count(), selection);
        self.accept(selection)
    }

    /// Re-runs the current selection under a fresh id ("remix").
    pub fn regenerate(&mut self) -> Vec<Effect> {
        if self.fault.is_some() || self.last_accepted.is_empty() {
            log::debug!("Nothing to regenerate");
            return Vec::new();
        }
        let mut effects = self.abandon_pending();
        effects.push(self.issue(self.last_accepted.clone()));
        effects
    }

    /// Lifts an authentication suspension and resumes with the newest selection.
    pub fn clear_fault(&mut self) -> Vec<Effect> {
        let Some(fault) = self.fault.take() else {
            return Vec::new();
        };
        log::info!("Fault cleared ({}), resuming generation", fault);

        self.display.suspended = false;
        self.display.touch();
        let selection = self
            .deferred
            .take()
            .unwrap_or_else(|| self.last_accepted.clone());
        self.accept(selection)
    }

    pub fn on_result(&mut self, id: u64, attempt: u32, result: GenerationResult) -> Vec<Effect> {
        let is_current = matches!(
            &self.pending,
            Some(pending)
                if id == self.last_issued
                    && pending.request.id == id
                    && pending.attempt == attempt
        );
        let pending = match self.pending.take() {
            Some(pending) if is_current => pending,
            other => {
                self.pending = other;
                log::debug!(
                    "Discarding stale result for request #{} (latest is #{})",
                    id,
                    self.last_issued
                );
                return Vec::new();
            }
        };

        match result {
            GenerationResult::Success { image, spec } => {
                log::info!("Request #{} ready ({} bytes)", id, image.len());
                self.display.image = DisplayImage::Generated(Arc::from(image));
                self.display.prompt_text = spec.positive;
                self.display.status = DisplayStatus::Ready;
                self.display.request_id = Some(id);
                self.display.last_error = None;
                self.display.touch();
                Vec::new()
            }
            GenerationResult::Failure { kind, detail } if kind.is_fatal() => {
                log::error!(
                    "Request #{} failed authentication: {}. New requests are suspended until the fault is cleared",
                    id,
                    detail
                );
                self.fault = Some(detail.clone());
                self.display.status = DisplayStatus::Error;
                self.display.suspended = true;
                self.display.last_error = Some(DisplayError { kind, detail });
                self.display.touch();
                Vec::new()
            }
            GenerationResult::Failure { kind, detail }
                if kind.is_transient() && pending.attempt < self.retry.max_retries =>
            {
                let attempt = pending.attempt + 1;
                let delay = self.retry.delay_for(attempt);
                log::warn!(
                    "Request #{} failed ({}: {}), retry {}/{} in {:?}",
                    id,
                    kind,
                    detail,
                    attempt,
                    self.retry.max_retries,
                    delay
                );
                self.pending = Some(Pending {
                    request: pending.request.clone(),
                    attempt,
                });
                vec![Effect::Dispatch {
                    request: pending.request,
                    attempt,
                    delay,
                }]
            }
            GenerationResult::Failure { kind, detail } => {
                log::error!(
                    "Request #{} failed after {} attempt(s) ({}: {})",
                    id,
                    pending.attempt + 1,
                    kind,
                    detail
                );
                self.display.status = DisplayStatus::Error;
                self.display.last_error = Some(DisplayError { kind, detail });
                self.display.touch();
                Vec::new()
            }
        }
    }

    fn accept(&mut self, selection: FormSelection) -> Vec<Effect> {
        self.last_accepted = selection.clone();
        let mut effects = self.abandon_pending();

        if selection.is_empty() {
            log::info!("All fields unset, showing placeholder");
            self.display.image = DisplayImage::Placeholder;
            self.display.prompt_text = self.placeholder_text.clone();
            self.display.status = DisplayStatus::Idle;
            self.display.request_id = None;
            self.display.last_error = None;
            self.display.touch();
            return effects;
        }

        effects.push(self.issue(selection));
        effects
    }

    fn issue(&mut self, selection: FormSelection) -> Effect {
        self.last_issued += 1;
        let request = GenerationRequest::new(self.last_issued, self.builder.build(&selection));
        log::info!("Issuing request #{}: {}", request.id, request.spec.positive);

        self.pending = Some(Pending {
            request: request.clone(),
            attempt: 0,
        });
        self.display.status = DisplayStatus::Generating;
        self.display.last_error = None;
        self.display.touch();

        Effect::Dispatch {
            request,
            attempt: 0,
            delay: Duration::ZERO,
        }
    }

    fn abandon_pending(&mut self) -> Vec<Effect> {
        match self.pending.take() {
            Some(pending) => {
                log::debug!("Request #{} superseded", pending.request.id);
                vec![Effect::Abandon {
                    id: pending.request.id,
                }]
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldMapping, PromptConfig};
    use crate::models::{Category, FailureKind, PromptSpec};

    fn core() -> ControllerCore {
        let prompt = PromptConfig::new()
            .with_text("photographic portrait of a", "studio lighting", "cartoon")
            .with_field(
                Category::Gender,
                FieldMapping::new("Gender").map("Female", "woman"),
            )
            .with_descriptor_separator(" ");
        ControllerCore::new(
            PromptBuilder::new(prompt),
            RetryConfig::new().with_max_retries(2),
        )
    }

    fn senior_female() -> FormSelection {
        FormSelection::new()
            .with(Category::Age, "Senior")
            .with(Category::Gender, "Female")
    }

    fn dispatched(effects: &[Effect]) -> GenerationRequest {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Dispatch { request, .. } => Some(request.clone()),
                _ => None,
            })
            .expect("a dispatch effect")
    }

    fn success(request: &GenerationRequest, image: &[u8]) -> GenerationResult {
        GenerationResult::Success {
            image: image.to_vec(),
            spec: request.spec.clone(),
        }
    }

    fn failure(kind: FailureKind) -> GenerationResult {
        GenerationResult::Failure {
            kind,
            detail: format!("{} failure", kind),
        }
    }

    #[test]
    fn test_startup_state() {
        let core = core();
        let display = core.display();
        assert_eq!(display.status, DisplayStatus::Idle);
        assert!(display.image.is_placeholder());
        assert!(display.prompt_text.contains('?'));
        assert_eq!(core.last_issued(), 0);
    }

    #[test]
    fn test_first_selection_dispatches_and_shows_generating() {
        let mut core = core();
        let effects = core.on_form_changed(senior_female());
        assert_eq!(effects.len(), 1);

        let request = dispatched(&effects);
        assert_eq!(request.id, 1);
        assert_eq!(
            request.spec,
            PromptSpec {
                positive: "photographic portrait of a, elderly woman, studio lighting".into(),
                negative: "cartoon".into(),
            }
        );
        assert_eq!(core.display().status, DisplayStatus::Generating);
        // Text stays with the image that is actually on screen.
        assert!(core.display().image.is_placeholder());
        assert!(core.display().prompt_text.contains('?'));
    }

    #[test]
    fn test_identical_selection_is_noop() {
        let mut core = core();
        assert_eq!(core.on_form_changed(senior_female()).len(), 1);
        assert!(core.on_form_changed(senior_female()).is_empty());
        assert_eq!(core.last_issued(), 1);
    }

    #[test]
    fn test_empty_selection_at_startup_is_noop() {
        let mut core = core();
        assert!(core.on_form_changed(FormSelection::new()).is_empty());
        assert_eq!(core.display().revision, 0);
    }

    #[test]
    fn test_newer_selection_supersedes_and_late_result_is_discarded() {
        let mut core = core();
        let first = dispatched(&core.on_form_changed(senior_female()));

        let effects =
            core.on_form_changed(senior_female().with(Category::Income, "$200,000+"));
        assert_eq!(effects[0], Effect::Abandon { id: first.id });
        let second = dispatched(&effects);
        assert_eq!(second.id, 2);

        assert!(core.on_result(second.id, 0, success(&second, b"second")).is_empty());
        let shown = core.display().clone();
        assert_eq!(shown.request_id, Some(2));
        assert_eq!(shown.prompt_text, second.spec.positive);

        assert!(core.on_result(first.id, 0, success(&first, b"first")).is_empty());
        assert_eq!(core.display().request_id, Some(2));
        assert_eq!(core.display().image.bytes(), Some(&b"second"[..]));
        assert_eq!(core.display().revision, shown.revision);
    }

    #[test]
    fn test_stale_failure_does_not_touch_display() {
        let mut core = core();
        let first = dispatched(&core.on_form_changed(senior_female()));
        let teen = FormSelection::new().with(Category::Age, "Teen");
        let _second = dispatched(&core.on_form_changed(teen));
        let before = core.display().revision;

        assert!(core.on_result(first.id, 0, failure(FailureKind::Auth)).is_empty());
        assert!(!core.is_suspended());
        assert_eq!(core.display().revision, before);
        assert_eq!(core.display().status, DisplayStatus::Generating);
    }

    #[test]
    fn test_transient_failure_retries_with_backoff_then_errors() {
        let mut core = core();
        let child = FormSelection::new().with(Category::Age, "Child");
        let ok = dispatched(&core.on_form_changed(child));
        core.on_result(ok.id, 0, success(&ok, b"child"));
        let child_text = core.display().prompt_text.clone();

        let request = dispatched(&core.on_form_changed(senior_female()));
        let retry = RetryConfig::new();

        for attempt in 0..2 {
            let effects = core.on_result(request.id, attempt, failure(FailureKind::Server));
            assert_eq!(
                effects,
                vec![Effect::Dispatch {
                    request: request.clone(),
                    attempt: attempt + 1,
                    delay: retry.delay_for(attempt + 1),
                }]
            );
            assert_eq!(core.display().status, DisplayStatus::Generating);
            assert_eq!(core.display().image.bytes(), Some(&b"child"[..]));
        }

        assert!(core.on_result(request.id, 2, failure(FailureKind::Timeout)).is_empty());
        let display = core.display();
        assert_eq!(display.status, DisplayStatus::Error);
        assert_eq!(display.image.bytes(), Some(&b"child"[..]));
        assert_eq!(display.prompt_text, child_text);
        assert_eq!(display.last_error.as_ref().unwrap().kind, FailureKind::Timeout);
        assert_eq!(core.pending_id(), None);
    }

    #[test]
    fn test_result_for_old_attempt_is_ignored() {
        let mut core = core();
        let request = dispatched(&core.on_form_changed(senior_female()));
        core.on_result(request.id, 0, failure(FailureKind::Decode));

        assert!(core.on_result(request.id, 0, success(&request, b"late")).is_empty());
        assert!(core.display().image.is_placeholder());
        assert!(core.on_result(request.id, 1, success(&request, b"retried")).is_empty());
        assert_eq!(core.display().status, DisplayStatus::Ready);
    }

    #[test]
    fn test_rejected_request_is_not_retried() {
        let mut core = core();
        let request = dispatched(&core.on_form_changed(senior_female()));
        assert!(core.on_result(request.id, 0, failure(FailureKind::Rejected)).is_empty());
        assert_eq!(core.display().status, DisplayStatus::Error);
        assert!(!core.is_suspended());
    }

    #[test]
    fn test_auth_failure_suspends_until_cleared() {
        let mut core = core();
        let request = dispatched(&core.on_form_changed(senior_female()));
        assert!(core.on_result(request.id, 0, failure(FailureKind::Auth)).is_empty());

        let display = core.display();
        assert_eq!(display.status, DisplayStatus::Error);
        assert!(display.image.is_placeholder());
        assert!(display.suspended);

        let newer = FormSelection::new().with(Category::Income, "$200,000+");
        assert!(core.on_form_changed(newer.clone()).is_empty());
        assert!(core.regenerate().is_empty());
        assert_eq!(core.last_issued(), 1);

        let effects = core.clear_fault();
        let resumed = dispatched(&effects);
        assert_eq!(resumed.id, 2);
        assert_eq!(resumed.spec, core.builder.build(&newer));
        assert!(!core.display().suspended);
        assert_eq!(core.display().status, DisplayStatus::Generating);
    }

    #[test]
    fn test_clear_fault_retries_failed_selection() {
        let mut core = core();
        let request = dispatched(&core.on_form_changed(senior_female()));
        core.on_result(request.id, 0, failure(FailureKind::Auth));

        let resumed = dispatched(&core.clear_fault());
        assert_eq!(resumed.spec, request.spec);
        assert!(core.clear_fault().is_empty());
    }

    #[test]
    fn test_clearing_all_fields_resets_to_placeholder() {
        let mut core = core();
        let request = dispatched(&core.on_form_changed(senior_female()));
        core.on_result(request.id, 0, success(&request, b"portrait"));

        let pending = dispatched(&core.on_form_changed(senior_female().with(Category::Age, "Teen")));
        let effects = core.on_form_changed(FormSelection::new());
        assert_eq!(effects, vec![Effect::Abandon { id: pending.id }]);

        let display = core.display();
        assert_eq!(display.status, DisplayStatus::Idle);
        assert!(display.image.is_placeholder());
        assert_eq!(display.request_id, None);
        assert!(core.on_result(pending.id, 0, success(&pending, b"late")).is_empty());
        assert!(core.display().image.is_placeholder());
    }

    #[test]
    fn test_regenerate_issues_fresh_id_for_same_prompt() {
        let mut core = core();
        let first = dispatched(&core.on_form_changed(senior_female()));
        core.on_result(first.id, 0, success(&first, b"one"));

        let again = dispatched(&core.regenerate());
        assert_eq!(again.id, 2);
        assert_eq!(again.spec, first.spec);
        assert_eq!(core.display().status, DisplayStatus::Generating);
    }

    #[test]
    fn test_prompt_text_always_matches_shown_image() {
        let mut core = core();
        let selections = [
            senior_female(),
            FormSelection::new().with(Category::Age, "Teen"),
            senior_female().with(Category::Employment, "Retired"),
        ];
        let requests: Vec<GenerationRequest> = selections
            .iter()
            .map(|s| dispatched(&core.on_form_changed(s.clone())))
            .collect();

        // Completions arrive newest first, then the stale ones.
        for request in requests.iter().rev() {
            let image = request.spec.positive.as_bytes();
            core.on_result(request.id, 0, success(request, image));
            let display = core.display();
            if let Some(bytes) = display.image.bytes() {
                assert_eq!(bytes, display.prompt_text.as_bytes());
            }
        }
        assert_eq!(core.display().request_id, Some(3));
    }
}
