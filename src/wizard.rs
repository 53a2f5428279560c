//! Client-portal stain selection wizard.
//!
//! A fixed sequence of steps ending in a confirmation. Back-navigation
//! never discards earlier answers; re-answering an earlier step with a
//! different value truncates the answers of later steps, since they may
//! depend on it. Favorites are a per-wizard set toggled on stain options
//! and survive all navigation.

use std::collections::HashSet;

use chrono::Utc;

use crate::types::StainSelection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardStep {
    pub id: String,
    pub prompt: String,
}

impl WizardStep {
    pub fn new(id: &str, prompt: &str) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    /// Waiting for an answer to the step at the cursor.
    InProgress,
    /// All steps answered; waiting for the final confirmation.
    AwaitingConfirmation,
    /// Confirmed; the selection has been produced.
    Complete,
}

pub struct StainWizard {
    customer_id: String,
    steps: Vec<WizardStep>,
    answers: Vec<Option<String>>,
    cursor: usize,
    favorites: HashSet<String>,
    confirmed: bool,
}

impl StainWizard {
    /// A wizard needs at least one step; the final step's answer is the
    /// chosen stain option id.
    pub fn new(customer_id: &str, steps: Vec<WizardStep>) -> Self {
        debug_assert!(!steps.is_empty());
        let answers = vec![None; steps.len()];
        Self {
            customer_id: customer_id.to_string(),
            steps,
            answers,
            cursor: 0,
            favorites: HashSet::new(),
            confirmed: false,
        }
    }

    pub fn state(&self) -> WizardState {
        if self.confirmed {
            WizardState::Complete
        } else if self.answers.iter().all(|a| a.is_some()) && self.cursor == self.steps.len() - 1 {
            WizardState::AwaitingConfirmation
        } else {
            WizardState::InProgress
        }
    }

    pub fn current_step(&self) -> &WizardStep {
        &self.steps[self.cursor]
    }

    pub fn answer_at(&self, step: usize) -> Option<&str> {
        self.answers.get(step).and_then(|a| a.as_deref())
    }

    /// Answer the current step and advance. Changing an earlier answer
    /// to a different value clears every later answer; re-submitting the
    /// same value leaves them intact.
    pub fn answer(&mut self, value: &str) {
        let changed = self.answers[self.cursor].as_deref() != Some(value);
        self.answers[self.cursor] = Some(value.to_string());
        if changed {
            for later in self.answers.iter_mut().skip(self.cursor + 1) {
                *later = None;
            }
        }
        if self.cursor + 1 < self.steps.len() {
            self.cursor += 1;
        }
    }

    /// Step back without discarding anything.
    pub fn back(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// Toggle a stain option in the favorites set.
    pub fn toggle_favorite(&mut self, option_id: &str) {
        if !self.favorites.remove(option_id) {
            self.favorites.insert(option_id.to_string());
        }
    }

    pub fn is_favorite(&self, option_id: &str) -> bool {
        self.favorites.contains(option_id)
    }

    pub fn favorites(&self) -> &HashSet<String> {
        &self.favorites
    }

    /// Confirm and produce the selection. Returns `None` until every step
    /// is answered.
    pub fn confirm(&mut self) -> Option<StainSelection> {
        if self.state() != WizardState::AwaitingConfirmation {
            return None;
        }
        let option_id = self.answers.last()?.clone()?;
        self.confirmed = true;
        Some(StainSelection {
            customer_id: self.customer_id.clone(),
            option_id,
            selected_at: Utc::now(),
        })
    }

    /// Reset everything, favorites included.
    pub fn reset(&mut self) {
        for answer in &mut self.answers {
            *answer = None;
        }
        self.cursor = 0;
        self.favorites.clear();
        self.confirmed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wizard() -> StainWizard {
        StainWizard::new(
            "cust-1",
            vec![
                WizardStep::new("surface", "What are we staining?"),
                WizardStep::new("tone", "Preferred tone family?"),
                WizardStep::new("stain", "Pick your stain"),
            ],
        )
    }

    #[test]
    fn test_back_preserves_earlier_answers() {
        let mut w = wizard();
        w.answer("deck");
        w.answer("warm");
        w.back();
        w.back();

        assert_eq!(w.answer_at(0), Some("deck"));
        assert_eq!(w.answer_at(1), Some("warm"));
        assert_eq!(w.current_step().id, "surface");
    }

    #[test]
    fn test_changing_earlier_answer_truncates_later_ones() {
        let mut w = wizard();
        w.answer("deck");
        w.answer("warm");
        w.answer("stain-cedar");
        w.back();
        w.back();
        w.back();

        w.answer("fence"); // different answer for step 0

        assert_eq!(w.answer_at(0), Some("fence"));
        assert_eq!(w.answer_at(1), None);
        assert_eq!(w.answer_at(2), None);
    }

    #[test]
    fn test_resubmitting_same_answer_keeps_later_ones() {
        let mut w = wizard();
        w.answer("deck");
        w.answer("warm");
        w.back();
        w.back();

        w.answer("deck");

        assert_eq!(w.answer_at(1), Some("warm"));
    }

    #[test]
    fn test_favorites_survive_navigation_and_truncation() {
        let mut w = wizard();
        w.toggle_favorite("stain-cedar");
        w.toggle_favorite("stain-walnut");
        w.answer("deck");
        w.answer("warm");
        w.back();
        w.back();
        w.answer("fence"); // truncates answers

        assert!(w.is_favorite("stain-cedar"));
        assert!(w.is_favorite("stain-walnut"));

        w.toggle_favorite("stain-cedar");
        assert!(!w.is_favorite("stain-cedar"));
    }

    #[test]
    fn test_confirm_requires_all_answers() {
        let mut w = wizard();
        assert!(w.confirm().is_none());

        w.answer("deck");
        w.answer("warm");
        assert_eq!(w.state(), WizardState::InProgress);
        assert!(w.confirm().is_none());

        w.answer("stain-cedar");
        assert_eq!(w.state(), WizardState::AwaitingConfirmation);

        let selection = w.confirm().expect("selection");
        assert_eq!(selection.customer_id, "cust-1");
        assert_eq!(selection.option_id, "stain-cedar");
        assert_eq!(w.state(), WizardState::Complete);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut w = wizard();
        w.toggle_favorite("stain-cedar");
        w.answer("deck");
        w.answer("warm");
        w.answer("stain-cedar");
        w.confirm().expect("selection");

        w.reset();
        assert_eq!(w.state(), WizardState::InProgress);
        assert_eq!(w.answer_at(0), None);
        assert!(w.favorites().is_empty());
    }
}
