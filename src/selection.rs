use serde::{Deserialize, Serialize};

use crate::models::Shift;

/// Which of the three visitor screens is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    ShiftPicker,
    GradeSectionPicker,
    Schedule,
}

/// The visitor's current choice. The flow is cyclic: every state can go back
/// to shift selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub shift: Option<Shift>,
    pub grade_id: Option<String>,
    pub section_id: Option<String>,
    pub grade_name: Option<String>,
    pub section_name: Option<String>,
    pub show_schedule: bool,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_shift(&mut self, shift: Shift) {
        *self = Self {
            shift: Some(shift),
            ..Self::default()
        };
    }

    pub fn select_grade_section(
        &mut self,
        grade_id: &str,
        section_id: &str,
        grade_name: &str,
        section_name: &str,
    ) {
        self.grade_id = Some(grade_id.to_string());
        self.section_id = Some(section_id.to_string());
        self.grade_name = Some(grade_name.to_string());
        self.section_name = Some(section_name.to_string());
        self.show_schedule = true;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn back_from_schedule(&mut self) {
        self.show_schedule = false;
    }

    pub fn view(&self) -> View {
        match self.shift {
            None => View::ShiftPicker,
            Some(_) if self.show_schedule && self.grade_id.is_some() && self.section_id.is_some() => {
                View::Schedule
            }
            Some(_) => View::GradeSectionPicker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_shows_shift_picker() {
        let selection = Selection::new();
        assert_eq!(selection.view(), View::ShiftPicker);
        assert!(!selection.show_schedule);
    }

    #[test]
    fn test_full_flow_and_back() {
        let mut selection = Selection::new();
        selection.select_shift(Shift::B);
        assert_eq!(selection.view(), View::GradeSectionPicker);

        selection.select_grade_section("g1", "s1", "الأول", "أ");
        assert_eq!(selection.view(), View::Schedule);

        selection.back_from_schedule();
        assert_eq!(selection.view(), View::GradeSectionPicker);
        assert_eq!(selection.grade_id.as_deref(), Some("g1"));
        assert_eq!(selection.shift, Some(Shift::B));
    }

    #[test]
    fn test_switching_shift_clears_the_choice() {
        let mut selection = Selection::new();
        selection.select_shift(Shift::A);
        selection.select_grade_section("g1", "s1", "الأول", "أ");
        selection.select_shift(Shift::B);
        selection.select_shift(Shift::A);

        assert_eq!(
            selection,
            Selection {
                shift: Some(Shift::A),
                ..Selection::default()
            }
        );
    }

    #[test]
    fn test_reset_from_schedule() {
        let mut selection = Selection::new();
        selection.select_shift(Shift::A);
        selection.select_grade_section("g1", "s1", "الأول", "أ");

        selection.reset();

        assert_eq!(selection, Selection::default());
        assert_eq!(selection.view(), View::ShiftPicker);
    }
}
