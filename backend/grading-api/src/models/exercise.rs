use serde::{Deserialize, Serialize};

use crate::ielts::IeltsVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillType {
    Listening,
    Reading,
    Writing,
    Speaking,
}

impl SkillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillType::Listening => "listening",
            SkillType::Reading => "reading",
            SkillType::Writing => "writing",
            SkillType::Speaking => "speaking",
        }
    }

    /// Listening and Reading are graded against an answer key and converted
    /// through a raw-score table.
    pub fn has_raw_score_table(&self) -> bool {
        matches!(self, SkillType::Listening | SkillType::Reading)
    }
}

impl std::fmt::Display for SkillType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseType {
    Practice,
    MockTest,
    FullTest,
    MiniTest,
}

impl ExerciseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseType::Practice => "practice",
            ExerciseType::MockTest => "mock_test",
            ExerciseType::FullTest => "full_test",
            ExerciseType::MiniTest => "mini_test",
        }
    }
}

/// Read-only view of an exercise as the grading core needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub exercise_type: ExerciseType,
    pub skill_type: SkillType,
    /// Reading only: `academic` or `general_training` (aliases accepted).
    #[serde(default)]
    pub ielts_test_type: Option<String>,
    #[serde(default)]
    pub total_questions: i32,
    #[serde(default)]
    pub writing_task_type: Option<String>,
    #[serde(default)]
    pub writing_prompt_text: Option<String>,
    #[serde(default)]
    pub speaking_part_number: Option<i32>,
    #[serde(default)]
    pub speaking_prompt_text: Option<String>,
}

impl Exercise {
    /// Full and mock tests produce official results; everything else is practice.
    pub fn is_official_test(&self) -> bool {
        matches!(
            self.exercise_type,
            ExerciseType::FullTest | ExerciseType::MockTest
        )
    }

    pub fn requires_ai_evaluation(&self) -> bool {
        !self.skill_type.has_raw_score_table()
    }

    /// Variant used for Reading conversion; `None` for the other skills.
    pub fn reading_variant(&self) -> Option<IeltsVariant> {
        match self.skill_type {
            SkillType::Reading => Some(
                self.ielts_test_type
                    .as_deref()
                    .map(IeltsVariant::normalize)
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }
}
