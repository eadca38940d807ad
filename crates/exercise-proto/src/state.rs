use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

/// Per-user variables an exercise service stored through earlier gradings.
pub type UserVariablesMap = BTreeMap<String, Value>;

/// A field that must be present but may be `null`. Without this, serde treats
/// a missing `Option` as `None`.
pub(crate) fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInformation {
    pub pseudonymous_id: String,
    pub signed_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryExercise {
    pub id: String,
    pub repository_id: String,
    pub part: String,
    pub name: String,
    pub repository_url: String,
    pub checksum: Vec<u8>,
    pub download_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradingProgress {
    Failed,
    NotReady,
    PendingManual,
    Pending,
    FullyGraded,
}

/// Grading outcome shown next to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingSummary {
    pub grading_progress: GradingProgress,
    pub score_given: f64,
    pub score_maximum: f64,
    #[serde(deserialize_with = "required_nullable")]
    pub feedback_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_user_variables: Option<UserVariablesMap>,
}

/// What the host wants the iframe to render, selected by `view_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view_type", rename_all = "kebab-case")]
pub enum IframeState {
    AnswerExercise(AnswerExerciseState),
    ViewSubmission(ViewSubmissionState),
    ExerciseEditor(ExerciseEditorState),
    CustomView(CustomViewState),
}

impl IframeState {
    pub fn view_type(&self) -> &'static str {
        match self {
            IframeState::AnswerExercise(_) => "answer-exercise",
            IframeState::ViewSubmission(_) => "view-submission",
            IframeState::ExerciseEditor(_) => "exercise-editor",
            IframeState::CustomView(_) => "custom-view",
        }
    }

    pub fn exercise_task_id(&self) -> Option<&str> {
        match self {
            IframeState::AnswerExercise(state) => Some(&state.exercise_task_id),
            IframeState::ViewSubmission(state) => Some(&state.exercise_task_id),
            IframeState::ExerciseEditor(state) => Some(&state.exercise_task_id),
            IframeState::CustomView(_) => None,
        }
    }

    /// Structural equality on the wire form, with numbers compared by value:
    /// a spec holding `1` equals one holding `1.0`.
    pub fn equivalent(&self, other: &IframeState) -> bool {
        if self == other {
            return true;
        }
        match (serde_json::to_value(self), serde_json::to_value(other)) {
            (Ok(a), Ok(b)) => json_equivalent(&a, &b),
            _ => false,
        }
    }

    pub fn user_information(&self) -> &UserInformation {
        match self {
            IframeState::AnswerExercise(state) => &state.user_information,
            IframeState::ViewSubmission(state) => &state.user_information,
            IframeState::ExerciseEditor(state) => &state.user_information,
            IframeState::CustomView(state) => &state.user_information,
        }
    }
}

/// Deep JSON equality where integers and floats of the same value match.
pub fn json_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equivalent(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_equivalent(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, x)| y.get(key).is_some_and(|y| json_equivalent(x, y)))
        }
        _ => a == b,
    }
}

fn numbers_equivalent(x: &Number, y: &Number) -> bool {
    if x.is_f64() || y.is_f64() {
        x.as_f64() == y.as_f64()
    } else {
        x == y
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerExerciseState {
    pub exercise_task_id: String,
    pub user_information: UserInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_variables: Option<UserVariablesMap>,
    pub data: AnswerExerciseData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerExerciseData {
    pub public_spec: Value,
    #[serde(deserialize_with = "required_nullable")]
    pub previous_submission: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSubmissionState {
    pub exercise_task_id: String,
    pub user_information: UserInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_variables: Option<UserVariablesMap>,
    pub data: ViewSubmissionData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSubmissionData {
    #[serde(deserialize_with = "required_nullable")]
    pub grading: Option<GradingSummary>,
    pub user_answer: Value,
    pub public_spec: Value,
    pub model_solution_spec: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseEditorState {
    pub exercise_task_id: String,
    pub user_information: UserInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_exercises: Option<Vec<RepositoryExercise>>,
    pub data: ExerciseEditorData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseEditorData {
    pub private_spec: Value,
}

/// Course-wide view rendered by a service outside any single exercise task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomViewState {
    pub user_information: UserInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_variables: Option<UserVariablesMap>,
    pub course_name: String,
    pub data: CustomViewData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomViewData {
    pub submissions_by_exercise: Value,
}
