//! Structural predicates, one per message shape.
//!
//! Each predicate is a full decode followed by a variant match, so a value is
//! accepted exactly when the typed decoder would accept it.

use serde_json::{Map, Value};
use tracing::warn;

use crate::messages::{MessageFromIframe, MessageKind, MessageToIframe};
use crate::{ProtocolError, ProtocolResult};

pub fn is_message_from_iframe(value: &Value) -> bool {
    MessageFromIframe::from_value(value).is_ok()
}

pub fn is_message_to_iframe(value: &Value) -> bool {
    MessageToIframe::from_value(value).is_ok()
}

pub fn is_current_state_message(value: &Value) -> bool {
    matches!(
        MessageFromIframe::from_value(value),
        Ok(MessageFromIframe::CurrentState(_))
    )
}

pub fn is_height_changed_message(value: &Value) -> bool {
    matches!(
        MessageFromIframe::from_value(value),
        Ok(MessageFromIframe::HeightChanged(_))
    )
}

pub fn is_open_link_message(value: &Value) -> bool {
    matches!(
        MessageFromIframe::from_value(value),
        Ok(MessageFromIframe::OpenLink(_))
    )
}

pub fn is_file_upload_message(value: &Value) -> bool {
    matches!(
        MessageFromIframe::from_value(value),
        Ok(MessageFromIframe::FileUpload(_))
    )
}

pub fn is_request_repository_exercises_message(value: &Value) -> bool {
    matches!(
        MessageFromIframe::from_value(value),
        Ok(MessageFromIframe::RequestRepositoryExercises)
    )
}

pub fn is_test_request_message(value: &Value) -> bool {
    matches!(
        MessageFromIframe::from_value(value),
        Ok(MessageFromIframe::TestRequest(_))
    )
}

pub fn is_set_language_message(value: &Value) -> bool {
    matches!(
        MessageToIframe::from_value(value),
        Ok(MessageToIframe::SetLanguage(_))
    )
}

pub fn is_set_state_message(value: &Value) -> bool {
    matches!(
        MessageToIframe::from_value(value),
        Ok(MessageToIframe::SetState(_))
    )
}

pub fn is_upload_result_message(value: &Value) -> bool {
    matches!(
        MessageToIframe::from_value(value),
        Ok(MessageToIframe::UploadResult(_))
    )
}

pub fn is_repository_exercises_message(value: &Value) -> bool {
    matches!(
        MessageToIframe::from_value(value),
        Ok(MessageToIframe::RepositoryExercises(_))
    )
}

pub fn is_test_results_message(value: &Value) -> bool {
    matches!(
        MessageToIframe::from_value(value),
        Ok(MessageToIframe::TestResults(_))
    )
}

/// Forgiving set-state check: only the object shape and the discriminator matter.
pub fn is_set_state_message_forgiving(value: &Value) -> bool {
    MessageKind::of(value) == Ok(MessageKind::SetState)
}

/// A host → iframe message as decoded on the iframe side.
#[derive(Debug, Clone, PartialEq)]
pub enum ToIframe {
    Known(MessageToIframe),
    /// A `set-state` whose shape this build does not know yet. The raw object
    /// is passed through untouched.
    ForwardCompatibleSetState(Map<String, Value>),
}

/// Decodes host → iframe traffic, accepting any `set-state` object so newer
/// hosts keep working against older iframes.
pub fn decode_to_iframe_lenient(value: &Value) -> ProtocolResult<ToIframe> {
    match MessageToIframe::from_value(value) {
        Ok(message) => Ok(ToIframe::Known(message)),
        Err(ProtocolError::Malformed {
            kind: MessageKind::SetState,
            reason,
        }) => {
            let object = value.as_object().cloned().unwrap_or_default();
            warn!(
                target: "exercise.proto",
                view_type = ?object.get("view_type"),
                reason = %reason,
                "accepting set-state with an unrecognised shape"
            );
            Ok(ToIframe::ForwardCompatibleSetState(object))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AnswerExerciseData, AnswerExerciseState, GradingProgress, IframeState,
        UploadResultMessage, UserInformation,
    };
    use serde_json::json;

    fn user() -> Value {
        json!({"pseudonymous_id": "p-1", "signed_in": true})
    }

    fn answer_exercise() -> Value {
        json!({
            "message": "set-state",
            "view_type": "answer-exercise",
            "exercise_task_id": "task-1",
            "user_information": user(),
            "data": {"public_spec": {"question": "2+2"}, "previous_submission": null}
        })
    }

    fn view_submission(grading: Value) -> Value {
        json!({
            "message": "set-state",
            "view_type": "view-submission",
            "exercise_task_id": "task-1",
            "user_information": user(),
            "user_variables": null,
            "data": {
                "grading": grading,
                "user_answer": {"answer": 4},
                "public_spec": {},
                "model_solution_spec": null
            }
        })
    }

    #[test]
    fn accepts_every_client_message_shape() {
        assert!(is_current_state_message(
            &json!({"message": "current-state", "data": {"a": 1}, "valid": true})
        ));
        assert!(is_height_changed_message(
            &json!({"message": "height-changed", "data": 320})
        ));
        assert!(is_open_link_message(
            &json!({"message": "open-link", "data": "https://example.com"})
        ));
        assert!(is_file_upload_message(
            &json!({"message": "file-upload", "files": {"a.txt": "hello"}})
        ));
        assert!(is_request_repository_exercises_message(
            &json!({"message": "request-repository-exercises"})
        ));
        assert!(is_test_request_message(&json!({
            "message": "test-request",
            "archiveDownloadUrl": null,
            "files": [{"filepath": "src/main.py", "contents": "print(1)"}]
        })));
    }

    #[test]
    fn accepts_every_host_message_shape() {
        assert!(is_set_language_message(
            &json!({"message": "set-language", "data": "fi"})
        ));
        assert!(is_set_state_message(&answer_exercise()));
        assert!(is_set_state_message(&view_submission(json!(null))));
        assert!(is_set_state_message(&view_submission(json!({
            "grading_progress": "FullyGraded",
            "score_given": 1,
            "score_maximum": 1.0,
            "feedback_text": null
        }))));
        assert!(is_set_state_message(&json!({
            "message": "set-state",
            "view_type": "exercise-editor",
            "exercise_task_id": "task-1",
            "user_information": user(),
            "data": {"private_spec": null}
        })));
        assert!(is_set_state_message(&json!({
            "message": "set-state",
            "view_type": "custom-view",
            "user_information": user(),
            "course_name": "Intro",
            "data": {"submissions_by_exercise": {}}
        })));
        assert!(is_upload_result_message(
            &json!({"message": "upload-result", "success": true, "urls": {"a": "https://cdn/a"}})
        ));
        assert!(is_upload_result_message(
            &json!({"message": "upload-result", "success": false, "error": "too large"})
        ));
        assert!(is_repository_exercises_message(
            &json!({"message": "repository-exercises", "repository_exercises": []})
        ));
        assert!(is_test_results_message(
            &json!({"message": "test-results", "test_result": {"status": "PASSED"}})
        ));
    }

    #[test]
    fn rejects_plausible_but_wrong_discriminators() {
        for tag in ["set_state", "Set-State", "set-state ", "setState", "ready"] {
            let mut value = answer_exercise();
            value["message"] = json!(tag);
            assert!(!is_set_state_message(&value), "{tag} accepted");
            assert!(!is_message_to_iframe(&value), "{tag} accepted");
        }
        assert_eq!(
            MessageKind::of(&json!({"message": "height_changed", "data": 1})),
            Err(ProtocolError::UnknownKind("height_changed".into()))
        );
    }

    #[test]
    fn rejects_missing_fields_and_wrong_primitive_types() {
        assert!(!is_height_changed_message(
            &json!({"message": "height-changed", "data": "320"})
        ));
        assert!(!is_current_state_message(
            &json!({"message": "current-state", "data": {}})
        ));
        assert!(!is_current_state_message(
            &json!({"message": "current-state", "data": {}, "valid": "yes"})
        ));
        assert!(!is_open_link_message(&json!({"message": "open-link"})));
        assert!(!is_set_language_message(
            &json!({"message": "set-language", "data": 7})
        ));
        assert!(!is_upload_result_message(
            &json!({"message": "upload-result", "success": true, "error": "x"})
        ));

        let mut no_user = answer_exercise();
        no_user.as_object_mut().unwrap().remove("user_information");
        assert!(!is_set_state_message(&no_user));

        let mut unknown_view = answer_exercise();
        unknown_view["view_type"] = json!("answer_exercise");
        assert!(!is_set_state_message(&unknown_view));
    }

    #[test]
    fn rejects_state_data_missing_a_required_key() {
        assert!(!is_current_state_message(
            &json!({"message": "current-state", "valid": true})
        ));
        assert!(is_current_state_message(
            &json!({"message": "current-state", "data": null, "valid": true})
        ));

        for key in ["public_spec", "previous_submission"] {
            let mut answer = answer_exercise();
            answer["data"].as_object_mut().unwrap().remove(key);
            assert!(!is_set_state_message(&answer), "answer-exercise without {key}");
        }
        for key in ["user_answer", "public_spec", "model_solution_spec"] {
            let mut submission = view_submission(json!(null));
            submission["data"].as_object_mut().unwrap().remove(key);
            assert!(!is_set_state_message(&submission), "view-submission without {key}");
        }
        assert!(!is_set_state_message(&json!({
            "message": "set-state",
            "view_type": "exercise-editor",
            "exercise_task_id": "task-1",
            "user_information": user(),
            "data": {}
        })));
        assert!(!is_set_state_message(&json!({
            "message": "set-state",
            "view_type": "custom-view",
            "user_information": user(),
            "course_name": "Intro",
            "data": {}
        })));
    }

    #[test]
    fn required_nullable_fields_must_be_present() {
        let mut missing_grading = view_submission(json!(null));
        missing_grading["data"]
            .as_object_mut()
            .unwrap()
            .remove("grading");
        assert!(!is_set_state_message(&missing_grading));

        let without_feedback = view_submission(json!({
            "grading_progress": "Pending",
            "score_given": 0,
            "score_maximum": 1
        }));
        assert!(!is_set_state_message(&without_feedback));

        assert!(!is_test_request_message(
            &json!({"message": "test-request", "files": []})
        ));
    }

    #[test]
    fn families_are_disjoint() {
        let set_language = json!({"message": "set-language", "data": "en"});
        assert!(!is_message_from_iframe(&set_language));
        assert_eq!(
            MessageFromIframe::from_value(&set_language),
            Err(ProtocolError::WrongFamily(MessageKind::SetLanguage))
        );
        assert_eq!(
            MessageToIframe::from_value(&json!("ready")),
            Err(ProtocolError::NotAnObject)
        );
        assert_eq!(
            MessageToIframe::from_value(&json!({"data": "en"})),
            Err(ProtocolError::MissingDiscriminator)
        );
    }

    #[test]
    fn set_state_encodes_flat_with_both_tags() {
        let state = IframeState::AnswerExercise(AnswerExerciseState {
            exercise_task_id: "task-1".into(),
            user_information: UserInformation {
                pseudonymous_id: "p-1".into(),
                signed_in: true,
            },
            user_variables: None,
            data: AnswerExerciseData {
                public_spec: json!({"question": "2+2"}),
                previous_submission: None,
            },
        });
        let encoded = MessageToIframe::SetState(state.clone())
            .to_value()
            .expect("encode");
        assert_eq!(encoded, answer_exercise());
        assert_eq!(
            MessageToIframe::from_value(&encoded),
            Ok(MessageToIframe::SetState(state))
        );
    }

    #[test]
    fn upload_result_decodes_by_success_flag() {
        let decoded = MessageToIframe::from_value(
            &json!({"message": "upload-result", "success": false, "error": "quota"}),
        )
        .expect("decode");
        assert_eq!(
            decoded,
            MessageToIframe::UploadResult(UploadResultMessage::Failure {
                error: "quota".into()
            })
        );
        let grading: crate::GradingSummary = serde_json::from_value(json!({
            "grading_progress": "PendingManual",
            "score_given": 0.5,
            "score_maximum": 1,
            "feedback_text": "ok"
        }))
        .expect("grading");
        assert_eq!(grading.grading_progress, GradingProgress::PendingManual);
    }

    #[test]
    fn lenient_decoding_passes_unknown_set_state_through() {
        let newer = json!({
            "message": "set-state",
            "view_type": "peer-review",
            "review_id": "r-1"
        });
        assert!(!is_set_state_message(&newer));
        assert!(is_set_state_message_forgiving(&newer));
        match decode_to_iframe_lenient(&newer).expect("lenient") {
            ToIframe::ForwardCompatibleSetState(object) => {
                assert_eq!(object.get("review_id"), Some(&json!("r-1")));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            decode_to_iframe_lenient(&answer_exercise()),
            Ok(ToIframe::Known(MessageToIframe::SetState(_)))
        ));
        assert!(matches!(
            decode_to_iframe_lenient(&json!({"message": "set-language"})),
            Err(ProtocolError::Malformed {
                kind: MessageKind::SetLanguage,
                ..
            })
        ));
    }
}
