use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{required_nullable, IframeState, RepositoryExercise};
use crate::{ProtocolError, ProtocolResult, DISCRIMINATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    FromIframe,
    ToIframe,
}

/// Every discriminator value the protocol knows, across both families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    CurrentState,
    HeightChanged,
    OpenLink,
    FileUpload,
    RequestRepositoryExercises,
    TestRequest,
    SetLanguage,
    SetState,
    UploadResult,
    RepositoryExercises,
    TestResults,
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        MessageKind::CurrentState,
        MessageKind::HeightChanged,
        MessageKind::OpenLink,
        MessageKind::FileUpload,
        MessageKind::RequestRepositoryExercises,
        MessageKind::TestRequest,
        MessageKind::SetLanguage,
        MessageKind::SetState,
        MessageKind::UploadResult,
        MessageKind::RepositoryExercises,
        MessageKind::TestResults,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::CurrentState => "current-state",
            MessageKind::HeightChanged => "height-changed",
            MessageKind::OpenLink => "open-link",
            MessageKind::FileUpload => "file-upload",
            MessageKind::RequestRepositoryExercises => "request-repository-exercises",
            MessageKind::TestRequest => "test-request",
            MessageKind::SetLanguage => "set-language",
            MessageKind::SetState => "set-state",
            MessageKind::UploadResult => "upload-result",
            MessageKind::RepositoryExercises => "repository-exercises",
            MessageKind::TestResults => "test-results",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    pub fn direction(self) -> Direction {
        match self {
            MessageKind::CurrentState
            | MessageKind::HeightChanged
            | MessageKind::OpenLink
            | MessageKind::FileUpload
            | MessageKind::RequestRepositoryExercises
            | MessageKind::TestRequest => Direction::FromIframe,
            MessageKind::SetLanguage
            | MessageKind::SetState
            | MessageKind::UploadResult
            | MessageKind::RepositoryExercises
            | MessageKind::TestResults => Direction::ToIframe,
        }
    }

    /// Reads the discriminator of a raw payload.
    pub fn of(value: &Value) -> ProtocolResult<Self> {
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
        let tag = object
            .get(DISCRIMINATOR)
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingDiscriminator)?;
        Self::parse(tag).ok_or_else(|| ProtocolError::UnknownKind(tag.to_string()))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStateMessage {
    pub data: Value,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightChangedMessage {
    pub data: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLinkMessage {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadMessage {
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequestFile {
    pub filepath: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequestMessage {
    #[serde(rename = "archiveDownloadUrl", deserialize_with = "required_nullable")]
    pub archive_download_url: Option<String>,
    pub files: Vec<TestRequestFile>,
}

/// Iframe → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "kebab-case")]
pub enum MessageFromIframe {
    CurrentState(CurrentStateMessage),
    HeightChanged(HeightChangedMessage),
    OpenLink(OpenLinkMessage),
    FileUpload(FileUploadMessage),
    RequestRepositoryExercises,
    TestRequest(TestRequestMessage),
}

impl MessageFromIframe {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageFromIframe::CurrentState(_) => MessageKind::CurrentState,
            MessageFromIframe::HeightChanged(_) => MessageKind::HeightChanged,
            MessageFromIframe::OpenLink(_) => MessageKind::OpenLink,
            MessageFromIframe::FileUpload(_) => MessageKind::FileUpload,
            MessageFromIframe::RequestRepositoryExercises => {
                MessageKind::RequestRepositoryExercises
            }
            MessageFromIframe::TestRequest(_) => MessageKind::TestRequest,
        }
    }

    /// Strict decode: the whole payload must match its kind's shape.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        decode(value, Direction::FromIframe)
    }

    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self, self.kind())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLanguageMessage {
    pub data: String,
}

/// Outcome of a `file-upload` request, discriminated by the `success` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawUploadResult", into = "RawUploadResult")]
pub enum UploadResultMessage {
    Success { urls: BTreeMap<String, String> },
    Failure { error: String },
}

#[derive(Serialize, Deserialize)]
struct RawUploadResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    urls: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TryFrom<RawUploadResult> for UploadResultMessage {
    type Error = String;

    fn try_from(raw: RawUploadResult) -> Result<Self, Self::Error> {
        match (raw.success, raw.urls, raw.error) {
            (true, Some(urls), _) => Ok(UploadResultMessage::Success { urls }),
            (true, None, _) => Err("successful upload-result without urls".into()),
            (false, _, Some(error)) => Ok(UploadResultMessage::Failure { error }),
            (false, _, None) => Err("failed upload-result without error".into()),
        }
    }
}

impl From<UploadResultMessage> for RawUploadResult {
    fn from(message: UploadResultMessage) -> Self {
        match message {
            UploadResultMessage::Success { urls } => RawUploadResult {
                success: true,
                urls: Some(urls),
                error: None,
            },
            UploadResultMessage::Failure { error } => RawUploadResult {
                success: false,
                urls: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryExercisesMessage {
    pub repository_exercises: Vec<RepositoryExercise>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultsMessage {
    pub test_result: Value,
}

/// Host → iframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "kebab-case")]
pub enum MessageToIframe {
    SetLanguage(SetLanguageMessage),
    SetState(IframeState),
    UploadResult(UploadResultMessage),
    RepositoryExercises(RepositoryExercisesMessage),
    TestResults(TestResultsMessage),
}

impl MessageToIframe {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageToIframe::SetLanguage(_) => MessageKind::SetLanguage,
            MessageToIframe::SetState(_) => MessageKind::SetState,
            MessageToIframe::UploadResult(_) => MessageKind::UploadResult,
            MessageToIframe::RepositoryExercises(_) => MessageKind::RepositoryExercises,
            MessageToIframe::TestResults(_) => MessageKind::TestResults,
        }
    }

    pub fn set_language(language: impl Into<String>) -> Self {
        MessageToIframe::SetLanguage(SetLanguageMessage {
            data: language.into(),
        })
    }

    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        decode(value, Direction::ToIframe)
    }

    pub fn to_value(&self) -> ProtocolResult<Value> {
        encode(self, self.kind())
    }
}

fn decode<'de, T>(value: &'de Value, direction: Direction) -> ProtocolResult<T>
where
    T: Deserialize<'de>,
{
    let kind = MessageKind::of(value)?;
    if kind.direction() != direction {
        return Err(ProtocolError::WrongFamily(kind));
    }
    T::deserialize(value).map_err(|err| ProtocolError::Malformed {
        kind,
        reason: err.to_string(),
    })
}

fn encode<T: Serialize>(message: &T, kind: MessageKind) -> ProtocolResult<Value> {
    serde_json::to_value(message).map_err(|err| ProtocolError::Encode {
        kind,
        reason: err.to_string(),
    })
}
