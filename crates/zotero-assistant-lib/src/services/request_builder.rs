// Request builder
// Turns a chat message and the current settings into an agent run request.

use std::collections::HashSet;

use super::credentials::CredentialStore;
use crate::error::{AssistantError, AssistantResult};
use crate::models::request::{
    AgentRunRequest, AppView, MessageAttachment, ModelSelection, SendMessageRequest, UserPrompt,
    CHAT_REQUEST_TYPE,
};
use crate::models::settings::AssistantSettings;

/// Per-run request options that do not come from the message
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub thread_id: Option<String>,
    /// Run being regenerated
    pub retry_run_id: Option<String>,
}

/// Drop duplicate attachments, keeping the first of each (library_id, key)
pub fn dedupe_attachments(attachments: &[MessageAttachment]) -> Vec<MessageAttachment> {
    let mut seen = HashSet::new();
    attachments
        .iter()
        .filter(|a| seen.insert((a.library_id, a.zotero_key.clone())))
        .cloned()
        .collect()
}

/// Prompt for a user message. The document open in the reader is attached
/// as a source unless the user already attached it.
pub fn build_prompt(message: &SendMessageRequest) -> UserPrompt {
    let mut attachments = message.attachments.clone();

    let state = &message.application_state;
    if state.current_view == AppView::FileReader {
        if let Some(reader) = &state.reader_state {
            attachments.push(MessageAttachment::source(&reader.reference()));
        }
    }

    UserPrompt {
        content: message.content.trim().to_string(),
        attachments: dedupe_attachments(&attachments),
        application_state: message.application_state.clone(),
        filters: message.filters.clone(),
        tool_requests: message.tool_requests.clone(),
        is_resume: false,
        resumes_run_id: None,
    }
}

/// Empty prompt continuing an interrupted run
pub fn build_resume_prompt(resumes_run_id: &str, previous: &UserPrompt) -> UserPrompt {
    UserPrompt {
        content: String::new(),
        attachments: Vec::new(),
        application_state: previous.application_state.clone(),
        filters: previous.filters.clone(),
        tool_requests: Vec::new(),
        is_resume: true,
        resumes_run_id: Some(resumes_run_id.to_string()),
    }
}

/// Build the outbound request for `run_id`.
///
/// Fails with `Preparation` before anything touches the network when no
/// user or model is configured or a bring-your-own key is missing.
pub async fn build_request(
    run_id: &str,
    prompt: UserPrompt,
    settings: &AssistantSettings,
    options: RunOptions,
    credentials: &dyn CredentialStore,
) -> AssistantResult<AgentRunRequest> {
    if settings.user_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        return Err(AssistantError::Preparation("User is not signed in".to_string()));
    }
    if prompt.content.is_empty() && !prompt.is_resume {
        return Err(AssistantError::Preparation("Message is empty".to_string()));
    }

    let selection = settings
        .selected_model
        .as_ref()
        .ok_or_else(|| AssistantError::Preparation("No model selected".to_string()))?;

    let mut request = AgentRunRequest {
        request_type: CHAT_REQUEST_TYPE.to_string(),
        run_id: run_id.to_string(),
        thread_id: options.thread_id,
        user_prompt: prompt,
        access_id: None,
        custom_model: None,
        api_key: None,
        retry_run_id: options.retry_run_id,
        custom_instructions: settings.instructions(),
    };

    match selection {
        ModelSelection::AppKey { access_id, .. } => {
            request.access_id = Some(access_id.clone());
        }
        ModelSelection::Byok {
            access_id, provider, ..
        } => {
            let key = credentials
                .api_key(provider)
                .await?
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    AssistantError::Preparation(format!("No API key configured for {}", provider))
                })?;
            request.access_id = Some(access_id.clone());
            request.api_key = Some(key);
        }
        ModelSelection::Custom(custom) => {
            if custom.api_key.trim().is_empty() {
                return Err(AssistantError::Preparation(format!(
                    "Custom model {} has no API key",
                    custom.name
                )));
            }
            request.custom_model = Some(custom.clone());
        }
    }

    log::debug!(
        "Built request for run {} (model {}, {} attachments)",
        run_id,
        selection.model_name(),
        request.user_prompt.attachments.len()
    );
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::ItemReference;
    use crate::models::request::{ApplicationState, CustomModel, ModelProvider, ReaderState};
    use crate::testing::FakeCredentials;

    fn settings(selection: ModelSelection) -> AssistantSettings {
        AssistantSettings {
            user_id: Some("user-1".to_string()),
            selected_model: Some(selection),
            custom_instructions: Some("  Be brief ".to_string()),
            ..AssistantSettings::default()
        }
    }

    fn app_key() -> ModelSelection {
        ModelSelection::AppKey {
            access_id: "acc-1".to_string(),
            model_name: "gpt-4.1".to_string(),
        }
    }

    fn reader_message() -> SendMessageRequest {
        let mut message = SendMessageRequest::new("  What is this about? ");
        message.attachments = vec![
            MessageAttachment::source(&ItemReference::new(1, "AAAA")),
            MessageAttachment::source(&ItemReference::new(1, "BBBB")),
            MessageAttachment::source(&ItemReference::new(1, "AAAA")),
        ];
        message.application_state = ApplicationState {
            current_view: AppView::FileReader,
            reader_state: Some(ReaderState {
                library_id: 1,
                zotero_key: "BBBB".to_string(),
                current_page: Some(2),
                text_selection: None,
            }),
        };
        message
    }

    #[test]
    fn test_prompt_dedupes_attachments_with_reader_document() {
        let prompt = build_prompt(&reader_message());
        let keys: Vec<&str> = prompt.attachments.iter().map(|a| a.zotero_key.as_str()).collect();
        assert_eq!(keys, vec!["AAAA", "BBBB"]);
        assert_eq!(prompt.content, "What is this about?");
        assert!(!prompt.is_resume);
    }

    #[test]
    fn test_library_view_does_not_attach_reader() {
        let mut message = SendMessageRequest::new("hi");
        message.application_state.reader_state = Some(ReaderState {
            library_id: 1,
            zotero_key: "CCCC".to_string(),
            current_page: None,
            text_selection: None,
        });
        assert!(build_prompt(&message).attachments.is_empty());
    }

    #[tokio::test]
    async fn test_app_key_sends_access_id_only() {
        let request = build_request(
            "r1",
            build_prompt(&SendMessageRequest::new("hi")),
            &settings(app_key()),
            RunOptions {
                thread_id: Some("t1".to_string()),
                retry_run_id: None,
            },
            &FakeCredentials::default(),
        )
        .await
        .unwrap();

        assert_eq!(request.request_type, "chat");
        assert_eq!(request.access_id.as_deref(), Some("acc-1"));
        assert!(request.api_key.is_none());
        assert!(request.custom_model.is_none());
        assert_eq!(request.custom_instructions.as_deref(), Some("Be brief"));
        assert_eq!(request.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_byok_reads_provider_key() {
        let selection = ModelSelection::Byok {
            access_id: "acc-2".to_string(),
            model_name: "claude".to_string(),
            provider: ModelProvider::Anthropic,
        };
        let credentials = FakeCredentials::with_key(ModelProvider::Anthropic, "sk-ant");

        let request = build_request(
            "r1",
            build_prompt(&SendMessageRequest::new("hi")),
            &settings(selection.clone()),
            RunOptions::default(),
            &credentials,
        )
        .await
        .unwrap();
        assert_eq!(request.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(request.access_id.as_deref(), Some("acc-2"));

        let err = build_request(
            "r2",
            build_prompt(&SendMessageRequest::new("hi")),
            &settings(selection),
            RunOptions::default(),
            &FakeCredentials::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AssistantError::Preparation(_)));
    }

    #[tokio::test]
    async fn test_custom_model_inline() {
        let selection = ModelSelection::Custom(CustomModel {
            provider: ModelProvider::OpenAI,
            name: "local-llm".to_string(),
            api_base: Some("http://localhost:1234/v1".to_string()),
            api_key: "sk-local".to_string(),
        });
        let request = build_request(
            "r1",
            build_prompt(&SendMessageRequest::new("hi")),
            &settings(selection),
            RunOptions::default(),
            &FakeCredentials::default(),
        )
        .await
        .unwrap();

        assert!(request.access_id.is_none());
        assert_eq!(request.custom_model.unwrap().api_key, "sk-local");
    }

    #[tokio::test]
    async fn test_preparation_failures() {
        let mut no_user = settings(app_key());
        no_user.user_id = None;
        let err = build_request(
            "r1",
            build_prompt(&SendMessageRequest::new("hi")),
            &no_user,
            RunOptions::default(),
            &FakeCredentials::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AssistantError::Preparation(_)));

        let mut no_model = settings(app_key());
        no_model.selected_model = None;
        assert!(build_request(
            "r1",
            build_prompt(&SendMessageRequest::new("hi")),
            &no_model,
            RunOptions::default(),
            &FakeCredentials::default(),
        )
        .await
        .is_err());

        assert!(build_request(
            "r1",
            build_prompt(&SendMessageRequest::new("   ")),
            &settings(app_key()),
            RunOptions::default(),
            &FakeCredentials::default(),
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_resume_prompt_may_be_empty() {
        let prompt = build_resume_prompt("r0", &UserPrompt::default());
        let request = build_request(
            "r1",
            prompt,
            &settings(app_key()),
            RunOptions::default(),
            &FakeCredentials::default(),
        )
        .await
        .unwrap();
        assert!(request.user_prompt.is_resume);
        assert_eq!(request.user_prompt.resumes_run_id.as_deref(), Some("r0"));
        assert!(request.user_prompt.content.is_empty());
    }
}
