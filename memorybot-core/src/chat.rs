//! Retrieval-augmented multimodal chat turns.

use std::fmt;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::{ChatConfig, SearchConfig};
use crate::context::{ChatSession, build_context};
use crate::fusion::{FusionError, Query, QueryFuser, QueryWeights};
use crate::provider::{Provider, ProviderError, collect_text};
use crate::store::ScoredRecord;
use crate::types::{ConversationTurn, Message};

const CONTEXT_PREFIX: &str = "Context information for answering the question: ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    /// Neither text nor image was given; nothing was searched or recorded.
    NoQuery,
    /// Retrieval failed and the reply was generated without context.
    Degraded { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub retrieved_context: String,
    pub results: Vec<ScoredRecord>,
    pub status: ReplyStatus,
}

#[derive(Debug)]
pub enum ChatError {
    /// The chat model could not produce a reply.
    ExternalService(ProviderError),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalService(e) => write!(f, "chat model failed: {e}"),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<ProviderError> for ChatError {
    fn from(e: ProviderError) -> Self {
        Self::ExternalService(e)
    }
}

/// One chat turn's collaborators, borrowed for the duration of a request.
pub struct MultimodalChat<'a, P> {
    pub fuser: &'a QueryFuser,
    pub provider: &'a P,
    pub chat: &'a ChatConfig,
    pub search: &'a SearchConfig,
}

impl<P: Provider> MultimodalChat<'_, P> {
    /// Retrieve context for the query, record the user turn, ask the model,
    /// and record its answer.
    ///
    /// A provider failure leaves the user turn in the history.
    pub async fn process_message(
        &self,
        session: &mut ChatSession,
        text: Option<&str>,
        image: Option<&Path>,
        weights: QueryWeights,
    ) -> Result<ChatReply, ChatError> {
        let query = Query::new(text, image);
        if query.is_empty() {
            return Ok(ChatReply {
                response: FusionError::NoQueryProvided.to_string(),
                retrieved_context: String::new(),
                results: Vec::new(),
                status: ReplyStatus::NoQuery,
            });
        }

        let (results, status) =
            match self
                .fuser
                .search(query, self.search.top_k, weights, self.search.strategy)
            {
                Ok(result) => (result.hits, ReplyStatus::Ok),
                Err(e) => {
                    warn!("retrieval failed for session {}: {e}", session.id());
                    (
                        Vec::new(),
                        ReplyStatus::Degraded {
                            message: format!("Search is unavailable: {e}"),
                        },
                    )
                }
            };
        let context = build_context(&results);

        let user_text = query.text.unwrap_or(self.chat.fallback_prompt.as_str());
        let turn = match query.image {
            Some(path) => ConversationTurn::user_text_with_image(user_text, path.display().to_string()),
            None => ConversationTurn::user_text(user_text),
        };
        session.append_turn(turn);

        let mut messages: Vec<Message> = session.history().iter().map(Message::from).collect();
        if !context.is_empty() {
            messages.push(Message::system(format!("{CONTEXT_PREFIX}{context}")));
        }

        let stream = self.provider.complete(messages).await?;
        let response = collect_text(stream).await?;
        session.append_turn(ConversationTurn::assistant_text(response.clone()));

        Ok(ChatReply {
            response,
            retrieved_context: context,
            results,
            status,
        })
    }
}
