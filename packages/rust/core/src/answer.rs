//! Conversational answers over the knowledge base.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use sitekb_shared::Result;

use crate::generation::{Generator, Role};
use crate::retrieval::{DocumentContext, RetrievalService};
use crate::sessions::ConversationStore;

/// Reply used when retrieval finds nothing.
pub const NO_RESULTS_REPLY: &str =
    "I could not find relevant information about that. Could you rephrase your question?";

const SYSTEM_PROMPT: &str = "You are the virtual assistant of the website whose pages make up \
     the knowledge base. The user is already on that website, so never tell them to visit it. \
     Answer only from the provided excerpts, in the language of the question, with short \
     sections. If the excerpts do not contain the answer, say so.";

/// Ties retrieval, generation, and per-session history together.
pub struct AnswerService {
    retrieval: Arc<RetrievalService>,
    generator: Arc<dyn Generator>,
    sessions: Arc<ConversationStore>,
    history_limit: usize,
}

impl AnswerService {
    pub fn new(
        retrieval: Arc<RetrievalService>,
        generator: Arc<dyn Generator>,
        sessions: Arc<ConversationStore>,
        history_limit: usize,
    ) -> Self {
        Self {
            retrieval,
            generator,
            sessions,
            history_limit,
        }
    }

    /// Answer `query` within a session. Pieces of the reply arrive on the
    /// returned receiver; the full reply is stored once the stream ends.
    #[instrument(skip(self))]
    pub async fn answer(&self, session_id: &str, query: &str) -> mpsc::Receiver<Result<String>> {
        let (tx, rx) = mpsc::channel(64);
        self.sessions.add(session_id, Role::User, query);

        let docs = match self.retrieval.context_for(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                self.reply_once(session_id, &tx, format!("Error retrieving context: {e}"))
                    .await;
                return rx;
            }
        };
        if docs.is_empty() {
            info!("no relevant documents");
            self.reply_once(session_id, &tx, NO_RESULTS_REPLY.to_string())
                .await;
            return rx;
        }

        let mut history = self.sessions.history(session_id, self.history_limit + 1);
        history.pop();

        let context_text = format_context(&docs);
        let mut stream = match self
            .generator
            .generate(SYSTEM_PROMPT, &context_text, &history, query)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "generation failed to start");
                self.reply_once(session_id, &tx, format!("\n\nError generating answer: {e}"))
                    .await;
                return rx;
            }
        };

        let sessions = Arc::clone(&self.sessions);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut reply = String::new();
            while let Some(piece) = stream.recv().await {
                let (text, failed) = match piece {
                    Ok(text) => (text, false),
                    Err(e) => (format!("\n\nError generating answer: {e}"), true),
                };
                reply.push_str(&text);
                if tx.send(Ok(text)).await.is_err() || failed {
                    break;
                }
            }
            sessions.add(&session_id, Role::Assistant, reply);
        });

        rx
    }

    async fn reply_once(&self, session_id: &str, tx: &mpsc::Sender<Result<String>>, text: String) {
        self.sessions.add(session_id, Role::Assistant, text.clone());
        let _ = tx.send(Ok(text)).await;
    }
}

/// Render ranked documents as the context block of the prompt.
pub fn format_context(docs: &[DocumentContext]) -> String {
    docs.iter()
        .map(|doc| {
            let title = doc.title.as_deref().unwrap_or(&doc.url);
            format!("=== DOCUMENT: {title} (URL: {}) ===\n{}", doc.url, doc.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
