//! Single-topic, bounded reason-act loop. A sub-researcher never sees
//! another sub-researcher's work or the supervisor's reflections, each
//! call carries a standalone topic and returns a compressed [`Note`], with
//! raw interactions discarded once compression runs.

use research_core::cost::{CostRecord, Usage};
use research_core::error::ResearchError;
use research_core::llm::{ChatClient, ChatMessage};
use research_core::model::{Note, Source};
use research_core::tool::ToolExecutor;
use research_core::wire::{self, parse_turn};
use std::sync::Arc;

/// Result of one sub-researcher invocation: the Note handed back to the
/// caller, plus its own cost so the caller can fold it into the session
/// total.
pub struct SubResearcherOutcome {
    pub note: Note,
    pub cost: CostRecord,
}

pub struct SubResearcher {
    chat: Arc<dyn ChatClient>,
    tools: Arc<dyn ToolExecutor>,
    max_searches: u32,
    pricing: research_core::cost::Pricing,
}

impl SubResearcher {
    pub fn new(chat: Arc<dyn ChatClient>, tools: Arc<dyn ToolExecutor>, max_searches: u32) -> Self {
        SubResearcher {
            chat,
            tools,
            max_searches: max_searches.max(1),
            pricing: default_pricing(),
        }
    }

    /// Runs the reason-act loop for `topic`, tagging events with
    /// researcher index `num`. Terminates with `Err` only on an LLM-call
    /// failure; tool errors are recorded as tool output and the loop
    /// continues.
    pub async fn run(&self, topic: &str, num: u32) -> Result<SubResearcherOutcome, ResearchError> {
        let mut interactions = vec![ChatMessage::user(topic.to_string())];
        let mut queries_issued = vec![topic.to_string()];
        let mut sources: Vec<Source> = Vec::new();
        let mut cost = CostRecord::zero();
        let mut final_text: Option<String> = None;

        for _iteration in 0..self.max_searches {
            let response = self
                .chat
                .chat(&interactions)
                .await
                .map_err(|e| ResearchError::llm(format!("sub-researcher {num}: {e}")))?;
            cost = cost
                + Usage::new(response.usage.input_tokens, response.usage.output_tokens)
                    .priced(&self.pricing);

            let content = response.content().to_string();
            interactions.push(ChatMessage::assistant(content.clone()));

            let turn = parse_turn(&content);
            if turn.has_tool_calls() {
                for call in &turn.tool_calls {
                    let result = self.tools.execute(&call.tool, &call.args).await;
                    if !result.is_err() {
                        queries_issued.push(format!("{}({:?})", call.tool, call.args));
                        for url in wire::extract_urls(&result.text) {
                            if !sources.iter().any(|s: &Source| s.url == url) {
                                sources.push(Source {
                                    url,
                                    title: call.tool.clone(),
                                });
                            }
                        }
                        interactions.push(ChatMessage::user(format!(
                            "Tool '{}' result: {}",
                            call.tool, result.text
                        )));
                    } else {
                        interactions.push(ChatMessage::user(format!(
                            "Tool '{}' error: {}",
                            call.tool,
                            result.error.unwrap_or_default()
                        )));
                    }
                }
                continue;
            }

            if let Some(answer) = turn.final_answer {
                final_text = Some(answer);
                break;
            }
            // Neither tool call nor final answer: continue up to the cap.
        }

        let (note, compression_cost) = self
            .compress(topic, &queries_issued, &sources, final_text.as_deref())
            .await?;
        cost = cost + compression_cost;

        Ok(SubResearcherOutcome { note, cost })
    }

    /// A dedicated LLM call that asks for a structured summary: the
    /// queries issued, synthesized findings with inline citation markers,
    /// and a deduplicated source list. Raw interactions never survive past
    /// this point.
    async fn compress(
        &self,
        topic: &str,
        queries_issued: &[String],
        sources: &[Source],
        draft_answer: Option<&str>,
    ) -> Result<(Note, CostRecord), ResearchError> {
        let prompt = format!(
            "Topic: {topic}\nQueries issued: {}\nDraft findings: {}\n\n\
             Produce a compressed summary of the findings with inline citation \
             markers like [1], [2], referencing the numbered sources below.\n\
             Sources:\n{}",
            queries_issued.join(", "),
            draft_answer.unwrap_or("(no final answer reached within the iteration cap)"),
            sources
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{}. {} - {}", i + 1, s.title, s.url))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let response = self
            .chat
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| ResearchError::llm(format!("compression call failed: {e}")))?;
        let cost = Usage::new(response.usage.input_tokens, response.usage.output_tokens)
            .priced(&self.pricing);

        let findings = response.content().to_string();
        let note = Note::new(topic, findings, sources.to_vec());
        Ok((note, cost))
    }
}

fn default_pricing() -> research_core::cost::Pricing {
    use rust_decimal::Decimal;
    research_core::cost::Pricing::new(Decimal::new(15, 2), Decimal::new(60, 2))
}
