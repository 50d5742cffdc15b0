//! Multi-level context manager: keeps a long interaction history inside a
//! token budget through folding, a FIFO working-memory window plus N
//! coarsening levels of `Summary`.
//!
//! Folding is two LLM calls away from the public API: `decide_folding` asks
//! the model what kind of fold to run (or none), and `fold` asks it to
//! actually produce the summary text. Both are billed into the manager's
//! own `CostRecord` rather than any caller's.

use chrono::Utc;
use research_core::cost::{CostRecord, Usage};
use research_core::error::ResearchError;
use research_core::llm::{ChatClient, ChatMessage};
use research_core::model::{Interaction, Summary, ToolSummary};
use research_core::tokens::TokenEstimator;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// What `decide_folding` chose to do.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldDirective {
    None,
    Granular,
    Deep { target_level: usize },
}

pub struct ContextManager {
    summary_levels: usize,
    working_memory_size: usize,
    max_tokens: usize,
    fold_threshold: f64,

    working_memory: VecDeque<Interaction>,
    summaries: Vec<Vec<Summary>>,
    tool_memory: HashMap<String, ToolSummary>,
    turn_counter: u64,
    current_tokens: usize,
    cost: CostRecord,

    estimator: Arc<dyn TokenEstimator>,
}

impl ContextManager {
    pub fn new(
        summary_levels: usize,
        working_memory_size: usize,
        max_tokens: usize,
        fold_threshold: f64,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        ContextManager {
            summary_levels: summary_levels.max(1),
            working_memory_size: working_memory_size.max(1),
            max_tokens,
            fold_threshold,
            working_memory: VecDeque::new(),
            summaries: vec![Vec::new(); summary_levels.max(1)],
            tool_memory: HashMap::new(),
            turn_counter: 0,
            current_tokens: 0,
            cost: CostRecord::zero(),
            estimator,
        }
    }

    pub fn from_config(config: &research_core::config::EngineConfig) -> Self {
        ContextManager::new(
            config.summary_levels,
            config.working_memory_size,
            config.max_tokens,
            config.fold_threshold,
            Arc::new(research_core::tokens::CharDiv4Estimator),
        )
    }

    pub fn current_tokens(&self) -> usize {
        self.current_tokens
    }

    pub fn cost(&self) -> &CostRecord {
        &self.cost
    }

    pub fn working_memory(&self) -> &VecDeque<Interaction> {
        &self.working_memory
    }

    pub fn summaries(&self) -> &[Vec<Summary>] {
        &self.summaries
    }

    /// Pushes a turn into working memory, FIFO-evicting the oldest entry
    /// once `working_memory_size` is exceeded, and recomputes the token
    /// count over the full manager state.
    pub fn add_interaction(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.turn_counter += 1;
        let content = content.into();
        let token_count = self.estimator.estimate(&content);
        self.working_memory.push_back(Interaction {
            role: role.into(),
            content,
            token_count,
            turn_num: self.turn_counter,
            timestamp: Utc::now(),
        });
        while self.working_memory.len() > self.working_memory_size {
            self.working_memory.pop_front();
        }
        self.recompute_tokens();
    }

    /// Records a tool call result: increments the call count, overwrites
    /// the last-result snapshot, and union-merges findings by exact string.
    pub fn add_tool_result(
        &mut self,
        tool: impl Into<String>,
        result: impl Into<String>,
        findings: Vec<String>,
    ) {
        let tool = tool.into();
        let entry = self.tool_memory.entry(tool.clone()).or_insert_with(|| ToolSummary {
            tool: tool.clone(),
            call_count: 0,
            last_result: None,
            key_findings: Vec::new(),
        });
        entry.call_count += 1;
        entry.last_result = Some(result.into());
        for finding in findings {
            if !entry.key_findings.contains(&finding) {
                entry.key_findings.push(finding);
            }
        }
        self.recompute_tokens();
    }

    pub fn should_fold(&self) -> bool {
        self.max_tokens > 0
            && (self.current_tokens as f64) >= (self.max_tokens as f64) * self.fold_threshold
    }

    /// Consults the model for a fold directive. An unparseable response
    /// defaults to `Granular` at level 0 rather than failing the caller.
    pub async fn decide_folding(
        &mut self,
        chat: &dyn ChatClient,
    ) -> Result<FoldDirective, ResearchError> {
        let prompt = format!(
            "The working context is at {} of {} tokens (threshold {:.0}%). \
             Decide how to fold it. Respond with exactly one JSON object: \
             {{\"type\": \"NONE\"|\"GRANULAR\"|\"DEEP\", \"target_level\": <int>, \"rationale\": \"...\"}}",
            self.current_tokens,
            self.max_tokens,
            self.fold_threshold * 100.0,
        );
        let response = chat
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| ResearchError::llm(e.to_string()))?;
        self.cost = self.cost
            + Usage::new(response.usage.input_tokens, response.usage.output_tokens)
                .priced(&default_fold_pricing());

        Ok(parse_fold_directive(response.content()))
    }

    /// Executes `directive`, clearing the folded levels and emitting the
    /// new coarsened summary. Billed into the manager's cost record.
    pub async fn fold(
        &mut self,
        directive: FoldDirective,
        chat: &dyn ChatClient,
    ) -> Result<(), ResearchError> {
        match directive {
            FoldDirective::None => Ok(()),
            FoldDirective::Granular => self.fold_granular(chat).await,
            FoldDirective::Deep { target_level } => self.fold_deep(target_level, chat).await,
        }
    }

    async fn fold_granular(&mut self, chat: &dyn ChatClient) -> Result<(), ResearchError> {
        if self.working_memory.is_empty() {
            return Ok(());
        }
        let covered_turns: Vec<u64> = self.working_memory.iter().map(|i| i.turn_num).collect();
        let transcript = self.render_working_memory();
        let content = self.summarize(chat, &transcript).await?;
        let token_count = self.estimator.estimate(&content);

        self.summaries[0].push(Summary {
            level: 0,
            content,
            token_count,
            covered_turns,
            timestamp: Utc::now(),
        });
        self.working_memory.clear();
        self.recompute_tokens();
        Ok(())
    }

    async fn fold_deep(
        &mut self,
        target_level: usize,
        chat: &dyn ChatClient,
    ) -> Result<(), ResearchError> {
        let target_level = target_level.min(self.summary_levels - 1);
        let dest_level = (target_level + 1).min(self.summary_levels - 1);

        let mut concatenated = String::new();
        let mut covered_turns = Vec::new();
        for level in 0..=target_level {
            for summary in &self.summaries[level] {
                concatenated.push_str(&summary.content);
                concatenated.push('\n');
                covered_turns.extend(summary.covered_turns.iter().copied());
            }
        }
        if concatenated.is_empty() {
            return Ok(());
        }

        let content = self.summarize(chat, &concatenated).await?;
        let token_count = self.estimator.estimate(&content);

        for level in 0..=target_level {
            self.summaries[level].clear();
        }
        self.summaries[dest_level].push(Summary {
            level: dest_level,
            content,
            token_count,
            covered_turns,
            timestamp: Utc::now(),
        });
        self.recompute_tokens();
        Ok(())
    }

    async fn summarize(&mut self, chat: &dyn ChatClient, text: &str) -> Result<String, ResearchError> {
        let prompt = format!(
            "Summarize the following research-session history, preserving every \
             cited source and numeric claim:\n\n{text}"
        );
        let response = chat
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| ResearchError::llm(e.to_string()))?;
        self.cost = self.cost
            + Usage::new(response.usage.input_tokens, response.usage.output_tokens)
                .priced(&default_fold_pricing());
        Ok(response.content().to_string())
    }

    fn render_working_memory(&self) -> String {
        self.working_memory
            .iter()
            .map(|i| format!("[{}] {}: {}", i.turn_num, i.role, i.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Assembles the message list the model sees: system prompt, populated
    /// summary levels coarsest-first, the working-memory window in order,
    /// then the user's query. All summary blocks are injected as
    /// `role=system`.
    pub fn build_messages(&self, system_prompt: &str, query: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(system_prompt.to_string())];

        for level in (0..self.summary_levels).rev() {
            for summary in &self.summaries[level] {
                messages.push(ChatMessage::system(format!(
                    "[summary L{}] {}",
                    summary.level, summary.content
                )));
            }
        }

        for interaction in &self.working_memory {
            messages.push(ChatMessage {
                role: interaction.role.clone(),
                content: interaction.content.clone(),
            });
        }

        messages.push(ChatMessage::user(query.to_string()));
        messages
    }

    pub fn reset(&mut self) {
        self.working_memory.clear();
        for level in &mut self.summaries {
            level.clear();
        }
        self.tool_memory.clear();
        self.turn_counter = 0;
        self.current_tokens = 0;
        self.cost = CostRecord::zero();
    }

    fn recompute_tokens(&mut self) {
        let working: usize = self.working_memory.iter().map(|i| i.token_count).sum();
        let summarized: usize = self
            .summaries
            .iter()
            .flatten()
            .map(|s| s.token_count)
            .sum();
        let tools: usize = self
            .tool_memory
            .values()
            .filter_map(|t| t.last_result.as_ref())
            .map(|r| self.estimator.estimate(r))
            .sum();
        self.current_tokens = working + summarized + tools;
    }
}

fn parse_fold_directive(raw: &str) -> FoldDirective {
    let trimmed = raw.trim();
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return FoldDirective::Granular,
    };
    match value.get("type").and_then(|v| v.as_str()) {
        Some("NONE") => FoldDirective::None,
        Some("DEEP") => {
            let target_level = value
                .get("target_level")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            FoldDirective::Deep { target_level }
        }
        Some("GRANULAR") => FoldDirective::Granular,
        _ => FoldDirective::Granular,
    }
}

fn default_fold_pricing() -> research_core::cost::Pricing {
    use rust_decimal::Decimal;
    research_core::cost::Pricing::new(Decimal::new(15, 2), Decimal::new(60, 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::testing::ScriptedChatClient;
    use research_core::tokens::CharDiv4Estimator;

    fn manager(max_tokens: usize, fold_threshold: f64) -> ContextManager {
        ContextManager::new(3, 5, max_tokens, fold_threshold, Arc::new(CharDiv4Estimator))
    }

    #[test]
    fn add_interaction_evicts_oldest_past_working_memory_size() {
        let mut ctx = manager(40_000, 0.75);
        for i in 0..8 {
            ctx.add_interaction("user", format!("turn {i}"));
        }
        assert_eq!(ctx.working_memory().len(), 5);
        assert_eq!(ctx.working_memory().front().unwrap().turn_num, 4);
    }

    #[test]
    fn add_tool_result_merges_findings_by_exact_string() {
        let mut ctx = manager(40_000, 0.75);
        ctx.add_tool_result("web_search", "page one", vec!["fact a".into()]);
        ctx.add_tool_result("web_search", "page two", vec!["fact a".into(), "fact b".into()]);
        let summary = ctx.tool_memory.get("web_search").unwrap();
        assert_eq!(summary.call_count, 2);
        assert_eq!(summary.key_findings, vec!["fact a".to_string(), "fact b".to_string()]);
        assert_eq!(summary.last_result.as_deref(), Some("page two"));
    }

    #[test]
    fn should_fold_respects_threshold_and_zero_disables() {
        let mut ctx = manager(40, 0.5);
        ctx.add_interaction("user", "x".repeat(100));
        assert!(ctx.should_fold());

        let mut disabled = manager(0, 0.5);
        disabled.add_interaction("user", "x".repeat(1000));
        assert!(!disabled.should_fold());
    }

    #[tokio::test]
    async fn decide_folding_defaults_to_granular_on_unparseable_response() {
        let mut ctx = manager(40_000, 0.75);
        let chat = ScriptedChatClient::new("test", vec!["not json at all".to_string()]);
        let directive = ctx.decide_folding(&chat).await.unwrap();
        assert_eq!(directive, FoldDirective::Granular);
    }

    #[tokio::test]
    async fn decide_folding_parses_structured_response() {
        let mut ctx = manager(40_000, 0.75);
        let chat = ScriptedChatClient::new(
            "test",
            vec![r#"{"type": "DEEP", "target_level": 1, "rationale": "too much detail"}"#.to_string()],
        );
        let directive = ctx.decide_folding(&chat).await.unwrap();
        assert_eq!(directive, FoldDirective::Deep { target_level: 1 });
    }

    #[tokio::test]
    async fn granular_fold_clears_working_memory_and_creates_level_zero_summary() {
        let mut ctx = manager(40_000, 0.75);
        ctx.add_interaction("user", "first question");
        ctx.add_interaction("assistant", "first answer");
        let chat = ScriptedChatClient::new("test", vec!["compressed summary".to_string()]);

        ctx.fold(FoldDirective::Granular, &chat).await.unwrap();

        assert!(ctx.working_memory().is_empty());
        assert_eq!(ctx.summaries()[0].len(), 1);
        assert_eq!(ctx.summaries()[0][0].covered_turns, vec![1, 2]);
    }

    #[tokio::test]
    async fn deep_fold_concatenates_and_clears_lower_levels() {
        let mut ctx = manager(40_000, 0.75);
        ctx.add_interaction("user", "q1");
        let chat = ScriptedChatClient::new(
            "test",
            vec!["level 0 summary".to_string(), "level 1 summary".to_string()],
        );
        ctx.fold(FoldDirective::Granular, &chat).await.unwrap();
        assert_eq!(ctx.summaries()[0].len(), 1);

        ctx.fold(FoldDirective::Deep { target_level: 0 }, &chat)
            .await
            .unwrap();
        assert!(ctx.summaries()[0].is_empty());
        assert_eq!(ctx.summaries()[1].len(), 1);
    }

    #[test]
    fn build_messages_orders_coarsest_summaries_first_then_working_memory() {
        let mut ctx = manager(40_000, 0.75);
        ctx.summaries[1].push(Summary {
            level: 1,
            content: "coarse".into(),
            token_count: 2,
            covered_turns: vec![1],
            timestamp: Utc::now(),
        });
        ctx.summaries[0].push(Summary {
            level: 0,
            content: "fine".into(),
            token_count: 2,
            covered_turns: vec![2],
            timestamp: Utc::now(),
        });
        ctx.add_interaction("user", "latest turn");

        let messages = ctx.build_messages("system prompt", "the query");
        assert_eq!(messages[0].content, "system prompt");
        assert!(messages[1].content.contains("coarse"));
        assert!(messages[2].content.contains("fine"));
        assert_eq!(messages.last().unwrap().content, "the query");
    }

    #[test]
    fn reset_clears_everything() {
        let mut ctx = manager(40_000, 0.75);
        ctx.add_interaction("user", "hello");
        ctx.add_tool_result("web_search", "result", vec!["fact".into()]);
        ctx.reset();
        assert!(ctx.working_memory().is_empty());
        assert_eq!(ctx.current_tokens(), 0);
        assert!(ctx.tool_memory.is_empty());
    }
}
