//! Diffusion loop controller: iteratively reflects, dispatches parallel
//! sub-researchers, and refines a single shared draft until the model
//! signals `research_complete` or the iteration cap is reached.

use crate::analysis::{analyze, synthesize};
use crate::sub_researcher::SubResearcher;
use research_core::cost::CostRecord;
use research_core::error::ResearchError;
use research_core::llm::{ChatClient, ChatMessage};
use research_core::model::{Draft, InjectionContext, Note, Report, ResearchBrief};
use research_core::tool::ToolExecutor;
use research_core::wire::{parse_turn, ParsedTurn};
use research_events::bus::{EngineEvent, EventBus};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

fn emit(progress: Option<(&EventBus, &str)>, event: EngineEvent) {
    if let Some((bus, _)) = progress {
        bus.publish(event);
    }
}

pub struct SupervisorConfig {
    pub max_iterations: u32,
    pub max_concurrent_researchers: usize,
    pub max_sub_researcher_iterations: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            max_iterations: 15,
            max_concurrent_researchers: 3,
            max_sub_researcher_iterations: 5,
        }
    }
}

pub struct SupervisorOutcome {
    pub report: Report,
    pub draft: Draft,
    pub notes: Vec<Note>,
    pub cost: CostRecord,
    pub iterations_run: u32,
}

pub struct Supervisor {
    chat: Arc<dyn ChatClient>,
    tools: Arc<dyn ToolExecutor>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(chat: Arc<dyn ChatClient>, tools: Arc<dyn ToolExecutor>, config: SupervisorConfig) -> Self {
        Supervisor { chat, tools, config }
    }

    /// Drives one research session to completion: brief -> initial draft ->
    /// diffusion loop -> deduplicated hand-off -> final report. `progress`,
    /// when given, narrates the loop (iteration count, delegated topics,
    /// draft refinements) to bus subscribers without affecting the outcome.
    pub async fn run(
        &self,
        query: &str,
        injection: Option<&InjectionContext>,
        progress: Option<(&EventBus, &str)>,
    ) -> Result<SupervisorOutcome, ResearchError> {
        let mut cost = CostRecord::zero();

        if let Some((_, session_id)) = progress {
            emit(progress, EngineEvent::DiffusionStarted {
                session_id: session_id.to_string(),
            });
        }

        let brief = self.produce_brief(query, &mut cost).await?;
        let injection = injection.cloned().unwrap_or_default();
        let brief_text = brief.augmented_text(&injection);

        let mut draft = self.initial_draft(&brief_text, &mut cost).await?;

        let mut notes: Vec<Note> = Vec::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut researcher_num = 0u32;
        let mut iterations_run = 0u32;
        let mut complete = false;

        for iteration in 0..self.config.max_iterations {
            iterations_run += 1;
            if let Some((_, session_id)) = progress {
                emit(progress, EngineEvent::DiffusionIteration {
                    session_id: session_id.to_string(),
                    iteration: iteration + 1,
                });
            }
            let turn = self.next_turn(&brief_text, &draft, &notes, &mut cost).await?;

            if turn.has_tool_calls() {
                let conduct_topics: Vec<String> = turn
                    .tool_calls
                    .iter()
                    .filter(|c| c.tool == "conduct_research")
                    .filter_map(|c| c.args.get("topic").and_then(|v| v.as_str()).map(str::to_string))
                    .collect();

                if !conduct_topics.is_empty() {
                    let batch = self
                        .dispatch_batch(&conduct_topics, &mut researcher_num, &mut cost, progress)
                        .await;
                    let introduced_new = batch_introduced_novelty(&batch, &seen_urls);
                    for note in &batch {
                        for url in note.urls() {
                            seen_urls.insert(url.to_string());
                        }
                    }
                    notes.extend(batch);
                    if !introduced_new {
                        complete = true;
                    }
                }

                // Only one refine per iteration; findings come from `notes`,
                // the payload on the tool call itself carries no extra data.
                if turn.tool_calls.iter().any(|c| c.tool == "refine_draft") {
                    draft = self.refine(&brief_text, &draft, &notes, &mut cost).await?;
                    if let Some((_, session_id)) = progress {
                        emit(progress, EngineEvent::DraftRefined {
                            session_id: session_id.to_string(),
                        });
                    }
                }

                if turn.tool_calls.iter().any(|c| c.tool == "research_complete") {
                    complete = true;
                }
            }

            if complete {
                break;
            }
        }

        if let Some((_, session_id)) = progress {
            emit(progress, EngineEvent::DiffusionComplete {
                session_id: session_id.to_string(),
                iterations_run,
            });
        }

        let deduped = deduplicate_notes(&notes);
        let analysis_outcome = analyze(self.chat.as_ref(), &deduped, progress).await;
        cost = cost + analysis_outcome.cost;

        let (report, synth_cost) =
            synthesize(self.chat.as_ref(), query, &deduped, &analysis_outcome.analysis, progress).await?;
        cost = cost + synth_cost;

        Ok(SupervisorOutcome {
            report,
            draft,
            notes: deduped,
            cost,
            iterations_run,
        })
    }

    async fn produce_brief(&self, query: &str, cost: &mut CostRecord) -> Result<ResearchBrief, ResearchError> {
        let prompt = format!(
            "Produce a research brief for the query \"{query}\" as JSON: \
             {{\"objective\": \"...\", \"sub_questions\": [\"...\"], \
             \"scope_boundaries\": [\"...\"], \"priority_sources\": [\"...\"]}}"
        );
        let response = self
            .chat
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| ResearchError::llm(format!("brief generation failed: {e}")))?;
        *cost = *cost + bill(&response);

        Ok(serde_json::from_str(response.content()).unwrap_or_else(|_| ResearchBrief::new(query)))
    }

    async fn initial_draft(&self, brief_text: &str, cost: &mut CostRecord) -> Result<Draft, ResearchError> {
        let prompt = format!("Write an initial draft outline for this research brief:\n{brief_text}");
        let response = self
            .chat
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| ResearchError::llm(format!("initial draft failed: {e}")))?;
        *cost = *cost + bill(&response);
        Ok(Draft::new(response.content().to_string()))
    }

    async fn next_turn(
        &self,
        brief_text: &str,
        draft: &Draft,
        notes: &[Note],
        cost: &mut CostRecord,
    ) -> Result<ParsedTurn, ResearchError> {
        let notes_text = notes
            .iter()
            .map(|n| format!("- {}: {}", n.topic, n.findings))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Brief:\n{brief_text}\n\nCurrent draft:\n{}\n\nNotes so far:\n{}\n\n\
             Choose next actions: think(reflection), conduct_research(topic) \
             (one or more), refine_draft(brief, findings, draft), or \
             research_complete. Respond using <tool_call name=\"...\">{{...}}</tool_call> blocks.",
            draft.content,
            if notes_text.is_empty() { "(none yet)" } else { &notes_text },
        );
        let response = self
            .chat
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| ResearchError::llm(format!("supervisor turn failed: {e}")))?;
        *cost = *cost + bill(&response);
        Ok(parse_turn(response.content()))
    }

    /// Dispatches `topics` concurrently, bounded to
    /// `max_concurrent_researchers`, and waits for the whole batch before
    /// returning: the next model turn and any `refine_draft` must see a
    /// complete batch, never a partial one.
    async fn dispatch_batch(
        &self,
        topics: &[String],
        researcher_num: &mut u32,
        cost: &mut CostRecord,
        progress: Option<(&EventBus, &str)>,
    ) -> Vec<Note> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_researchers));
        let mut handles = Vec::with_capacity(topics.len());

        for topic in topics {
            *researcher_num += 1;
            let num = *researcher_num;
            let chat = Arc::clone(&self.chat);
            let tools = Arc::clone(&self.tools);
            let max_iterations = self.config.max_sub_researcher_iterations;
            let permit = Arc::clone(&semaphore);
            let topic = topic.clone();

            if let Some((bus, session_id)) = progress {
                bus.publish(EngineEvent::ResearchDelegated {
                    session_id: session_id.to_string(),
                    topic: topic.clone(),
                });
            }

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok()?;
                let researcher = SubResearcher::new(chat, tools, max_iterations);
                let outcome = researcher.run(&topic, num).await.ok();
                (topic, outcome)
            }));
        }

        let mut notes = Vec::with_capacity(topics.len());
        for handle in handles {
            if let Ok((topic, Some(outcome))) = handle.await {
                *cost = *cost + outcome.cost;
                if let Some((bus, session_id)) = progress {
                    bus.publish(EngineEvent::SubResearcherProgress {
                        session_id: session_id.to_string(),
                        topic,
                        message: "finding complete".to_string(),
                    });
                }
                notes.push(outcome.note);
            }
        }
        notes
    }

    async fn refine(
        &self,
        brief_text: &str,
        draft: &Draft,
        notes: &[Note],
        cost: &mut CostRecord,
    ) -> Result<Draft, ResearchError> {
        let findings_text = notes
            .iter()
            .map(|n| format!("- {}: {}", n.topic, n.findings))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Brief:\n{brief_text}\n\nCurrent draft:\n{}\n\nNew findings:\n{}\n\n\
             Return a revised draft incorporating these findings with inline citations.",
            draft.content, findings_text,
        );
        let response = self
            .chat
            .chat(&[ChatMessage::user(prompt)])
            .await
            .map_err(|e| ResearchError::llm(format!("refine_draft call failed: {e}")))?;
        *cost = *cost + bill(&response);
        let mut refined = draft.clone();
        refined.replace(response.content().to_string());
        Ok(refined)
    }
}

fn bill(response: &research_core::llm::ChatResponse) -> CostRecord {
    use research_core::cost::{Pricing, Usage};
    use rust_decimal::Decimal;
    Usage::new(response.usage.input_tokens, response.usage.output_tokens)
        .priced(&Pricing::new(Decimal::new(15, 2), Decimal::new(60, 2)))
}

/// True iff at least one note in `batch` carries a URL not already in
/// `seen`. Mirrors the note-deduplication rule used at final hand-off, so
/// the same novelty test governs both "should we keep researching" and
/// "which notes make it into the report".
fn batch_introduced_novelty(batch: &[Note], seen: &HashSet<String>) -> bool {
    batch
        .iter()
        .any(|note| note.urls().any(|url| !seen.contains(url)))
}

/// Keeps a note iff it carries at least one URL not seen in an earlier
/// kept note, or carries no URLs at all.
fn deduplicate_notes(notes: &[Note]) -> Vec<Note> {
    let mut kept = Vec::with_capacity(notes.len());
    let mut seen: HashSet<String> = HashSet::new();
    for note in notes {
        let urls: Vec<&str> = note.urls().collect();
        let keep = urls.is_empty() || urls.iter().any(|u| !seen.contains(*u));
        if keep {
            for url in &urls {
                seen.insert(url.to_string());
            }
            kept.push(note.clone());
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::model::Source;
    use research_core::testing::{ScriptedChatClient, ScriptedToolExecutor};
    use std::collections::HashMap;

    fn note(topic: &str, url: Option<&str>) -> Note {
        let sources = match url {
            Some(u) => vec![Source { url: u.to_string(), title: topic.to_string() }],
            None => vec![],
        };
        Note::new(topic, format!("finding about {topic}"), sources)
    }

    #[test]
    fn batch_introduced_novelty_true_when_any_new_url_present() {
        let seen: HashSet<String> = ["https://old".to_string()].into_iter().collect();
        let batch = vec![note("a", Some("https://new"))];
        assert!(batch_introduced_novelty(&batch, &seen));
    }

    #[test]
    fn batch_introduced_novelty_false_when_all_urls_already_seen() {
        let seen: HashSet<String> = ["https://old".to_string()].into_iter().collect();
        let batch = vec![note("a", Some("https://old"))];
        assert!(!batch_introduced_novelty(&batch, &seen));
    }

    #[test]
    fn deduplicate_notes_keeps_url_free_notes_and_first_occurrence_of_shared_urls() {
        let notes = vec![
            note("a", Some("https://shared")),
            note("b", Some("https://shared")),
            note("c", None),
        ];
        let kept = deduplicate_notes(&notes);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].topic, "a");
        assert_eq!(kept[1].topic, "c");
    }

    #[tokio::test]
    async fn diffusion_happy_path_produces_complete_report_with_dispatched_source() {
        let chat = Arc::new(ScriptedChatClient::new(
            "test",
            vec![
                // brief
                serde_json::json!({"objective": "quantum computing cryptography", "sub_questions": [], "scope_boundaries": [], "priority_sources": []}).to_string(),
                // initial draft
                "# Draft\n".to_string(),
                // iteration 1 turn: think + conduct_research + refine_draft
                r#"<tool_call name="think">{"reflection": "start with Shor's algorithm"}</tool_call><tool_call name="conduct_research">{"topic": "Shor's algorithm impact on RSA encryption"}</tool_call>"#.to_string(),
                // sub-researcher turn 1: tool call
                r#"<tool_call name="web_search">{"query": "Shor's algorithm RSA"}</tool_call>"#.to_string(),
                // sub-researcher turn 2: final answer
                "<final_answer>RSA is vulnerable to Shor's algorithm.</final_answer>".to_string(),
                // sub-researcher compression
                "Shor's algorithm threatens RSA [1]".to_string(),
                // iteration 2 turn: refine then complete
                r#"<tool_call name="refine_draft">{}</tool_call><tool_call name="research_complete">{}</tool_call>"#.to_string(),
                // refine call
                "# Report\n\nShor's algorithm threatens RSA [1].".to_string(),
                // analyzer
                serde_json::json!({"validated_facts": [], "contradictions": [], "knowledge_gaps": []}).to_string(),
                // synthesizer
                "## Summary\n\nShor's algorithm threatens RSA [1].".to_string(),
            ],
        ));
        let mut results = HashMap::new();
        results.insert("web_search".to_string(), "https://example.com/quantum".to_string());
        let tools = Arc::new(ScriptedToolExecutor::new(results));

        let supervisor = Supervisor::new(chat, tools, SupervisorConfig::default());
        let outcome = supervisor.run("quantum computing cryptography", None, None).await.unwrap();

        assert!(outcome.report.full_content.contains("Shor"));
        assert!(outcome.report.full_content.contains("https://example.com/quantum"));
        assert!(outcome.iterations_run <= 15);
    }

    #[tokio::test]
    async fn diffusion_run_publishes_delegation_and_refinement_events() {
        let chat = Arc::new(ScriptedChatClient::new(
            "test",
            vec![
                serde_json::json!({"objective": "q", "sub_questions": [], "scope_boundaries": [], "priority_sources": []}).to_string(),
                "# Draft\n".to_string(),
                r#"<tool_call name="conduct_research">{"topic": "topic a"}</tool_call><tool_call name="refine_draft">{}</tool_call><tool_call name="research_complete">{}</tool_call>"#.to_string(),
                r#"<tool_call name="web_search">{"query": "topic a"}</tool_call>"#.to_string(),
                "<final_answer>findings.</final_answer>".to_string(),
                "findings about topic a [1]".to_string(),
                "# Report\n\nfindings about topic a [1].".to_string(),
                serde_json::json!({"validated_facts": [], "contradictions": [], "knowledge_gaps": []}).to_string(),
                "## Summary\n\nfindings about topic a [1].".to_string(),
            ],
        ));
        let mut results = HashMap::new();
        results.insert("web_search".to_string(), "https://example.com/a".to_string());
        let tools = Arc::new(ScriptedToolExecutor::new(results));

        let bus = research_events::bus::EventBus::new();
        let mut sub = bus.subscribe();
        let supervisor = Supervisor::new(chat, tools, SupervisorConfig::default());
        supervisor
            .run("topic a", None, Some((&bus, "s1")))
            .await
            .unwrap();

        let mut saw_started = false;
        let mut saw_delegated = false;
        let mut saw_refined = false;
        let mut saw_complete = false;
        while let Ok(Some((_, event))) =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await
        {
            match event {
                research_events::bus::EngineEvent::DiffusionStarted { .. } => saw_started = true,
                research_events::bus::EngineEvent::ResearchDelegated { .. } => saw_delegated = true,
                research_events::bus::EngineEvent::DraftRefined { .. } => saw_refined = true,
                research_events::bus::EngineEvent::DiffusionComplete { .. } => saw_complete = true,
                _ => {}
            }
        }
        assert!(saw_started && saw_delegated && saw_refined && saw_complete);
    }

    #[tokio::test]
    async fn max_iterations_cap_still_produces_a_non_empty_report() {
        let chat = Arc::new(ScriptedChatClient::new(
            "test",
            vec![
                serde_json::json!({"objective": "topic", "sub_questions": [], "scope_boundaries": [], "priority_sources": []}).to_string(),
                "# Draft\n".to_string(),
                "<tool_call name=\"think\">{\"reflection\": \"keep going\"}</tool_call>".to_string(),
                serde_json::json!({"validated_facts": [], "contradictions": [], "knowledge_gaps": []}).to_string(),
                "## Summary\n\nNo findings were gathered.".to_string(),
            ],
        ));
        let tools = Arc::new(ScriptedToolExecutor::new(HashMap::new()));
        let config = SupervisorConfig {
            max_iterations: 15,
            ..SupervisorConfig::default()
        };
        let supervisor = Supervisor::new(chat, tools, config);

        let outcome = supervisor.run("topic", None, None).await.unwrap();
        assert_eq!(outcome.iterations_run, 15);
        assert!(!outcome.report.full_content.is_empty());
    }
}
