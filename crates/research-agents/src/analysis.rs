//! Analyzer and Synthesizer: plain collaborators consuming collected notes
//! and producing the cited final report. The analyzer is allowed to fail
//! soft: an empty [`Analysis`] is acceptable and the pipeline proceeds to
//! synthesis regardless. The synthesizer must always produce a non-empty
//! report, even with no search results at all.

use research_core::cost::{CostRecord, Pricing, Usage};
use research_core::error::ResearchError;
use research_core::llm::{ChatClient, ChatMessage};
use research_core::model::{Analysis, Citation, Note, Report};
use research_events::bus::{EngineEvent, EventBus};
use rust_decimal::Decimal;

pub struct AnalysisOutcome {
    pub analysis: Analysis,
    pub cost: CostRecord,
}

fn emit(progress: Option<(&EventBus, &str)>, event: EngineEvent) {
    if let Some((bus, _)) = progress {
        bus.publish(event);
    }
}

/// Asks the model to validate facts, surface contradictions and flag
/// knowledge gaps across `notes`. Any LLM or parse failure here is
/// swallowed: the caller gets back an empty [`Analysis`] and zero cost
/// rather than an `Err`, matching the non-fatal-analyzer-error contract.
/// `progress`, when given, is used to narrate the cross-validation pass to
/// subscribers; it never affects the outcome.
pub async fn analyze(
    chat: &dyn ChatClient,
    notes: &[Note],
    progress: Option<(&EventBus, &str)>,
) -> AnalysisOutcome {
    if notes.is_empty() {
        return AnalysisOutcome {
            analysis: Analysis::default(),
            cost: CostRecord::zero(),
        };
    }

    if let Some((_, session_id)) = progress {
        emit(progress, EngineEvent::AnalysisProgress {
            session_id: session_id.to_string(),
            message: format!("analyzing {} notes", notes.len()),
        });
        emit(progress, EngineEvent::CrossValidationStarted {
            session_id: session_id.to_string(),
        });
    }

    let facts_text = notes
        .iter()
        .map(|n| format!("Topic: {}\n{}", n.topic, n.findings))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Analyze these research findings. Respond with a JSON object: \
         {{\"validated_facts\": [{{\"claim\": \"...\", \"score\": 0.0, \"corroborating_sources\": [\"...\"]}}], \
         \"contradictions\": [{{\"claim1\": \"...\", \"claim2\": \"...\", \"nature\": \"...\"}}], \
         \"knowledge_gaps\": [{{\"description\": \"...\", \"importance\": 0.0, \"suggested_queries\": [\"...\"]}}]}}\n\n\
         Findings:\n{facts_text}"
    );

    let response = match chat.chat(&[ChatMessage::user(prompt)]).await {
        Ok(r) => r,
        Err(_) => {
            if let Some((_, session_id)) = progress {
                emit(progress, EngineEvent::CrossValidationComplete {
                    session_id: session_id.to_string(),
                    contradictions_found: 0,
                });
            }
            return AnalysisOutcome {
                analysis: Analysis::default(),
                cost: CostRecord::zero(),
            };
        }
    };

    let cost = Usage::new(response.usage.input_tokens, response.usage.output_tokens)
        .priced(&pricing());
    let analysis: Analysis = serde_json::from_str(response.content()).unwrap_or_default();

    if let Some((_, session_id)) = progress {
        emit(progress, EngineEvent::CrossValidationComplete {
            session_id: session_id.to_string(),
            contradictions_found: analysis.contradictions.len(),
        });
    }

    AnalysisOutcome { analysis, cost }
}

/// Assembles the final markdown report from the plan's notes and the
/// analyzer's output. Always produces a non-empty `full_content` with a
/// `## Sources` section, even when `notes` is empty.
pub async fn synthesize(
    chat: &dyn ChatClient,
    topic: &str,
    notes: &[Note],
    analysis: &Analysis,
    progress: Option<(&EventBus, &str)>,
) -> Result<(Report, CostRecord), ResearchError> {
    if let Some((_, session_id)) = progress {
        emit(progress, EngineEvent::FinalReportStarted {
            session_id: session_id.to_string(),
        });
        emit(progress, EngineEvent::SynthesisProgress {
            session_id: session_id.to_string(),
            message: "assembling citations".to_string(),
        });
    }

    let citations = build_citations(notes);

    let findings_text = notes
        .iter()
        .map(|n| format!("Topic: {}\n{}", n.topic, n.findings))
        .collect::<Vec<_>>()
        .join("\n\n");
    let gaps_text = analysis
        .knowledge_gaps
        .iter()
        .map(|g| format!("- {} (importance {:.2})", g.description, g.importance))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "Write a research report on \"{topic}\" as markdown with `##` section \
         headings. Use the findings below, citing sources inline with \
         sequential markers [1], [2], ... matching the numbered source list. \
         Do not include a Sources section yourself; it is appended \
         separately.\n\nFindings:\n{}\n\nKnown gaps:\n{}\n\nSources:\n{}",
        if findings_text.is_empty() {
            "(no search results were available)".to_string()
        } else {
            findings_text
        },
        if gaps_text.is_empty() { "(none)" } else { &gaps_text },
        citations
            .iter()
            .map(|c| format!("{}. {} - {}", c.id, c.title, c.url))
            .collect::<Vec<_>>()
            .join("\n"),
    );

    let response = chat
        .chat(&[ChatMessage::user(prompt)])
        .await
        .map_err(|e| ResearchError::llm(format!("synthesis call failed: {e}")))?;
    let cost = Usage::new(response.usage.input_tokens, response.usage.output_tokens)
        .priced(&pricing());

    let body = response.content().trim();
    let mut full_content = if body.is_empty() {
        format!("## Summary\n\nNo findings were gathered for \"{topic}\".\n")
    } else {
        format!("{body}\n")
    };
    full_content.push_str(&render_sources_section(&citations));

    let summary = notes
        .first()
        .map(|n| n.findings.clone())
        .unwrap_or_else(|| format!("No findings were gathered for \"{topic}\"."));

    let report = Report {
        title: topic.to_string(),
        summary,
        full_content,
        citations,
    };

    Ok((report, cost))
}

/// Numbers every distinct URL across `notes` sequentially, in first-seen
/// order, with no gaps.
fn build_citations(notes: &[Note]) -> Vec<Citation> {
    let mut citations = Vec::new();
    for note in notes {
        for source in &note.sources {
            if !citations.iter().any(|c: &Citation| c.url == source.url) {
                citations.push(Citation {
                    id: citations.len() as u32 + 1,
                    url: source.url.clone(),
                    title: source.title.clone(),
                });
            }
        }
    }
    citations
}

fn render_sources_section(citations: &[Citation]) -> String {
    let mut section = String::from("\n## Sources\n\n");
    for citation in citations {
        section.push_str(&format!("[{}] {} - {}\n", citation.id, citation.title, citation.url));
    }
    section
}

fn pricing() -> Pricing {
    Pricing::new(Decimal::new(15, 2), Decimal::new(60, 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::model::Source;
    use research_core::testing::ScriptedChatClient;
    use research_events::bus::EventBus;

    fn note(topic: &str, url: &str) -> Note {
        Note::new(topic, format!("finding about {topic} [1]"), vec![Source {
            url: url.to_string(),
            title: topic.to_string(),
        }])
    }

    #[tokio::test]
    async fn analyze_returns_empty_analysis_for_no_notes() {
        let chat = ScriptedChatClient::new("test", vec![]);
        let outcome = analyze(&chat, &[], None).await;
        assert_eq!(outcome.analysis, Analysis::default());
        assert_eq!(outcome.cost, CostRecord::zero());
    }

    #[tokio::test]
    async fn analyze_parses_well_formed_json() {
        let chat = ScriptedChatClient::new(
            "test",
            vec![serde_json::json!({
                "validated_facts": [{"claim": "x", "score": 0.9, "corroborating_sources": ["https://a"]}],
                "contradictions": [],
                "knowledge_gaps": [{"description": "missing y", "importance": 0.8, "suggested_queries": ["y?"]}],
            })
            .to_string()],
        );
        let outcome = analyze(&chat, &[note("topic", "https://a")], None).await;
        assert_eq!(outcome.analysis.validated_facts.len(), 1);
        assert!(outcome.analysis.knowledge_gaps[0].warrants_gap_fill());
    }

    #[tokio::test]
    async fn analyze_returns_empty_analysis_on_malformed_json() {
        let chat = ScriptedChatClient::new("test", vec!["not json".to_string()]);
        let outcome = analyze(&chat, &[note("topic", "https://a")], None).await;
        assert_eq!(outcome.analysis, Analysis::default());
    }

    #[tokio::test]
    async fn analyze_publishes_cross_validation_bracket_with_contradiction_count() {
        let chat = ScriptedChatClient::new(
            "test",
            vec![serde_json::json!({
                "validated_facts": [],
                "contradictions": [{"claim1": "a", "claim2": "b", "nature": "conflict"}],
                "knowledge_gaps": [],
            })
            .to_string()],
        );
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let _ = analyze(&chat, &[note("topic", "https://a")], Some((&bus, "s1"))).await;

        let (_, started) = sub.recv().await.unwrap();
        assert!(matches!(started, EngineEvent::AnalysisProgress { .. }));
        let (_, validation_started) = sub.recv().await.unwrap();
        assert!(matches!(validation_started, EngineEvent::CrossValidationStarted { .. }));
        let (_, complete) = sub.recv().await.unwrap();
        assert!(matches!(
            complete,
            EngineEvent::CrossValidationComplete { contradictions_found: 1, .. }
        ));
    }

    #[tokio::test]
    async fn synthesize_produces_non_empty_report_with_no_notes() {
        let chat = ScriptedChatClient::new("test", vec!["".to_string()]);
        let (report, _cost) = synthesize(&chat, "empty topic", &[], &Analysis::default(), None)
            .await
            .unwrap();
        assert!(!report.full_content.is_empty());
        assert!(report.full_content.contains("## Sources"));
        assert!(report.citations.is_empty());
    }

    #[tokio::test]
    async fn synthesize_assigns_sequential_citation_ids_with_no_gaps() {
        let chat = ScriptedChatClient::new("test", vec!["## Summary\n\nFindings [1][2].".to_string()]);
        let notes = vec![note("a", "https://a"), note("b", "https://b")];
        let (report, _cost) = synthesize(&chat, "topic", &notes, &Analysis::default(), None)
            .await
            .unwrap();
        assert_eq!(report.citations.len(), 2);
        assert_eq!(report.citations[0].id, 1);
        assert_eq!(report.citations[1].id, 2);
        assert!(report.full_content.contains("[1]"));
    }

    #[tokio::test]
    async fn synthesize_publishes_final_report_started_before_the_chat_call() {
        let chat = ScriptedChatClient::new("test", vec!["## Summary\n\nstuff".to_string()]);
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let _ = synthesize(&chat, "topic", &[], &Analysis::default(), Some((&bus, "s1")))
            .await
            .unwrap();

        let (_, first) = sub.recv().await.unwrap();
        assert!(matches!(first, EngineEvent::FinalReportStarted { .. }));
        let (_, second) = sub.recv().await.unwrap();
        assert!(matches!(second, EngineEvent::SynthesisProgress { .. }));
    }

    #[tokio::test]
    async fn synthesize_deduplicates_repeated_urls_across_notes() {
        let chat = ScriptedChatClient::new("test", vec!["## Summary\n\nstuff".to_string()]);
        let notes = vec![note("a", "https://shared"), note("b", "https://shared")];
        let (report, _cost) = synthesize(&chat, "topic", &notes, &Analysis::default(), None)
            .await
            .unwrap();
        assert_eq!(report.citations.len(), 1);
    }
}
