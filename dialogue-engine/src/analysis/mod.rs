//! Post-hoc analysis of a finalized conversation
//!
//! Pure functions over the stored record; nothing here touches the broker or
//! the store. Produces per-role generation stats, aggregate word usage, and
//! a plain-text report.

use std::collections::HashMap;

use dialogue_types::{Conversation, ConversationStatus, DialoguePhase, MessageContent, RoleId};
use regex::Regex;
use serde::Serialize;

/// Words excluded from frequency ranking. Small on purpose; this is a usage
/// sketch, not an NLP pipeline.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "is", "it", "its",
    "of", "on", "or", "that", "the", "this", "to", "was", "we", "with", "you", "your", "i", "not",
    "have", "has",
];

const TOP_WORDS: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencyStats {
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoleStats {
    pub role: RoleId,
    pub turns: u32,
    pub words: u64,
    pub tokens: u64,
    pub latency: Option<LatencyStats>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WordCount {
    pub word: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationAnalysis {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub total_turns: u32,
    pub total_words: u64,
    /// Wall-clock span from creation to finalization, when recorded.
    pub duration_ms: Option<u64>,
    pub role_stats: Vec<RoleStats>,
    pub top_words: Vec<WordCount>,
    pub phase_counts: Vec<(DialoguePhase, u32)>,
}

/// Analyze a finalized conversation. Works on partial transcripts too, so
/// aborted conversations still get a report.
pub fn analyze(conversation: &Conversation) -> ConversationAnalysis {
    // Unlikely to fail; fall back to whitespace splitting if it somehow does.
    let word_re = Regex::new(r"[a-z][a-z']*").ok();

    let mut word_counts: HashMap<String, u64> = HashMap::new();
    let mut phase_counts: HashMap<DialoguePhase, u32> = HashMap::new();
    let mut per_role: HashMap<RoleId, (u32, u64, u64, Vec<u64>)> = HashMap::new();
    let mut total_words: u64 = 0;

    for turn in &conversation.turns {
        let entry = per_role
            .entry(turn.role.clone())
            .or_insert((0, 0, 0, Vec::new()));
        entry.0 += 1;
        entry.2 += u64::from(turn.tokens.unwrap_or(0));
        entry.3.push(turn.latency_ms);

        if let MessageContent::Utterance { text, phase } = &turn.content {
            let lowered = text.to_lowercase();
            let words: Vec<&str> = match &word_re {
                Some(re) => re.find_iter(&lowered).map(|m| m.as_str()).collect(),
                None => lowered.split_whitespace().collect(),
            };
            entry.1 += words.len() as u64;
            total_words += words.len() as u64;
            for word in words {
                if !STOPWORDS.contains(&word) {
                    *word_counts.entry(word.to_string()).or_insert(0) += 1;
                }
            }
            if let Some(phase) = phase {
                *phase_counts.entry(*phase).or_insert(0) += 1;
            }
        }
    }

    // Rank by count, then alphabetically so ties are deterministic.
    let mut top_words: Vec<WordCount> = word_counts
        .into_iter()
        .map(|(word, count)| WordCount { word, count })
        .collect();
    top_words.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    top_words.truncate(TOP_WORDS);

    // Keep role order aligned with the configured bindings.
    let mut role_stats = Vec::new();
    for binding in &conversation.bindings {
        let (turns, words, tokens, latencies) = per_role
            .remove(&binding.role)
            .unwrap_or((0, 0, 0, Vec::new()));
        role_stats.push(RoleStats {
            role: binding.role.clone(),
            turns,
            words,
            tokens,
            latency: latency_stats(&latencies),
        });
    }
    // Roles that appear in the transcript but not the bindings still count.
    for (role, (turns, words, tokens, latencies)) in per_role {
        role_stats.push(RoleStats {
            role,
            turns,
            words,
            tokens,
            latency: latency_stats(&latencies),
        });
    }

    let duration_ms = conversation.completed_at.map(|done| {
        (done - conversation.created_at)
            .num_milliseconds()
            .max(0) as u64
    });

    let mut phase_counts: Vec<(DialoguePhase, u32)> = phase_counts.into_iter().collect();
    phase_counts.sort_by_key(|(_, count)| std::cmp::Reverse(*count));

    ConversationAnalysis {
        conversation_id: conversation.id.to_string(),
        status: conversation.status,
        total_turns: conversation.turns.len() as u32,
        total_words,
        duration_ms,
        role_stats,
        top_words,
        phase_counts,
    }
}

fn latency_stats(latencies: &[u64]) -> Option<LatencyStats> {
    if latencies.is_empty() {
        return None;
    }
    let min_ms = latencies.iter().copied().min().unwrap_or(0);
    let max_ms = latencies.iter().copied().max().unwrap_or(0);
    let avg_ms = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
    Some(LatencyStats {
        min_ms,
        max_ms,
        avg_ms,
    })
}

impl ConversationAnalysis {
    /// Human-readable summary for logs and the CLI.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("conversation {}\n", self.conversation_id));
        out.push_str(&format!(
            "status: {}  turns: {}  words: {}\n",
            self.status.as_str(),
            self.total_turns,
            self.total_words
        ));
        if let Some(duration_ms) = self.duration_ms {
            out.push_str(&format!("duration: {duration_ms}ms\n"));
        }
        for stats in &self.role_stats {
            out.push_str(&format!(
                "  {}: {} turns, {} words, {} tokens",
                stats.role, stats.turns, stats.words, stats.tokens
            ));
            if let Some(latency) = &stats.latency {
                out.push_str(&format!(
                    ", latency {}..{}ms (avg {:.1}ms)",
                    latency.min_ms, latency.max_ms, latency.avg_ms
                ));
            }
            out.push('\n');
        }
        if !self.top_words.is_empty() {
            out.push_str("top words:");
            for wc in &self.top_words {
                out.push_str(&format!(" {}({})", wc.word, wc.count));
            }
            out.push('\n');
        }
        out
    }
}
