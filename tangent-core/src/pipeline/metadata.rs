//! Topic labels and coherence scores for clusters.

use crate::services::{clean_response, TextGenerator};
use crate::types::ClusterMetadata;
use std::collections::BTreeMap;

/// Label used when the generator answers with nothing.
pub const EMPTY_TOPIC: &str = "Miscellaneous";

/// Label used when the generator call fails.
pub const FAILED_TOPIC: &str = "Topic Generation Failed";

/// Prompt asking for one short label describing `titles`.
pub fn topic_prompt(titles: &[&str]) -> String {
    let mut prompt = String::from(
        "You are a technical topic analyzer. Review these related titles and provide \
         a single concise topic label (2-4 words) that best describes their common theme.\n\n\
         Titles:\n",
    );
    for title in titles {
        prompt.push_str("- ");
        prompt.push_str(title);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nProvide ONLY the topic label, nothing else. Examples:\n\
         \"Network Security Tools\"\n\
         \"UI Animation Design\"\n\
         \"Data Visualization\"\n\
         \"API Integration\"\n",
    );
    prompt
}

/// Ask the generator for a topic label; never fails.
pub fn generate_topic(generator: &dyn TextGenerator, titles: &[&str], temperature: f32) -> String {
    match generator.generate(&topic_prompt(titles), temperature) {
        Ok(raw) => {
            let topic = clean_response(&raw);
            if topic.is_empty() {
                EMPTY_TOPIC.to_string()
            } else {
                topic
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, titles = titles.len(), "Topic generation failed");
            FAILED_TOPIC.to_string()
        }
    }
}

/// Mean `1 - d(i, j)` over unordered member pairs; 1.0 below two members.
pub fn coherence(members: &[usize], distances: &[Vec<f64>]) -> f64 {
    if members.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (a, &i) in members.iter().enumerate() {
        for &j in &members[a + 1..] {
            total += 1.0 - distances[i][j];
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// One [`ClusterMetadata`] per distinct label, keyed by cluster id.
pub fn generate_metadata(
    labels: &[i32],
    titles: &[String],
    distances: &[Vec<f64>],
    generator: &dyn TextGenerator,
    temperature: f32,
) -> BTreeMap<i32, ClusterMetadata> {
    let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (idx, label) in labels.iter().enumerate() {
        members.entry(*label).or_default().push(idx);
    }

    members
        .into_iter()
        .map(|(cluster, idx)| {
            let cluster_titles: Vec<&str> = idx.iter().map(|&i| titles[i].as_str()).collect();
            let topic = generate_topic(generator, &cluster_titles, temperature);
            tracing::debug!(cluster, size = idx.len(), topic = %topic, "Labelled cluster");
            (
                cluster,
                ClusterMetadata {
                    topic,
                    size: idx.len(),
                    coherence: coherence(&idx, distances),
                    reflection: String::new(),
                },
            )
        })
        .collect()
}
