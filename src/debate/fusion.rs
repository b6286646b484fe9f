//! Consensus clustering and fusion (§4.7 steps 3 and 5).
//!
//! Arguments are clustered by token-trigram Jaccard similarity — cheap,
//! deterministic, and good enough to group near-duplicate phrasings
//! ("Paris" / "Paris.") without needing an embedding provider in the
//! loop.

use std::collections::HashSet;

use super::types::{Argument, FusionStrategy};

const SIMILARITY_THRESHOLD: f64 = 0.5;

fn normalize(text: &str) -> String {
    text.trim().trim_end_matches('.').to_lowercase()
}

fn trigrams(text: &str) -> HashSet<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 3 {
        return tokens.windows(1).map(|w| w.join(" ")).collect();
    }
    tokens.windows(3).map(|w| w.join(" ")).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 { 0.0 } else { intersection / union }
}

pub struct Cluster<'a> {
    pub members: Vec<&'a Argument>,
}

impl<'a> Cluster<'a> {
    pub fn avg_confidence(&self) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        self.members.iter().map(|a| a.confidence).sum::<f64>() / self.members.len() as f64
    }

    /// The cluster's canonical representative: normalized text of the
    /// highest-scoring member (ties break on lowest latency).
    pub fn representative(&self) -> &'a Argument {
        self.members
            .iter()
            .copied()
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.latency_ms.cmp(&a.latency_ms))
            })
            .expect("cluster is never constructed empty")
    }
}

/// Groups arguments whose normalized trigram overlap exceeds the
/// similarity threshold. Greedy single-pass clustering: each argument
/// joins the first cluster it's similar enough to, else starts a new
/// one. Good enough at debate scale (a handful of participants).
pub fn cluster_arguments(arguments: &[Argument]) -> Vec<Cluster<'_>> {
    let mut clusters: Vec<Cluster<'_>> = Vec::new();
    let grams: Vec<HashSet<String>> = arguments.iter().map(|a| trigrams(&normalize(&a.text))).collect();

    'outer: for (i, arg) in arguments.iter().enumerate() {
        for cluster in clusters.iter_mut() {
            let rep_idx = arguments.iter().position(|a| std::ptr::eq(a, cluster.members[0])).unwrap_or(0);
            if jaccard(&grams[i], &grams[rep_idx]) >= SIMILARITY_THRESHOLD {
                cluster.members.push(arg);
                continue 'outer;
            }
        }
        clusters.push(Cluster { members: vec![arg] });
    }
    clusters
}

/// Index of the largest cluster, breaking size ties by the highest-score
/// representative (§4.7 step 5 "tie → highest-score provider's text").
fn majority_cluster_idx(clusters: &[Cluster<'_>]) -> Option<usize> {
    let max_size = clusters.iter().map(|c| c.members.len()).max()?;
    clusters
        .iter()
        .enumerate()
        .filter(|(_, c)| c.members.len() == max_size)
        .max_by(|(_, a), (_, b)| {
            a.representative()
                .score
                .partial_cmp(&b.representative().score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(idx, _)| idx)
}

/// `confidence = (M/N)·c̄` where `M` is the majority cluster's size, `N`
/// the total participating arguments, `c̄` its average confidence.
pub fn consensus_confidence(clusters: &[Cluster<'_>], total_arguments: usize) -> (usize, f64) {
    let Some(idx) = majority_cluster_idx(clusters) else {
        return (0, 0.0);
    };
    let majority = &clusters[idx];
    if total_arguments == 0 {
        return (idx, 0.0);
    }
    let m = majority.members.len() as f64;
    let n = total_arguments as f64;
    (idx, (m / n) * majority.avg_confidence())
}

/// Fuses a round's arguments into one consensus text, per the strategy
/// picked in §4.7 step 5. `judge_text` is the adjudication/synthesis
/// text already produced by a judge-capable provider call, required
/// for `Judge`/`Deliberative` and ignored otherwise.
pub fn fuse<'a>(strategy: FusionStrategy, arguments: &'a [Argument], judge_text: Option<&str>) -> (String, f64) {
    match strategy {
        FusionStrategy::Majority => {
            let clusters = cluster_arguments(arguments);
            let (idx, confidence) = consensus_confidence(&clusters, arguments.len());
            let text = clusters.get(idx).map(|c| c.representative().text.clone()).unwrap_or_default();
            (text, confidence)
        }
        FusionStrategy::Weighted => {
            let best = arguments.iter().max_by(|a, b| {
                (a.score * a.confidence)
                    .partial_cmp(&(b.score * b.confidence))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.latency_ms.cmp(&a.latency_ms))
            });
            match best {
                Some(a) => (a.text.clone(), a.confidence),
                None => (String::new(), 0.0),
            }
        }
        FusionStrategy::Judge | FusionStrategy::Deliberative => {
            let text = judge_text.unwrap_or_default().to_string();
            let confidence = if arguments.is_empty() {
                0.0
            } else {
                arguments.iter().map(|a| a.confidence).sum::<f64>() / arguments.len() as f64
            };
            (text, confidence)
        }
    }
}
