//! Nearest-neighbour matching of a query against stored embeddings.

use super::ModelEmbeddings;

/// Distance threshold used when a model has no entry in [`model_threshold`].
pub const DEFAULT_MODEL_THRESHOLD: f32 = 0.50;

/// Cosine-distance upper bound per model; a distance at the bound maps to 0%.
pub fn model_threshold(model: &str) -> f32 {
    match model {
        "Facenet512" => 0.40,
        "ArcFace" => 0.60,
        _ => DEFAULT_MODEL_THRESHOLD,
    }
}

/// Cosine similarity in [-1, 1]. Zero-norm inputs give 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Maps a distance onto a 0..=100 confidence relative to `threshold`.
pub fn distance_to_percent(distance: f32, threshold: f32) -> f32 {
    ((1.0 - distance / threshold) * 100.0).clamp(0.0, 100.0)
}

/// A registered student as held by the gallery.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub user_id: u64,
    pub name: String,
    pub roll_no: Option<String>,
    pub embeddings: ModelEmbeddings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub matched: bool,
    pub user_id: Option<u64>,
    pub name: Option<String>,
    pub roll_no: Option<String>,
    /// Ensemble confidence in percent, one decimal.
    pub confidence: f32,
}

impl MatchOutcome {
    fn unmatched(confidence: f32) -> Self {
        Self {
            matched: false,
            user_id: None,
            name: None,
            roll_no: None,
            confidence,
        }
    }
}

/// Average per-model confidence between a query and one stored identity.
/// `None` when they share no model.
pub fn ensemble_confidence(query: &ModelEmbeddings, stored: &ModelEmbeddings) -> Option<f32> {
    let confs: Vec<f32> = query
        .iter()
        .filter_map(|(model, q)| {
            stored.get(model).map(|s| {
                distance_to_percent(cosine_distance(q, s), model_threshold(model))
            })
        })
        .collect();

    if confs.is_empty() {
        None
    } else {
        Some(confs.iter().sum::<f32>() / confs.len() as f32)
    }
}

/// Picks the gallery entry with the highest ensemble confidence and accepts
/// it only at or above `accept_percent`.
pub fn best_match(
    query: &ModelEmbeddings,
    gallery: &[GalleryEntry],
    accept_percent: f32,
) -> MatchOutcome {
    let mut best: Option<(&GalleryEntry, f32)> = None;

    for entry in gallery {
        let Some(conf) = ensemble_confidence(query, &entry.embeddings) else {
            continue;
        };
        if best.map_or(true, |(_, b)| conf > b) {
            best = Some((entry, conf));
        }
    }

    match best {
        Some((entry, conf)) if conf >= accept_percent => MatchOutcome {
            matched: true,
            user_id: Some(entry.user_id),
            name: Some(entry.name.clone()),
            roll_no: entry.roll_no.clone(),
            confidence: round1(conf),
        },
        Some((_, conf)) => MatchOutcome::unmatched(round1(conf)),
        None => MatchOutcome::unmatched(0.0),
    }
}

/// Returns the first *other* user whose stored face is too similar to the
/// query on any shared model.
pub fn find_duplicate<'a, I>(
    query: &ModelEmbeddings,
    candidates: I,
    exclude_user: u64,
    threshold: f32,
) -> Option<u64>
where
    I: IntoIterator<Item = (u64, &'a ModelEmbeddings)>,
{
    candidates
        .into_iter()
        .filter(|(user_id, _)| *user_id != exclude_user)
        .find(|(_, stored)| {
            query.iter().any(|(model, q)| {
                stored
                    .get(model)
                    .is_some_and(|s| cosine_similarity(q, s) >= threshold)
            })
        })
        .map(|(user_id, _)| user_id)
}

/// Element-wise mean. Vectors whose length differs from the first are skipped.
pub fn average_embeddings(frames: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = frames.first()?;
    let dim = first.len();
    if dim == 0 {
        return None;
    }

    let mut sum = vec![0.0f32; dim];
    let mut n = 0usize;
    for frame in frames.iter().filter(|f| f.len() == dim) {
        for (acc, v) in sum.iter_mut().zip(frame) {
            *acc += v;
        }
        n += 1;
    }

    Some(sum.into_iter().map(|v| v / n as f32).collect())
}

/// Scales to unit length; zero vectors are rejected.
pub fn l2_normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 1e-9 {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(pairs: &[(&str, Vec<f32>)]) -> ModelEmbeddings {
        pairs.iter().map(|(m, v)| (m.to_string(), v.clone())).collect()
    }

    fn entry(id: u64, name: &str, e: ModelEmbeddings) -> GalleryEntry {
        GalleryEntry {
            user_id: id,
            name: name.into(),
            roll_no: Some(format!("R{id}")),
            embeddings: e,
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn distance_to_percent_is_clamped() {
        assert_eq!(distance_to_percent(0.0, 0.4), 100.0);
        assert!((distance_to_percent(0.2, 0.4) - 50.0).abs() < 1e-4);
        assert_eq!(distance_to_percent(0.9, 0.4), 0.0);
    }

    #[test]
    fn best_match_picks_highest_ensemble_score() {
        let gallery = vec![
            entry(1, "decoy", emb(&[("Facenet512", vec![0.0, 1.0])])),
            entry(2, "asha", emb(&[("Facenet512", vec![1.0, 0.05])])),
        ];
        let query = emb(&[("Facenet512", vec![1.0, 0.0])]);

        let out = best_match(&query, &gallery, 50.0);
        assert!(out.matched);
        assert_eq!(out.user_id, Some(2));
        assert_eq!(out.name.as_deref(), Some("asha"));
        assert!(out.confidence > 90.0);
    }

    #[test]
    fn best_match_below_accept_percent_is_unknown_but_reports_confidence() {
        // distance 0.3 on Facenet512 → 25%
        let stored = vec![0.7, (1.0f32 - 0.49).sqrt()];
        let gallery = vec![entry(1, "x", emb(&[("Facenet512", stored)]))];
        let query = emb(&[("Facenet512", vec![1.0, 0.0])]);

        let out = best_match(&query, &gallery, 50.0);
        assert!(!out.matched);
        assert_eq!(out.user_id, None);
        assert!((out.confidence - 25.0).abs() < 0.2);
    }

    #[test]
    fn ensemble_averages_only_shared_models() {
        let query = emb(&[("Facenet512", vec![1.0, 0.0]), ("ArcFace", vec![1.0, 0.0])]);
        let stored = emb(&[("Facenet512", vec![1.0, 0.0]), ("ArcFace", vec![0.0, 1.0])]);
        // 100% on Facenet512, 0% on ArcFace (distance 1.0 > 0.6)
        assert_eq!(ensemble_confidence(&query, &stored), Some(50.0));

        let unrelated = emb(&[("VGG-Face", vec![1.0, 0.0])]);
        assert_eq!(ensemble_confidence(&query, &unrelated), None);
    }

    #[test]
    fn best_match_on_empty_gallery() {
        let out = best_match(&emb(&[("Facenet512", vec![1.0])]), &[], 50.0);
        assert!(!out.matched);
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn duplicate_check_ignores_the_registering_user() {
        let mine = emb(&[("Facenet512", vec![1.0, 0.0])]);
        let other = emb(&[("Facenet512", vec![0.0, 1.0])]);
        let query = emb(&[("Facenet512", vec![1.0, 0.01])]);

        let candidates = vec![(5u64, &mine), (6u64, &other)];
        assert_eq!(find_duplicate(&query, candidates.clone(), 5, 0.7), None);
        assert_eq!(find_duplicate(&query, candidates, 6, 0.7), Some(5));
    }

    #[test]
    fn average_skips_mismatched_lengths() {
        let avg = average_embeddings(&[vec![1.0, 3.0], vec![3.0, 5.0], vec![9.0]]).unwrap();
        assert_eq!(avg, vec![2.0, 4.0]);
        assert!(average_embeddings(&[]).is_none());
    }

    #[test]
    fn normalize_rejects_zero_vectors() {
        let n = l2_normalize(&[3.0, 4.0]).unwrap();
        assert!((n[0] - 0.6).abs() < 1e-6 && (n[1] - 0.8).abs() < 1e-6);
        assert!(l2_normalize(&[0.0, 0.0]).is_none());
    }
}
