//! Glyph matching.
//!
//! The fast path is an exact signature lookup in the coordinate table and lives
//! in [`Engine`](crate::engine::Engine). This module holds the slow path: a
//! nearest-shape search of an unknown outline against reference fonts.
//!
//! # Slow path
//!
//! 1. A reference glyph with the very same signature answers immediately with
//!    score 0.
//! 2. Otherwise every candidate allowed by the [`GuessRange`] gets a cheap lower
//!    bound from sample bounding boxes. Candidates are visited in ascending
//!    bound order and the walk stops once the bound passes the best distance so
//!    far (or the acceptance threshold, whichever is smaller).
//! 3. Each visited candidate is compared by symmetric Hausdorff distance, with
//!    an early break once the running maximum passes the same limit.
//!
//! Scores are distances divided by the normalised extent (1000), so a score of
//! 0.02 means the outlines are nowhere further apart than 2% of the glyph size.
//! Only scores at or below the acceptance threshold resolve; anything else is
//! reported as unresolved rather than guessed.

pub mod geometry;
pub mod reference;

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::signature::{NormalizedShape, ShapeSignature, SIGNATURE_EXTENT};

use geometry::{hausdorff_within, SampledShape};
pub use reference::{GuessRange, ReferenceFontIndex, ReferenceGlyph};

/// Scores below this end the search.
const NEAR_ZERO_SCORE: f64 = 1e-9;

/// How a character was identified.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Provenance {
    /// Signature found in the coordinate table
    Exact,
    /// Nearest reference glyph
    Geometric {
        /// Normalised Hausdorff distance (0 = identical)
        score: f64,
    },
}

/// Why no character was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// Fast path miss; the slow path was not requested
    NotInTable,
    /// The glyph has no outline to compare
    EmptyOutline,
    /// The font's cmap points at a glyph the font does not contain
    MissingGlyph,
    /// Every candidate scored above the acceptance threshold
    NoConfidentMatch {
        /// Candidates fully compared
        candidates_examined: usize,
    },
    /// The slow-path deadline passed
    TimedOut {
        /// Time spent before giving up
        elapsed: Duration,
    },
}

/// Outcome of identifying one glyph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult {
    /// The glyph represents `character`.
    Resolved {
        /// Identified character
        character: char,
        /// How it was identified
        provenance: Provenance,
    },
    /// No confident answer.
    Unresolved(UnresolvedReason),
}

impl MatchResult {
    /// Identified character, if any.
    pub fn character(&self) -> Option<char> {
        match self {
            MatchResult::Resolved { character, .. } => Some(*character),
            MatchResult::Unresolved(_) => None,
        }
    }

    /// True for [`MatchResult::Resolved`].
    pub fn is_resolved(&self) -> bool {
        matches!(self, MatchResult::Resolved { .. })
    }

    /// Provenance of a resolved result.
    pub fn provenance(&self) -> Option<Provenance> {
        match self {
            MatchResult::Resolved { provenance, .. } => Some(*provenance),
            MatchResult::Unresolved(_) => None,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::Resolved {
                character,
                provenance: Provenance::Exact,
            } => write!(f, "{} (exact)", character),
            MatchResult::Resolved {
                character,
                provenance: Provenance::Geometric { score },
            } => write!(f, "{} (geometric, score {:.4})", character, score),
            MatchResult::Unresolved(UnresolvedReason::NotInTable) => write!(f, "unresolved (not in table)"),
            MatchResult::Unresolved(UnresolvedReason::EmptyOutline) => write!(f, "unresolved (empty outline)"),
            MatchResult::Unresolved(UnresolvedReason::MissingGlyph) => write!(f, "unresolved (missing glyph)"),
            MatchResult::Unresolved(UnresolvedReason::NoConfidentMatch { candidates_examined }) => {
                write!(f, "unresolved (no confident match in {} candidates)", candidates_examined)
            },
            MatchResult::Unresolved(UnresolvedReason::TimedOut { elapsed }) => {
                write!(f, "unresolved (timed out after {:?})", elapsed)
            },
        }
    }
}

/// Result of a slow-path call, with its cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowMatch {
    /// Identification outcome
    pub result: MatchResult,
    /// Wall time spent
    pub elapsed: Duration,
    /// Reference glyphs fully compared
    pub candidates_examined: usize,
}

/// Bounds on one slow search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    /// Maximum accepted score
    pub accept_threshold: f64,
    /// Maximum candidates compared per search (0 = unlimited)
    pub max_candidates: usize,
    /// Sampling step in normalised units
    pub sample_step: f64,
    /// Give up once this instant has passed
    pub deadline: Option<Instant>,
}

impl SearchLimits {
    /// Limits from engine configuration, with the deadline counted from `started`.
    pub fn from_config(config: &EngineConfig, started: Instant) -> Self {
        Self {
            accept_threshold: config.accept_threshold,
            max_candidates: config.max_candidates,
            sample_step: config.sample_step,
            deadline: started.checked_add(config.slow_timeout),
        }
    }
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default(), Instant::now())
    }
}

/// Best accepted candidate so far.
#[derive(Debug, Clone, Copy)]
struct Best {
    distance: f64,
    character: char,
    glyph_id: u16,
}

/// Search one reference font.
///
/// `shape` must be the normalised outline `signature` was computed from.
pub fn search(
    shape: &NormalizedShape,
    signature: &ShapeSignature,
    index: &ReferenceFontIndex,
    range: &GuessRange,
    limits: &SearchLimits,
) -> SlowMatch {
    let started = Instant::now();

    if let Some(glyph) = index.exact(signature) {
        if let Some(character) = glyph.character_in(range) {
            log::debug!(
                "Reference {} glyph {} has the same signature: '{}'",
                index.name(),
                glyph.glyph_id,
                character
            );
            return SlowMatch {
                result: MatchResult::Resolved {
                    character,
                    provenance: Provenance::Geometric { score: 0.0 },
                },
                elapsed: started.elapsed(),
                candidates_examined: 1,
            };
        }
    }

    let samples = SampledShape::from_shape(shape, index.sample_step());
    let Some(bounds) = samples.bounds() else {
        return SlowMatch {
            result: MatchResult::Unresolved(UnresolvedReason::EmptyOutline),
            elapsed: started.elapsed(),
            candidates_examined: 0,
        };
    };

    let mut candidates: Vec<(f64, char, &ReferenceGlyph)> = index
        .glyphs()
        .iter()
        .filter_map(|g| {
            g.character_in(range)
                .map(|c| (bounds.hausdorff_lower_bound(&g.bounds()), c, g))
        })
        .collect();
    candidates.sort_by(|a, b| match a.0.total_cmp(&b.0) {
        Ordering::Equal => a.1.cmp(&b.1),
        other => other,
    });

    let threshold = limits.accept_threshold * SIGNATURE_EXTENT;
    let mut best: Option<Best> = None;
    let mut examined = 0usize;
    let mut timed_out = false;

    for (lower_bound, character, glyph) in candidates {
        let limit = best.map_or(threshold, |b| b.distance.min(threshold));
        if lower_bound > limit {
            break;
        }
        if limits.max_candidates > 0 && examined >= limits.max_candidates {
            log::debug!("Candidate cap {} reached", limits.max_candidates);
            break;
        }
        if limits.deadline.is_some_and(|d| Instant::now() >= d) {
            timed_out = true;
            break;
        }

        examined += 1;
        let Some(distance) = hausdorff_within(&samples, glyph.samples(), limit) else {
            continue;
        };
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(Best {
                distance,
                character,
                glyph_id: glyph.glyph_id,
            });
            if distance / SIGNATURE_EXTENT < NEAR_ZERO_SCORE {
                break;
            }
        }
    }

    let elapsed = started.elapsed();
    let result = if timed_out {
        log::warn!(
            "Slow search in {} timed out after {:?} ({} candidates)",
            index.name(),
            elapsed,
            examined
        );
        MatchResult::Unresolved(UnresolvedReason::TimedOut { elapsed })
    } else {
        match best {
            Some(b) => {
                let score = b.distance / SIGNATURE_EXTENT;
                log::debug!(
                    "Reference {} glyph {} matches '{}' with score {:.5}",
                    index.name(),
                    b.glyph_id,
                    b.character,
                    score
                );
                MatchResult::Resolved {
                    character: b.character,
                    provenance: Provenance::Geometric { score },
                }
            },
            None => {
                log::debug!(
                    "No confident match in {} after {} candidates",
                    index.name(),
                    examined
                );
                MatchResult::Unresolved(UnresolvedReason::NoConfidentMatch {
                    candidates_examined: examined,
                })
            },
        }
    };

    SlowMatch {
        result,
        elapsed,
        candidates_examined: examined,
    }
}

/// Search several reference fonts in priority order.
///
/// The first font that yields a confident match answers; a timeout in any font
/// stops the whole search.
pub fn search_all<'a>(
    shape: &NormalizedShape,
    signature: &ShapeSignature,
    indices: impl IntoIterator<Item = &'a ReferenceFontIndex>,
    range: &GuessRange,
    limits: &SearchLimits,
) -> SlowMatch {
    let started = Instant::now();
    let mut examined = 0usize;

    for index in indices {
        let found = search(shape, signature, index, range, limits);
        examined += found.candidates_examined;
        match found.result {
            MatchResult::Resolved { .. } => {
                return SlowMatch {
                    result: found.result,
                    elapsed: started.elapsed(),
                    candidates_examined: examined,
                };
            },
            MatchResult::Unresolved(UnresolvedReason::TimedOut { .. }) => {
                let elapsed = started.elapsed();
                return SlowMatch {
                    result: MatchResult::Unresolved(UnresolvedReason::TimedOut { elapsed }),
                    elapsed,
                    candidates_examined: examined,
                };
            },
            MatchResult::Unresolved(UnresolvedReason::EmptyOutline) => {
                return SlowMatch {
                    result: found.result,
                    elapsed: started.elapsed(),
                    candidates_examined: examined,
                };
            },
            MatchResult::Unresolved(_) => {},
        }
    }

    SlowMatch {
        result: MatchResult::Unresolved(UnresolvedReason::NoConfidentMatch {
            candidates_examined: examined,
        }),
        elapsed: started.elapsed(),
        candidates_examined: examined,
    }
}
